//! Candidate link extraction from listing page markup
//!
//! Links are taken from `a[href]`, `iframe[src]`, `embed[src]`,
//! `video[src]`, `source[src]` and URLs embedded in `<script>` text, in
//! document order. A link qualifies when its host belongs to a configured
//! video host and its context (anchor text, `title` attribute, nearby
//! headings) contains at least one keyword.

use crate::config::{Config, HostPattern};
use crate::error::ExtractionError;
use crate::types::{CandidateLink, HostPlatform};
use crate::utils::title_from_url;
use chrono::{DateTime, Utc};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::{BTreeSet, HashSet};
use url::Url;

/// Elements that carry video URLs
const LINK_SELECTOR: &str = "a[href], iframe[src], embed[src], video[src], source[src], script";

/// URLs inside inline scripts
const SCRIPT_URL_PATTERN: &str = r#"https?://[^"'\s<>\\]+"#;

/// Upper bound on the context text inspected for keywords, in characters
const MAX_CONTEXT_CHARS: usize = 512;

/// How many ancestors are searched for headings
const HEADING_ANCESTORS: usize = 3;

/// Keyword and host-pattern matcher over listing page markup
#[derive(Debug)]
pub struct LinkExtractor {
    keywords: Vec<String>,
    exclude_phrases: Vec<String>,
    host_patterns: Vec<HostPattern>,
    link_selector: Selector,
    script_url: Regex,
}

impl LinkExtractor {
    /// Build an extractor from the configured keyword and host sets
    pub fn new(config: &Config) -> Result<Self, ExtractionError> {
        let link_selector =
            Selector::parse(LINK_SELECTOR).map_err(|e| ExtractionError::InvalidSelector {
                selector: LINK_SELECTOR.to_string(),
                reason: e.to_string(),
            })?;
        let script_url = Regex::new(SCRIPT_URL_PATTERN)?;

        Ok(Self {
            keywords: normalize_all(&config.keywords),
            exclude_phrases: normalize_all(&config.exclude_phrases),
            host_patterns: config.host_patterns.clone(),
            link_selector,
            script_url,
        })
    }

    /// Extract qualifying links from `content`
    ///
    /// Relative URLs are resolved against `base`. Unresolvable or non-http(s)
    /// URLs are dropped silently. The result is deduplicated and ordered by
    /// first occurrence.
    pub fn extract(
        &self,
        content: &str,
        base: &Url,
        discovered_at: DateTime<Utc>,
    ) -> Vec<CandidateLink> {
        let document = Html::parse_document(content);
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();

        for element in document.select(&self.link_selector) {
            for (raw, anchor_text) in self.raw_links(element) {
                let Some(url) = resolve(base, &raw) else {
                    continue;
                };
                let Some(host_platform) = classify(&url, &self.host_patterns) else {
                    continue;
                };
                if seen.contains(url.as_str()) {
                    continue;
                }
                if self.is_excluded(&anchor_text) {
                    tracing::trace!(url = %url, text = %anchor_text, "skipping navigation link");
                    continue;
                }

                let title_attr = element.value().attr("title").unwrap_or_default().trim();
                let headings = nearby_headings(element);
                let context = build_context(&[&anchor_text, title_attr, &headings]);

                let matched_keywords = self.matching_keywords(&context);
                if matched_keywords.is_empty() {
                    continue;
                }

                let title = [anchor_text.as_str(), title_attr, headings.as_str()]
                    .into_iter()
                    .find(|t| !t.is_empty())
                    .map(str::to_string)
                    .unwrap_or_else(|| title_from_url(&url));

                seen.insert(url.to_string());
                candidates.push(CandidateLink {
                    url: url.to_string(),
                    host_platform,
                    matched_keywords,
                    discovered_at,
                    title,
                });
            }
        }

        tracing::debug!(candidates = candidates.len(), "extracted candidate links");
        candidates
    }

    /// Raw URLs of one element, each with its anchor text
    fn raw_links(&self, element: ElementRef<'_>) -> Vec<(String, String)> {
        let node = element.value();
        match node.name() {
            "script" => {
                let body: String = element.text().collect();
                self.script_url
                    .find_iter(&body)
                    .map(|m| (m.as_str().to_string(), String::new()))
                    .collect()
            }
            "a" => node
                .attr("href")
                .map(|href| (href.to_string(), element_text(element)))
                .into_iter()
                .collect(),
            _ => node
                .attr("src")
                .map(|src| (src.to_string(), String::new()))
                .into_iter()
                .collect(),
        }
    }

    fn is_excluded(&self, anchor_text: &str) -> bool {
        let text = anchor_text.to_lowercase();
        !text.is_empty() && self.exclude_phrases.iter().any(|p| *p == text)
    }

    fn matching_keywords(&self, context: &str) -> BTreeSet<String> {
        let context = context.to_lowercase();
        self.keywords
            .iter()
            .filter(|k| context.contains(k.as_str()))
            .cloned()
            .collect()
    }
}

/// Platform of the configured host pattern matching `url`, if any
pub fn classify(url: &Url, patterns: &[HostPattern]) -> Option<HostPlatform> {
    let host = url.host_str()?;
    patterns
        .iter()
        .find(|pattern| pattern.matches(host))
        .map(|pattern| pattern.platform)
}

/// Resolve `raw` against `base`, keeping only fragment-free http(s) URLs
fn resolve(base: &Url, raw: &str) -> Option<Url> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let mut url = base.join(raw).ok()?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return None;
    }
    url.set_fragment(None);
    Some(url)
}

/// Whitespace-collapsed text content of an element
fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_heading(name: &str) -> bool {
    matches!(name, "h1" | "h2" | "h3" | "h4" | "h5" | "h6")
}

/// Text of headings that are, or are direct children of, the nearest ancestors
///
/// The walk stops at `<body>` so page-wide headings do not leak into every
/// link's context.
fn nearby_headings(element: ElementRef<'_>) -> String {
    let mut parts = Vec::new();
    let ancestors = element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .take_while(|a| !matches!(a.value().name(), "body" | "html"))
        .take(HEADING_ANCESTORS);

    for ancestor in ancestors {
        if is_heading(ancestor.value().name()) {
            parts.push(element_text(ancestor));
            continue;
        }
        parts.extend(
            ancestor
                .children()
                .filter_map(ElementRef::wrap)
                .filter(|child| is_heading(child.value().name()))
                .map(element_text),
        );
    }

    parts.retain(|p| !p.is_empty());
    parts.join(" ")
}

/// Join the non-empty context parts, bounded to the context window
fn build_context(parts: &[&str]) -> String {
    let joined = parts
        .iter()
        .filter(|p| !p.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" ");
    joined.chars().take(MAX_CONTEXT_CHARS).collect()
}

fn normalize_all(values: &[String]) -> Vec<String> {
    values
        .iter()
        .map(|v| v.trim().to_lowercase())
        .filter(|v| !v.is_empty())
        .collect()
}
