//! Per-host format selection

use crate::types::HostPlatform;

/// Format selector and extra engine arguments for one host platform
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FormatPolicy {
    /// yt-dlp `--format` expression
    pub format: &'static str,
    /// Additional arguments appended to the transfer command
    pub extra_args: &'static [&'static str],
}

const OK_RU: FormatPolicy = FormatPolicy {
    format: "hd/sd/low/lowest",
    extra_args: &["--referer", "https://ok.ru/"],
};

const YOUTUBE: FormatPolicy = FormatPolicy {
    format: "best[height<=1080]",
    extra_args: &[],
};

const BANDWIDTH_BOUNDED: FormatPolicy = FormatPolicy {
    format: "best[height<=720]/best",
    extra_args: &[],
};

const DEFAULT: FormatPolicy = FormatPolicy {
    format: "best",
    extra_args: &[],
};

impl FormatPolicy {
    /// Policy for `platform`
    pub fn for_platform(platform: HostPlatform) -> Self {
        match platform {
            HostPlatform::OkRu => OK_RU,
            HostPlatform::YouTube => YOUTUBE,
            HostPlatform::Dailymotion | HostPlatform::Vimeo => BANDWIDTH_BOUNDED,
            HostPlatform::Streamable | HostPlatform::Other => DEFAULT,
        }
    }

    /// Extra arguments as owned strings
    pub fn extra_args(&self) -> Vec<String> {
        self.extra_args.iter().map(|a| a.to_string()).collect()
    }
}
