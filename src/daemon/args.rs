use std::path::PathBuf;

use clap::Parser;
use tracing::level_filters::LevelFilter;

use super::transport::Framing;

#[derive(Parser)]
pub struct HostArgs {
    /// Application directory holding the activity log, settings and screenshots.
    #[arg(long)]
    pub dir: Option<PathBuf>,
    /// Read and write line-delimited JSON instead of native messaging frames.
    #[arg(long)]
    pub lines: bool,
    /// Mirror logs to stderr. This option is for debugging purposes only.
    #[arg(long = "log-console")]
    pub log_console: bool,
    #[arg(long = "log-filter")]
    pub log: Option<LevelFilter>,
    /// Windows browsers pass the handle of the calling window.
    #[arg(long = "parent-window", hide = true)]
    pub parent_window: Option<String>,
    /// Browsers pass the caller's origin (and, for Firefox, the manifest path).
    #[arg(hide = true)]
    pub caller: Vec<String>,
}

impl HostArgs {
    pub fn framing(&self) -> Framing {
        if self.lines {
            Framing::Lines
        } else {
            Framing::Native
        }
    }
}
