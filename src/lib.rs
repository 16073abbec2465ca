//! Records what you are doing throughout the day. A screenshot is taken on a schedule, described
//! by a vision-language model and appended to a JSON activity log. A browser extension drives the
//! recorder through native messaging, the CLI covers the same ground from a terminal.

pub mod analysis;
pub mod capture;
pub mod cli;
pub mod daemon;
pub mod error;
pub mod fs;
pub mod settings;
pub mod utils;
