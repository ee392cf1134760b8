pub mod cli;
pub mod config;
pub mod downloader;
pub mod logging;
pub mod web;
pub mod ytdlp;

pub use config::Config;
pub use downloader::{DownloadError, Downloader};
pub use ytdlp::YtDlpExtractor;
