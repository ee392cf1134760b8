// Downloader core: selection, retry, history and the extractor seam

pub mod cookies;
pub mod errors;
pub mod format_selector;
pub mod history;
pub mod models;
pub mod orchestrator;
pub mod preferences;
pub mod presets;
pub mod retry;
pub mod traits;
pub mod utils;

pub use errors::{DownloadError, StorageError};
pub use format_selector::{Selection, SmartFormatSelector};
pub use models::{DownloadOptions, DownloadProgress, FormatDescriptor, MediaInfo, Platform};
pub use orchestrator::{DownloadReport, Downloader};
pub use retry::RetryPolicy;
pub use traits::{FetchRequest, MediaExtractor, ProgressSink};
