pub mod config;
pub mod crawler;
pub mod error;
pub mod extract;
pub mod frontier;
pub mod network;
pub mod pool;
pub mod report;
pub mod utils;

pub use config::{BasicAuth, SpiderConfig};
pub use crawler::{CrawlState, CrawlSummary, PageRecord, Spider};
pub use error::{FetchError, SpiderError};
pub use network::{FetchedPage, NetworkClient, PageSource};
