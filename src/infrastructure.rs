//! Infrastructure layer: configuration, logging, fetching, parsing and storage
//!
//! Everything that touches the network, a browser or the filesystem lives
//! here, behind the traits the pipeline consumes.

pub mod browser;
#[cfg(feature = "browser")]
pub mod chromium_driver;
pub mod config;
pub mod cost_ledger;
pub mod csv_store;
pub mod fetch_error;
pub mod fetcher;
pub mod http_client;
pub mod logging;
pub mod parsing;

// Re-export commonly used items
pub use browser::{BrowserLauncher, BrowserSession, DrivenFetcher, FeedSession, FeedState, Probe, ResumeSignal};
#[cfg(feature = "browser")]
pub use chromium_driver::ChromiumLauncher;
pub use config::{AppConfig, ConfigError};
pub use cost_ledger::CostLedger;
pub use csv_store::{CsvRecordStore, PersistenceError, RecordStore};
pub use fetch_error::{BlockKind, FetchError, FetchResult};
pub use fetcher::{Document, Fetcher, SourceFetcher};
pub use http_client::{HttpFetcher, HttpTransport, ListingPage, ReqwestTransport, TransportError};
pub use logging::{init_logging, init_logging_with_config};
pub use parsing::{DocumentParser, ParsingConfig, ParsingError, ParsingResult};
