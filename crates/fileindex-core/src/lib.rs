pub mod actions;
pub mod archive;
pub mod catalog;
pub mod checksum;
pub mod config;
pub mod context;
pub mod error;
pub mod index;
pub mod matching;
pub mod media;
pub mod platform;
pub mod progress;
pub mod scanner;

pub use catalog::{Catalog, CatalogOptions, IndexRun, LocatedFile};
pub use config::{load_configuration, AppConfig};
pub use context::{CancelToken, IndexStats, RunContext};
pub use error::{Error, Result};
pub use index::{IndexOptions, IndexOutcome, Indexer};
pub use matching::{MatchMode, MatchModes, Matcher, PairFilter};
pub use progress::{ProgressReporter, SilentReporter};
