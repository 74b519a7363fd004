pub mod filter;
pub mod walk;

pub use filter::{ExcludeFilter, IncludeFilter};
pub use walk::{DirListing, ScannedFile, Scanner, Survey};
