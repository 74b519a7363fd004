pub mod filter;
pub mod key;
pub mod mode;
pub mod ops;
pub mod stream;

#[cfg(test)]
pub(crate) mod test_support;

pub use filter::PairFilter;
pub use key::KeyComposer;
pub use mode::{MatchMode, MatchModes};
pub use ops::{left, right, without_empty_files, Matcher};
