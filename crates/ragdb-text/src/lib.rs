pub mod analyzer;
pub mod index;

pub use analyzer::{build_analyzer, tokenize};
pub use index::{KeywordIndex, KeywordStats};
