//! ragdb-vector
//!
//! Vector persistence and cosine similarity search. [`LanceVectorStore`] keeps
//! records in a LanceDB table; [`MemoryVectorStore`] is a brute-force
//! in-process stand-in with the same behavior.
pub mod convert;
pub mod maintenance;
pub mod memory;
pub mod schema;
pub mod store;
pub mod table;

pub use maintenance::{compute_ivfpq_params, IndexReport, IvfPqParams, MIN_ROWS_FOR_IVFPQ};
pub use memory::{cosine_similarity, MemoryVectorStore};
pub use store::{split_filters, LanceVectorStore, StoreStats};
