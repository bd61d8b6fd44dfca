//! Result artifacts and their normalized persistence.

pub mod artifact;
pub mod sqlite;
pub mod store;

pub use artifact::{ArtifactError, load_artifact, write_artifact};
pub use sqlite::SqliteResultStore;
pub use store::{ResultStore, StoreError, StoreResult, TableCounts};
