pub mod error;
pub mod models;
pub mod tasks;

pub use error::{StoreError, StoreResult};
pub use models::{
    FileRecord, MediaRequest, StatusChange, StoreSummary, Task, TaskFilter, TaskStatus,
};
pub use tasks::{SqliteTaskStore, SqliteTaskStoreBuilder};
