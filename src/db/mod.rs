pub mod change_feed;
pub mod connection;
pub mod memory;
pub mod models;
pub mod pg_store;
pub mod repositories;
pub mod store;

pub use change_feed::{ChangeKind, ChangeRecord, ChangeTarget};
pub use connection::*;
pub use memory::MemoryPollStore;
pub use models::*;
pub use pg_store::PgPollStore;
pub use store::*;
