//! facewatch-store: Persistence for enrolled users.
//!
//! [`KeyValueStore`] is the raw string store (in-memory or SQLite);
//! [`UserStore`] is the only component that knows the key layout.

pub mod kv;
pub mod memory;
pub mod sqlite;
pub mod users;

pub use kv::{KeyValueStore, StoreError, WriteBatch, WriteOp};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use users::{image_key, validate_name, UserImage, UserStore, IMAGES_PER_USER, USERS_KEY};
