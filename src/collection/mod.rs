//! Collection management: the physical table memory records live in.
//!
//! # Operations
//!
//! Collection lifecycle is managed through the
//! [`StorageEngine`](crate::storage::StorageEngine) trait
//! (`create_collection`, `get_collection`, `list_collections`,
//! `delete_collection`), mirroring the teacher's collective CRUD surface.

pub mod types;

pub use types::{Collection, FulltextParser};
