#![forbid(unsafe_code)]

pub mod repository;
pub mod sqlite;

pub use repository::{
    AssignmentRepository, CatalogRepository, ContentItemRecord, InMemoryRepository,
    NewAssignmentRecord, ProgressRepository, ProgressUpsert, Storage, StorageError,
};
