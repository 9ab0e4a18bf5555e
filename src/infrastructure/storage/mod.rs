//! Storage: the file backend and the checkpoint store built on it.

pub mod checkpoint_store;
pub mod file_backend;

pub use checkpoint_store::{
    CheckpointOptions, CheckpointOutcome, CheckpointStore, CheckpointSummary, RestoreOptions,
    RestoreOutcome,
};
pub use file_backend::{FileBackend, FileEntry, ListOptions, SortOrder};
