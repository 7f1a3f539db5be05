//! Core types and traits for the snip URL shortener.
//!
//! This crate provides the record model and the storage contract shared by
//! the storage backends and the shortener service.

pub mod deadline;
pub mod delete;
pub mod error;
pub mod repository;
pub mod shortcode;

pub use deadline::with_deadline;
pub use delete::DeleteRequest;
pub use error::{CoreError, StorageError};
pub use repository::{
    BatchCreated, CreateOutcome, NewUrl, ReadRepository, Repository, UrlRecord,
};
pub use shortcode::ShortCode;
