//! Storage backends for the snip URL shortener.
//!
//! Both backends implement [`Repository`] with the same create, dedup and
//! soft-delete semantics:
//!
//! - [`InMemoryRepository`] keeps records in memory and optionally appends
//!   every write to a JSON-lines journal that is replayed on startup.
//! - [`PostgresRepository`] stores records in a PostgreSQL table with unique
//!   constraints on the short code and the original URL.

pub mod memory;
pub mod postgres;

pub use memory::InMemoryRepository;
pub use postgres::PostgresRepository;
pub use snip_core::{ReadRepository, Repository, StorageError};

use std::time::Duration;

/// Deadline applied to each storage operation that touches I/O.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(2);

/// Deadline applied to health checks.
pub const DEFAULT_HEALTHCHECK_TIMEOUT: Duration = Duration::from_secs(1);
