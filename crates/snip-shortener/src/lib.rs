//! URL shortening service and the background delete pipeline.
//!
//! [`ShortenerService`] creates and resolves short codes against any
//! [`Repository`](snip_core::Repository). Soft deletes are queued through a
//! [`DeleteQueue`] and applied in batches by a [`DeleteCoalescer`].

pub mod coalescer;
pub mod error;
pub mod service;
pub mod settings;

pub use coalescer::{DeleteCoalescer, DeleteQueue};
pub use error::ShortenerError;
pub use service::{BatchItem, ShortenerService};
pub use settings::{CoalescerSettings, ShortenerSettings};
