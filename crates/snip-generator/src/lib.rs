//! Short code generators.

pub mod error;
pub mod random;
pub mod seq;

pub use error::GeneratorError;
pub use random::RandomHexGenerator;
pub use seq::SeqGenerator;

use snip_core::ShortCode;
use std::sync::Arc;

/// Trait for generating short codes.
///
/// Implementations are pure generators that don't interact with storage.
/// Uniqueness against stored codes is checked by the repository; callers
/// retry with a fresh code on collision.
pub trait Generator: Send + Sync + 'static {
    /// Generates a new candidate short code.
    fn generate(&self) -> Result<ShortCode, GeneratorError>;
}

impl<G: Generator + ?Sized> Generator for Arc<G> {
    fn generate(&self) -> Result<ShortCode, GeneratorError> {
        (**self).generate()
    }
}

impl<G: Generator + ?Sized> Generator for Box<G> {
    fn generate(&self) -> Result<ShortCode, GeneratorError> {
        (**self).generate()
    }
}
