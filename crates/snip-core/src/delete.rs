use crate::shortcode::ShortCode;

/// A request to soft-delete short codes on behalf of an owner.
///
/// Requests live only in memory between the caller and the delete
/// coalescer. Codes the owner does not own are ignored when applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteRequest {
    pub short_codes: Vec<ShortCode>,
    pub owner_id: String,
}

impl DeleteRequest {
    pub fn new(short_codes: Vec<ShortCode>, owner_id: impl Into<String>) -> Self {
        Self {
            short_codes,
            owner_id: owner_id.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.short_codes.is_empty()
    }
}
