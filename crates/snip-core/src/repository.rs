use crate::error::{Result, StorageError};
use crate::shortcode::ShortCode;
use async_trait::async_trait;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};

/// A stored URL record in the repository.
///
/// Records are never removed. Soft deletion flips `active` to `false`
/// and there is no way back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlRecord {
    /// Sequence id assigned by the backend.
    pub id: u64,
    pub short_code: ShortCode,
    /// The original URL that was shortened.
    pub original_url: String,
    /// Opaque identifier of the owner. May be empty for anonymous callers.
    pub owner_id: String,
    pub active: bool,
    pub created_at: Timestamp,
}

/// One entry of a batch create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUrl {
    pub correlation_id: String,
    pub original_url: String,
    pub short_code: ShortCode,
}

/// Result of one batch entry, keyed by the caller's correlation id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCreated {
    pub correlation_id: String,
    pub short_code: ShortCode,
}

/// Outcome of creating a single short URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    /// A new record was stored under this code.
    Created(ShortCode),
    /// The URL was already shortened; this is the pre-existing code.
    Existing(ShortCode),
}

impl CreateOutcome {
    pub fn short_code(&self) -> &ShortCode {
        match self {
            CreateOutcome::Created(code) | CreateOutcome::Existing(code) => code,
        }
    }

    pub fn into_short_code(self) -> ShortCode {
        match self {
            CreateOutcome::Created(code) | CreateOutcome::Existing(code) => code,
        }
    }

    /// Returns `true` when the URL had been shortened before.
    pub fn is_conflict(&self) -> bool {
        matches!(self, CreateOutcome::Existing(_))
    }
}

/// A read-only view of a repository.
#[async_trait]
pub trait ReadRepository: Send + Sync + 'static {
    /// Short name of the backend, used in logs and `Unsupported` errors.
    fn backend(&self) -> &'static str;

    /// Retrieves the URL record for a given short code.
    ///
    /// Returns `None` only if the code was never issued. Deactivated records
    /// are returned with `active == false`.
    async fn get(&self, code: &ShortCode) -> Result<Option<UrlRecord>>;

    /// Returns every record owned by `owner_id`, active or not, in creation order.
    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<UrlRecord>> {
        let _ = owner_id;
        Err(StorageError::Unsupported {
            backend: self.backend(),
            operation: "list_by_owner",
        })
    }

    /// Liveness probe.
    async fn healthcheck(&self) -> Result<()>;
}

#[async_trait]
pub trait Repository: ReadRepository {
    /// Stores a new record under `code`.
    ///
    /// Returns [`CreateOutcome::Existing`] with the stored code if the URL was
    /// already shortened, and `Err(CodeTaken)` if `code` is in use.
    async fn insert(
        &self,
        original_url: &str,
        code: &ShortCode,
        owner_id: &str,
    ) -> Result<CreateOutcome>;

    /// Stores all entries atomically.
    ///
    /// Entries whose URL already exists are skipped and reported with the
    /// existing code. A taken short code fails the whole batch with
    /// `Err(CodeTaken)` and nothing is stored.
    async fn insert_batch(&self, entries: Vec<NewUrl>, owner_id: &str)
        -> Result<Vec<BatchCreated>>;

    /// Marks every listed code owned by `owner_id` as inactive.
    ///
    /// Codes owned by someone else, unknown codes and already inactive
    /// records are skipped. Returns the number of records deactivated.
    async fn deactivate_batch(&self, codes: &[ShortCode], owner_id: &str) -> Result<u64> {
        let _ = (codes, owner_id);
        Err(StorageError::Unsupported {
            backend: self.backend(),
            operation: "deactivate_batch",
        })
    }
}

#[async_trait]
impl<T: ReadRepository + ?Sized> ReadRepository for std::sync::Arc<T> {
    fn backend(&self) -> &'static str {
        (**self).backend()
    }

    async fn get(&self, code: &ShortCode) -> Result<Option<UrlRecord>> {
        (**self).get(code).await
    }

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<UrlRecord>> {
        (**self).list_by_owner(owner_id).await
    }

    async fn healthcheck(&self) -> Result<()> {
        (**self).healthcheck().await
    }
}

#[async_trait]
impl<T: Repository + ?Sized> Repository for std::sync::Arc<T> {
    async fn insert(
        &self,
        original_url: &str,
        code: &ShortCode,
        owner_id: &str,
    ) -> Result<CreateOutcome> {
        (**self).insert(original_url, code, owner_id).await
    }

    async fn insert_batch(
        &self,
        entries: Vec<NewUrl>,
        owner_id: &str,
    ) -> Result<Vec<BatchCreated>> {
        (**self).insert_batch(entries, owner_id).await
    }

    async fn deactivate_batch(&self, codes: &[ShortCode], owner_id: &str) -> Result<u64> {
        (**self).deactivate_batch(codes, owner_id).await
    }
}
