mod journal;

use crate::{DEFAULT_HEALTHCHECK_TIMEOUT, DEFAULT_OPERATION_TIMEOUT};
use async_trait::async_trait;
use jiff::Timestamp;
use journal::Journal;
use snip_core::error::{Result, StorageError};
use snip_core::{
    with_deadline, BatchCreated, CreateOutcome, NewUrl, ReadRepository, Repository, ShortCode,
    UrlRecord,
};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;
use tokio::sync::{RwLock, RwLockWriteGuard};
use tokio::time::Instant;
use tracing::{debug, info, trace};

const BACKEND: &str = "memory";

/// Records plus the indexes over them.
///
/// Records live in an arena; the indexes hold stable handles into it.
/// Records are never removed, so handles never dangle.
#[derive(Debug, Default)]
struct MemoryState {
    records: Vec<UrlRecord>,
    by_code: HashMap<ShortCode, usize>,
    by_url: HashMap<String, usize>,
    by_owner: HashMap<String, Vec<usize>>,
    next_id: u64,
    journal: Option<Journal>,
}

impl MemoryState {
    fn new(journal: Option<Journal>) -> Self {
        Self {
            next_id: 1,
            journal,
            ..Default::default()
        }
    }

    /// Rebuilds the state from journal snapshots. The last snapshot of a code wins.
    fn replay(&mut self, snapshots: Vec<UrlRecord>) {
        for snapshot in snapshots {
            match self.by_code.get(&snapshot.short_code) {
                Some(&handle) => {
                    self.next_id = self.next_id.max(snapshot.id + 1);
                    self.records[handle] = snapshot;
                }
                None => self.push(snapshot),
            }
        }
    }

    fn push(&mut self, record: UrlRecord) {
        let handle = self.records.len();
        self.next_id = self.next_id.max(record.id + 1);
        self.by_code.insert(record.short_code.clone(), handle);
        self.by_url
            .entry(record.original_url.clone())
            .or_insert(handle);
        self.by_owner
            .entry(record.owner_id.clone())
            .or_default()
            .push(handle);
        self.records.push(record);
    }

    fn code_for_url(&self, original_url: &str) -> Option<&ShortCode> {
        self.by_url
            .get(original_url)
            .map(|&handle| &self.records[handle].short_code)
    }

    async fn persist(
        &mut self,
        operation: &'static str,
        deadline: Duration,
        records: &[UrlRecord],
    ) -> Result<()> {
        match self.journal.as_mut() {
            Some(journal) => journal.append(operation, deadline, records).await,
            None => Ok(()),
        }
    }
}

/// In-memory implementation of the repository contract.
///
/// All state sits behind a single reader/writer lock. Reads share it; writes
/// hold it exclusively for both the map mutation and the journal append, so a
/// write is visible only once it is durable. A write that misses its deadline
/// is rolled back in the journal before `Timeout` is returned.
///
/// URL uniqueness is global, matching the PostgreSQL backend.
#[derive(Debug)]
pub struct InMemoryRepository {
    state: RwLock<MemoryState>,
    operation_timeout: Duration,
    healthcheck_timeout: Duration,
}

impl InMemoryRepository {
    /// Creates a repository that keeps records in memory only.
    pub fn new() -> Self {
        Self::with_state(MemoryState::new(None))
    }

    /// Opens a repository backed by the journal at `path`.
    ///
    /// The file is created if missing and fully replayed otherwise.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let (journal, snapshots) = Journal::open(path).await?;
        let lines = snapshots.len();
        let journal_path = journal.path().display().to_string();

        let mut state = MemoryState::new(Some(journal));
        state.replay(snapshots);

        info!(
            path = %journal_path,
            lines,
            records = state.records.len(),
            "replayed storage journal"
        );
        Ok(Self::with_state(state))
    }

    /// Takes the write lock under the operation deadline.
    async fn write_state(
        &self,
        operation: &'static str,
    ) -> Result<RwLockWriteGuard<'_, MemoryState>> {
        with_deadline(operation, self.operation_timeout, async {
            Ok(self.state.write().await)
        })
        .await
    }

    /// What is left of the operation deadline for the journal append.
    fn remaining(&self, started: Instant) -> Duration {
        self.operation_timeout.saturating_sub(started.elapsed())
    }

    fn with_state(state: MemoryState) -> Self {
        Self {
            state: RwLock::new(state),
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            healthcheck_timeout: DEFAULT_HEALTHCHECK_TIMEOUT,
        }
    }

    /// Sets the deadline for writes, which include the journal append.
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn with_healthcheck_timeout(mut self, timeout: Duration) -> Self {
        self.healthcheck_timeout = timeout;
        self
    }

    /// Number of records ever created, active or not.
    pub async fn len(&self) -> usize {
        self.state.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReadRepository for InMemoryRepository {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    async fn get(&self, code: &ShortCode) -> Result<Option<UrlRecord>> {
        let state = self.state.read().await;
        let record = state
            .by_code
            .get(code)
            .map(|&handle| state.records[handle].clone());
        trace!(code = %code, found = record.is_some(), "memory lookup");
        Ok(record)
    }

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<UrlRecord>> {
        let state = self.state.read().await;
        let records = state
            .by_owner
            .get(owner_id)
            .map(|handles| {
                handles
                    .iter()
                    .map(|&handle| state.records[handle].clone())
                    .collect()
            })
            .unwrap_or_default();
        Ok(records)
    }

    async fn healthcheck(&self) -> Result<()> {
        with_deadline("healthcheck", self.healthcheck_timeout, async {
            let state = self.state.read().await;
            if let Some(journal) = state.journal.as_ref() {
                journal.probe().await?;
            }
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn insert(
        &self,
        original_url: &str,
        code: &ShortCode,
        owner_id: &str,
    ) -> Result<CreateOutcome> {
        let started = Instant::now();
        let mut state = self.write_state("insert").await?;

        if let Some(existing) = state.code_for_url(original_url) {
            debug!(code = %existing, "url already shortened");
            return Ok(CreateOutcome::Existing(existing.clone()));
        }
        if state.by_code.contains_key(code) {
            return Err(StorageError::CodeTaken(code.to_string()));
        }

        let record = UrlRecord {
            id: state.next_id,
            short_code: code.clone(),
            original_url: original_url.to_owned(),
            owner_id: owner_id.to_owned(),
            active: true,
            created_at: Timestamp::now(),
        };
        state
            .persist("insert", self.remaining(started), std::slice::from_ref(&record))
            .await?;
        state.push(record);

        Ok(CreateOutcome::Created(code.clone()))
    }

    async fn insert_batch(
        &self,
        entries: Vec<NewUrl>,
        owner_id: &str,
    ) -> Result<Vec<BatchCreated>> {
        let started = Instant::now();
        let mut state = self.write_state("insert_batch").await?;
        let now = Timestamp::now();

        let mut staged: Vec<UrlRecord> = Vec::with_capacity(entries.len());
        let mut staged_urls: HashMap<String, ShortCode> = HashMap::new();
        let mut staged_codes: HashSet<ShortCode> = HashSet::new();
        let mut results = Vec::with_capacity(entries.len());

        for entry in entries {
            let existing = state
                .code_for_url(&entry.original_url)
                .or_else(|| staged_urls.get(&entry.original_url))
                .cloned();
            if let Some(short_code) = existing {
                results.push(BatchCreated {
                    correlation_id: entry.correlation_id,
                    short_code,
                });
                continue;
            }

            if state.by_code.contains_key(&entry.short_code)
                || !staged_codes.insert(entry.short_code.clone())
            {
                return Err(StorageError::CodeTaken(entry.short_code.to_string()));
            }

            staged_urls.insert(entry.original_url.clone(), entry.short_code.clone());
            results.push(BatchCreated {
                correlation_id: entry.correlation_id,
                short_code: entry.short_code.clone(),
            });
            staged.push(UrlRecord {
                id: state.next_id + staged.len() as u64,
                short_code: entry.short_code,
                original_url: entry.original_url,
                owner_id: owner_id.to_owned(),
                active: true,
                created_at: now,
            });
        }

        if !staged.is_empty() {
            state
                .persist("insert_batch", self.remaining(started), &staged)
                .await?;
            for record in staged {
                state.push(record);
            }
        }

        Ok(results)
    }

    async fn deactivate_batch(&self, codes: &[ShortCode], owner_id: &str) -> Result<u64> {
        let started = Instant::now();
        let mut state = self.write_state("deactivate_batch").await?;

        let mut handles = Vec::new();
        let mut seen = HashSet::new();
        for code in codes {
            let Some(&handle) = state.by_code.get(code) else {
                continue;
            };
            let record = &state.records[handle];
            if record.owner_id == owner_id && record.active && seen.insert(handle) {
                handles.push(handle);
            }
        }

        if handles.is_empty() {
            return Ok(0);
        }

        let snapshots: Vec<UrlRecord> = handles
            .iter()
            .map(|&handle| UrlRecord {
                active: false,
                ..state.records[handle].clone()
            })
            .collect();
        state
            .persist("deactivate_batch", self.remaining(started), &snapshots)
            .await?;
        for &handle in &handles {
            state.records[handle].active = false;
        }

        Ok(handles.len() as u64)
    }
}
