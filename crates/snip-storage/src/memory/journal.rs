use snip_core::error::{Result, StorageError};
use snip_core::UrlRecord;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Append-only JSON-lines log of record snapshots.
///
/// Each line holds the full state of one record. A record that changes
/// (deactivation) is appended again; on replay the last line for a code wins.
#[derive(Debug)]
pub(crate) struct Journal {
    path: PathBuf,
    file: File,
    /// Length of the file up to the last fully written append.
    committed_len: u64,
    /// Set while an append is in flight. Still set only if the append future
    /// was dropped, in which case the next append truncates back first.
    dirty: bool,
}

impl Journal {
    /// Opens the journal at `path`, creating it if missing, and returns the
    /// record snapshots it holds in file order.
    pub(crate) async fn open(path: impl AsRef<Path>) -> Result<(Self, Vec<UrlRecord>)> {
        let path = path.as_ref().to_path_buf();

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(err.into()),
        };

        let replayed = replay(&path, &bytes)?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        let mut committed_len = replayed.valid_len;
        if committed_len < bytes.len() as u64 {
            file.set_len(committed_len).await?;
        }
        if replayed.unterminated {
            file.write_all(b"\n").await?;
            file.flush().await?;
            committed_len += 1;
        }

        let journal = Self {
            path,
            file,
            committed_len,
            dirty: false,
        };
        Ok((journal, replayed.records))
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one line per record and syncs the file.
    ///
    /// All lines go out in a single write so a batch is one append. If the
    /// write fails or runs past `deadline`, the file is truncated back to its
    /// last committed length before the error is returned, so a failed append
    /// never reappears on replay.
    pub(crate) async fn append(
        &mut self,
        operation: &'static str,
        deadline: Duration,
        records: &[UrlRecord],
    ) -> Result<()> {
        if self.dirty {
            self.rollback().await?;
        }

        let mut buf = Vec::new();
        for record in records {
            serde_json::to_writer(&mut buf, record)
                .map_err(|e| StorageError::InvalidData(format!("cannot encode record: {e}")))?;
            buf.push(b'\n');
        }

        self.dirty = true;
        let written = tokio::time::timeout(deadline, write_synced(&mut self.file, &buf)).await;
        match written {
            Ok(Ok(())) => {
                self.committed_len += buf.len() as u64;
                self.dirty = false;
                debug!(
                    path = %self.path.display(),
                    lines = records.len(),
                    "appended to journal"
                );
                Ok(())
            }
            Ok(Err(err)) => {
                self.rollback().await?;
                Err(err.into())
            }
            Err(_) => {
                self.rollback().await?;
                Err(StorageError::Timeout(format!(
                    "{operation} exceeded {}ms in journal append",
                    deadline.as_millis()
                )))
            }
        }
    }

    /// Truncates the file to the last committed append.
    ///
    /// Waits for any write still running in the background first.
    async fn rollback(&mut self) -> Result<()> {
        warn!(
            path = %self.path.display(),
            committed_len = self.committed_len,
            "rolling back incomplete journal append"
        );
        self.file.set_len(self.committed_len).await?;
        self.file.sync_data().await?;
        self.dirty = false;
        Ok(())
    }

    pub(crate) async fn probe(&self) -> Result<()> {
        self.file.metadata().await?;
        Ok(())
    }
}

async fn write_synced(file: &mut File, buf: &[u8]) -> std::io::Result<()> {
    file.write_all(buf).await?;
    file.flush().await?;
    file.sync_data().await
}

struct Replayed {
    records: Vec<UrlRecord>,
    valid_len: u64,
    unterminated: bool,
}

fn replay(path: &Path, bytes: &[u8]) -> Result<Replayed> {
    let mut records = Vec::new();
    let mut offset = 0;
    let mut line_no = 0;
    let mut unterminated = false;

    while offset < bytes.len() {
        line_no += 1;
        let rest = &bytes[offset..];
        let (line, consumed, terminated) = match rest.iter().position(|b| *b == b'\n') {
            Some(end) => (&rest[..end], end + 1, true),
            None => (rest, rest.len(), false),
        };

        if line.iter().all(u8::is_ascii_whitespace) {
            offset += consumed;
            continue;
        }

        match serde_json::from_slice::<UrlRecord>(line) {
            Ok(record) => {
                records.push(record);
                unterminated = !terminated;
            }
            // a crash mid-append leaves a partial last line
            Err(err) if !terminated => {
                warn!(
                    path = %path.display(),
                    line = line_no,
                    error = %err,
                    "discarding torn journal tail"
                );
                break;
            }
            Err(err) => {
                return Err(StorageError::InvalidData(format!(
                    "{}:{}: {}",
                    path.display(),
                    line_no,
                    err
                )));
            }
        }
        offset += consumed;
    }

    Ok(Replayed {
        records,
        valid_len: offset as u64,
        unterminated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use jiff::Timestamp;
    use snip_core::ShortCode;
    use std::io::Write;

    fn record(id: u64, code: &str) -> UrlRecord {
        UrlRecord {
            id,
            short_code: ShortCode::new_unchecked(code),
            original_url: format!("https://{code}.example"),
            owner_id: "user-1".to_string(),
            active: true,
            created_at: Timestamp::now(),
        }
    }

    #[tokio::test]
    async fn interrupted_append_is_truncated_before_next_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("urls.jsonl");

        let (mut journal, _) = Journal::open(&path).await.unwrap();
        journal
            .append("insert", Duration::from_secs(2), &[record(1, "a0000000")])
            .await
            .unwrap();

        // what a dropped append leaves behind
        let mut raw = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        raw.write_all(br#"{"id":2,"short_code":"b0000000"}"#).unwrap();
        raw.write_all(b"\n").unwrap();
        drop(raw);
        journal.dirty = true;

        journal
            .append("insert", Duration::from_secs(2), &[record(3, "c0000000")])
            .await
            .unwrap();
        assert!(!journal.dirty);
        drop(journal);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(!contents.contains("b0000000"));

        let (_, records) = Journal::open(&path).await.unwrap();
        let codes: Vec<_> = records.iter().map(|r| r.short_code.as_str()).collect();
        assert_eq!(codes, vec!["a0000000", "c0000000"]);
    }

    #[tokio::test]
    async fn timed_out_append_leaves_committed_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("urls.jsonl");

        let (mut journal, _) = Journal::open(&path).await.unwrap();
        journal
            .append("insert", Duration::from_secs(2), &[record(1, "a0000000")])
            .await
            .unwrap();
        let committed = journal.committed_len;

        let result = journal
            .append("insert", Duration::ZERO, &[record(2, "b0000000")])
            .await;
        assert!(!journal.dirty);
        let on_disk = std::fs::metadata(&path).unwrap().len();
        match result {
            Err(StorageError::Timeout(message)) => {
                assert!(message.starts_with("insert exceeded 0ms"));
                assert_eq!(on_disk, committed);
            }
            Ok(()) => assert_eq!(on_disk, journal.committed_len),
            Err(other) => panic!("unexpected error {other:?}"),
        }
    }
}
