use crate::error::ShortenerError;
use crate::settings::CoalescerSettings;
use snip_core::{DeleteRequest, Repository, ShortCode};
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, info_span, warn, Instrument, Span};

/// Sending half of the delete pipeline.
///
/// Cloning is cheap. The coalescer shuts down once every handle is dropped.
#[derive(Debug, Clone)]
pub struct DeleteQueue {
    tx: mpsc::Sender<DeleteRequest>,
}

impl DeleteQueue {
    /// Hands a request to the coalescer.
    ///
    /// Waits while the queue is full. Returning `Ok` only means the request
    /// was accepted; it may still be dropped if the store fails at flush time.
    pub async fn enqueue(&self, request: DeleteRequest) -> Result<(), ShortenerError> {
        if request.is_empty() {
            return Ok(());
        }
        self.tx
            .send(request)
            .await
            .map_err(|_| ShortenerError::DeleteQueueClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Background task that buffers delete requests and applies them on a timer.
///
/// Each flush merges the buffered requests per owner and issues one
/// `deactivate_batch` per owner. A failed batch is logged and discarded.
pub struct DeleteCoalescer<R> {
    repository: R,
    rx: mpsc::Receiver<DeleteRequest>,
    buffer: Vec<DeleteRequest>,
    flush_interval: Duration,
    span: Span,
}

impl<R: Repository> DeleteCoalescer<R> {
    pub fn new(repository: R, settings: CoalescerSettings) -> (DeleteQueue, Self) {
        let (tx, rx) = mpsc::channel(settings.queue_capacity.max(1));
        let coalescer = Self {
            repository,
            rx,
            buffer: Vec::new(),
            flush_interval: settings.flush_interval,
            span: info_span!("delete_coalescer"),
        };
        (DeleteQueue { tx }, coalescer)
    }

    /// Replaces the span the task runs in.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Runs the coalescer on the current tokio runtime.
    pub fn spawn(self) -> JoinHandle<()> {
        let span = self.span.clone();
        tokio::spawn(self.run().instrument(span))
    }

    /// Drives the coalescer until every queue handle is dropped.
    pub async fn run(mut self) {
        let mut ticker = interval_at(Instant::now() + self.flush_interval, self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.flush().await,
                request = self.rx.recv() => match request {
                    Some(request) => {
                        debug!(
                            owner_id = %request.owner_id,
                            codes = request.short_codes.len(),
                            "buffered delete request"
                        );
                        self.buffer.push(request);
                    }
                    None => {
                        self.flush().await;
                        break;
                    }
                },
            }
        }

        info!("delete queue closed, coalescer stopped");
    }

    async fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }

        let requests = self.buffer.len();
        for (owner_id, codes) in coalesce(std::mem::take(&mut self.buffer)) {
            match self.repository.deactivate_batch(&codes, &owner_id).await {
                Ok(deactivated) => debug!(
                    owner_id = %owner_id,
                    requested = codes.len(),
                    deactivated,
                    "applied delete batch"
                ),
                Err(err) => warn!(
                    owner_id = %owner_id,
                    codes = codes.len(),
                    error = %err,
                    "dropping delete batch"
                ),
            }
        }
        debug!(requests, "flushed delete requests");
    }
}

/// Merges requests per owner. Owners and codes keep first-seen order;
/// repeated codes are dropped.
fn coalesce(requests: Vec<DeleteRequest>) -> Vec<(String, Vec<ShortCode>)> {
    let mut batches: Vec<(String, Vec<ShortCode>, HashSet<ShortCode>)> = Vec::new();

    for request in requests {
        let index = match batches.iter().position(|(owner, ..)| *owner == request.owner_id) {
            Some(index) => index,
            None => {
                batches.push((request.owner_id, Vec::new(), HashSet::new()));
                batches.len() - 1
            }
        };
        let (_, codes, seen) = &mut batches[index];
        for code in request.short_codes {
            if seen.insert(code.clone()) {
                codes.push(code);
            }
        }
    }

    batches
        .into_iter()
        .map(|(owner, codes, _)| (owner, codes))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use snip_core::error::{Result, StorageError};
    use snip_core::{BatchCreated, CreateOutcome, NewUrl, ReadRepository, UrlRecord};
    use std::sync::{Arc, Mutex};

    /// Records every deactivation call and fails for one chosen owner.
    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(String, Vec<String>)>>,
        failing_owner: Option<String>,
    }

    impl Recorder {
        fn failing_for(owner: &str) -> Self {
            Self {
                failing_owner: Some(owner.to_string()),
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<(String, Vec<String>)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ReadRepository for Recorder {
        fn backend(&self) -> &'static str {
            "recorder"
        }

        async fn get(&self, _code: &ShortCode) -> Result<Option<UrlRecord>> {
            Ok(None)
        }

        async fn healthcheck(&self) -> Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl Repository for Recorder {
        async fn insert(
            &self,
            _original_url: &str,
            code: &ShortCode,
            _owner_id: &str,
        ) -> Result<CreateOutcome> {
            Ok(CreateOutcome::Created(code.clone()))
        }

        async fn insert_batch(
            &self,
            _entries: Vec<NewUrl>,
            _owner_id: &str,
        ) -> Result<Vec<BatchCreated>> {
            Ok(Vec::new())
        }

        async fn deactivate_batch(&self, codes: &[ShortCode], owner_id: &str) -> Result<u64> {
            self.calls.lock().unwrap().push((
                owner_id.to_string(),
                codes.iter().map(ToString::to_string).collect(),
            ));
            if self.failing_owner.as_deref() == Some(owner_id) {
                return Err(StorageError::Unavailable("connection reset".to_string()));
            }
            Ok(codes.len() as u64)
        }
    }

    fn request(owner: &str, codes: &[&str]) -> DeleteRequest {
        DeleteRequest::new(
            codes.iter().map(|c| ShortCode::new_unchecked(*c)).collect(),
            owner,
        )
    }

    fn expected(owner: &str, codes: &[&str]) -> (String, Vec<String>) {
        (
            owner.to_string(),
            codes.iter().map(|c| c.to_string()).collect(),
        )
    }

    #[test]
    fn coalesce_merges_per_owner_in_first_seen_order() {
        let batches = coalesce(vec![
            request("bob", &["b1"]),
            request("alice", &["a1", "a2"]),
            request("bob", &["b2", "b1"]),
            request("alice", &["a2", "a3"]),
        ]);

        let batches: Vec<(String, Vec<String>)> = batches
            .into_iter()
            .map(|(owner, codes)| (owner, codes.iter().map(ToString::to_string).collect()))
            .collect();
        assert_eq!(
            batches,
            vec![
                expected("bob", &["b1", "b2"]),
                expected("alice", &["a1", "a2", "a3"]),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn flushes_on_interval() {
        let repo = Arc::new(Recorder::default());
        let (queue, coalescer) = DeleteCoalescer::new(Arc::clone(&repo), CoalescerSettings::default());
        let handle = coalescer.spawn();

        queue.enqueue(request("alice", &["a1"])).await.unwrap();
        queue.enqueue(request("alice", &["a2"])).await.unwrap();

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(repo.calls().is_empty());

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(repo.calls(), vec![expected("alice", &["a1", "a2"])]);

        drop(queue);
        handle.await.unwrap();
        assert_eq!(repo.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_batches_are_not_retried() {
        let repo = Arc::new(Recorder::failing_for("bob"));
        let (queue, coalescer) = DeleteCoalescer::new(Arc::clone(&repo), CoalescerSettings::default());
        let handle = coalescer.spawn();

        queue.enqueue(request("bob", &["b1"])).await.unwrap();
        queue.enqueue(request("alice", &["a1"])).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;

        assert_eq!(
            repo.calls(),
            vec![expected("bob", &["b1"]), expected("alice", &["a1"])]
        );

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(repo.calls().len(), 2);

        drop(queue);
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn closing_the_queue_flushes_pending_requests() {
        let repo = Arc::new(Recorder::default());
        let settings = CoalescerSettings::builder()
            .flush_interval(Duration::from_secs(60))
            .build();
        let (queue, coalescer) = DeleteCoalescer::new(Arc::clone(&repo), settings);
        let handle = coalescer.spawn();

        let second = queue.clone();
        queue.enqueue(request("alice", &["a1"])).await.unwrap();
        second.enqueue(request("alice", &["a1", "a2"])).await.unwrap();
        drop(queue);
        drop(second);

        handle.await.unwrap();
        assert_eq!(repo.calls(), vec![expected("alice", &["a1", "a2"])]);
    }

    #[tokio::test(start_paused = true)]
    async fn full_queue_applies_backpressure() {
        let repo = Arc::new(Recorder::default());
        let settings = CoalescerSettings::builder().queue_capacity(1).build();
        let (queue, _coalescer) = DeleteCoalescer::new(repo, settings);

        queue.enqueue(request("alice", &["a1"])).await.unwrap();
        let blocked = tokio::time::timeout(
            Duration::from_millis(10),
            queue.enqueue(request("alice", &["a2"])),
        )
        .await;
        assert!(blocked.is_err());
    }

    #[tokio::test]
    async fn enqueue_after_shutdown_fails() {
        let repo = Arc::new(Recorder::default());
        let (queue, coalescer) = DeleteCoalescer::new(repo, CoalescerSettings::default());
        drop(coalescer);

        assert!(queue.is_closed());
        let err = queue.enqueue(request("alice", &["a1"])).await.unwrap_err();
        assert!(matches!(err, ShortenerError::DeleteQueueClosed));
    }

    #[tokio::test]
    async fn empty_requests_are_ignored() {
        let repo = Arc::new(Recorder::default());
        let (queue, coalescer) = DeleteCoalescer::new(repo, CoalescerSettings::default());
        drop(coalescer);

        queue.enqueue(DeleteRequest::new(Vec::new(), "alice")).await.unwrap();
    }
}
