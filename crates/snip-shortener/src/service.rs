use crate::coalescer::DeleteQueue;
use crate::error::ShortenerError;
use crate::settings::ShortenerSettings;
use serde::{Deserialize, Serialize};
use snip_core::{
    with_deadline, BatchCreated, CreateOutcome, DeleteRequest, NewUrl, Repository, ShortCode,
    StorageError, UrlRecord,
};
use snip_generator::Generator;
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};
use url::Url;

/// One entry of a batch shorten request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchItem {
    /// Caller-chosen key echoed back in the response.
    pub correlation_id: String,
    pub original_url: String,
}

/// Orchestrates code generation, dedup-on-write and batch creation against
/// whichever repository it is given.
///
/// Generated codes are checked for uniqueness by the repository. On a
/// collision the service draws a fresh code and tries again, up to
/// `max_code_attempts` times.
pub struct ShortenerService<R, G> {
    repository: Arc<R>,
    generator: Arc<G>,
    settings: ShortenerSettings,
    delete_queue: Option<DeleteQueue>,
    span: Span,
}

impl<R, G> Clone for ShortenerService<R, G> {
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
            generator: Arc::clone(&self.generator),
            settings: self.settings.clone(),
            delete_queue: self.delete_queue.clone(),
            span: self.span.clone(),
        }
    }
}

impl<R: Repository, G: Generator> ShortenerService<R, G> {
    pub fn new(repository: R, generator: G) -> Self {
        let span = info_span!("shortener", backend = repository.backend());
        Self {
            repository: Arc::new(repository),
            generator: Arc::new(generator),
            settings: ShortenerSettings::default(),
            delete_queue: None,
            span,
        }
    }

    pub fn with_settings(mut self, settings: ShortenerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Routes `delete_urls` to a running [`DeleteCoalescer`](crate::DeleteCoalescer).
    pub fn with_delete_queue(mut self, queue: DeleteQueue) -> Self {
        self.delete_queue = Some(queue);
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn settings(&self) -> &ShortenerSettings {
        &self.settings
    }

    /// Accepts only absolute `http` and `https` URLs.
    pub fn validate_url(raw: &str) -> Result<(), ShortenerError> {
        let parsed = Url::parse(raw).map_err(|e| ShortenerError::InvalidUrl(format!("{raw}: {e}")))?;

        match parsed.scheme() {
            "http" | "https" => {}
            other => {
                return Err(ShortenerError::InvalidUrl(format!(
                    "URL scheme must be http or https: {other}"
                )))
            }
        }
        if parsed.host_str().is_none_or(str::is_empty) {
            return Err(ShortenerError::InvalidUrl(format!("URL has no host: {raw}")));
        }

        Ok(())
    }

    /// Shortens a single URL.
    ///
    /// If the URL was shortened before, returns [`CreateOutcome::Existing`]
    /// carrying the code it already has.
    pub async fn shorten(
        &self,
        original_url: &str,
        owner_id: &str,
    ) -> Result<CreateOutcome, ShortenerError> {
        Self::validate_url(original_url)?;

        async {
            let max_attempts = self.settings.max_code_attempts;
            for attempt in 1..=max_attempts {
                let code = self.generator.generate()?;
                match self.repository.insert(original_url, &code, owner_id).await {
                    Ok(outcome) => {
                        if outcome.is_conflict() {
                            debug!(code = %outcome.short_code(), "url already shortened");
                        } else {
                            info!(code = %code, owner_id, "shortened url");
                        }
                        return Ok(outcome);
                    }
                    Err(StorageError::CodeTaken(taken)) => {
                        debug!(attempt, code = %taken, "short code collision");
                    }
                    Err(err) => {
                        error!(error = %err, "failed to store url");
                        return Err(err.into());
                    }
                }
            }

            warn!(max_attempts, "gave up drawing a free short code");
            Err(ShortenerError::CodeSpaceExhausted(max_attempts))
        }
        .instrument(self.span.clone())
        .await
    }

    /// Shortens many URLs in one atomic store call.
    ///
    /// Invalid URLs are dropped from the batch; the response only covers the
    /// entries that were stored or already existed.
    pub async fn shorten_batch(
        &self,
        items: Vec<BatchItem>,
        owner_id: &str,
    ) -> Result<Vec<BatchCreated>, ShortenerError> {
        let max = self.settings.max_batch_size;
        if items.len() > max {
            return Err(ShortenerError::CapacityExceeded {
                len: items.len(),
                max,
            });
        }

        async {
            let valid: Vec<BatchItem> = items
                .into_iter()
                .filter(|item| match Self::validate_url(&item.original_url) {
                    Ok(()) => true,
                    Err(err) => {
                        warn!(
                            correlation_id = %item.correlation_id,
                            error = %err,
                            "skipping invalid url in batch"
                        );
                        false
                    }
                })
                .collect();
            if valid.is_empty() {
                return Err(ShortenerError::NoValidUrls);
            }

            let max_attempts = self.settings.max_code_attempts;
            for attempt in 1..=max_attempts {
                let entries = valid
                    .iter()
                    .map(|item| {
                        Ok(NewUrl {
                            correlation_id: item.correlation_id.clone(),
                            original_url: item.original_url.clone(),
                            short_code: self.generator.generate()?,
                        })
                    })
                    .collect::<Result<Vec<_>, ShortenerError>>()?;

                match self.repository.insert_batch(entries, owner_id).await {
                    Ok(created) => {
                        info!(entries = created.len(), owner_id, "shortened batch");
                        return Ok(created);
                    }
                    Err(StorageError::CodeTaken(taken)) => {
                        debug!(attempt, code = %taken, "short code collision in batch");
                    }
                    Err(err) => {
                        error!(error = %err, entries = valid.len(), "failed to store batch");
                        return Err(err.into());
                    }
                }
            }

            warn!(max_attempts, "gave up drawing free short codes for batch");
            Err(ShortenerError::CodeSpaceExhausted(max_attempts))
        }
        .instrument(self.span.clone())
        .await
    }

    /// Looks up a code. Deactivated records come back with `active == false`.
    pub async fn resolve(&self, code: &ShortCode) -> Result<Option<UrlRecord>, ShortenerError> {
        let record = with_deadline(
            "resolve",
            self.settings.operation_timeout,
            self.repository.get(code),
        )
        .await
        .map_err(|err| {
            error!(
                parent: &self.span,
                code = %code,
                error = %err,
                "failed to resolve short code"
            );
            err
        })?;
        Ok(record)
    }

    /// Returns the URL a code redirects to.
    pub async fn target_url(&self, code: &ShortCode) -> Result<String, ShortenerError> {
        match self.resolve(code).await? {
            None => Err(ShortenerError::NotFound(code.to_string())),
            Some(record) if !record.active => Err(ShortenerError::Gone(code.to_string())),
            Some(record) => Ok(record.original_url),
        }
    }

    /// Every record of `owner_id`, including deleted ones.
    pub async fn list(&self, owner_id: &str) -> Result<Vec<UrlRecord>, ShortenerError> {
        let records = with_deadline(
            "list",
            self.settings.operation_timeout,
            self.repository.list_by_owner(owner_id),
        )
        .await
        .map_err(|err| {
            error!(parent: &self.span, owner_id, error = %err, "failed to list urls");
            err
        })?;
        Ok(records)
    }

    pub async fn healthcheck(&self) -> Result<(), ShortenerError> {
        with_deadline(
            "healthcheck",
            self.settings.healthcheck_timeout,
            self.repository.healthcheck(),
        )
        .await
        .map_err(|err| {
            error!(parent: &self.span, error = %err, "healthcheck failed");
            err.into()
        })
    }

    /// Queues `codes` for soft deletion and returns once the queue accepted them.
    pub async fn delete_urls(
        &self,
        codes: Vec<ShortCode>,
        owner_id: &str,
    ) -> Result<(), ShortenerError> {
        let queue = self
            .delete_queue
            .as_ref()
            .ok_or(ShortenerError::DeleteQueueClosed)?;
        debug!(parent: &self.span, owner_id, codes = codes.len(), "queueing delete");
        queue.enqueue(DeleteRequest::new(codes, owner_id)).await
    }
}
