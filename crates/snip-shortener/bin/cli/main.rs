mod cli;

use crate::cli::{Command, StorageBackendArg, CLI};
use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use snip_core::Repository;
use snip_generator::RandomHexGenerator;
use snip_shortener::{CoalescerSettings, DeleteCoalescer, ShortenerService, ShortenerSettings};
use snip_storage::{InMemoryRepository, PostgresRepository};
use std::sync::Arc;
use tracing::info;

#[derive(Serialize)]
struct Shortened {
    short_code: String,
    short_url: String,
    /// Set when the URL had been shortened before.
    conflict: bool,
}

#[derive(Serialize)]
struct BatchShortened {
    correlation_id: String,
    short_url: String,
}

#[derive(Serialize)]
struct Listed {
    short_url: String,
    original_url: String,
    active: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = CLI::parse();
    snip_telemetry::init(config.log_format, &config.log_level)?;

    info!(storage_backend = %config.storage, "starting snip");

    match config.storage {
        StorageBackendArg::InMemory => {
            let repository = InMemoryRepository::open(&config.storage_file)
                .await
                .with_context(|| {
                    format!("failed to open journal {}", config.storage_file.display())
                })?;
            run(config, repository).await
        }
        StorageBackendArg::Postgres => {
            let dsn = config
                .postgres_dsn
                .clone()
                .context("postgres dsn is required when storage backend is postgres")?;
            let repository =
                PostgresRepository::connect(&dsn, config.postgres_max_connections).await?;
            repository.migrate().await?;
            run(config, repository).await
        }
    }
}

async fn run<R: Repository>(config: CLI, repository: R) -> anyhow::Result<()> {
    let repository = Arc::new(repository);
    let settings = ShortenerSettings::builder()
        .max_batch_size(config.max_batch_size)
        .build();
    let service = ShortenerService::new(Arc::clone(&repository), RandomHexGenerator::new())
        .with_settings(settings);
    let base_url = config.base_url.as_str();

    match config.command {
        Command::Shorten { url, owner } => {
            let outcome = service.shorten(&url, &owner).await?;
            print_json(&Shortened {
                short_code: outcome.short_code().to_string(),
                short_url: outcome.short_code().to_url(base_url),
                conflict: outcome.is_conflict(),
            })
        }
        Command::ShortenBatch { owner, items } => {
            let created = service.shorten_batch(items, &owner).await?;
            let output: Vec<_> = created
                .into_iter()
                .map(|entry| BatchShortened {
                    short_url: entry.short_code.to_url(base_url),
                    correlation_id: entry.correlation_id,
                })
                .collect();
            print_json(&output)
        }
        Command::Resolve { code } => {
            let record = service
                .resolve(&code)
                .await?
                .with_context(|| format!("short code not found: {code}"))?;
            print_json(&record)
        }
        Command::List { owner } => {
            let output: Vec<_> = service
                .list(&owner)
                .await?
                .into_iter()
                .map(|record| Listed {
                    short_url: record.short_code.to_url(base_url),
                    original_url: record.original_url,
                    active: record.active,
                })
                .collect();
            print_json(&output)
        }
        Command::Delete { owner, codes } => {
            let (queue, coalescer) =
                DeleteCoalescer::new(Arc::clone(&repository), CoalescerSettings::default());
            let worker = coalescer.spawn();

            let service = service.with_delete_queue(queue);
            let queued = codes.len();
            service.delete_urls(codes, &owner).await?;

            // Dropping the last queue handle makes the coalescer flush and exit.
            drop(service);
            worker.await.context("delete coalescer panicked")?;

            info!(queued, owner_id = %owner, "delete requests processed");
            println!("queued {queued} code(s) for deletion");
            Ok(())
        }
        Command::Health => {
            service.healthcheck().await?;
            println!("ok");
            Ok(())
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
