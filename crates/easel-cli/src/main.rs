//! Demo binary: runs the queue end to end against a flaky stub client.
//!
//! The stub fails its first two calls with a retryable error, so the run
//! shows the full path: enqueue, priority ordering, backoff-and-retry,
//! terminal states, and the operational snapshot.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use easel_core::{
    DispatchError, GenerationOutput, ImageClient, MemoryStore, NewRequest, Priority,
    QueueConfig, QueueManager, SystemClock,
};

/// Stub image backend. Fails the first `n` calls with a retryable error,
/// then returns a fixed PNG header as the "image".
struct FlakyClient {
    remaining_failures: AtomicU32,
}

impl FlakyClient {
    fn new(n: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(n),
        }
    }
}

#[async_trait]
impl ImageClient for FlakyClient {
    async fn generate(
        &self,
        endpoint: &str,
        payload: &serde_json::Value,
    ) -> Result<GenerationOutput, DispatchError> {
        let left = self.remaining_failures.load(Ordering::Relaxed);
        if left > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            return Err(DispatchError::Unavailable(format!(
                "intentional failure (left={left})"
            )));
        }

        tracing::info!(endpoint, prompt = %payload["prompt"], "stub generating image");
        Ok(GenerationOutput::new(vec![137, 80, 78, 71], "image/png"))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "easel_core=debug,easel_cli=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Short delays so the retry path is visible without a long wait.
    let config = QueueConfig {
        workers: 2,
        retry: easel_core::RetryPolicy {
            base_delay: Duration::from_millis(200),
            ..Default::default()
        },
        ..Default::default()
    };

    let queue = QueueManager::new(
        config,
        Arc::new(MemoryStore::new()),
        Arc::new(FlakyClient::new(2)),
        Arc::new(SystemClock),
    );
    queue.start().await?;

    let mut ids = Vec::new();
    for (prompt, priority) in [
        ("a lighthouse at dusk", Priority::Normal),
        ("a fox in the snow", Priority::High),
        ("a city skyline, watercolor", Priority::Low),
    ] {
        let id = queue
            .enqueue(
                NewRequest::new("generate", serde_json::json!({ "prompt": prompt }))
                    .priority(priority),
            )
            .await?;
        println!("enqueued {id} ({prompt})");
        ids.push(id);
    }

    for id in ids {
        let record = queue.wait(id, Some(Duration::from_secs(30))).await?;
        println!(
            "{id}: state={:?} attempts={} error={:?}",
            record.state, record.attempts, record.error
        );
    }

    let snapshot = queue.snapshot().await?;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);

    queue.shutdown().await;
    Ok(())
}
