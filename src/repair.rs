//! Batch blob repair.
//!
//! Repairing a host means re-pushing a batch of blob digests to it. The pool
//! fans the batch out over a fixed set of workers, retries each push with
//! configurable backoff, and streams one JSON result record per digest to
//! the caller's writer.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::RepairConfig;
use crate::digest::Digest;

/// Errors from pushing a blob to a remote host.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The blob does not exist on the source.
    #[error("digest not found: {0}")]
    NotFound(Digest),

    /// The push was attempted and failed.
    #[error("push failed: {0}")]
    Failed(String),

    /// Transport-level failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Blob transfer capability, implemented by the origin's HTTP client.
#[async_trait]
pub trait BlobTransferer: Send + Sync {
    /// Pushes the blob identified by `digest` to the transferer's target.
    async fn push_blob(&self, digest: &Digest) -> Result<(), TransferError>;
}

/// The result of repairing one digest on one host.
///
/// Serialized as one JSON object per line on the response writer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairRecord {
    #[serde(rename = "host")]
    pub hostname: String,
    pub digest: String,
    #[serde(rename = "rs")]
    pub result: String,
}

/// Repairs batches of blob digests against a single target host.
pub struct BlobRepairer {
    hostname: String,
    blob_api: Arc<dyn BlobTransferer>,
    config: RepairConfig,
}

impl BlobRepairer {
    pub fn new(hostname: String, blob_api: Arc<dyn BlobTransferer>, config: RepairConfig) -> Self {
        Self {
            hostname,
            blob_api,
            config,
        }
    }

    /// Repairs a batch of digests concurrently, writing one result record
    /// per digest to `writer`.
    ///
    /// Workers claim digests through a shared position counter, so each
    /// digest is attempted exactly once; record order depends on completion
    /// order. Cancelling `cancel` makes workers exit at their next loop
    /// head; the in-flight push is not aborted. Writer failures are logged
    /// and never abort the batch.
    pub async fn batch_repair<W>(&self, digests: Vec<Digest>, writer: W, cancel: CancellationToken)
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let digests = Arc::new(digests);
        let writer = Arc::new(Mutex::new(writer));
        let position = Arc::new(AtomicI32::new(-1));

        let num_workers = self.config.num_workers.max(1);
        let mut workers = Vec::with_capacity(num_workers);
        for _ in 0..num_workers {
            workers.push(tokio::spawn(repair_worker(
                self.hostname.clone(),
                Arc::clone(&self.blob_api),
                self.config.clone(),
                Arc::clone(&digests),
                Arc::clone(&writer),
                Arc::clone(&position),
                cancel.clone(),
            )));
        }

        for worker in workers {
            let _ = worker.await;
        }
    }
}

async fn repair_worker(
    hostname: String,
    blob_api: Arc<dyn BlobTransferer>,
    config: RepairConfig,
    digests: Arc<Vec<Digest>>,
    writer: Arc<Mutex<impl AsyncWrite + Send + Unpin>>,
    position: Arc<AtomicI32>,
    cancel: CancellationToken,
) {
    loop {
        // Abandon ship when the request is cancelled on the client side.
        if cancel.is_cancelled() {
            return;
        }

        let index = (position.fetch_add(1, Ordering::SeqCst) + 1) as usize;
        if index >= digests.len() {
            return;
        }

        let digest = &digests[index];
        let result = match repair_digest(blob_api.as_ref(), digest, &config).await {
            Ok(()) => "OK".to_string(),
            Err(err) => {
                tracing::error!(%digest, %err, "failed to repair digest item");
                format!("error: {err}")
            }
        };

        let record = RepairRecord {
            hostname: hostname.clone(),
            digest: digest.to_hex(),
            result,
        };
        write_record(&writer, &record).await;
    }
}

/// Pushes one digest with bounded retries, returning the last error once the
/// retry budget is exhausted.
async fn repair_digest(
    blob_api: &dyn BlobTransferer,
    digest: &Digest,
    config: &RepairConfig,
) -> Result<(), TransferError> {
    let mut last_err = None;
    for attempt in 0..config.num_retries {
        match blob_api.push_blob(digest).await {
            Ok(()) => return Ok(()),
            Err(err) => {
                last_err = Some(err);
                if attempt + 1 < config.num_retries {
                    tokio::time::sleep(config.backoff_delay(attempt)).await;
                }
            }
        }
    }
    Err(last_err.unwrap_or_else(|| TransferError::Failed("no push attempts configured".into())))
}

async fn write_record(writer: &Mutex<impl AsyncWrite + Send + Unpin>, record: &RepairRecord) {
    let mut line = match serde_json::to_vec(record) {
        Ok(line) => line,
        Err(err) => {
            tracing::error!(digest = %record.digest, %err, "failed to encode repair record");
            return;
        }
    };
    line.push(b'\n');

    // Writes to the shared response stream are serialized and flushed per
    // record so the client sees progress as it happens.
    let mut writer = writer.lock().await;
    if let Err(err) = async {
        writer.write_all(&line).await?;
        writer.flush().await
    }
    .await
    {
        tracing::error!(digest = %record.digest, %err, "failed to write repair record");
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use tokio::io::AsyncReadExt;

    use super::*;
    use crate::config::BackoffMode;

    struct MockTransferer {
        /// Failures remaining per digest; absent means always succeed.
        failures: Mutex<HashMap<String, usize>>,
        attempts: AtomicUsize,
    }

    impl MockTransferer {
        fn new(failures: HashMap<String, usize>) -> Arc<Self> {
            Arc::new(Self {
                failures: Mutex::new(failures),
                attempts: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl BlobTransferer for MockTransferer {
        async fn push_blob(&self, digest: &Digest) -> Result<(), TransferError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let mut failures = self.failures.lock().await;
            match failures.get_mut(&digest.to_hex()) {
                Some(0) | None => Ok(()),
                Some(remaining) => {
                    *remaining -= 1;
                    Err(TransferError::Failed("connection refused".into()))
                }
            }
        }
    }

    fn test_config() -> RepairConfig {
        RepairConfig {
            num_workers: 2,
            num_retries: 3,
            retry_delay: Duration::from_millis(1),
            backoff: BackoffMode::Exponential,
        }
    }

    async fn run_batch(
        transferer: Arc<MockTransferer>,
        digests: Vec<Digest>,
        cancel: CancellationToken,
    ) -> Vec<RepairRecord> {
        let repairer = BlobRepairer::new("origin01".into(), transferer, test_config());
        let (client, mut server) = tokio::io::duplex(1 << 20);
        repairer.batch_repair(digests, client, cancel).await;

        let mut output = String::new();
        server.read_to_string(&mut output).await.unwrap();
        output
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_batch_repair_reports_every_digest() {
        let d1 = Digest::from_content(b"one");
        let d2 = Digest::from_content(b"two");
        let d3 = Digest::from_content(b"three");
        // d2 fails more times than the retry budget allows.
        let transferer = MockTransferer::new(HashMap::from([(d2.to_hex(), 100)]));

        let records = run_batch(
            transferer,
            vec![d1, d2, d3],
            CancellationToken::new(),
        )
        .await;

        assert_eq!(records.len(), 3);
        for digest in [d1, d3] {
            let record = records
                .iter()
                .find(|r| r.digest == digest.to_hex())
                .unwrap();
            assert_eq!(record.result, "OK");
            assert_eq!(record.hostname, "origin01");
        }
        let failed = records
            .iter()
            .find(|r| r.digest == d2.to_hex())
            .unwrap();
        assert!(failed.result.starts_with("error: "), "{}", failed.result);
        assert!(failed.result.contains("connection refused"));
    }

    #[tokio::test]
    async fn test_batch_repair_retries_until_success() {
        let digest = Digest::from_content(b"flaky");
        // Fails twice, succeeds on the third and final attempt.
        let transferer = MockTransferer::new(HashMap::from([(digest.to_hex(), 2)]));

        let records = run_batch(
            Arc::clone(&transferer),
            vec![digest],
            CancellationToken::new(),
        )
        .await;

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].result, "OK");
        assert_eq!(transferer.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_batch_repair_cancelled_before_start() {
        let transferer = MockTransferer::new(HashMap::new());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let records = run_batch(
            Arc::clone(&transferer),
            vec![Digest::from_content(b"one"), Digest::from_content(b"two")],
            cancel,
        )
        .await;

        assert!(records.is_empty());
        assert_eq!(transferer.attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_batch_repair_more_workers_than_digests() {
        let transferer = MockTransferer::new(HashMap::new());
        let digests: Vec<Digest> = (0..3u8)
            .map(|i| Digest::from_content(&[i]))
            .collect();

        let repairer = BlobRepairer::new(
            "origin01".into(),
            Arc::clone(&transferer) as Arc<dyn BlobTransferer>,
            RepairConfig {
                num_workers: 8,
                ..test_config()
            },
        );
        let (client, mut server) = tokio::io::duplex(1 << 20);
        repairer
            .batch_repair(digests.clone(), client, CancellationToken::new())
            .await;

        let mut output = String::new();
        server.read_to_string(&mut output).await.unwrap();
        let records: Vec<RepairRecord> = output
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();

        // Each digest repaired exactly once despite the idle workers.
        assert_eq!(records.len(), digests.len());
        assert_eq!(transferer.attempts.load(Ordering::SeqCst), digests.len());
        for digest in &digests {
            assert_eq!(
                records.iter().filter(|r| r.digest == digest.to_hex()).count(),
                1
            );
        }
    }

    #[tokio::test]
    async fn test_repair_record_wire_format() {
        let record = RepairRecord {
            hostname: "origin01".into(),
            digest: Digest::from_content(b"blob").to_hex(),
            result: "OK".into(),
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"host\":\"origin01\""));
        assert!(json.contains("\"rs\":\"OK\""));
        assert!(json.contains("\"digest\":"));
    }
}
