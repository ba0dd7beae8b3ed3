//! Change-data-capture pipeline: buffers repository events, batches them, transforms them into a
//! fixed columnar schema, and serializes each batch into length-framed, compressed records with
//! retry and dead-letter handling.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::errors::GitError;

const FRAME_MAGIC: &[u8; 4] = b"PAR1";
const LATENCY_WINDOW: usize = 1000;

/// One captured change, before columnar transformation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CdcEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub source: String,
    pub timestamp_ms: i64,
    pub sequence: u64,
    pub version: u32,
    pub payload: serde_json::Value,
}

/// Fixed columnar row emitted by the transformer: the common columns every event carries, plus
/// the event's own JSON payload retained verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnarRow {
    pub event_id: String,
    pub event_type: String,
    pub source: String,
    pub timestamp_ms: i64,
    pub sequence: u64,
    pub version: u32,
    pub payload_json: String,
    pub sha: String,
}

fn transform(event: &CdcEvent) -> ColumnarRow {
    let payload_json = event.payload.to_string();
    let mut hasher = Sha256::new();
    hasher.update(payload_json.as_bytes());
    let sha = hex::encode(hasher.finalize());
    ColumnarRow {
        event_id: event.id.clone(),
        event_type: event.event_type.clone(),
        source: event.source.clone(),
        timestamp_ms: event.timestamp_ms,
        sequence: event.sequence,
        version: event.version,
        payload_json,
        sha,
    }
}

/// Serialize a batch of rows into `PAR1 <zlib body> <u32-le length> PAR1` framing.
pub fn serialize_batch(rows: &[ColumnarRow]) -> Result<Vec<u8>, GitError> {
    use std::io::Write;
    let json = serde_json::to_vec(rows).map_err(|e| GitError::CdcError(e.to_string()))?;
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&json)
        .map_err(|e| GitError::CdcError(e.to_string()))?;
    let compressed = encoder
        .finish()
        .map_err(|e| GitError::CdcError(e.to_string()))?;

    let mut framed = Vec::with_capacity(compressed.len() + 12);
    framed.extend_from_slice(FRAME_MAGIC);
    framed.extend_from_slice(&compressed);
    framed.extend_from_slice(&(compressed.len() as u32).to_le_bytes());
    framed.extend_from_slice(FRAME_MAGIC);
    Ok(framed)
}

/// Configuration governing buffering, batching, and retry behavior.
#[derive(Debug, Clone)]
pub struct CdcConfig {
    pub max_buffer_size: usize,
    pub batch_size: usize,
    pub batch_interval: Duration,
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub backoff_factor: f64,
    pub jitter: bool,
}

impl Default for CdcConfig {
    fn default() -> Self {
        Self {
            max_buffer_size: 10_000,
            batch_size: 100,
            batch_interval: Duration::from_secs(5),
            max_retries: 5,
            base_backoff: Duration::from_millis(100),
            backoff_factor: 2.0,
            jitter: true,
        }
    }
}

type Listener = Arc<dyn Fn(&CdcEvent) + Send + Sync>;
type Sink = Arc<dyn Fn(&[u8]) -> Result<(), String> + Send + Sync>;

#[derive(Debug, Clone, Default)]
pub struct CdcMetrics {
    pub events_processed: u64,
    pub batches_generated: u64,
    pub bytes_written: u64,
    pub errors: u64,
    latencies_ms: VecDeque<f64>,
}

impl CdcMetrics {
    pub fn p50_latency_ms(&self) -> Option<f64> {
        self.percentile(0.5)
    }

    pub fn p99_latency_ms(&self) -> Option<f64> {
        self.percentile(0.99)
    }

    fn percentile(&self, p: f64) -> Option<f64> {
        if self.latencies_ms.is_empty() {
            return None;
        }
        let mut sorted: Vec<f64> = self.latencies_ms.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let idx = ((sorted.len() as f64 - 1.0) * p).round() as usize;
        Some(sorted[idx])
    }

    fn record_latency(&mut self, ms: f64) {
        self.latencies_ms.push_back(ms);
        if self.latencies_ms.len() > LATENCY_WINDOW {
            self.latencies_ms.pop_front();
        }
    }
}

/// Buffers events, flushing a batch when either the size or time threshold is hit, and writes
/// serialized frames to `sink` with retry/backoff and a dead-letter queue after exhaustion.
pub struct CdcPipeline {
    config: CdcConfig,
    buffer: Mutex<Vec<CdcEvent>>,
    listeners: Mutex<Vec<Listener>>,
    dead_letters: Mutex<Vec<CdcEvent>>,
    metrics: Mutex<CdcMetrics>,
    sink: Sink,
}

impl CdcPipeline {
    pub fn new(config: CdcConfig, sink: Sink) -> Self {
        Self {
            config,
            buffer: Mutex::new(Vec::new()),
            listeners: Mutex::new(Vec::new()),
            dead_letters: Mutex::new(Vec::new()),
            metrics: Mutex::new(CdcMetrics::default()),
            sink,
        }
    }

    pub async fn on_event(&self, listener: Listener) {
        self.listeners.lock().await.push(listener);
    }

    pub async fn metrics(&self) -> CdcMetrics {
        self.metrics.lock().await.clone()
    }

    pub async fn dead_letter_count(&self) -> usize {
        self.dead_letters.lock().await.len()
    }

    /// Enqueue `event`, auto-flushing if the buffer has reached `batch_size` or
    /// `max_buffer_size`.
    pub async fn publish(&self, event: CdcEvent) -> Result<(), GitError> {
        for listener in self.listeners.lock().await.iter() {
            listener(&event);
        }

        let should_flush = {
            let mut buffer = self.buffer.lock().await;
            buffer.push(event);
            buffer.len() >= self.config.batch_size || buffer.len() >= self.config.max_buffer_size
        };

        if should_flush {
            self.flush().await
        } else {
            Ok(())
        }
    }

    /// Drain the buffer, transform to columnar rows, serialize, and write with retry.
    pub async fn flush(&self) -> Result<(), GitError> {
        let batch = {
            let mut buffer = self.buffer.lock().await;
            std::mem::take(&mut *buffer)
        };
        if batch.is_empty() {
            return Ok(());
        }

        let start = std::time::Instant::now();
        let rows: Vec<ColumnarRow> = batch.iter().map(transform).collect();
        let frame = serialize_batch(&rows)?;

        match self.write_with_retry(&frame).await {
            Ok(()) => {
                let mut metrics = self.metrics.lock().await;
                metrics.events_processed += batch.len() as u64;
                metrics.batches_generated += 1;
                metrics.bytes_written += frame.len() as u64;
                metrics.record_latency(start.elapsed().as_secs_f64() * 1000.0);
                Ok(())
            }
            Err(e) => {
                let mut metrics = self.metrics.lock().await;
                metrics.errors += 1;
                drop(metrics);
                self.dead_letters.lock().await.extend(batch);
                Err(e)
            }
        }
    }

    async fn write_with_retry(&self, frame: &[u8]) -> Result<(), GitError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match (self.sink)(frame) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    if attempt >= self.config.max_retries {
                        return Err(GitError::CdcError(e));
                    }
                    let mut delay_ms = self.config.base_backoff.as_millis() as f64
                        * self.config.backoff_factor.powi(attempt as i32 - 1);
                    if self.config.jitter {
                        let jitter_factor = rand::rng().random_range(0.8..1.2);
                        delay_ms *= jitter_factor;
                    }
                    tokio::time::sleep(Duration::from_millis(delay_ms as u64)).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn event(seq: u64) -> CdcEvent {
        CdcEvent {
            id: format!("evt-{seq}"),
            event_type: "ref_update".to_string(),
            source: "gitforge".to_string(),
            timestamp_ms: 1_700_000_000_000 + seq as i64,
            sequence: seq,
            version: 1,
            payload: serde_json::json!({"ref": "refs/heads/main"}),
        }
    }

    #[test]
    fn serialize_batch_is_length_framed() {
        let rows = vec![transform(&event(1))];
        let frame = serialize_batch(&rows).unwrap();
        assert_eq!(&frame[0..4], FRAME_MAGIC);
        assert_eq!(&frame[frame.len() - 4..], FRAME_MAGIC);
        let len = u32::from_le_bytes(frame[frame.len() - 8..frame.len() - 4].try_into().unwrap());
        assert_eq!(len as usize, frame.len() - 12);
    }

    #[tokio::test]
    async fn auto_flushes_at_batch_size() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let sink: Sink = Arc::new(move |_bytes| {
            calls2.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let config = CdcConfig { batch_size: 2, ..CdcConfig::default() };
        let pipeline = CdcPipeline::new(config, sink);
        pipeline.publish(event(1)).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        pipeline.publish(event(2)).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_move_batch_to_dead_letter() {
        let sink: Sink = Arc::new(|_bytes| Err("boom".to_string()));
        let config = CdcConfig {
            batch_size: 1,
            max_retries: 2,
            base_backoff: Duration::from_millis(1),
            ..CdcConfig::default()
        };
        let pipeline = CdcPipeline::new(config, sink);
        let err = pipeline.publish(event(1)).await.unwrap_err();
        assert!(matches!(err, GitError::CdcError(_)));
        assert_eq!(pipeline.dead_letter_count().await, 1);
    }

    #[tokio::test]
    async fn listeners_observe_every_published_event() {
        let seen = Arc::new(AtomicU32::new(0));
        let seen2 = seen.clone();
        let sink: Sink = Arc::new(|_bytes| Ok(()));
        let config = CdcConfig { batch_size: 100, ..CdcConfig::default() };
        let pipeline = CdcPipeline::new(config, sink);
        pipeline
            .on_event(Arc::new(move |_evt| {
                seen2.fetch_add(1, Ordering::SeqCst);
            }))
            .await;
        pipeline.publish(event(1)).await.unwrap();
        pipeline.publish(event(2)).await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn metrics_track_processed_events_and_bytes() {
        let sink: Sink = Arc::new(|_bytes| Ok(()));
        let config = CdcConfig { batch_size: 1, ..CdcConfig::default() };
        let pipeline = CdcPipeline::new(config, sink);
        pipeline.publish(event(1)).await.unwrap();
        let metrics = pipeline.metrics().await;
        assert_eq!(metrics.events_processed, 1);
        assert_eq!(metrics.batches_generated, 1);
        assert!(metrics.bytes_written > 0);
    }
}
