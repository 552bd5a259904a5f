//! Thread-safe buffered record store with a background flush thread.

use super::codec::{codec_for, RecordCodec};
use super::{OutputFormat, RecordCallback, RecordQuery, StoreOptions, StoreStats};
use crate::error::Result;
use crate::models::TraceRecord;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info};

/// Buffered, append-only store for trace records
///
/// Records are kept in memory until one of three things happens:
/// - the buffer reaches `buffer_size` records
/// - the background flush thread wakes up (every `flush_interval`)
/// - a caller invokes [`flush`](Self::flush) or [`close`](Self::close)
///
/// Every flush, load and clear runs under the same lock, so readers never observe a
/// half-written batch and records reach the file in the order they were stored.
pub struct BufferedStore {
    shared: Arc<Shared>,
    worker: Mutex<Option<FlushWorker>>,
}

struct Shared {
    options: StoreOptions,
    codec: Box<dyn RecordCodec>,
    state: Mutex<StoreState>,
    on_store_callback: Option<RecordCallback>,
}

#[derive(Default)]
struct StoreState {
    buffer: Vec<TraceRecord>,
    closed: bool,
}

struct FlushWorker {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write the buffer out; the buffer is cleared only when the write succeeds
    fn flush_locked(&self, state: &mut StoreState) -> Result<usize> {
        if state.buffer.is_empty() {
            return Ok(0);
        }

        self.codec.append(&self.options.path, &state.buffer)?;
        let written = state.buffer.len();
        state.buffer.clear();
        debug!(
            path = %self.options.path.display(),
            records = written,
            "Flushed buffered records"
        );
        Ok(written)
    }

    /// Flush on behalf of nobody in particular; failures are logged, not returned
    fn flush_logged(&self, state: &mut StoreState, trigger: &str) {
        if let Err(e) = self.flush_locked(state) {
            error!(
                path = %self.options.path.display(),
                trigger,
                buffered = state.buffer.len(),
                error = %e,
                "Failed to flush records, keeping them buffered"
            );
        }
    }
}

impl BufferedStore {
    /// Open a store, creating its file (and parent directories) if needed, and start
    /// the background flush thread.
    pub fn open(options: StoreOptions) -> Result<Self> {
        Self::open_with_callback(options, None)
    }

    /// Open a store that invokes `on_store_callback` for every record it receives
    pub fn open_with_callback(
        options: StoreOptions,
        on_store_callback: Option<RecordCallback>,
    ) -> Result<Self> {
        options.validate()?;

        let codec = codec_for(options.format);
        codec.initialize(&options.path)?;

        let shared = Arc::new(Shared {
            options,
            codec,
            state: Mutex::new(StoreState::default()),
            on_store_callback,
        });

        let worker = Self::spawn_flush_thread(shared.clone())?;
        info!(
            path = %shared.options.path.display(),
            format = %shared.options.format,
            buffer_size = shared.options.buffer_size,
            "Opened trace store"
        );

        Ok(Self {
            shared,
            worker: Mutex::new(Some(worker)),
        })
    }

    fn spawn_flush_thread(shared: Arc<Shared>) -> Result<FlushWorker> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let interval = shared.options.flush_interval;

        let handle = thread::Builder::new().name("breadcrumbs-flush".to_string()).spawn(
            move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        let mut state = shared.lock_state();
                        shared.flush_logged(&mut state, "timer");
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            },
        )?;

        Ok(FlushWorker { stop_tx, handle })
    }

    /// Buffer a record. Flushes synchronously when the buffer is full, or immediately
    /// once the store has been closed. Never fails; write errors are logged.
    pub fn store(&self, record: TraceRecord) {
        if let Some(callback) = &self.shared.on_store_callback {
            callback(&record);
        }

        let mut state = self.shared.lock_state();
        state.buffer.push(record);
        self.flush_if_due(&mut state);
    }

    /// Buffer several records, keeping their order
    pub fn store_many(&self, records: Vec<TraceRecord>) {
        if records.is_empty() {
            return;
        }
        if let Some(callback) = &self.shared.on_store_callback {
            records.iter().for_each(|record| callback(record));
        }

        let mut state = self.shared.lock_state();
        state.buffer.extend(records);
        self.flush_if_due(&mut state);
    }

    fn flush_if_due(&self, state: &mut StoreState) {
        if state.closed {
            self.shared.flush_logged(state, "closed");
        } else if state.buffer.len() >= self.shared.options.buffer_size {
            self.shared.flush_logged(state, "threshold");
        }
    }

    /// Write every buffered record. A no-op on an empty buffer. On failure the records
    /// stay buffered and the error is returned.
    pub fn flush(&self) -> Result<()> {
        let mut state = self.shared.lock_state();
        self.shared.flush_locked(&mut state).map(|_| ())
    }

    /// Read persisted records in file order, optionally for one session only.
    ///
    /// Buffered records are not included until they are flushed.
    pub fn load(&self, session_id: Option<&str>) -> Result<Vec<TraceRecord>> {
        let _state = self.shared.lock_state();
        let records = self.shared.codec.load(&self.shared.options.path)?;

        Ok(match session_id {
            Some(session_id) => records.into_iter().filter(|r| r.session_id == session_id).collect(),
            None => records,
        })
    }

    /// Persisted records that pass every filter of `query`
    pub fn query(&self, query: &RecordQuery) -> Result<Vec<TraceRecord>> {
        let records = self.load(query.session_id.as_deref())?;
        Ok(records.into_iter().filter(|record| query.matches(record)).collect())
    }

    pub fn count(&self, query: &RecordQuery) -> Result<usize> {
        Ok(self.query(query)?.len())
    }

    /// Distinct session ids of persisted records, in first-seen order
    pub fn get_sessions(&self) -> Result<Vec<String>> {
        let mut seen = HashSet::new();
        Ok(self
            .load(None)?
            .into_iter()
            .filter_map(|record| {
                if seen.insert(record.session_id.clone()) {
                    Some(record.session_id)
                } else {
                    None
                }
            })
            .collect())
    }

    /// Aggregate statistics over persisted records
    pub fn get_stats(&self) -> Result<StoreStats> {
        let state = self.shared.lock_state();
        let path = &self.shared.options.path;
        let records = self.shared.codec.load(path)?;

        let mut stats = StoreStats::from_records(&records);
        stats.buffered_records = state.buffer.len();
        stats.format = self.shared.options.format;
        stats.file_path = path.clone();
        stats.file_size = fs::metadata(path).map(|meta| meta.len()).unwrap_or(0);
        Ok(stats)
    }

    /// Drop buffered records and reset the file to its empty state
    pub fn clear(&self) -> Result<()> {
        let mut state = self.shared.lock_state();
        let discarded = state.buffer.len();
        state.buffer.clear();
        self.shared.codec.reset(&self.shared.options.path)?;
        info!(
            path = %self.shared.options.path.display(),
            discarded,
            "Cleared trace store"
        );
        Ok(())
    }

    /// Stop the flush thread and write out whatever is buffered.
    ///
    /// Safe to call more than once. A failed final flush keeps the records buffered and
    /// the next call retries it. Records stored afterwards are written through
    /// immediately.
    pub fn close(&self) -> Result<()> {
        let worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(worker) = worker {
            // A send error means the thread is already gone
            let _ = worker.stop_tx.send(());
            if worker.handle.join().is_err() {
                error!("Flush thread panicked");
            }
        }

        let mut state = self.shared.lock_state();
        if state.closed && state.buffer.is_empty() {
            return Ok(());
        }
        let written = self.shared.flush_locked(&mut state)?;
        state.closed = true;
        info!(
            path = %self.shared.options.path.display(),
            final_flush = written,
            "Closed trace store"
        );
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock_state().closed
    }

    /// Number of records waiting for a flush
    pub fn buffered_len(&self) -> usize {
        self.shared.lock_state().buffer.len()
    }

    pub fn path(&self) -> &Path {
        &self.shared.options.path
    }

    pub fn format(&self) -> OutputFormat {
        self.shared.options.format
    }

    pub fn options(&self) -> &StoreOptions {
        &self.shared.options
    }
}

impl Drop for BufferedStore {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!(
                path = %self.shared.options.path.display(),
                discarded = self.buffered_len(),
                error = %e,
                "Failed to flush records while dropping store, discarding them"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RecordKind, TokenUsage};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    const NEVER: Duration = Duration::from_secs(3600);

    fn record(session_id: &str) -> TraceRecord {
        TraceRecord::new(session_id, RecordKind::LlmCall)
            .with_input("prompt", "ping")
            .with_output("response", "pong")
            .with_model("gpt-4o-mini")
            .with_token_usage(TokenUsage::new(Some(10), Some(5), None))
            .with_duration_ms(20.0)
            .with_computed_cost()
    }

    fn open(dir: &TempDir, file: &str, buffer_size: usize) -> BufferedStore {
        let path = dir.path().join(file);
        let format = OutputFormat::from_path(&path).unwrap();
        BufferedStore::open(
            StoreOptions::new(path, format)
                .with_buffer_size(buffer_size)
                .with_flush_interval(NEVER),
        )
        .unwrap()
    }

    #[test]
    fn test_open_initializes_file() {
        let temp_dir = TempDir::new().unwrap();
        let store = open(&temp_dir, "logs/traces.csv", 10);

        assert!(store.path().exists());
        assert!(store.load(None).unwrap().is_empty());
        assert_eq!(store.format(), OutputFormat::Csv);
    }

    #[test]
    fn test_open_rejects_invalid_options() {
        let temp_dir = TempDir::new().unwrap();
        let options = StoreOptions::new(temp_dir.path().join("t.csv"), OutputFormat::Csv)
            .with_buffer_size(0);
        assert!(BufferedStore::open(options).is_err());
    }

    #[test]
    fn test_threshold_flush() {
        let temp_dir = TempDir::new().unwrap();
        let store = open(&temp_dir, "traces.csv", 3);

        for _ in 0..4 {
            store.store(record("s1"));
        }

        assert_eq!(store.load(None).unwrap().len(), 3);
        assert_eq!(store.buffered_len(), 1);
    }

    #[test]
    fn test_flush_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let store = open(&temp_dir, "traces.jsonl", 100);

        store.store(record("s1"));
        store.store(record("s1"));
        store.flush().unwrap();
        store.flush().unwrap();

        assert_eq!(store.load(None).unwrap().len(), 2);
        assert_eq!(store.buffered_len(), 0);
    }

    #[test]
    fn test_concurrent_stores_are_all_persisted() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(open(&temp_dir, "traces.jsonl", 7));

        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let store = store.clone();
                thread::spawn(move || {
                    for _ in 0..100 {
                        store.store(record(&format!("worker-{}", worker)));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        store.close().unwrap();

        let records = store.load(None).unwrap();
        assert_eq!(records.len(), 800);

        let ids: HashSet<_> = records.iter().map(|r| r.id().to_string()).collect();
        assert_eq!(ids.len(), 800);
        assert_eq!(store.get_sessions().unwrap().len(), 8);
    }

    #[test]
    fn test_timer_flush() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("traces.json");
        let store = BufferedStore::open(
            StoreOptions::new(&path, OutputFormat::Json)
                .with_flush_interval(Duration::from_millis(50)),
        )
        .unwrap();

        store.store(record("s1"));
        thread::sleep(Duration::from_millis(400));

        assert_eq!(store.buffered_len(), 0);
        assert_eq!(store.load(None).unwrap().len(), 1);
    }

    #[test]
    fn test_close_is_idempotent_and_stores_after_close_write_through() {
        let temp_dir = TempDir::new().unwrap();
        let store = open(&temp_dir, "traces.csv", 100);

        store.store(record("s1"));
        store.close().unwrap();
        store.close().unwrap();
        assert!(store.is_closed());
        assert_eq!(store.load(None).unwrap().len(), 1);

        store.store(record("s1"));
        assert_eq!(store.buffered_len(), 0);
        assert_eq!(store.load(None).unwrap().len(), 2);
    }

    #[test]
    fn test_drop_flushes_buffer() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("traces.jsonl");
        {
            let store = open(&temp_dir, "traces.jsonl", 100);
            store.store(record("s1"));
        }

        let reopened = BufferedStore::open(StoreOptions::new(&path, OutputFormat::JsonLines)).unwrap();
        assert_eq!(reopened.load(None).unwrap().len(), 1);
    }

    #[test]
    fn test_failed_flush_keeps_buffer() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("out");
        let store = BufferedStore::open(
            StoreOptions::new(dir.join("traces.csv"), OutputFormat::Csv).with_flush_interval(NEVER),
        )
        .unwrap();

        store.store(record("s1"));
        fs::remove_dir_all(&dir).unwrap();

        assert!(store.flush().is_err());
        assert_eq!(store.buffered_len(), 1);

        fs::create_dir_all(&dir).unwrap();
        store.flush().unwrap();
        assert_eq!(store.buffered_len(), 0);
        assert_eq!(store.load(None).unwrap().len(), 1);
    }

    #[test]
    fn test_failed_close_is_retried() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("out");
        let store = BufferedStore::open(
            StoreOptions::new(dir.join("traces.jsonl"), OutputFormat::JsonLines).with_flush_interval(NEVER),
        )
        .unwrap();

        store.store(record("s1"));
        fs::remove_dir_all(&dir).unwrap();

        assert!(store.close().is_err());
        assert!(!store.is_closed());
        assert_eq!(store.buffered_len(), 1);

        fs::create_dir_all(&dir).unwrap();
        store.close().unwrap();
        assert!(store.is_closed());
        assert_eq!(store.buffered_len(), 0);
        assert_eq!(store.load(None).unwrap().len(), 1);
    }

    #[test]
    fn test_load_by_session_and_sessions_order() {
        let temp_dir = TempDir::new().unwrap();
        let store = open(&temp_dir, "traces.csv", 100);

        store.store_many(vec![record("b"), record("a"), record("b"), record("c")]);
        store.flush().unwrap();

        assert_eq!(store.load(Some("b")).unwrap().len(), 2);
        assert!(store.load(Some("zzz")).unwrap().is_empty());
        assert_eq!(store.get_sessions().unwrap(), vec!["b", "a", "c"]);
    }

    #[test]
    fn test_query_and_count() {
        let temp_dir = TempDir::new().unwrap();
        let store = open(&temp_dir, "traces.jsonl", 100);

        let tool = TraceRecord::new("s1", RecordKind::ToolUse);
        store.store_many(vec![record("s1"), tool, record("s2")]);
        store.flush().unwrap();

        let priced = RecordQuery::new().cost_range(Some(0.0), None);
        assert_eq!(store.count(&priced).unwrap(), 2);

        let tools = RecordQuery::new().kind(RecordKind::ToolUse);
        assert_eq!(store.query(&tools).unwrap().len(), 1);

        let s2 = RecordQuery::new().session("s2").model("gpt-4o-mini");
        assert_eq!(store.count(&s2).unwrap(), 1);
    }

    #[test]
    fn test_stats_cover_persisted_records() {
        let temp_dir = TempDir::new().unwrap();
        let store = open(&temp_dir, "traces.csv", 100);

        store.store_many(vec![record("s1"), record("s2")]);
        store.flush().unwrap();
        store.store(record("s3"));

        let stats = store.get_stats().unwrap();
        assert_eq!(stats.total_records, 2);
        assert_eq!(stats.total_sessions, 2);
        assert_eq!(stats.total_tokens, 30);
        assert_eq!(stats.avg_duration_ms, 20.0);
        assert_eq!(stats.buffered_records, 1);
        assert!(stats.total_cost > 0.0);
        assert!(stats.file_size > 0);
    }

    #[test]
    fn test_clear_resets_file_and_buffer() {
        let temp_dir = TempDir::new().unwrap();
        let store = open(&temp_dir, "traces.json", 100);

        store.store(record("s1"));
        store.flush().unwrap();
        store.store(record("s1"));

        store.clear().unwrap();

        assert_eq!(store.buffered_len(), 0);
        assert!(store.load(None).unwrap().is_empty());
        store.store(record("s2"));
        store.flush().unwrap();
        assert_eq!(store.load(None).unwrap().len(), 1);
    }

    #[test]
    fn test_callback_sees_every_record() {
        let temp_dir = TempDir::new().unwrap();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let callback: RecordCallback = Arc::new(move |_record: &TraceRecord| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let store = BufferedStore::open_with_callback(
            StoreOptions::new(temp_dir.path().join("t.jsonl"), OutputFormat::JsonLines),
            Some(callback),
        )
        .unwrap();

        store.store(record("s"));
        store.store_many(vec![record("s"), record("s")]);

        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }
}
