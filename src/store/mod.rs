//! Persistence module
//!
//! Snapshot/history store over the durable KV layer, plus the slotted
//! intraday series store. Writes are individually atomic under each
//! store's own serialization; no cross-write transaction ties them
//! together (a crash mid-cycle self-heals on the next successful cycle).

pub mod day_series;
pub mod kv;

pub use day_series::{DaySeries, DaySeriesStore, SLOTS_PER_DAY};
pub use kv::{FileKvStore, KvStore, StoreError};

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::types::{GlobalLastQuote, HistoryRecord, Snapshot};

const KEY_SNAPSHOT: &str = "snapshot";
const KEY_HISTORY: &str = "history";
const KEY_LAST_QUOTE: &str = "last_quote";

#[derive(Debug, Default)]
struct State {
    snapshot: Option<Snapshot>,
    history: VecDeque<HistoryRecord>,
    last_quote: Option<GlobalLastQuote>,
}

/// Durable latest-snapshot + bounded rolling history.
///
/// Read/write methods never return errors: persistence failures are
/// logged and degrade to a stale read or dropped write, so consumers
/// always see the last successfully persisted value.
pub struct TrackerStore {
    kv: Arc<dyn KvStore>,
    history_capacity: usize,
    state: Mutex<State>,
    snapshot_tx: watch::Sender<Option<Snapshot>>,
    history_tx: watch::Sender<Vec<HistoryRecord>>,
}

impl TrackerStore {
    pub fn new(kv: Arc<dyn KvStore>, history_capacity: usize) -> Self {
        let state = State {
            snapshot: load_json(kv.as_ref(), KEY_SNAPSHOT),
            history: load_json::<Vec<HistoryRecord>>(kv.as_ref(), KEY_HISTORY)
                .map(VecDeque::from)
                .unwrap_or_default(),
            last_quote: load_json(kv.as_ref(), KEY_LAST_QUOTE),
        };

        let (snapshot_tx, _) = watch::channel(state.snapshot.clone());
        let (history_tx, _) = watch::channel(state.history.iter().cloned().collect());

        Self {
            kv,
            history_capacity,
            state: Mutex::new(state),
            snapshot_tx,
            history_tx,
        }
    }

    pub fn read_snapshot(&self) -> Option<Snapshot> {
        self.lock().snapshot.clone()
    }

    /// Watch channel carrying the latest snapshot; the service wraps it
    /// into a stream for consumers
    pub fn watch_snapshot(&self) -> watch::Receiver<Option<Snapshot>> {
        self.snapshot_tx.subscribe()
    }

    pub fn write_snapshot(&self, snapshot: Snapshot) {
        let mut state = self.lock();
        state.snapshot = Some(snapshot.clone());
        self.persist_json(KEY_SNAPSHOT, &snapshot);
        drop(state);
        let _ = self.snapshot_tx.send(Some(snapshot));
    }

    /// Most recent `limit` records, oldest first
    pub fn read_history(&self, limit: usize) -> Vec<HistoryRecord> {
        let state = self.lock();
        let skip = state.history.len().saturating_sub(limit);
        state.history.iter().skip(skip).cloned().collect()
    }

    pub fn watch_history(&self) -> watch::Receiver<Vec<HistoryRecord>> {
        self.history_tx.subscribe()
    }

    /// Append one record, evicting strictly FIFO past capacity
    pub fn append_history(&self, record: HistoryRecord) {
        let mut state = self.lock();
        state.history.push_back(record);
        while state.history.len() > self.history_capacity {
            state.history.pop_front();
        }
        let rows: Vec<HistoryRecord> = state.history.iter().cloned().collect();
        self.persist_json(KEY_HISTORY, &rows);
        drop(state);
        let _ = self.history_tx.send(rows);
    }

    pub fn global_last_quote(&self) -> Option<GlobalLastQuote> {
        self.lock().last_quote.clone()
    }

    pub fn set_global_last_quote(&self, quote: GlobalLastQuote) {
        let mut state = self.lock();
        state.last_quote = Some(quote.clone());
        self.persist_json(KEY_LAST_QUOTE, &quote);
    }

    /// Administrative wipe of everything this store owns. Debug-only;
    /// the caller surfaces the confirmation to the user.
    pub fn clear_all(&self) {
        warn!("clearing all persisted tracker state");
        let mut state = self.lock();
        *state = State::default();
        for key in [KEY_SNAPSHOT, KEY_HISTORY, KEY_LAST_QUOTE] {
            if let Err(e) = self.kv.remove(key) {
                warn!(key, error = %e, "state remove failed");
            }
        }
        drop(state);
        let _ = self.snapshot_tx.send(None);
        let _ = self.history_tx.send(Vec::new());
        info!("persisted tracker state cleared");
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn persist_json<T: serde::Serialize>(&self, key: &str, value: &T) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key, error = %e, "serialize failed, write dropped");
                return;
            }
        };
        if let Err(e) = self.kv.put(key, &raw) {
            warn!(key, error = %e, "persist failed, write dropped");
        }
    }
}

fn load_json<T: serde::de::DeserializeOwned>(kv: &dyn KvStore, key: &str) -> Option<T> {
    match kv.get(key) {
        Ok(Some(raw)) => match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, error = %e, "persisted value unreadable, discarding");
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            warn!(key, error = %e, "load failed, starting empty");
            None
        }
    }
}
