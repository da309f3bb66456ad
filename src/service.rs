//! Price service facade
//!
//! Single owner of the tracker's moving parts; everything a frontend or
//! host integration needs goes through this surface. Reads are
//! synchronous against in-memory state, observe methods hand out streams
//! backed by the stores' watch channels.

use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio_stream::wrappers::WatchStream;
use tracing::warn;

use crate::orchestrator::FetchOrchestrator;
use crate::store::{DaySeriesStore, TrackerStore};
use crate::types::{FetchReason, HistoryRecord, Snapshot};

pub struct PriceService {
    store: Arc<TrackerStore>,
    day_series: Arc<DaySeriesStore>,
    orchestrator: Arc<FetchOrchestrator>,
}

impl PriceService {
    pub fn new(
        store: Arc<TrackerStore>,
        day_series: Arc<DaySeriesStore>,
        orchestrator: Arc<FetchOrchestrator>,
    ) -> Self {
        Self {
            store,
            day_series,
            orchestrator,
        }
    }

    /// Latest persisted snapshot, if any cycle ever succeeded
    pub fn read_snapshot(&self) -> Option<Snapshot> {
        self.store.read_snapshot()
    }

    /// Stream of snapshot updates, current value first
    pub fn observe_snapshot(&self) -> WatchStream<Option<Snapshot>> {
        WatchStream::new(self.store.watch_snapshot())
    }

    /// Most recent `limit` history rows, oldest first
    pub fn read_history(&self, limit: usize) -> Vec<HistoryRecord> {
        self.store.read_history(limit)
    }

    /// Stream of full history views, emitted after every append
    pub fn observe_history(&self) -> WatchStream<Vec<HistoryRecord>> {
        WatchStream::new(self.store.watch_history())
    }

    /// Today's intraday series projected onto `slots` buckets (native
    /// resolution when `slots` is 288). Stale or missing days read as
    /// all-absent.
    pub fn read_day_series(&self, slots: usize) -> Vec<Option<Decimal>> {
        self.day_series.get(Utc::now(), slots)
    }

    /// Run one guarded fetch cycle; `true` only when the cycle ran to
    /// completion and persisted fresh values
    pub async fn run_fetch_cycle(&self, reason: FetchReason) -> bool {
        self.orchestrator.run_once(reason).await
    }

    /// Wipe every persisted artifact: snapshot, history, last quote and
    /// the intraday series. Destructive; callers confirm first.
    pub fn clear_all_persisted_state(&self) {
        warn!("clearing all persisted state on request");
        self.store.clear_all();
        self.day_series.clear();
    }
}
