//! Slotted Intraday Series Store
//!
//! One logical row per calendar day: an open value plus 288 five-minute
//! slots with running min/max. A day starts provisional (open seeded
//! from the last known quote, no real samples yet) and becomes
//! established on its first real slot write. A day-key mismatch replaces
//! the row wholesale, never merges. Store operations never return errors
//! to callers; persistence failures are logged and degrade to a stale
//! read or dropped write.

use chrono::{DateTime, Timelike, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::store::kv::KvStore;
use crate::types::{day_key, GlobalLastQuote};

/// Native resolution: 288 five-minute slots per day
pub const SLOTS_PER_DAY: usize = 288;
const SLOT_SECS: u32 = 300;

const KEY_DAY_SERIES: &str = "day_series";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaySeries {
    pub day_key: String,
    pub open: Decimal,
    pub slots: Vec<Option<Decimal>>,
    pub min: Decimal,
    pub max: Decimal,
    pub last_update_ms: i64,
    /// Set while the open/min/max are seeded from the previous day's
    /// last quote; carries the seed's timestamp. Cleared by the first
    /// real slot write.
    pub provisional_open_ms: Option<i64>,
}

impl DaySeries {
    fn seeded(day: String, value: Decimal, provisional_ms: Option<i64>, now_ms: i64) -> Self {
        Self {
            day_key: day,
            open: value,
            slots: vec![None; SLOTS_PER_DAY],
            min: value,
            max: value,
            last_update_ms: now_ms,
            provisional_open_ms: provisional_ms,
        }
    }

    fn has_real_slots(&self) -> bool {
        self.slots.iter().any(|s| s.is_some())
    }
}

pub struct DaySeriesStore {
    kv: Arc<dyn KvStore>,
    tolerance_secs: u32,
    state: Mutex<Option<DaySeries>>,
}

impl DaySeriesStore {
    pub fn new(kv: Arc<dyn KvStore>, tolerance_secs: u64) -> Self {
        let state = match kv.get(KEY_DAY_SERIES) {
            Ok(Some(raw)) => match serde_json::from_str::<DaySeries>(&raw) {
                Ok(series) if series.slots.len() == SLOTS_PER_DAY => Some(series),
                Ok(series) => {
                    warn!(
                        slots = series.slots.len(),
                        "persisted day series has wrong resolution, discarding"
                    );
                    None
                }
                Err(e) => {
                    warn!(error = %e, "persisted day series unreadable, discarding");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "day series load failed, starting empty");
                None
            }
        };

        Self {
            kv,
            tolerance_secs: tolerance_secs as u32,
            state: Mutex::new(state),
        }
    }

    /// Append a price into the five-minute slot `ts` falls in, if `ts`
    /// is close enough to the slot boundary. Jittered triggers landing
    /// deep inside a slot are silently dropped so they cannot pollute
    /// adjacent slots. A stale stored day resets the row, seeded by this
    /// price as the new open.
    pub fn append_if_on_slot(&self, ts: DateTime<Utc>, price: Decimal) {
        let slot = slot_index(ts);
        let offset = (ts.minute() % 5) * 60 + ts.second();
        if offset > self.tolerance_secs {
            debug!(%ts, slot, offset, tolerance = self.tolerance_secs, "off-slot append dropped");
            return;
        }

        let today = day_key(ts);
        let ts_ms = ts.timestamp_millis();

        let mut guard = match self.state.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };

        let series = match guard.as_mut() {
            Some(series) if series.day_key == today => series,
            _ => {
                // New day (or first ever write): replace, never merge
                *guard = Some(DaySeries::seeded(today, price, None, ts_ms));
                guard.as_mut().expect("just set")
            }
        };

        let first_real_write = series.provisional_open_ms.is_some() || !series.has_real_slots();
        if first_real_write {
            // The zero-guard keeps a seeded non-zero open/min/max when a
            // broken provider hands us an exact zero as the first sample.
            if !(price.is_zero() && !series.min.is_zero()) {
                series.open = price;
                series.min = price;
                series.max = price;
            }
            series.provisional_open_ms = None;
        } else if !price.is_zero() {
            if series.min.is_zero() || price < series.min {
                series.min = price;
            }
            if price > series.max {
                series.max = price;
            }
        }

        series.slots[slot] = Some(price);
        series.last_update_ms = ts_ms;

        debug!(day = %series.day_key, slot, %price, "slot written");
        self.persist(&guard);
    }

    /// Seed a provisional open from the last known quote when today has
    /// no record or no real samples yet. Always superseded by the first
    /// real write.
    pub fn ensure_open_from_midnight_or_yesterday(
        &self,
        now: DateTime<Utc>,
        last: Option<&GlobalLastQuote>,
    ) {
        let Some(last) = last else {
            return;
        };
        let today = day_key(now);

        let mut guard = match self.state.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(series) = guard.as_ref() {
            if series.day_key == today && series.has_real_slots() {
                return;
            }
        }

        debug!(day = %today, seed = %last.value, "seeding provisional open");
        *guard = Some(DaySeries::seeded(
            today,
            last.value,
            Some(last.ts_ms),
            now.timestamp_millis(),
        ));
        self.persist(&guard);
    }

    /// Project the native 288 slots onto `slots` buckets, taking the
    /// last non-absent sample per bucket — most-recent-known-value
    /// semantics at any requested resolution, never interpolated. A
    /// missing or stale day yields an all-absent series without mutating
    /// storage.
    pub fn get(&self, now: DateTime<Utc>, slots: usize) -> Vec<Option<Decimal>> {
        if slots == 0 {
            return Vec::new();
        }

        let guard = match self.state.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };

        let today = day_key(now);
        let series = match guard.as_ref() {
            Some(series) if series.day_key == today => series,
            _ => return vec![None; slots],
        };

        (0..slots)
            .map(|bucket| {
                let start = bucket * SLOTS_PER_DAY / slots;
                let end = ((bucket + 1) * SLOTS_PER_DAY / slots).min(SLOTS_PER_DAY);
                series.slots[start..end]
                    .iter()
                    .rev()
                    .find_map(|s| *s)
            })
            .collect()
    }

    /// Current row, for diagnostics and tests
    pub fn current(&self) -> Option<DaySeries> {
        match self.state.lock() {
            Ok(g) => g.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Administrative wipe; used only by clear-all
    pub fn clear(&self) {
        let mut guard = match self.state.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = None;
        if let Err(e) = self.kv.remove(KEY_DAY_SERIES) {
            warn!(error = %e, "day series remove failed");
        }
    }

    fn persist(&self, state: &Option<DaySeries>) {
        let Some(series) = state.as_ref() else {
            return;
        };
        let raw = match serde_json::to_string(series) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "day series serialize failed, write dropped");
                return;
            }
        };
        if let Err(e) = self.kv.put(KEY_DAY_SERIES, &raw) {
            warn!(error = %e, "day series persist failed, write dropped");
        }
    }
}

/// Five-minute slot index for a wall-clock instant: (hour·60 + minute)/5
pub fn slot_index(ts: DateTime<Utc>) -> usize {
    ((ts.hour() * 60 + ts.minute()) / (SLOT_SECS / 60)) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::kv::FileKvStore;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn temp_store(test_name: &str, tolerance_secs: u64) -> (DaySeriesStore, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!(
            "aurum_day_series_{}_{}",
            test_name,
            uuid::Uuid::new_v4()
        ));
        let kv: Arc<dyn KvStore> = Arc::new(FileKvStore::new(&dir).unwrap());
        (DaySeriesStore::new(kv, tolerance_secs), dir)
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 7, h, m, s).unwrap()
    }

    fn last_quote(value: Decimal, ts: DateTime<Utc>) -> GlobalLastQuote {
        GlobalLastQuote {
            value,
            ts_ms: ts.timestamp_millis(),
            day_key: day_key(ts),
        }
    }

    #[test]
    fn slot_index_maps_five_minute_buckets() {
        assert_eq!(slot_index(at(0, 0, 0)), 0);
        assert_eq!(slot_index(at(0, 4, 59)), 0);
        assert_eq!(slot_index(at(0, 5, 0)), 1);
        assert_eq!(slot_index(at(10, 0, 0)), 120);
        assert_eq!(slot_index(at(23, 55, 0)), 287);
    }

    #[test]
    fn first_real_write_establishes_open_min_max_and_clears_provisional() {
        let (store, dir) = temp_store("first_write", 90);
        store.ensure_open_from_midnight_or_yesterday(
            at(10, 0, 0),
            Some(&last_quote(dec!(1880), at(9, 0, 0))),
        );
        let series = store.current().unwrap();
        assert!(series.provisional_open_ms.is_some());
        assert_eq!(series.open, dec!(1880));

        store.append_if_on_slot(at(10, 0, 30), dec!(1900.00));

        let series = store.current().unwrap();
        assert_eq!(series.slots[120], Some(dec!(1900.00)));
        assert_eq!(series.open, dec!(1900.00));
        assert_eq!(series.min, dec!(1900.00));
        assert_eq!(series.max, dec!(1900.00));
        assert_eq!(series.provisional_open_ms, None);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn off_slot_append_is_dropped() {
        let (store, dir) = temp_store("off_slot", 90);
        // 10:03:00 is 180s past the 10:00 boundary
        store.append_if_on_slot(at(10, 3, 0), dec!(1900));
        assert!(store.current().is_none());

        // A wider tolerance accepts the same instant into slot 120
        let (loose, dir2) = temp_store("off_slot_loose", 300);
        loose.append_if_on_slot(at(10, 3, 0), dec!(1900));
        let series = loose.current().unwrap();
        assert_eq!(series.slots[120], Some(dec!(1900)));
        let _ = std::fs::remove_dir_all(dir);
        let _ = std::fs::remove_dir_all(dir2);
    }

    #[test]
    fn append_is_idempotent() {
        let (store, dir) = temp_store("idempotent", 90);
        store.append_if_on_slot(at(12, 5, 10), dec!(1850.50));
        let first = store.current().unwrap();
        store.append_if_on_slot(at(12, 5, 10), dec!(1850.50));
        let second = store.current().unwrap();
        assert_eq!(first, second);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn min_max_extend_monotonically() {
        let (store, dir) = temp_store("min_max", 90);
        store.append_if_on_slot(at(9, 0, 0), dec!(1850));
        store.append_if_on_slot(at(9, 5, 0), dec!(1840));
        store.append_if_on_slot(at(9, 10, 0), dec!(1870));
        let series = store.current().unwrap();
        assert_eq!(series.min, dec!(1840));
        assert_eq!(series.max, dec!(1870));
        assert_eq!(series.open, dec!(1850));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn zero_first_value_keeps_seeded_min_max() {
        let (store, dir) = temp_store("zero_guard", 90);
        store.ensure_open_from_midnight_or_yesterday(
            at(8, 0, 0),
            Some(&last_quote(dec!(1880), at(7, 0, 0))),
        );
        store.append_if_on_slot(at(8, 0, 0), dec!(0));

        let series = store.current().unwrap();
        assert_eq!(series.open, dec!(1880));
        assert_eq!(series.min, dec!(1880));
        assert_eq!(series.max, dec!(1880));
        assert_eq!(series.provisional_open_ms, None);
        assert_eq!(series.slots[96], Some(dec!(0)));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn zero_never_becomes_running_min() {
        let (store, dir) = temp_store("zero_min", 90);
        store.append_if_on_slot(at(9, 0, 0), dec!(1850));
        store.append_if_on_slot(at(9, 5, 0), dec!(0));
        let series = store.current().unwrap();
        assert_eq!(series.min, dec!(1850));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn day_rollover_replaces_series_with_new_open() {
        let (store, dir) = temp_store("rollover", 90);
        store.append_if_on_slot(at(23, 55, 0), dec!(1850));

        let next_day = Utc.with_ymd_and_hms(2024, 3, 8, 0, 0, 10).unwrap();
        store.append_if_on_slot(next_day, dec!(1860));

        let series = store.current().unwrap();
        assert_eq!(series.day_key, "2024-03-08");
        assert_eq!(series.open, dec!(1860));
        assert_eq!(series.slots[0], Some(dec!(1860)));
        // Yesterday's slot 287 is gone
        assert_eq!(series.slots[287], None);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn stale_day_read_returns_all_absent_without_mutating() {
        let (store, dir) = temp_store("stale_read", 90);
        store.append_if_on_slot(at(10, 0, 0), dec!(1850));

        let next_day = Utc.with_ymd_and_hms(2024, 3, 8, 9, 0, 0).unwrap();
        let projected = store.get(next_day, 48);
        assert_eq!(projected.len(), 48);
        assert!(projected.iter().all(|s| s.is_none()));

        // Storage untouched: the old day is still there
        assert_eq!(store.current().unwrap().day_key, "2024-03-07");
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn projection_takes_last_sample_per_bucket() {
        let (store, dir) = temp_store("projection", 90);
        // Native slot 10 (00:50) only
        store.append_if_on_slot(at(0, 50, 0), dec!(1850.25));

        let projected = store.get(at(1, 0, 0), 48);
        assert_eq!(projected.len(), 48);
        let populated: Vec<usize> = projected
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.map(|_| i))
            .collect();
        // Slot 10 falls in 30-minute bucket 1 (native slots 6..12)
        assert_eq!(populated, vec![1]);
        assert_eq!(projected[1], Some(dec!(1850.25)));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn projection_at_native_resolution_is_identity() {
        let (store, dir) = temp_store("native_projection", 90);
        store.append_if_on_slot(at(10, 0, 0), dec!(1850));
        store.append_if_on_slot(at(10, 5, 0), dec!(1851));

        let projected = store.get(at(10, 10, 0), SLOTS_PER_DAY);
        assert_eq!(projected[120], Some(dec!(1850)));
        assert_eq!(projected[121], Some(dec!(1851)));
        assert_eq!(projected.iter().filter(|s| s.is_some()).count(), 2);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn seeding_does_not_overwrite_established_day() {
        let (store, dir) = temp_store("no_reseed", 90);
        store.append_if_on_slot(at(10, 0, 0), dec!(1850));
        store.ensure_open_from_midnight_or_yesterday(
            at(10, 30, 0),
            Some(&last_quote(dec!(1700), at(10, 20, 0))),
        );
        let series = store.current().unwrap();
        assert_eq!(series.open, dec!(1850));
        assert!(series.has_real_slots());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn state_survives_reload_from_kv() {
        let dir = std::env::temp_dir().join(format!("aurum_day_series_reload_{}", uuid::Uuid::new_v4()));
        let kv: Arc<dyn KvStore> = Arc::new(FileKvStore::new(&dir).unwrap());
        {
            let store = DaySeriesStore::new(kv.clone(), 90);
            store.append_if_on_slot(at(10, 0, 0), dec!(1850));
        }
        let reloaded = DaySeriesStore::new(kv, 90);
        let series = reloaded.current().unwrap();
        assert_eq!(series.slots[120], Some(dec!(1850)));
        let _ = std::fs::remove_dir_all(dir);
    }
}
