//! Fetch Orchestrator - single-flight + debounce guard around one cycle
//!
//! Multiple independent triggers (aligned timer, fallback timer,
//! network-availability event, manual) may invoke `run_once`
//! concurrently; overlap is the expected case. Both guards run before
//! any network I/O. The single-flight flag is a compare-and-set
//! boolean, not a queue: a rejected concurrent attempt is dropped and
//! the next trigger retries. The debounce timestamp advances only on
//! success, so a failed run never blocks a near-term retry.

use anyhow::{bail, Result};
use chrono::Utc;
use futures_util::future::{join3, join_all};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::consensus::consensus;
use crate::sources::{FxRateSource, QuoteSource};
use crate::store::{DaySeriesStore, TrackerStore};
use crate::types::{
    day_key, ConsensusResult, Currency, FetchReason, GlobalLastQuote, HistoryRecord, Quote,
    Snapshot,
};

const NETWORK_PROBE_BACKOFF: Duration = Duration::from_millis(500);

/// Tuning knobs for one orchestrator instance
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub usd_outlier_threshold: Decimal,
    pub eur_outlier_threshold: Decimal,
    pub source_timeout: Duration,
    pub debounce: Duration,
    pub network_wait: Duration,
    /// Hosts resolved during the reachability probe / DNS pre-warm.
    /// Empty disables the probe (trusted environment or tests).
    pub prewarm_hosts: Vec<String>,
}

impl OrchestratorOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            usd_outlier_threshold: Decimal::from_f64(config.consensus.usd_outlier_threshold)
                .unwrap_or(Decimal::from(50)),
            eur_outlier_threshold: Decimal::from_f64(config.consensus.eur_outlier_threshold)
                .unwrap_or(Decimal::from(40)),
            source_timeout: Duration::from_secs(config.sources.timeout_secs),
            debounce: Duration::from_secs(config.fetch.debounce_secs),
            network_wait: Duration::from_secs(config.fetch.network_wait_secs),
            prewarm_hosts: config.fetch.prewarm_hosts.clone(),
        }
    }
}

/// Owned service object holding all per-cycle mutable state; constructed
/// once and passed by handle
pub struct FetchOrchestrator {
    usd_sources: Vec<Arc<dyn QuoteSource>>,
    eur_sources: Vec<Arc<dyn QuoteSource>>,
    fx: Arc<dyn FxRateSource>,
    store: Arc<TrackerStore>,
    day_series: Arc<DaySeriesStore>,
    opts: OrchestratorOptions,
    in_flight: AtomicBool,
    /// Epoch millis of the last successful cycle; 0 = never
    last_success_ms: AtomicI64,
}

/// Releases the single-flight flag on every exit path
struct FlightGuard<'a>(&'a AtomicBool);

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl FetchOrchestrator {
    pub fn new(
        usd_sources: Vec<Arc<dyn QuoteSource>>,
        eur_sources: Vec<Arc<dyn QuoteSource>>,
        fx: Arc<dyn FxRateSource>,
        store: Arc<TrackerStore>,
        day_series: Arc<DaySeriesStore>,
        opts: OrchestratorOptions,
    ) -> Self {
        Self {
            usd_sources,
            eur_sources,
            fx,
            store,
            day_series,
            opts,
            in_flight: AtomicBool::new(false),
            last_success_ms: AtomicI64::new(0),
        }
    }

    /// Run one full fetch cycle. Returns `false` when the run was
    /// debounced, rejected by the single-flight guard, or failed; no
    /// error ever escapes this boundary.
    pub async fn run_once(&self, reason: FetchReason) -> bool {
        let now_ms = Utc::now().timestamp_millis();
        let last = self.last_success_ms.load(Ordering::Acquire);
        if last > 0 && now_ms.saturating_sub(last) < self.opts.debounce.as_millis() as i64 {
            debug!(%reason, since_ms = now_ms - last, "trigger debounced");
            return false;
        }

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(%reason, "cycle already in flight, trigger dropped");
            return false;
        }
        let _guard = FlightGuard(&self.in_flight);

        info!(%reason, "fetch cycle starting");
        match self.cycle().await {
            Ok((usd, eur)) => {
                self.last_success_ms
                    .store(Utc::now().timestamp_millis(), Ordering::Release);
                info!(
                    %reason,
                    usd = %usd.value,
                    usd_kept = usd.kept,
                    eur = %eur.value,
                    eur_kept = eur.kept,
                    "fetch cycle complete"
                );
                true
            }
            Err(e) => {
                warn!(%reason, error = %e, "fetch cycle failed");
                false
            }
        }
    }

    async fn cycle(&self) -> Result<(ConsensusResult, ConsensusResult)> {
        if !self.wait_for_network().await {
            bail!("network unreachable within wait window");
        }

        let now = Utc::now();
        let (usd_quotes, mut eur_quotes, fx_rate) = join3(
            self.fetch_group(&self.usd_sources),
            self.fetch_group(&self.eur_sources),
            self.fx.fetch_eur_usd(),
        )
        .await;

        let usd = consensus(Currency::Usd, &usd_quotes, self.opts.usd_outlier_threshold);

        // Synthesize the FX-derived EUR quote from the USD consensus and
        // fold it into the EUR set like any other source
        if let Some(rate) = fx_rate.filter(|r| !r.is_zero()) {
            if !usd.is_empty() {
                let derived = (usd.value / rate).round_dp(6);
                eur_quotes.push(Quote::present("fx-derived", Currency::Eur, derived));
            }
        }
        let eur = consensus(Currency::Eur, &eur_quotes, self.opts.eur_outlier_threshold);

        if usd.is_empty() && eur.is_empty() {
            bail!("no valid quotes for any currency");
        }

        let previous = self.store.read_snapshot();

        // A currency with zero valid quotes records a placeholder: the
        // previous snapshot value carried forward. Consumers always see
        // last-known-good; staleness shows only through updated_ms.
        let usd_value = if usd.is_empty() {
            warn!(currency = %Currency::Usd, "no valid quotes, carrying previous value forward");
            previous.as_ref().map(|s| s.usd).unwrap_or(Decimal::ZERO)
        } else {
            usd.value
        };
        let eur_value = if eur.is_empty() {
            warn!(currency = %Currency::Eur, "no valid quotes, carrying previous value forward");
            previous.as_ref().map(|s| s.eur).unwrap_or(Decimal::ZERO)
        } else {
            eur.value
        };
        let fx_value = fx_rate
            .or_else(|| previous.as_ref().map(|s| s.eur_usd))
            .unwrap_or(Decimal::ZERO);

        let now_ms = now.timestamp_millis();
        self.store.write_snapshot(Snapshot {
            usd: usd_value,
            eur: eur_value,
            eur_usd: fx_value,
            updated_ms: now_ms,
        });
        self.store.append_history(HistoryRecord {
            ts_ms: now_ms,
            usd: usd_value,
            eur: eur_value,
            fx: fx_value,
        });

        let last_quote = self.store.global_last_quote();
        self.day_series
            .ensure_open_from_midnight_or_yesterday(now, last_quote.as_ref());

        if !usd.is_empty() {
            self.day_series.append_if_on_slot(now, usd.value);
            self.store.set_global_last_quote(GlobalLastQuote {
                value: usd.value,
                ts_ms: now_ms,
                day_key: day_key(now),
            });
        }

        Ok((usd, eur))
    }

    /// Fetch one currency group in parallel; a hung adapter times out
    /// individually and degrades to an absent quote
    async fn fetch_group(&self, sources: &[Arc<dyn QuoteSource>]) -> Vec<Quote> {
        let fetches = sources.iter().map(|source| {
            let source = Arc::clone(source);
            let timeout = self.opts.source_timeout;
            async move {
                match tokio::time::timeout(timeout, source.fetch()).await {
                    Ok(quote) => quote,
                    Err(_) => {
                        warn!(source = source.name(), currency = %source.currency(),
                            "source fetch timed out");
                        Quote::absent(source.name(), source.currency())
                    }
                }
            }
        });
        join_all(fetches).await
    }

    /// Bounded reachability wait doubling as DNS pre-warm: resolving any
    /// known host within the window counts as reachable
    async fn wait_for_network(&self) -> bool {
        if self.opts.prewarm_hosts.is_empty() {
            return true;
        }

        let hosts = &self.opts.prewarm_hosts;
        let probe = async {
            loop {
                for host in hosts {
                    if tokio::net::lookup_host(host.as_str()).await.is_ok() {
                        return;
                    }
                }
                tokio::time::sleep(NETWORK_PROBE_BACKOFF).await;
            }
        };

        match tokio::time::timeout(self.opts.network_wait, probe).await {
            Ok(()) => true,
            Err(_) => {
                warn!(wait = ?self.opts.network_wait, "network unreachable, cycle aborted");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FileKvStore, KvStore};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;

    struct FakeSource {
        name: &'static str,
        currency: Currency,
        value: Option<Decimal>,
        delay: Duration,
    }

    impl FakeSource {
        fn usd(name: &'static str, value: Decimal) -> Arc<dyn QuoteSource> {
            Arc::new(Self {
                name,
                currency: Currency::Usd,
                value: Some(value),
                delay: Duration::ZERO,
            })
        }

        fn absent(name: &'static str, currency: Currency) -> Arc<dyn QuoteSource> {
            Arc::new(Self {
                name,
                currency,
                value: None,
                delay: Duration::ZERO,
            })
        }

        fn slow(name: &'static str, value: Decimal, delay: Duration) -> Arc<dyn QuoteSource> {
            Arc::new(Self {
                name,
                currency: Currency::Usd,
                value: Some(value),
                delay,
            })
        }
    }

    #[async_trait]
    impl QuoteSource for FakeSource {
        fn name(&self) -> &str {
            self.name
        }

        fn currency(&self) -> Currency {
            self.currency
        }

        async fn fetch(&self) -> Quote {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            Quote {
                source: self.name.to_string(),
                currency: self.currency,
                value: self.value,
            }
        }
    }

    struct FakeFx(Option<Decimal>);

    #[async_trait]
    impl FxRateSource for FakeFx {
        async fn fetch_eur_usd(&self) -> Option<Decimal> {
            self.0
        }
    }

    fn test_options() -> OrchestratorOptions {
        OrchestratorOptions {
            usd_outlier_threshold: dec!(1.5),
            eur_outlier_threshold: dec!(1.5),
            source_timeout: Duration::from_millis(500),
            debounce: Duration::from_secs(90),
            network_wait: Duration::from_secs(1),
            prewarm_hosts: Vec::new(),
        }
    }

    fn stores(test_name: &str) -> (Arc<TrackerStore>, Arc<DaySeriesStore>, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!(
            "aurum_orchestrator_{}_{}",
            test_name,
            uuid::Uuid::new_v4()
        ));
        let kv: Arc<dyn KvStore> = Arc::new(FileKvStore::new(&dir).unwrap());
        (
            Arc::new(TrackerStore::new(kv.clone(), 720)),
            Arc::new(DaySeriesStore::new(kv, 90)),
            dir,
        )
    }

    fn orchestrator(
        usd: Vec<Arc<dyn QuoteSource>>,
        eur: Vec<Arc<dyn QuoteSource>>,
        fx: Option<Decimal>,
        test_name: &str,
    ) -> (Arc<FetchOrchestrator>, Arc<TrackerStore>, std::path::PathBuf) {
        let (store, day_series, dir) = stores(test_name);
        let orchestrator = Arc::new(FetchOrchestrator::new(
            usd,
            eur,
            Arc::new(FakeFx(fx)),
            store.clone(),
            day_series,
            test_options(),
        ));
        (orchestrator, store, dir)
    }

    #[tokio::test]
    async fn successful_cycle_persists_snapshot_and_history() {
        let usd = vec![
            FakeSource::usd("a", dec!(1850.00)),
            FakeSource::usd("b", dec!(1851.20)),
            FakeSource::usd("c", dec!(1995.00)),
        ];
        let (orchestrator, store, dir) = orchestrator(usd, Vec::new(), Some(dec!(1.08)), "cycle");

        assert!(orchestrator.run_once(FetchReason::Manual).await);

        let snapshot = store.read_snapshot().unwrap();
        // Outlier c trimmed: mean(1850.00, 1851.20) = 1850.60
        assert_eq!(snapshot.usd, dec!(1850.60));
        assert_eq!(snapshot.eur_usd, dec!(1.08));
        // EUR consensus comes from the fx-derived quote alone
        assert_eq!(snapshot.eur, dec!(1713.52));

        assert_eq!(store.read_history(10).len(), 1);
        assert_eq!(store.global_last_quote().unwrap().value, dec!(1850.60));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn second_trigger_within_debounce_window_is_skipped() {
        let usd = vec![FakeSource::usd("a", dec!(1850))];
        let (orchestrator, store, dir) =
            orchestrator(usd, Vec::new(), Some(dec!(1.08)), "debounce");

        assert!(orchestrator.run_once(FetchReason::Periodic).await);
        assert!(!orchestrator.run_once(FetchReason::Periodic).await);
        // Only the first run wrote anything
        assert_eq!(store.read_history(10).len(), 1);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn concurrent_triggers_admit_at_most_one() {
        let usd = vec![FakeSource::slow(
            "slow",
            dec!(1850),
            Duration::from_millis(100),
        )];
        let (orchestrator, _store, dir) =
            orchestrator(usd, Vec::new(), Some(dec!(1.08)), "single_flight");

        let a = {
            let o = orchestrator.clone();
            tokio::spawn(async move { o.run_once(FetchReason::Periodic).await })
        };
        let b = {
            let o = orchestrator.clone();
            tokio::spawn(async move { o.run_once(FetchReason::NetworkAvailable).await })
        };

        let (a, b) = (a.await.unwrap(), b.await.unwrap());
        assert_eq!(
            u8::from(a) + u8::from(b),
            1,
            "exactly one concurrent run may proceed"
        );
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn failed_run_does_not_advance_debounce() {
        let usd = vec![FakeSource::absent("a", Currency::Usd)];
        let (orchestrator, _store, dir) = orchestrator(usd, Vec::new(), None, "failed_retry");

        assert!(!orchestrator.run_once(FetchReason::Periodic).await);
        // Immediate retry is not debounced; it fails on data, not guards
        assert!(!orchestrator.run_once(FetchReason::Fallback).await);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn hung_source_degrades_to_absent_and_cycle_completes() {
        let usd = vec![
            FakeSource::usd("fast", dec!(1850)),
            FakeSource::slow("hung", dec!(9999), Duration::from_secs(30)),
        ];
        let (orchestrator, store, dir) = orchestrator(usd, Vec::new(), Some(dec!(1.08)), "hung");

        assert!(orchestrator.run_once(FetchReason::Periodic).await);
        assert_eq!(store.read_snapshot().unwrap().usd, dec!(1850.00));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn missing_currency_carries_previous_value_forward() {
        let usd = vec![FakeSource::usd("a", dec!(1850))];
        let eur = vec![FakeSource::absent("e", Currency::Eur)];
        let (store, day_series, dir) = stores("carry_forward");
        store.write_snapshot(Snapshot {
            usd: dec!(1840),
            eur: dec!(1700),
            eur_usd: dec!(1.08),
            updated_ms: 1,
        });
        let orchestrator = FetchOrchestrator::new(
            usd,
            eur,
            Arc::new(FakeFx(None)),
            store.clone(),
            day_series,
            test_options(),
        );

        assert!(orchestrator.run_once(FetchReason::Manual).await);
        let snapshot = store.read_snapshot().unwrap();
        assert_eq!(snapshot.usd, dec!(1850.00));
        // EUR had no valid quotes and no fx rate: placeholder carry-forward
        assert_eq!(snapshot.eur, dec!(1700));
        assert_eq!(snapshot.eur_usd, dec!(1.08));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn all_sources_empty_reports_failure() {
        let usd = vec![FakeSource::absent("a", Currency::Usd)];
        let eur = vec![FakeSource::absent("b", Currency::Eur)];
        let (orchestrator, store, dir) = orchestrator(usd, eur, None, "all_empty");

        assert!(!orchestrator.run_once(FetchReason::Boot).await);
        assert_eq!(store.read_snapshot(), None);
        assert!(store.read_history(10).is_empty());
        let _ = std::fs::remove_dir_all(dir);
    }
}
