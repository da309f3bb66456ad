//! aurum - multi-source gold spot price consensus tracker
//!
//! Wires the stores, source adapters, orchestrator and trigger paths
//! together and runs the trigger loop until shutdown. All trigger paths
//! (aligned timer, coarse fallback timer, network-availability watcher)
//! funnel into one channel; the orchestrator's guards decide which
//! triggers actually run.

use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use aurum::config::AppConfig;
use aurum::orchestrator::{FetchOrchestrator, OrchestratorOptions};
use aurum::scheduler::AlignedScheduler;
use aurum::service::PriceService;
use aurum::sources::build_sources;
use aurum::store::{DaySeriesStore, FileKvStore, KvStore, TrackerStore};
use aurum::types::FetchReason;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,aurum=debug")),
        )
        .init();

    let config = AppConfig::load().context("Failed to load configuration")?;
    info!(config = %config, "starting aurum");

    let kv: Arc<dyn KvStore> =
        Arc::new(FileKvStore::new(&config.store.data_dir).context("Failed to open data dir")?);
    let store = Arc::new(TrackerStore::new(kv.clone(), config.store.history_capacity));
    let day_series = Arc::new(DaySeriesStore::new(kv, config.store.slot_tolerance_secs));

    let sources = build_sources(&config.sources, &config.consensus)?;
    let orchestrator = Arc::new(FetchOrchestrator::new(
        sources.usd,
        sources.eur,
        sources.fx,
        store.clone(),
        day_series.clone(),
        OrchestratorOptions::from_config(&config),
    ));
    let service = PriceService::new(store.clone(), day_series.clone(), orchestrator);

    // Seed a provisional open before the first fetch so the intraday
    // chart has a baseline even while the boot cycle is in flight
    day_series.ensure_open_from_midnight_or_yesterday(Utc::now(), store.global_last_quote().as_ref());

    let (trigger_tx, mut trigger_rx) = mpsc::channel::<FetchReason>(16);
    let scheduler = AlignedScheduler::new(config.scheduler.interval_minutes, trigger_tx.clone());

    spawn_fallback_timer(config.scheduler.fallback_minutes, trigger_tx.clone());
    spawn_network_watcher(
        config.fetch.prewarm_hosts.clone(),
        config.scheduler.network_poll_secs,
        trigger_tx.clone(),
    );

    // Boot trigger, then keep the aligned schedule alive. The channel is
    // bounded and this send happens before the loop starts draining it.
    trigger_tx
        .send(FetchReason::Boot)
        .await
        .context("trigger channel closed at startup")?;
    scheduler.arm_next(Utc::now());

    loop {
        tokio::select! {
            reason = trigger_rx.recv() => {
                let Some(reason) = reason else { break };
                service.run_fetch_cycle(reason).await;
                if reason == FetchReason::Periodic {
                    scheduler.arm_next(Utc::now());
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    scheduler.cancel();
    info!("aurum stopped");
    Ok(())
}

/// Coarse safety-net timer. Fires regardless of alignment; the
/// orchestrator's debounce makes it a no-op while the aligned path is
/// healthy.
fn spawn_fallback_timer(fallback_minutes: u32, tx: mpsc::Sender<FetchReason>) {
    let period = Duration::from_secs(u64::from(fallback_minutes.max(1)) * 60);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if tx.send(FetchReason::Fallback).await.is_err() {
                return;
            }
        }
    });
}

/// Polls reachability of the first known host and fires a trigger on
/// each unreachable-to-reachable transition, so a machine waking from
/// sleep refreshes promptly instead of waiting out the timers.
fn spawn_network_watcher(hosts: Vec<String>, poll_secs: u64, tx: mpsc::Sender<FetchReason>) {
    if hosts.is_empty() {
        return;
    }
    tokio::spawn(async move {
        let mut was_reachable = true;
        let mut ticker = tokio::time::interval(Duration::from_secs(poll_secs.max(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let reachable = probe(&hosts).await;
            if reachable && !was_reachable {
                info!("network became available");
                if tx.send(FetchReason::NetworkAvailable).await.is_err() {
                    return;
                }
            } else if !reachable && was_reachable {
                warn!("network became unavailable");
            }
            was_reachable = reachable;
        }
    });
}

async fn probe(hosts: &[String]) -> bool {
    for host in hosts {
        if tokio::net::lookup_host(host.as_str()).await.is_ok() {
            return true;
        }
    }
    false
}
