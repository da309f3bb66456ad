//! Configuration management for aurum
//!
//! Loads from optional config files + environment variables via .env

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub sources: SourcesConfig,
    pub consensus: ConsensusConfig,
    pub fetch: FetchConfig,
    pub scheduler: SchedulerConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourcesConfig {
    /// Enable the GoldAPI JSON feed (requires GOLDAPI_KEY)
    pub gold_api_enabled: bool,
    /// Enable the metals.dev JSON feed (requires METALS_DEV_KEY)
    pub metals_dev_enabled: bool,
    /// Enable the scraped spot-price page
    pub spot_page_enabled: bool,
    /// URL of the scraped spot-price page
    pub spot_page_url: String,
    /// Per-source HTTP timeout in seconds
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConsensusConfig {
    /// Absolute distance from the median beyond which a USD quote is
    /// treated as an outlier
    pub usd_outlier_threshold: f64,
    /// Same, for EUR quotes
    pub eur_outlier_threshold: f64,
    /// Plausibility band for USD quotes
    pub usd_band_min: f64,
    pub usd_band_max: f64,
    /// Plausibility band for EUR quotes
    pub eur_band_min: f64,
    pub eur_band_max: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    /// Minimum seconds between two successful cycles; triggers inside
    /// this window are skipped
    pub debounce_secs: u64,
    /// Bounded wait for network reachability before a cycle aborts
    pub network_wait_secs: u64,
    /// Hosts resolved during the DNS pre-warm
    pub prewarm_hosts: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Wall-clock alignment interval in minutes (minimum 1)
    pub interval_minutes: u32,
    /// Coarse fallback timer in minutes; fires through the same guards
    pub fallback_minutes: u32,
    /// Poll interval of the network-availability watcher in seconds
    pub network_poll_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Data directory for the file-backed KV layer
    pub data_dir: String,
    /// Rolling history capacity (FIFO eviction)
    pub history_capacity: usize,
    /// Slot tolerance for intraday appends in seconds
    pub slot_tolerance_secs: u64,
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let config = Config::builder()
            // Source defaults
            .set_default("sources.gold_api_enabled", true)?
            .set_default("sources.metals_dev_enabled", true)?
            .set_default("sources.spot_page_enabled", true)?
            .set_default(
                "sources.spot_page_url",
                "https://www.bulliondesk.example/gold-spot",
            )?
            .set_default("sources.timeout_secs", 10)?
            // Consensus defaults
            .set_default("consensus.usd_outlier_threshold", 50.0)?
            .set_default("consensus.eur_outlier_threshold", 40.0)?
            .set_default("consensus.usd_band_min", 200.0)?
            .set_default("consensus.usd_band_max", 15000.0)?
            .set_default("consensus.eur_band_min", 200.0)?
            .set_default("consensus.eur_band_max", 10000.0)?
            // Fetch defaults
            .set_default("fetch.debounce_secs", 90)?
            .set_default("fetch.network_wait_secs", 10)?
            .set_default(
                "fetch.prewarm_hosts",
                vec!["www.goldapi.io:443", "api.frankfurter.dev:443"],
            )?
            // Scheduler defaults
            .set_default("scheduler.interval_minutes", 5)?
            .set_default("scheduler.fallback_minutes", 15)?
            .set_default("scheduler.network_poll_secs", 30)?
            // Store defaults
            .set_default("store.data_dir", "./data")?
            .set_default("store.history_capacity", 720)?
            .set_default("store.slot_tolerance_secs", 90)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (AURUM_*)
            .add_source(Environment::with_prefix("AURUM").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        Ok(app_config)
    }

    /// Generate a digest of the config (without secrets) for logging
    pub fn digest(&self) -> String {
        format!(
            "interval={}m fallback={}m debounce={}s history_cap={} data_dir={}",
            self.scheduler.interval_minutes,
            self.scheduler.fallback_minutes,
            self.fetch.debounce_secs,
            self.store.history_capacity,
            self.store.data_dir,
        )
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}
