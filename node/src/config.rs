//! Node configuration with TOML file support.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use lattice_consensus::{
    ActiveElectionsConfig, HintedSchedulerConfig, OptimisticSchedulerConfig,
    PrioritySchedulerConfig, VoteCacheConfig,
};
use lattice_store_lmdb::LmdbConfig;
use lattice_types::NetworkId;

use crate::backlog_scan::BacklogScanConfig;
use crate::block_processor::BlockProcessorConfig;
use crate::confirming_set::ConfirmingSetConfig;
use crate::gap_cache::GapCacheConfig;
use crate::logging::LogFormat;
use crate::unchecked::UncheckedConfig;
use crate::NodeError;

/// Configuration for a lattice node.
///
/// Can be loaded from a TOML file via [`NodeConfig::from_toml_file`] or
/// built programmatically (e.g. for tests). Every section is optional and
/// falls back to its defaults.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Which network this node belongs to.
    #[serde(default = "default_network")]
    pub network: NetworkId,

    /// Data directory for ledger storage.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default)]
    pub log_format: LogFormat,

    /// Log level filter, e.g. "info" or "debug,lattice_consensus=trace".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Whether to keep Prometheus metrics up to date.
    #[serde(default)]
    pub enable_metrics: bool,

    #[serde(default)]
    pub active_elections: ActiveElectionsConfig,
    #[serde(default)]
    pub vote_cache: VoteCacheSection,
    #[serde(default)]
    pub priority_scheduler: PrioritySchedulerConfig,
    #[serde(default)]
    pub optimistic_scheduler: OptimisticSchedulerSection,
    #[serde(default)]
    pub hinted_scheduler: HintedSchedulerSection,
    #[serde(default)]
    pub confirming_set: ConfirmingSetConfig,
    #[serde(default)]
    pub gap_cache: GapCacheConfig,
    #[serde(default)]
    pub unchecked: UncheckedConfig,
    #[serde(default)]
    pub block_processor: BlockProcessorConfig,
    #[serde(default)]
    pub backlog_scan: BacklogScanConfig,
    #[serde(default)]
    pub lmdb: LmdbConfig,
}

/// `[vote_cache]`, with the age cutoff in whole seconds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoteCacheSection {
    pub max_size: usize,
    pub max_voters: usize,
    pub age_cutoff_secs: u64,
}

impl Default for VoteCacheSection {
    fn default() -> Self {
        let defaults = VoteCacheConfig::default();
        Self {
            max_size: defaults.max_size,
            max_voters: defaults.max_voters,
            age_cutoff_secs: defaults.age_cutoff.as_secs(),
        }
    }
}

impl From<&VoteCacheSection> for VoteCacheConfig {
    fn from(section: &VoteCacheSection) -> Self {
        Self {
            max_size: section.max_size,
            max_voters: section.max_voters,
            age_cutoff: Duration::from_secs(section.age_cutoff_secs),
        }
    }
}

/// `[optimistic_scheduler]`, with the activation delay in milliseconds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimisticSchedulerSection {
    pub enabled: bool,
    pub gap_threshold: u64,
    pub max_size: usize,
    pub activation_delay_ms: u64,
}

impl Default for OptimisticSchedulerSection {
    fn default() -> Self {
        let defaults = OptimisticSchedulerConfig::default();
        Self {
            enabled: defaults.enabled,
            gap_threshold: defaults.gap_threshold,
            max_size: defaults.max_size,
            activation_delay_ms: defaults.activation_delay.as_millis() as u64,
        }
    }
}

impl From<&OptimisticSchedulerSection> for OptimisticSchedulerConfig {
    fn from(section: &OptimisticSchedulerSection) -> Self {
        Self {
            enabled: section.enabled,
            gap_threshold: section.gap_threshold,
            max_size: section.max_size,
            activation_delay: Duration::from_millis(section.activation_delay_ms),
        }
    }
}

/// `[hinted_scheduler]`, with durations in milliseconds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HintedSchedulerSection {
    pub enabled: bool,
    /// Percentage of online stake, 0 to 100.
    pub hinting_threshold: u32,
    pub check_interval_ms: u64,
    pub block_cooldown_ms: u64,
}

impl Default for HintedSchedulerSection {
    fn default() -> Self {
        let defaults = HintedSchedulerConfig::default();
        Self {
            enabled: defaults.enabled,
            hinting_threshold: defaults.hinting_threshold_percent,
            check_interval_ms: defaults.check_interval.as_millis() as u64,
            block_cooldown_ms: defaults.block_cooldown.as_millis() as u64,
        }
    }
}

impl From<&HintedSchedulerSection> for HintedSchedulerConfig {
    fn from(section: &HintedSchedulerSection) -> Self {
        Self {
            enabled: section.enabled,
            hinting_threshold_percent: section.hinting_threshold,
            check_interval: Duration::from_millis(section.check_interval_ms),
            block_cooldown: Duration::from_millis(section.block_cooldown_ms),
        }
    }
}

// ── Serde default helpers ──────────────────────────────────────────────

fn default_network() -> NetworkId {
    NetworkId::Dev
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./lattice_data")
}

fn default_log_level() -> String {
    "info".to_string()
}

// ── Impl ───────────────────────────────────────────────────────────────

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: &str) -> Result<Self, NodeError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| NodeError::Config(e.to_string()))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, NodeError> {
        let config: Self = toml::from_str(s).map_err(|e| NodeError::Config(e.to_string()))?;
        if config.hinted_scheduler.hinting_threshold > 100 {
            return Err(NodeError::Config(
                "hinted_scheduler.hinting_threshold must be between 0 and 100".to_string(),
            ));
        }
        Ok(config)
    }

    /// Serialize the configuration to a TOML string.
    pub fn to_toml_string(&self) -> String {
        toml::to_string_pretty(self).expect("NodeConfig is always serializable to TOML")
    }

    /// Defaults for tests: dev network, data under `data_dir`.
    pub fn dev(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            network: default_network(),
            data_dir: default_data_dir(),
            log_format: LogFormat::default(),
            log_level: default_log_level(),
            enable_metrics: false,
            active_elections: ActiveElectionsConfig::default(),
            vote_cache: VoteCacheSection::default(),
            priority_scheduler: PrioritySchedulerConfig::default(),
            optimistic_scheduler: OptimisticSchedulerSection::default(),
            hinted_scheduler: HintedSchedulerSection::default(),
            confirming_set: ConfirmingSetConfig::default(),
            gap_cache: GapCacheConfig::default(),
            unchecked: UncheckedConfig::default(),
            block_processor: BlockProcessorConfig::default(),
            backlog_scan: BacklogScanConfig::default(),
            lmdb: LmdbConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cementing::CementingMode;

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = NodeConfig::default();
        let toml_str = config.to_toml_string();
        let parsed = NodeConfig::from_toml_str(&toml_str).expect("should parse");
        assert_eq!(parsed, config);
    }

    #[test]
    fn minimal_toml_uses_defaults() {
        let config = NodeConfig::from_toml_str("").expect("empty toml should use defaults");
        assert_eq!(config.network, NetworkId::Dev);
        assert_eq!(config.log_format, LogFormat::Human);
        assert_eq!(config.gap_cache.max_size, 256);
        assert_eq!(config.confirming_set.mode, CementingMode::Automatic);
    }

    #[test]
    fn partial_sections_override_only_named_fields() {
        let toml = r#"
            network = "test"
            log_format = "json"

            [active_elections]
            size = 100

            [confirming_set]
            mode = "bounded"
            max_pending_writes = 64

            [vote_cache]
            age_cutoff_secs = 30

            [optimistic_scheduler]
            activation_delay_ms = 250
        "#;
        let config = NodeConfig::from_toml_str(toml).expect("should parse");
        assert_eq!(config.network, NetworkId::Test);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.active_elections.size, 100);
        assert_eq!(
            config.active_elections.max_election_winners,
            ActiveElectionsConfig::default().max_election_winners
        );
        assert_eq!(config.confirming_set.mode, CementingMode::Bounded);
        assert_eq!(config.confirming_set.max_pending_writes, 64);
        assert_eq!(config.confirming_set.batch_size, 256);

        let vote_cache = VoteCacheConfig::from(&config.vote_cache);
        assert_eq!(vote_cache.age_cutoff, Duration::from_secs(30));
        assert_eq!(vote_cache.max_voters, VoteCacheConfig::default().max_voters);
        let optimistic = OptimisticSchedulerConfig::from(&config.optimistic_scheduler);
        assert_eq!(optimistic.activation_delay, Duration::from_millis(250));
    }

    #[test]
    fn hinted_scheduler_section_converts_and_validates() {
        let toml = r#"
            [hinted_scheduler]
            hinting_threshold = 25
            check_interval_ms = 100
        "#;
        let config = NodeConfig::from_toml_str(toml).expect("should parse");
        let hinted = HintedSchedulerConfig::from(&config.hinted_scheduler);
        assert_eq!(hinted.hinting_threshold_percent, 25);
        assert_eq!(hinted.check_interval, Duration::from_millis(100));
        assert_eq!(hinted.block_cooldown, HintedSchedulerConfig::default().block_cooldown);

        let result = NodeConfig::from_toml_str("[hinted_scheduler]\nhinting_threshold = 101\n");
        assert!(matches!(result, Err(NodeError::Config(_))));
    }

    #[test]
    fn unknown_mode_is_rejected() {
        let result = NodeConfig::from_toml_str("[confirming_set]\nmode = \"eager\"\n");
        assert!(matches!(result, Err(NodeError::Config(_))));
    }

    #[test]
    fn missing_file_returns_config_error() {
        let result = NodeConfig::from_toml_file("/nonexistent/lattice.toml");
        assert!(matches!(result, Err(NodeError::Config(_))));
    }
}
