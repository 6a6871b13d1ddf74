//! Per-node configuration.
//!
//! One instance per node, sourced from `CINNABAR_*` environment variables
//! (the deployment surface) or built programmatically. Validation happens
//! before any socket is bound: a non-multicast group address is a
//! configuration error, not a runtime surprise.

use crate::error::NodeError;
use mcc_core::{EvictionPolicy, StoreConfig};
use mcc_gossip::CoherenceMode;
use mcc_member::LivenessWindows;
use mcc_sync::ReplicaConfig;
use std::net::SocketAddrV4;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct NodeConfig {
    /// Multicast group address and port shared by the whole cluster.
    pub group: SocketAddrV4,
    /// IP multicast TTL; 1 keeps traffic on the local subnet.
    pub hops: u32,
    /// How many times each coherence datagram is transmitted.
    pub send_repeat: u32,
    /// Local store capacity in entries.
    pub max_entries: usize,
    /// Per-value byte ceiling.
    pub max_value_bytes: usize,
    pub eviction: EvictionPolicy,
    pub mode: CoherenceMode,
    /// Orderly shutdown after this long, when set.
    pub run_for: Option<Duration>,
    /// Seed for synthetic workload generation.
    pub seed: u64,
    /// Verbosity for the log sink (an `EnvFilter` directive).
    pub log_level: String,
    /// Structured debug log file parsed by the external test harness.
    pub debug_log: Option<PathBuf>,
    pub heartbeat_interval: Duration,
    /// Liveness sweep cadence; a fraction of the heartbeat window.
    pub sweep_interval: Duration,
    pub suspect_after: Duration,
    pub dead_after: Duration,
    pub sync_interval: Duration,
    pub tombstone_grace: Duration,
    pub dedup_window: usize,
    pub digest_cap: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            group: "239.255.0.66:4747".parse().expect("valid default group"),
            hops: 1,
            send_repeat: 2,
            max_entries: 2048,
            max_value_bytes: 64 * 1024,
            eviction: EvictionPolicy::default(),
            mode: CoherenceMode::default(),
            run_for: None,
            seed: 0,
            log_level: "info".to_string(),
            debug_log: None,
            heartbeat_interval: Duration::from_millis(500),
            sweep_interval: Duration::from_millis(250),
            suspect_after: Duration::from_secs(2),
            dead_after: Duration::from_secs(6),
            sync_interval: Duration::from_secs(1),
            tombstone_grace: Duration::from_secs(30),
            dedup_window: 1024,
            digest_cap: 128,
        }
    }
}

/// Parse an optional environment variable, failing loudly on malformed
/// values instead of silently falling back.
fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>, NodeError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| NodeError::Config(format!("{key}={raw}: {e}"))),
        Err(_) => Ok(None),
    }
}

impl NodeConfig {
    /// Read configuration from `CINNABAR_*` environment variables,
    /// falling back to defaults for anything unset.
    pub fn from_env() -> Result<Self, NodeError> {
        let mut config = Self::default();

        if let Ok(raw) = std::env::var("CINNABAR_MULTICAST_ADDR") {
            // Accept "ip:port" or a bare ip with the default port.
            config.group = if raw.contains(':') {
                raw.parse()
                    .map_err(|e| NodeError::Config(format!("CINNABAR_MULTICAST_ADDR={raw}: {e}")))?
            } else {
                let ip = raw
                    .parse()
                    .map_err(|e| NodeError::Config(format!("CINNABAR_MULTICAST_ADDR={raw}: {e}")))?;
                SocketAddrV4::new(ip, config.group.port())
            };
        }
        if let Some(hops) = env_parse("CINNABAR_MULTICAST_HOPS")? {
            config.hops = hops;
        }
        if let Some(repeat) = env_parse("CINNABAR_SEND_REPEAT")? {
            config.send_repeat = repeat;
        }
        if let Some(max) = env_parse("CINNABAR_MAX_ENTRIES")? {
            config.max_entries = max;
        }
        if let Some(max) = env_parse("CINNABAR_MAX_VALUE_BYTES")? {
            config.max_value_bytes = max;
        }
        if let Some(policy) = env_parse::<EvictionPolicy>("CINNABAR_EVICTION")? {
            config.eviction = policy;
        }
        if let Some(mode) = env_parse::<CoherenceMode>("CINNABAR_MODE")? {
            config.mode = mode;
        }
        if let Some(secs) = env_parse::<u64>("CINNABAR_RUN_SECS")? {
            config.run_for = Some(Duration::from_secs(secs));
        }
        if let Some(seed) = env_parse("CINNABAR_SEED")? {
            config.seed = seed;
        }
        if let Ok(level) = std::env::var("CINNABAR_LOG_LEVEL") {
            config.log_level = level;
        }
        if let Ok(path) = std::env::var("CINNABAR_DEBUG_FILE") {
            config.debug_log = Some(PathBuf::from(path));
        }
        if let Some(ms) = env_parse::<u64>("CINNABAR_HEARTBEAT_MS")? {
            config.heartbeat_interval = Duration::from_millis(ms);
            config.sweep_interval = Duration::from_millis((ms / 2).max(1));
        }
        if let Some(ms) = env_parse::<u64>("CINNABAR_SYNC_MS")? {
            config.sync_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = env_parse::<u64>("CINNABAR_TOMBSTONE_GRACE_SECS")? {
            config.tombstone_grace = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot work before any socket exists.
    pub fn validate(&self) -> Result<(), NodeError> {
        if !self.group.ip().is_multicast() {
            return Err(NodeError::Config(format!(
                "{} is not a multicast address",
                self.group.ip()
            )));
        }
        if self.max_entries == 0 {
            return Err(NodeError::Config("max_entries must be at least 1".into()));
        }
        if self.send_repeat == 0 {
            return Err(NodeError::Config("send_repeat must be at least 1".into()));
        }
        if self.suspect_after >= self.dead_after {
            return Err(NodeError::Config(
                "suspect_after must be shorter than dead_after".into(),
            ));
        }
        Ok(())
    }

    /// The transport-independent replica knobs implied by this config.
    pub fn replica_config(&self) -> ReplicaConfig {
        ReplicaConfig {
            store: StoreConfig {
                capacity: self.max_entries,
                policy: self.eviction,
                max_value_bytes: self.max_value_bytes,
                tombstone_grace: self.tombstone_grace,
            },
            windows: LivenessWindows {
                suspect_after: self.suspect_after,
                dead_after: self.dead_after,
            },
            mode: self.mode,
            dedup_window: self.dedup_window,
            digest_cap: self.digest_cap,
        }
    }

    pub fn builder() -> NodeConfigBuilder {
        NodeConfigBuilder::new()
    }
}

/// Builder for programmatic configuration (tests, embedders).
pub struct NodeConfigBuilder {
    config: NodeConfig,
}

impl NodeConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: NodeConfig::default(),
        }
    }

    pub fn group(mut self, group: SocketAddrV4) -> Self {
        self.config.group = group;
        self
    }

    pub fn max_entries(mut self, max: usize) -> Self {
        self.config.max_entries = max;
        self
    }

    pub fn eviction(mut self, policy: EvictionPolicy) -> Self {
        self.config.eviction = policy;
        self
    }

    pub fn mode(mut self, mode: CoherenceMode) -> Self {
        self.config.mode = mode;
        self
    }

    pub fn run_for(mut self, duration: Duration) -> Self {
        self.config.run_for = Some(duration);
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.heartbeat_interval = interval;
        self.config.sweep_interval = interval / 2;
        self
    }

    pub fn liveness(mut self, suspect_after: Duration, dead_after: Duration) -> Self {
        self.config.suspect_after = suspect_after;
        self.config.dead_after = dead_after;
        self
    }

    pub fn sync_interval(mut self, interval: Duration) -> Self {
        self.config.sync_interval = interval;
        self
    }

    pub fn tombstone_grace(mut self, grace: Duration) -> Self {
        self.config.tombstone_grace = grace;
        self
    }

    pub fn build(self) -> Result<NodeConfig, NodeError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for NodeConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(NodeConfig::default().validate().is_ok());
    }

    #[test]
    fn test_non_multicast_group_is_rejected() {
        let err = NodeConfig::builder()
            .group("127.0.0.1:4747".parse().unwrap())
            .build()
            .unwrap_err();
        assert!(matches!(err, NodeError::Config(_)));
    }

    #[test]
    fn test_degenerate_windows_are_rejected() {
        let err = NodeConfig::builder()
            .liveness(Duration::from_secs(6), Duration::from_secs(2))
            .build()
            .unwrap_err();
        assert!(matches!(err, NodeError::Config(_)));
    }

    #[test]
    fn test_builder_maps_into_replica_config() {
        let config = NodeConfig::builder()
            .max_entries(16)
            .eviction(EvictionPolicy::Fifo)
            .tombstone_grace(Duration::from_secs(5))
            .build()
            .unwrap();
        let replica = config.replica_config();
        assert_eq!(replica.store.capacity, 16);
        assert_eq!(replica.store.policy, EvictionPolicy::Fifo);
        assert_eq!(replica.store.tombstone_grace, Duration::from_secs(5));
    }

    #[test]
    fn test_env_round_trip() {
        // Env mutation is process-global; this is the only test touching
        // these keys.
        std::env::set_var("CINNABAR_MULTICAST_ADDR", "239.255.0.7:5000");
        std::env::set_var("CINNABAR_MAX_ENTRIES", "10");
        std::env::set_var("CINNABAR_RUN_SECS", "60");
        std::env::set_var("CINNABAR_SEED", "42");
        std::env::set_var("CINNABAR_EVICTION", "fifo");
        let config = NodeConfig::from_env().unwrap();
        assert_eq!(config.group, "239.255.0.7:5000".parse().unwrap());
        assert_eq!(config.max_entries, 10);
        assert_eq!(config.run_for, Some(Duration::from_secs(60)));
        assert_eq!(config.seed, 42);
        assert_eq!(config.eviction, EvictionPolicy::Fifo);

        std::env::set_var("CINNABAR_MAX_ENTRIES", "not-a-number");
        assert!(NodeConfig::from_env().is_err());

        for key in [
            "CINNABAR_MULTICAST_ADDR",
            "CINNABAR_MAX_ENTRIES",
            "CINNABAR_RUN_SECS",
            "CINNABAR_SEED",
            "CINNABAR_EVICTION",
        ] {
            std::env::remove_var(key);
        }
    }
}
