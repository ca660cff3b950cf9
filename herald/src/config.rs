use hrd_cluster::{
    ClusterConfig, ElectionConfig, FailureDetectorConfig, GossipConfig, PeerClientConfig,
    load_roster, parse_peer_list,
};
use hrd_core::{HeraldError, PeerAddress, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen_addr: SocketAddr,
    /// `host:port` other brokers use to reach this node. Also its election
    /// priority, so every node must agree on it.
    pub advertise_addr: Option<String>,
    pub health_addr: SocketAddr,
    pub metrics_addr: SocketAddr,
    pub data_dir: PathBuf,
    pub peers: Vec<String>,
    /// CSV roster (`host,port` per line after a header).
    pub roster_file: Option<PathBuf>,
    pub cluster: ClusterSettings,
    /// Outbound queue depth per connection. A subscriber that falls this far
    /// behind is dropped.
    pub subscriber_queue_depth: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSettings {
    pub heartbeat_interval_ms: u64,
    pub failure_threshold_ms: u64,
    pub liveness_check_interval_ms: u64,
    pub gossip_interval_ms: u64,
    pub election_timeout_ms: u64,
    pub gossip_timeout_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], hrd_core::DEFAULT_PORT)),
            advertise_addr: None,
            health_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            metrics_addr: SocketAddr::from(([0, 0, 0, 0], 9090)),
            data_dir: PathBuf::from("./data"),
            peers: Vec::new(),
            roster_file: None,
            cluster: ClusterSettings::default(),
            subscriber_queue_depth: 256,
        }
    }
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: hrd_core::HEARTBEAT_INTERVAL.as_millis() as u64,
            failure_threshold_ms: hrd_core::FAILURE_THRESHOLD.as_millis() as u64,
            liveness_check_interval_ms: hrd_core::LIVENESS_CHECK_INTERVAL.as_millis() as u64,
            gossip_interval_ms: hrd_core::GOSSIP_INTERVAL.as_millis() as u64,
            election_timeout_ms: hrd_core::ELECTION_TIMEOUT.as_millis() as u64,
            gossip_timeout_ms: hrd_core::GOSSIP_TIMEOUT.as_millis() as u64,
            connect_timeout_ms: hrd_core::CONNECT_TIMEOUT.as_millis() as u64,
        }
    }
}

impl ClusterSettings {
    pub fn validate(&self) -> Result<()> {
        let intervals = [
            ("heartbeat_interval_ms", self.heartbeat_interval_ms),
            ("failure_threshold_ms", self.failure_threshold_ms),
            ("liveness_check_interval_ms", self.liveness_check_interval_ms),
            ("gossip_interval_ms", self.gossip_interval_ms),
            ("election_timeout_ms", self.election_timeout_ms),
            ("gossip_timeout_ms", self.gossip_timeout_ms),
            ("connect_timeout_ms", self.connect_timeout_ms),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(HeraldError::Config(format!("{} must be greater than 0", name)));
            }
        }

        if self.failure_threshold_ms <= self.heartbeat_interval_ms {
            return Err(HeraldError::Config(format!(
                "failure_threshold_ms ({}) must exceed heartbeat_interval_ms ({})",
                self.failure_threshold_ms, self.heartbeat_interval_ms
            )));
        }

        Ok(())
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        match ext {
            "toml" => toml::from_str(&content)
                .map_err(|e| HeraldError::Config(format!("TOML parse error: {}", e))),
            "json" => serde_json::from_str(&content)
                .map_err(|e| HeraldError::Config(format!("JSON parse error: {}", e))),
            _ => Err(HeraldError::Config(format!(
                "Unknown config file extension: {}",
                ext
            ))),
        }
    }

    pub fn from_args(args: &super::Args) -> Self {
        Self {
            listen_addr: args.listen,
            advertise_addr: args.advertise.clone(),
            health_addr: args.health,
            metrics_addr: args.metrics,
            data_dir: args.data_dir.clone(),
            peers: args.peers.clone(),
            roster_file: args.roster.clone(),
            cluster: ClusterSettings {
                heartbeat_interval_ms: args.heartbeat_interval_ms,
                failure_threshold_ms: args.failure_threshold_ms,
                gossip_interval_ms: args.gossip_interval_ms,
                election_timeout_ms: args.election_timeout_ms,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.cluster.validate()?;
        if self.subscriber_queue_depth == 0 {
            return Err(HeraldError::Config(
                "subscriber_queue_depth must be greater than 0".into(),
            ));
        }
        if let Some(addr) = &self.advertise_addr {
            addr.parse::<PeerAddress>()?;
        }
        Ok(())
    }

    /// Identity announced to peers.
    ///
    /// Without an explicit `advertise_addr`, an unspecified listen ip maps to
    /// loopback on the listen port.
    pub fn advertise_address(&self) -> Result<PeerAddress> {
        if let Some(addr) = &self.advertise_addr {
            return addr.parse();
        }
        if self.listen_addr.ip().is_unspecified() {
            return Ok(PeerAddress::new("127.0.0.1", self.listen_addr.port()));
        }
        Ok(PeerAddress::from(self.listen_addr))
    }

    /// Static peers plus the roster file, without the local node.
    pub fn initial_peers(&self, local: &PeerAddress) -> Result<Vec<PeerAddress>> {
        let mut peers = parse_peer_list(local, &self.peers)?;

        if let Some(roster) = &self.roster_file {
            for peer in load_roster(roster, local)? {
                if !peers.contains(&peer) {
                    peers.push(peer);
                }
            }
        }

        Ok(peers)
    }

    pub fn cluster_config(&self, local: PeerAddress) -> ClusterConfig {
        let ms = Duration::from_millis;
        let settings = &self.cluster;

        ClusterConfig {
            local,
            peer_client: PeerClientConfig {
                connect_timeout: ms(settings.connect_timeout_ms),
            },
            failure: FailureDetectorConfig {
                heartbeat_interval: ms(settings.heartbeat_interval_ms),
                failure_threshold: ms(settings.failure_threshold_ms),
                check_interval: ms(settings.liveness_check_interval_ms),
            },
            election: ElectionConfig {
                election_timeout: ms(settings.election_timeout_ms),
            },
            gossip: GossipConfig {
                interval: ms(settings.gossip_interval_ms),
                timeout: ms(settings.gossip_timeout_ms),
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.listen_addr.port(), 7000);
        assert_eq!(config.metrics_addr.port(), 9090);
        assert_eq!(config.health_addr.port(), 8080);
        assert_eq!(config.subscriber_queue_depth, 256);
        assert_eq!(config.cluster.heartbeat_interval_ms, 2000);
        assert_eq!(config.cluster.failure_threshold_ms, 5000);
        assert!(config.peers.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_toml_file() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.toml");

        let toml_content = r#"
listen_addr = "127.0.0.1:7001"
data_dir = "/tmp/herald-test"
peers = ["127.0.0.1:7002", "127.0.0.1:7003"]

[cluster]
gossip_interval_ms = 1000
"#;

        std::fs::write(&config_path, toml_content).unwrap();

        let config = Config::from_file(&config_path).unwrap();
        assert_eq!(config.listen_addr.port(), 7001);
        assert_eq!(config.peers.len(), 2);
        assert_eq!(config.cluster.gossip_interval_ms, 1000);
        // Unset fields keep their defaults.
        assert_eq!(config.cluster.election_timeout_ms, 5000);
        assert_eq!(config.health_addr.port(), 8080);
    }

    #[test]
    fn test_config_from_json_file() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.json");

        let json_content = r#"{
            "listen_addr": "127.0.0.1:7005",
            "advertise_addr": "broker-5:7005",
            "cluster": {"heartbeat_interval_ms": 500, "failure_threshold_ms": 1500}
        }"#;

        std::fs::write(&config_path, json_content).unwrap();

        let config = Config::from_file(&config_path).unwrap();
        assert_eq!(config.listen_addr.port(), 7005);
        assert_eq!(
            config.advertise_address().unwrap(),
            PeerAddress::new("broker-5", 7005)
        );
        assert_eq!(config.cluster.heartbeat_interval_ms, 500);
    }

    #[test]
    fn test_config_unknown_extension() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.yaml");
        std::fs::write(&config_path, "listen_addr: 1").unwrap();

        let result = Config::from_file(&config_path);
        assert!(matches!(result, Err(HeraldError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_bad_timings() {
        let mut config = Config::default();
        config.cluster.gossip_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.cluster.failure_threshold_ms = config.cluster.heartbeat_interval_ms;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.subscriber_queue_depth = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_advertise_address_defaults_to_loopback() {
        let config = Config::default();
        assert_eq!(
            config.advertise_address().unwrap(),
            PeerAddress::new("127.0.0.1", 7000)
        );

        let config = Config {
            listen_addr: "10.1.2.3:7100".parse().unwrap(),
            ..Default::default()
        };
        assert_eq!(
            config.advertise_address().unwrap(),
            PeerAddress::new("10.1.2.3", 7100)
        );
    }

    #[test]
    fn test_initial_peers_merges_roster() {
        let dir = tempdir().unwrap();
        let roster = dir.path().join("roster.csv");
        std::fs::write(&roster, "ip,port\n127.0.0.1,7000\n127.0.0.1,7002\n127.0.0.1,7003\n")
            .unwrap();

        let config = Config {
            peers: vec!["127.0.0.1:7002".into()],
            roster_file: Some(roster),
            ..Default::default()
        };

        let local = PeerAddress::new("127.0.0.1", 7000);
        let peers = config.initial_peers(&local).unwrap();
        assert_eq!(
            peers,
            vec![
                PeerAddress::new("127.0.0.1", 7002),
                PeerAddress::new("127.0.0.1", 7003)
            ]
        );
    }

    #[test]
    fn test_cluster_config_uses_settings() {
        let mut config = Config::default();
        config.cluster.gossip_interval_ms = 750;

        let cluster = config.cluster_config(PeerAddress::new("127.0.0.1", 7000));
        assert_eq!(cluster.gossip.interval, Duration::from_millis(750));
        assert_eq!(cluster.failure.failure_threshold, Duration::from_secs(5));
    }
}
