//! Configuration types for lsnp-node.
//! Parsed from ~/.lsnp/config.toml.

use serde::{Deserialize, Serialize};
use std::path::Path;

use lsnp_protocol::{DEFAULT_PORT, LSNP_TIMING};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub node: NodeSection,
    #[serde(default)]
    pub network: NetworkSection,
    #[serde(default)]
    pub timing: TimingSection,
    #[serde(default)]
    pub transfer: TransferSection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeSection {
    /// `name@ipv4`. Usually given on the command line.
    pub user_id: Option<String>,
    pub display_name: Option<String>,
    #[serde(default = "default_status")]
    pub status: String,
    /// Image announced in PROFILE.
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSection {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_broadcast_addr")]
    pub broadcast_addr: String,
    #[serde(default = "default_recv_buffer")]
    pub recv_buffer_bytes: usize,
    #[serde(default = "default_recv_timeout")]
    pub recv_timeout_ms: u64,
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_addr: default_bind_addr(),
            broadcast_addr: default_broadcast_addr(),
            recv_buffer_bytes: default_recv_buffer(),
            recv_timeout_ms: default_recv_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingSection {
    #[serde(default = "default_profile_interval")]
    pub profile_interval_secs: u64,
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,
    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: u64,
}

impl Default for TimingSection {
    fn default() -> Self {
        Self {
            profile_interval_secs: default_profile_interval(),
            ping_interval_secs: default_ping_interval(),
            token_ttl_secs: default_token_ttl(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSection {
    #[serde(default = "default_download_dir")]
    pub download_dir: String,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl Default for TransferSection {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            chunk_size: default_chunk_size(),
        }
    }
}

// Default value functions
fn default_status() -> String {
    "Exploring LSNP!".into()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind_addr() -> String {
    "0.0.0.0".into()
}
fn default_broadcast_addr() -> String {
    "255.255.255.255".into()
}
fn default_recv_buffer() -> usize {
    LSNP_TIMING.max_datagram_bytes
}
fn default_recv_timeout() -> u64 {
    LSNP_TIMING.recv_timeout_ms
}
fn default_profile_interval() -> u64 {
    LSNP_TIMING.profile_interval_secs
}
fn default_ping_interval() -> u64 {
    LSNP_TIMING.ping_interval_secs
}
fn default_token_ttl() -> u64 {
    LSNP_TIMING.token_ttl_secs
}
fn default_download_dir() -> String {
    "~/.lsnp/downloads".into()
}
fn default_chunk_size() -> usize {
    LSNP_TIMING.file_chunk_bytes
}

impl NodeConfig {
    /// Load config from file, or use defaults if missing.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: NodeConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node: NodeSection {
                status: default_status(),
                ..NodeSection::default()
            },
            network: NetworkSection::default(),
            timing: TimingSection::default(),
            transfer: TransferSection::default(),
        }
    }
}
