use std::sync::OnceLock;

use serde::{Deserialize, Deserializer};

fn default_deadlock_timeout() -> f64 {
    600.0
}

fn default_queue_size() -> usize {
    1024
}

fn default_cache_size() -> usize {
    4096
}

fn default_aggregator_threads() -> usize {
    2
}

fn default_packer_threads() -> usize {
    2
}

fn default_packer_teams() -> usize {
    1
}

fn default_num_pes() -> usize {
    2
}

fn default_segment_len() -> usize {
    1 << 16
}

fn default_backend() -> String {
    "local".to_owned()
}

// accepts 0/1 as well as true/false
fn deserialize_flag<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" => Ok(Some(true)),
        "0" | "false" | "off" => Ok(Some(false)),
        other => Err(serde::de::Error::custom(format!(
            "expected 0, 1, true or false, found '{other}'"
        ))),
    }
}

#[derive(Deserialize, Debug)]
pub struct Config {
    /// A general timeout in seconds after which a busy-poll prints a potential deadlock warning, default: 600.0 seconds
    /// setting this to 0 disables the warning, the poll itself never gives up
    #[serde(default = "default_deadlock_timeout")]
    pub deadlock_timeout: f64,

    /// Depth of every request ring, inbound window and block command queue, default: 1024
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,

    /// Number of slots in the remote access cache, default: 4096
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,

    /// Threads cooperating in the request aggregation team, default: 2
    #[serde(default = "default_aggregator_threads")]
    pub aggregator_threads: usize,

    /// Threads cooperating in each reply packing team, default: 2
    #[serde(default = "default_packer_threads")]
    pub packer_threads: usize,

    /// Number of independent reply packing teams per pe, default: 1
    #[serde(default = "default_packer_teams")]
    pub packer_teams: usize,

    /// Read and write mapped peer segments directly instead of going through the aggregation path
    #[serde(default)]
    pub direct_access: bool,

    /// Elements in the remote segment every pe exposes, default: 65536
    #[serde(default = "default_segment_len")]
    pub segment_len: usize,

    /// Number of pes hosted by the local backend, default: 2
    #[serde(default = "default_num_pes")]
    pub num_pes: usize,

    /// The lamellae backend to use
    /// local -- all pes of the job hosted in a single process
    #[serde(default = "default_backend")]
    pub backend: String,

    /// flag used to print warnings when a poll loop exceeds the deadlock timeout, 0/1 or true/false. Default: true
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub spin_warning: Option<bool>,
}

/// Get the current Environment Variable configuration
pub fn config() -> &'static Config {
    static CONFIG: OnceLock<Config> = OnceLock::new();
    CONFIG.get_or_init(|| match envy::prefixed("LAMELLAR_RMA_").from_env::<Config>() {
        Ok(config) => config,
        Err(error) => panic!("{}", error),
    })
}
