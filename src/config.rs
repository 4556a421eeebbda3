//! Host configuration
//!
//! Layered with figment: built-in defaults, then `classbridge.toml` in the
//! working directory, then `CLASSBRIDGE_*` environment variables.

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

/// Limits applied to the Lua state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Maximum Lua memory in bytes, 0 for no limit (default: 64MB)
    pub memory_limit: usize,
    /// Maximum instructions per `execute`/`call`, 0 for no limit (default: 1,000,000)
    pub instruction_limit: u64,
    /// Instructions between two limit checks (default: 1000)
    pub hook_interval: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            memory_limit: 64 * 1024 * 1024,
            instruction_limit: 1_000_000,
            hook_interval: 1000,
        }
    }
}

impl Config {
    /// Configuration file looked up in the working directory
    pub const FILE: &'static str = "classbridge.toml";

    /// Prefix of environment overrides
    pub const ENV_PREFIX: &'static str = "CLASSBRIDGE_";

    /// All configuration sources, lowest priority first
    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(Self::FILE))
            .merge(Env::prefixed(Self::ENV_PREFIX))
    }

    /// Load the configuration from all sources
    pub fn load() -> Result<Self, figment::Error> {
        Self::figment().extract()
    }
}
