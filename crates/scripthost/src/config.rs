//! Host configuration
//!
//! Layered with figment: built-in defaults, then an optional TOML file, then
//! `SCRIPTHOST_` environment variables (`__` separates nested keys, e.g.
//! `SCRIPTHOST_PREFERENCES__NET__BASE_URL`).

use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use script_net::Preferences;

pub const ENV_PREFIX: &str = "SCRIPTHOST_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Directories searched for script sources, in order
    pub script_dirs: Vec<PathBuf>,

    /// Per-channel message bound; unbounded when absent
    pub channel_capacity: Option<usize>,

    /// Seed values for the network preferences store
    pub preferences: toml::Table,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            script_dirs: vec![PathBuf::from("scripts")],
            channel_capacity: None,
            preferences: toml::Table::new(),
        }
    }
}

impl HostConfig {
    pub fn figment(file: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(HostConfig::default()));
        if let Some(file) = file {
            figment = figment.merge(Toml::file(file));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn load(file: Option<&Path>) -> Result<Self, figment::Error> {
        Self::figment(file).extract()
    }

    pub fn preferences(&self) -> Preferences {
        let prefs = Preferences::new();
        prefs.load_toml(&self.preferences);
        prefs
    }
}
