use crate::agreement::{ArbiterConfig, ArbitrationStrategy};
use crate::node_id::NodeId;
use crate::{Error, Result};

use config::{Config, ConfigError, File, FileFormat};
use serde::Deserialize;

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

// For explanation, see issue: https://github.com/serde-rs/serde/issues/368
fn default_receive_timeout_ms() -> u64 {
    5
}
fn default_stall_report_after_secs() -> u64 {
    10
}
fn default_stall_report_every_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    /// The local node, as `host:site`. Absent for a simulated cluster.
    #[serde(default)]
    pub node_id: Option<String>,
    pub membership: Vec<String>,
    #[serde(default)]
    pub strategy: ArbitrationStrategy,
    #[serde(default = "default_receive_timeout_ms")]
    pub receive_timeout_ms: u64,
    #[serde(default = "default_stall_report_after_secs")]
    pub stall_report_after_secs: u64,
    #[serde(default = "default_stall_report_every_secs")]
    pub stall_report_every_secs: u64,
}

const CONFIG_FILE_PATH: &str = "config/Default.json";
const CONFIG_FILE_PREFIX: &str = "config/";

#[derive(Clone, Debug, Deserialize)]
pub enum ENV {
    Testing,
    Development,
    Production,
}

impl fmt::Display for ENV {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ENV::Testing => write!(f, "Testing"),
            ENV::Production => write!(f, "Production"),
            ENV::Development => write!(f, "Development"),
        }
    }
}

impl From<&str> for ENV {
    fn from(env: &str) -> Self {
        match env {
            "Testing" => ENV::Testing,
            "Production" => ENV::Production,
            _ => ENV::Development,
        }
    }
}

impl Settings {
    /// Loads the defaults overlaid with the file of the `RUN_ENV` environment, if there is one.
    pub fn new() -> std::result::Result<Self, ConfigError> {
        let env = std::env::var("RUN_ENV").unwrap_or_else(|_| "Development".into());
        let env = ENV::from(env.as_str());
        Config::builder()
            .set_default("env", env.to_string())?
            .add_source(File::with_name(CONFIG_FILE_PATH))
            .add_source(File::with_name(&format!("{}{}", CONFIG_FILE_PREFIX, env)).required(false))
            .build()?
            .try_deserialize()
    }

    pub fn from_file(path: &str) -> std::result::Result<Self, ConfigError> {
        Config::builder().add_source(File::with_name(path)).build()?.try_deserialize()
    }

    pub fn from_json(json: &str) -> std::result::Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from_str(json, FileFormat::Json))
            .build()?
            .try_deserialize()
    }

    pub fn members(&self) -> Result<BTreeSet<NodeId>> {
        self.membership.iter().map(|id| id.parse::<NodeId>()).collect()
    }

    /// The local node, which must belong to the membership.
    pub fn self_id(&self) -> Result<Option<NodeId>> {
        match &self.node_id {
            None => Ok(None),
            Some(id) => {
                let id = id.parse::<NodeId>()?;
                if !self.members()?.contains(&id) {
                    return Err(Error::NotAMember);
                }
                Ok(Some(id))
            }
        }
    }

    pub fn arbiter_config(&self) -> ArbiterConfig {
        ArbiterConfig {
            strategy: self.strategy,
            receive_timeout: Duration::from_millis(self.receive_timeout_ms),
            stall_report_after: Duration::from_secs(self.stall_report_after_secs),
            stall_report_every: Duration::from_secs(self.stall_report_every_secs),
        }
    }
}
