//! JSON configuration file
//!
//! ```json
//! {
//!   "region": "us-east-1",
//!   "state": "mooring.state.json",
//!   "attachments": {
//!     "web": { "autoscaling_group_name": "web-asg", "elb": "web-elb" }
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use mooring_core::resource::{Resource, Value};
use mooring_provider_aws::resources::AUTOSCALING_ATTACHMENT;
use mooring_state::LocalBackend;
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "mooring.json";
pub const DEFAULT_REGION: &str = "us-east-1";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub region: Option<String>,
    /// State file path, relative to the configuration file
    #[serde(default)]
    pub state: Option<PathBuf>,
    #[serde(default)]
    pub attachments: BTreeMap<String, serde_json::Map<String, serde_json::Value>>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, String> {
        let content = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
        Self::parse(&content).map_err(|e| format!("{}: {}", path.display(), e))
    }

    pub fn parse(content: &str) -> Result<Self, String> {
        serde_json::from_str(content).map_err(|e| format!("Parse error: {}", e))
    }

    pub fn region(&self) -> &str {
        self.region.as_deref().unwrap_or(DEFAULT_REGION)
    }

    /// Where the state lives for a configuration loaded from `config_path`
    pub fn state_path(&self, config_path: &Path) -> PathBuf {
        let base_dir = config_path.parent().unwrap_or(Path::new("."));
        let state = self
            .state
            .clone()
            .unwrap_or_else(|| PathBuf::from(LocalBackend::DEFAULT_STATE_FILE));
        if state.is_absolute() {
            state
        } else {
            base_dir.join(state)
        }
    }

    /// Declared attachments as resources, ordered by name
    ///
    /// `null` attribute values are treated as unset.
    pub fn resources(&self) -> Vec<Resource> {
        self.attachments
            .iter()
            .map(|(name, attributes)| {
                attributes
                    .iter()
                    .filter_map(|(k, v)| Value::from_json(v).map(|v| (k.clone(), v)))
                    .fold(Resource::new(AUTOSCALING_ATTACHMENT, name), |r, (k, v)| {
                        r.with_attribute(k, v)
                    })
            })
            .collect()
    }
}
