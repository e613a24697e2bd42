use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};

/// Settings for the record layer.
///
/// ```toml
/// [lock]
/// lease_secs = 1.0
/// poll_interval_secs = 0.5
/// max_attempts = 200
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub lock: LockConfig,
}

/// Settings for the per-record write lock.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// How long a lock holder is trusted before others may steal the lock.
    #[serde(rename = "lease_secs", with = "secs")]
    pub lease: Duration,
    /// Sleep between attempts while the lock is held by someone else.
    #[serde(rename = "poll_interval_secs", with = "secs")]
    pub poll_interval: Duration,
    /// Give up after this many attempts. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            lease: Duration::from_secs(1),
            poll_interval: Duration::from_millis(500),
            max_attempts: None,
        }
    }
}

impl ModelConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s).map_err(|e| ModelError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ModelError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| ModelError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.lock.lease.is_zero() {
            return Err(ModelError::Config("lock lease must be positive".into()));
        }
        if self.lock.max_attempts == Some(0) {
            return Err(ModelError::Config("lock max_attempts must be at least 1".into()));
        }
        Ok(())
    }
}

/// Durations as fractional seconds.
mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
