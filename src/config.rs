//! Process configuration.
//!
//! Loaded from YAML; every field has a default so an empty file (or no file) is valid.
//! Command-line flags override individual fields after loading.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use crate::driver::LoopConfig;
use crate::error::{Result, SrError};
use crate::packet::DEFAULT_PORT;
use crate::packet::format::MAX_CARS;
use crate::rating::RatingConfig;
use crate::session::SessionConfig;
use crate::sync::SyncConfig;
use crate::types::UpdateRate;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub telemetry: TelemetryConfig,
    pub store: StoreConfig,
    pub dashboard: DashboardConfig,
    pub overlay: OverlayConfig,
    pub rating: RatingConfig,
    pub session: SessionConfig,
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TelemetryConfig {
    pub bind: IpAddr,
    pub port: u16,
    /// Track this car instead of the player car.
    pub car_index: Option<u8>,
    /// The game's UDP send rate setting.
    pub send_rate_hz: f64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            car_index: None,
            send_rate_hz: 20.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { path: PathBuf::from("srtrack.db") }
    }
}

/// The HTTP read API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub bind: IpAddr,
    pub port: u16,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self { enabled: true, bind: IpAddr::V4(Ipv4Addr::LOCALHOST), port: 8080 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OverlayConfig {
    pub enabled: bool,
    /// Snapshot rate for the overlay; 0 means every snapshot.
    pub max_hz: u32,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self { enabled: true, max_hz: 10 }
    }
}

impl OverlayConfig {
    pub fn rate(&self) -> UpdateRate {
        if self.max_hz == 0 { UpdateRate::Native } else { UpdateRate::Max(self.max_hz) }
    }
}

impl Config {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Config = serde_yaml_ng::from_str(yaml)
            .map_err(|e| SrError::config(format!("invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| SrError::file_error(path.to_path_buf(), e))?;
        Self::from_yaml(&yaml)
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml_ng::to_string(self).map_err(|e| SrError::config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        self.rating.validate()?;
        self.session.validate()?;
        self.sync.validate()?;
        if let Some(index) = self.telemetry.car_index
            && usize::from(index) >= MAX_CARS
        {
            return Err(SrError::config(format!(
                "telemetry.car_index must be below {MAX_CARS}"
            )));
        }
        if !self.telemetry.send_rate_hz.is_finite() || self.telemetry.send_rate_hz <= 0.0 {
            return Err(SrError::config("telemetry.send_rate_hz must be positive"));
        }
        Ok(())
    }

    pub fn telemetry_addr(&self) -> SocketAddr {
        SocketAddr::new(self.telemetry.bind, self.telemetry.port)
    }

    pub fn dashboard_addr(&self) -> SocketAddr {
        SocketAddr::new(self.dashboard.bind, self.dashboard.port)
    }

    pub fn loop_config(&self, reset_on_start: bool) -> LoopConfig {
        LoopConfig {
            rating: self.rating,
            session: self.session,
            sync: self.sync,
            car_index: self.telemetry.car_index,
            reset_on_start,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_file_is_all_defaults() {
        let config = Config::from_yaml("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.telemetry_addr().port(), 20777);
        assert_eq!(config.overlay.rate(), UpdateRate::Max(10));
        assert_eq!(config.sync.interval_ms, 2000);
        assert_eq!(config.rating.window_capacity, 100);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let yaml = r#"
telemetry:
  port: 20778
  car_index: 3
overlay:
  max_hz: 0
sync:
  retention_days: 90
session:
  reset_window_on_session_start: true
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.telemetry.port, 20778);
        assert_eq!(config.telemetry.car_index, Some(3));
        assert_eq!(config.overlay.rate(), UpdateRate::Native);
        assert_eq!(config.sync.retention_days, Some(90));
        assert_eq!(config.sync.interval_ms, 2000);
        assert!(config.session.reset_window_on_session_start);
        assert!(config.dashboard.enabled);

        let loop_config = config.loop_config(true);
        assert_eq!(loop_config.car_index, Some(3));
        assert!(loop_config.reset_on_start);
    }

    #[test]
    fn typos_and_bad_values_are_rejected() {
        assert!(matches!(
            Config::from_yaml("telemetry:\n  prot: 1\n"),
            Err(SrError::Config { .. })
        ));
        assert!(Config::from_yaml("sync:\n  interval_ms: 0\n").is_err());
        assert!(Config::from_yaml("telemetry:\n  car_index: 20\n").is_err());
        assert!(Config::from_yaml("rating:\n  window_capacity: 0\n").is_err());
    }

    #[test]
    fn written_config_loads_back() {
        let mut config = Config::default();
        config.store.path = PathBuf::from("/tmp/history.db");
        config.dashboard.port = 9090;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(config.to_yaml().unwrap().as_bytes()).unwrap();
        assert_eq!(Config::load(file.path()).unwrap(), config);
    }

    #[test]
    fn missing_file_is_a_file_error() {
        assert!(matches!(Config::load("/no/such/srtrack.yaml"), Err(SrError::File { .. })));
    }
}
