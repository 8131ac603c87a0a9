use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::osc::DEFAULT_CAPACITY;
use crate::{Result, VrackError};

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
}

impl AppConfig {
    /// Loads a JSON config file. Missing fields take their defaults.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        let config: AppConfig = serde_json::from_str(&text)?;
        config.server.validate()?;
        Ok(config)
    }
}

/// Configuration of the OSC server and its tick loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_port: u16,
    /// Port peers listen on; discovered peers are addressed here.
    pub send_port: u16,
    pub frame_rate: f32,
    pub output_interval_ms: u64,
    /// Where the peer list is kept; the platform config dir when unset.
    pub peer_store: Option<PathBuf>,
    /// Address reported in `/Initialise` and query answers; detected when unset.
    pub advertise_ip: Option<IpAddr>,
    pub log_incoming: bool,
    pub encoder_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_port: 54321,
            send_port: 54320,
            frame_rate: 60.0,
            output_interval_ms: 10,
            peer_store: None,
            advertise_ip: None,
            log_incoming: false,
            encoder_capacity: DEFAULT_CAPACITY,
        }
    }
}

impl ServerConfig {
    pub fn output_interval(&self) -> Duration {
        Duration::from_millis(self.output_interval_ms)
    }

    pub fn frame_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.frame_rate))
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.frame_rate.is_finite() && self.frame_rate > 0.0) {
            return Err(VrackError::msg(format!(
                "frame_rate must be positive, got {}",
                self.frame_rate
            )));
        }
        if self.encoder_capacity < 16 {
            return Err(VrackError::msg("encoder_capacity is too small"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_ports() {
        let config = ServerConfig::default();
        assert_eq!(config.listen_port, 54321);
        assert_eq!(config.send_port, 54320);
        assert_eq!(config.output_interval(), Duration::from_millis(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vrack.json");
        fs::write(
            &path,
            r#"{"server": {"listen_port": 9000, "advertise_ip": "192.168.1.20"}}"#,
        )
        .unwrap();

        let config = AppConfig::from_path(&path).unwrap();
        assert_eq!(config.server.listen_port, 9000);
        assert_eq!(config.server.send_port, 54320);
        assert_eq!(config.server.advertise_ip, Some("192.168.1.20".parse::<IpAddr>().unwrap()));
    }

    #[test]
    fn invalid_frame_rate_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vrack.json");
        fs::write(&path, r#"{"server": {"frame_rate": 0.0}}"#).unwrap();
        assert!(AppConfig::from_path(&path).is_err());
    }

    #[test]
    fn frame_duration_follows_rate() {
        let config = ServerConfig {
            frame_rate: 50.0,
            ..ServerConfig::default()
        };
        assert_eq!(config.frame_duration(), Duration::from_millis(20));
    }
}
