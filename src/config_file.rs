//! Configuration file support.
//!
//! Loads server + per-vhost configuration from TOML files. This crate only
//! deserializes TOML into typed structs — config file *syntax* beyond that
//! (includes, templating, reload) is the external config collaborator's job
//! (spec §1/§6).

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::{
    DvrConfig, EdgeConfig, ForwardConfig, GopCacheConfig, JitterAlgorithm, QueueConfig,
    ServerConfig, VhostConfig,
};

/// Configuration file format — one `[server]` table plus zero or more
/// `[[vhost]]` tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    pub server: ServerSettings,
    #[serde(default)]
    pub vhost: Vec<VhostSettings>,
    pub logging: Option<LoggingSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub cors_enabled: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VhostSettings {
    pub name: String,
    pub gop_cache: Option<bool>,
    pub gop_cache_max_frames: Option<usize>,
    pub queue_length_ms: Option<i64>,
    pub mix_correct: Option<bool>,
    pub time_jitter: Option<String>,
    pub atc: Option<bool>,
    pub atc_auto: Option<bool>,
    pub reduce_sequence_header: Option<bool>,
    pub is_edge: Option<bool>,
    pub edge_origin: Option<Vec<String>>,
    pub forward_enabled: Option<bool>,
    pub forward: Option<Vec<String>>,
    pub dvr_enabled: Option<bool>,
    pub dvr_plan: Option<String>,
    pub dvr_path: Option<String>,
    pub dvr_duration_ms: Option<i64>,
    pub dvr_wait_keyframe: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    pub level: String,
    pub format: Option<String>,
}

fn parse_jitter(s: &str) -> JitterAlgorithm {
    match s {
        "zero" => JitterAlgorithm::Zero,
        "off" => JitterAlgorithm::Off,
        _ => JitterAlgorithm::Full,
    }
}

impl VhostSettings {
    fn into_vhost_config(self) -> VhostConfig {
        let mut cfg = VhostConfig {
            vhost: self.name,
            ..VhostConfig::default()
        };
        cfg.gop_cache = GopCacheConfig {
            enabled: self.gop_cache.unwrap_or(true),
            max_frames: self.gop_cache_max_frames.unwrap_or(0),
            max_bytes: 0,
        };
        cfg.queue = QueueConfig {
            queue_length_ms: self.queue_length_ms.unwrap_or(10_000),
            fast_leave: false,
        };
        cfg.mix_correct = self.mix_correct.unwrap_or(false);
        cfg.time_jitter = self
            .time_jitter
            .as_deref()
            .map(parse_jitter)
            .unwrap_or_default();
        cfg.atc = self.atc.unwrap_or(false);
        cfg.atc_auto = self.atc_auto.unwrap_or(true);
        cfg.reduce_sequence_header = self.reduce_sequence_header.unwrap_or(false);
        cfg.edge = EdgeConfig {
            is_edge: self.is_edge.unwrap_or(false),
            origins: self.edge_origin.unwrap_or_default(),
            ..EdgeConfig::default()
        };
        cfg.forward = ForwardConfig {
            enabled: self.forward_enabled.unwrap_or(false),
            destinations: self.forward.unwrap_or_default(),
            backend_url: None,
        };
        cfg.dvr = DvrConfig {
            enabled: self.dvr_enabled.unwrap_or(false),
            plan: Default::default(),
            path_template: self
                .dvr_path
                .unwrap_or_else(|| "[vhost]/[app]/[stream].[timestamp].flv".to_string()),
            segment_duration_ms: self.dvr_duration_ms.unwrap_or(30_000),
            wait_keyframe: self.dvr_wait_keyframe.unwrap_or(true),
            time_jitter: cfg.time_jitter,
            on_dvr_urls: Vec::new(),
        };
        if let Some(plan) = &self.dvr_plan {
            if plan == "segment" {
                cfg.dvr.plan = crate::config::DvrPlan::Segment;
            }
        }
        cfg
    }
}

impl ConfigFile {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: ConfigFile = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }

    pub fn default_config() -> Self {
        Self {
            server: ServerSettings {
                host: "0.0.0.0".to_string(),
                port: 3000,
                cors_enabled: Some(true),
            },
            vhost: vec![VhostSettings {
                name: "__defaultVhost__".to_string(),
                gop_cache: Some(true),
                gop_cache_max_frames: None,
                queue_length_ms: Some(10_000),
                mix_correct: Some(false),
                time_jitter: Some("full".to_string()),
                atc: Some(false),
                atc_auto: Some(true),
                reduce_sequence_header: Some(false),
                is_edge: Some(false),
                edge_origin: None,
                forward_enabled: Some(false),
                forward: None,
                dvr_enabled: Some(false),
                dvr_plan: Some("session".to_string()),
                dvr_path: None,
                dvr_duration_ms: None,
                dvr_wait_keyframe: Some(true),
            }],
            logging: Some(LoggingSettings {
                level: "info".to_string(),
                format: Some("pretty".to_string()),
            }),
        }
    }

    pub fn into_server_config(self) -> ServerConfig {
        let vhosts = if self.vhost.is_empty() {
            vec![VhostConfig::default()]
        } else {
            self.vhost
                .into_iter()
                .map(VhostSettings::into_vhost_config)
                .collect()
        };
        ServerConfig {
            host: self.server.host,
            port: self.server.port,
            cors_enabled: self.server.cors_enabled.unwrap_or(true),
            log_level: self
                .logging
                .map(|l| l.level)
                .unwrap_or_else(|| "info".to_string()),
            vhosts,
        }
    }
}

pub fn generate_default_config<P: AsRef<Path>>(path: P) -> Result<(), Box<dyn std::error::Error>> {
    let config = ConfigFile::default_config();
    config.to_file(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = ConfigFile::default_config();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.vhost.len(), 1);
    }

    #[test]
    fn test_config_file_roundtrip() {
        let config = ConfigFile::default_config();

        let mut temp_file = NamedTempFile::new().unwrap();
        let content = toml::to_string_pretty(&config).unwrap();
        temp_file.write_all(content.as_bytes()).unwrap();

        let loaded = ConfigFile::from_file(temp_file.path()).unwrap();
        assert_eq!(loaded.server.port, config.server.port);
        assert_eq!(loaded.vhost.len(), config.vhost.len());
    }

    #[test]
    fn test_into_server_config() {
        let config_file = ConfigFile::default_config();
        let server_config = config_file.into_server_config();

        assert_eq!(server_config.port, 3000);
        assert_eq!(server_config.vhosts.len(), 1);
        assert!(server_config.vhosts[0].gop_cache.enabled);
    }

    #[test]
    fn test_generate_default_config() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().to_path_buf();

        generate_default_config(&path).unwrap();

        assert!(path.exists());
        let loaded = ConfigFile::from_file(&path).unwrap();
        assert_eq!(loaded.server.port, 3000);
    }
}
