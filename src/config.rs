//! Per-vhost and server configuration (spec §6).

use serde::{Deserialize, Serialize};

/// Jitter correction algorithm selector (C1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JitterAlgorithm {
    Full,
    Zero,
    Off,
}

impl Default for JitterAlgorithm {
    fn default() -> Self {
        JitterAlgorithm::Full
    }
}

/// HLS sink error policy (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HlsOnError {
    Ignore,
    Continue,
    Disconnect,
}

impl Default for HlsOnError {
    fn default() -> Self {
        HlsOnError::Continue
    }
}

/// DVR plan selector (§4.15).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DvrPlan {
    Session,
    Segment,
}

impl Default for DvrPlan {
    fn default() -> Self {
        DvrPlan::Session
    }
}

/// GOP cache configuration (C3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GopCacheConfig {
    pub enabled: bool,
    /// 0 = unlimited.
    pub max_frames: usize,
    /// 0 = unlimited. Supplemented from original_source (§2 of SPEC_FULL):
    /// guards against one huge GOP blowing memory even under the frame cap.
    pub max_bytes: usize,
}

impl Default for GopCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_frames: 0,
            max_bytes: 0,
        }
    }
}

/// Consumer queue overflow configuration (C2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Overflow threshold, milliseconds of buffered audio/video span.
    pub queue_length_ms: i64,
    /// Supplemented "fast leave" flag (SPEC_FULL §2): a sink that must not
    /// stall the publisher loop treats an idle, caught-up queue as ready.
    pub fast_leave: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queue_length_ms: 10_000,
            fast_leave: false,
        }
    }
}

/// Edge-mode configuration (C10-C12).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeConfig {
    pub is_edge: bool,
    pub origins: Vec<String>,
    pub transform_vhost: Option<String>,
    pub connect_timeout_ms: u64,
    pub stream_timeout_ms: u64,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            is_edge: false,
            origins: Vec::new(),
            transform_vhost: None,
            connect_timeout_ms: 3_000,
            stream_timeout_ms: 30_000,
        }
    }
}

/// Forwarding configuration (publish edge mirror, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardConfig {
    pub enabled: bool,
    pub destinations: Vec<String>,
    pub backend_url: Option<String>,
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            destinations: Vec::new(),
            backend_url: None,
        }
    }
}

/// DVR configuration (C16).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DvrConfig {
    pub enabled: bool,
    pub plan: DvrPlan,
    /// Path template, tokens expanded by an external collaborator (§6).
    pub path_template: String,
    pub segment_duration_ms: i64,
    pub wait_keyframe: bool,
    pub time_jitter: JitterAlgorithm,
    pub on_dvr_urls: Vec<String>,
}

impl Default for DvrConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            plan: DvrPlan::Session,
            path_template: "[vhost]/[app]/[stream].[timestamp].flv".to_string(),
            segment_duration_ms: 30_000,
            wait_keyframe: true,
            time_jitter: JitterAlgorithm::Full,
            on_dvr_urls: Vec::new(),
        }
    }
}

/// Per-vhost configuration — the knobs the core consumes from the config
/// collaborator (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VhostConfig {
    pub vhost: String,
    pub gop_cache: GopCacheConfig,
    pub queue: QueueConfig,
    pub mix_correct: bool,
    pub mix_queue_max_size_ms: i64,
    pub time_jitter: JitterAlgorithm,
    pub atc: bool,
    pub atc_auto: bool,
    pub reduce_sequence_header: bool,
    pub hls_on_error: HlsOnError,
    pub edge: EdgeConfig,
    pub forward: ForwardConfig,
    pub dvr: DvrConfig,
    /// Seconds of silence from a publisher before it is considered idle
    /// (SPEC_FULL §2, supplemented from original_source).
    pub publish_1st_pkt_timeout_ms: u64,
    pub publish_normal_timeout_ms: u64,
    pub hub_cleanup_delay_ms: i64,
    /// `on_play` hook URLs, fired by an RTSP session once PLAY starts (§4.14).
    pub on_play_urls: Vec<String>,
}

impl Default for VhostConfig {
    fn default() -> Self {
        Self {
            vhost: "__defaultVhost__".to_string(),
            gop_cache: GopCacheConfig::default(),
            queue: QueueConfig::default(),
            mix_correct: false,
            mix_queue_max_size_ms: 10_000,
            time_jitter: JitterAlgorithm::Full,
            atc: false,
            atc_auto: true,
            reduce_sequence_header: false,
            hls_on_error: HlsOnError::default(),
            edge: EdgeConfig::default(),
            forward: ForwardConfig::default(),
            dvr: DvrConfig::default(),
            publish_1st_pkt_timeout_ms: 20_000,
            publish_normal_timeout_ms: 5_000,
            hub_cleanup_delay_ms: 0,
            on_play_urls: Vec::new(),
        }
    }
}

/// Top-level server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_enabled: bool,
    pub log_level: String,
    pub vhosts: Vec<VhostConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            cors_enabled: true,
            log_level: "info".to_string(),
            vhosts: vec![VhostConfig::default()],
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn vhost(&self, name: &str) -> Option<&VhostConfig> {
        self.vhosts.iter().find(|v| v.vhost == name)
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: ServerConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_file(&self, path: &str) -> Result<(), Box<dyn std::error::Error>> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
