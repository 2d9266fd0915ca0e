//! Configuration loading and resolution
//!
//! Resolution priority:
//! 1. Command-line argument (highest priority, handled by the binary)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! A missing config file is not an error: the service logs a warning and
//! starts with compiled defaults. A config file that exists but does not
//! parse is an error.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "FUNNEL_CONFIG";

/// Default concierge prompt for the voice agent
pub const DEFAULT_VOICE_INSTRUCTIONS: &str = "You are the AI concierge for a luxury medical aesthetics clinic. \
Be warm, professional, and elegant in your responses. Follow this conversation flow:

Greeting: \"Thank you for calling. This is the concierge desk. How can I help support your aesthetic goals today?\"

For pricing inquiries: \"Pricing depends on your personalized treatment plan. I can help you schedule a consultation for exact recommendations.\"

For treatment inquiries: \"I can share a simple overview, and your provider will guide you through all clinical details during the consultation.\"

When booking: \"We have openings this week and next. What day works best for you?\"

If they're undecided: \"Most clients begin with a consultation so we can understand your goals and tailor the right approach.\"

Always try to guide toward booking: \"Would you like me to secure a consultation time for you now?\"

Be concise, elegant, and guide every conversation toward scheduling a consultation.";

/// Complete service configuration as read from TOML
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub server: ServerConfig,
    pub backend: BackendConfig,
    pub crm: CrmConfig,
    pub pixels: PixelConfig,
    pub voice: VoiceConfig,
    pub tracking: TrackingConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Directory of pre-built landing pages served at `/`
    pub static_dir: Option<PathBuf>,
    /// How long cached dashboard lists stay fresh
    pub cache_ttl_secs: u64,
    pub event_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:5740".to_string(),
            static_dir: None,
            cache_ttl_secs: 30,
            event_capacity: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: None,
            api_key: None,
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrmConfig {
    pub api_key: Option<String>,
    pub contacts_url: String,
    pub list_id: i64,
    pub interest: String,
    pub timeout_secs: u64,
}

impl Default for CrmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            contacts_url: "https://api.brevo.com/v3/contacts".to_string(),
            list_id: 2,
            interest: "VR_Experience".to_string(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PixelConfig {
    pub meta_pixel_id: Option<String>,
    pub meta_access_token: Option<String>,
    pub meta_api_version: String,
    pub trafficjunky_id: Option<String>,
}

impl Default for PixelConfig {
    fn default() -> Self {
        Self {
            meta_pixel_id: None,
            meta_access_token: None,
            meta_api_version: "v18.0".to_string(),
            trafficjunky_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    pub api_key: Option<String>,
    pub upstream_url: String,
    pub model: String,
    pub voice: String,
    pub instructions: String,
    pub transcription_model: String,
    pub temperature: f64,
    pub vad_threshold: f64,
    pub prefix_padding_ms: u32,
    pub silence_duration_ms: u32,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            upstream_url: "wss://api.openai.com/v1/realtime".to_string(),
            model: "gpt-4o-realtime-preview-2024-10-01".to_string(),
            voice: "alloy".to_string(),
            instructions: DEFAULT_VOICE_INSTRUCTIONS.to_string(),
            transcription_model: "whisper-1".to_string(),
            temperature: 0.8,
            vad_threshold: 0.5,
            prefix_padding_ms: 300,
            silence_duration_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Salt mixed into visitor hashes
    pub hash_salt: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl TomlConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Overlay secrets and endpoints from the process environment
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    /// Overlay values from `lookup`; empty values are ignored
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("FUNNEL_BIND") {
            self.server.bind = v;
        }
        if let Some(v) = get("FUNNEL_BACKEND_URL") {
            self.backend.url = Some(v);
        }
        if let Some(v) = get("FUNNEL_BACKEND_KEY") {
            self.backend.api_key = Some(v);
        }
        if let Some(v) = get("BREVO_API_KEY") {
            self.crm.api_key = Some(v);
        }
        if let Some(v) = get("LIST_ID_EVA_MAIN") {
            match v.parse() {
                Ok(id) => self.crm.list_id = id,
                Err(_) => warn!("Ignoring non-numeric LIST_ID_EVA_MAIN={}", v),
            }
        }
        if let Some(v) = get("OPENAI_API_KEY") {
            self.voice.api_key = Some(v);
        }
        if let Some(v) = get("META_PIXEL_ID") {
            self.pixels.meta_pixel_id = Some(v);
        }
        if let Some(v) = get("META_ACCESS_TOKEN") {
            self.pixels.meta_access_token = Some(v);
        }
        if let Some(v) = get("TRAFFICJUNKY_ID") {
            self.pixels.trafficjunky_id = Some(v);
        }
        if let Some(v) = get("FUNNEL_HASH_SALT") {
            self.tracking.hash_salt = v;
        }
        if let Some(v) = get("FUNNEL_LOG_LEVEL") {
            self.logging.level = v;
        }
    }
}

/// Locates the config file
pub struct ConfigResolver {
    cli_path: Option<PathBuf>,
}

impl ConfigResolver {
    pub fn new(cli_path: Option<PathBuf>) -> Self {
        Self { cli_path }
    }

    /// Config file to read, if any
    pub fn config_path(&self) -> Option<PathBuf> {
        if let Some(path) = &self.cli_path {
            return Some(path.clone());
        }

        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            if !path.trim().is_empty() {
                return Some(PathBuf::from(path));
            }
        }

        let user_config = dirs::config_dir().map(|d| d.join("funnel").join("config.toml"));
        let system_config = PathBuf::from("/etc/funnel/config.toml");

        [user_config, Some(system_config)]
            .into_iter()
            .flatten()
            .find(|path| path.exists())
    }

    /// Load the config file (or defaults) and apply environment overrides
    pub fn resolve(&self) -> Result<TomlConfig> {
        let mut config = match self.config_path() {
            Some(path) if path.exists() => {
                info!("Loading config from {}", path.display());
                TomlConfig::load(&path)?
            }
            Some(path) => {
                warn!("Config file not found: {} (using defaults)", path.display());
                TomlConfig::default()
            }
            None => {
                warn!("No config file found (using defaults)");
                TomlConfig::default()
            }
        };

        config.apply_env_overrides();
        Ok(config)
    }
}
