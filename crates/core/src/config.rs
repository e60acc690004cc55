use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;
use crate::paths::Paths;

/// WhatsApp API provider account settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    #[serde(default = "default_provider_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    /// The business number messages are sent from (E.164).
    #[serde(default)]
    pub from_number: String,
    /// Basic-auth credentials the provider sends back on callback requests.
    #[serde(default)]
    pub callback_user: String,
    /// SHA-256 hex digest of the callback password.
    #[serde(default)]
    pub callback_pass_hash: String,
    /// Plaintext callback password, embedded into outbound notify URLs.
    #[serde(default)]
    pub callback_pass: String,
}

fn default_provider_base_url() -> String {
    "https://api.infobip.com".to_string()
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_provider_base_url(),
            api_key: String::new(),
            from_number: String::new(),
            callback_user: String::new(),
            callback_pass_hash: String::new(),
            callback_pass: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingConfig {
    /// New customer ids allocatable per calendar day.
    #[serde(default = "default_max_customers_per_day")]
    pub max_customers_per_day: u32,
    /// Redirect rules allowed per customer number.
    #[serde(default = "default_max_agents_per_customer")]
    pub max_agents_per_customer: u32,
}

fn default_max_customers_per_day() -> u32 {
    50
}

fn default_max_agents_per_customer() -> u32 {
    3
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            max_customers_per_day: default_max_customers_per_day(),
            max_agents_per_customer: default_max_agents_per_customer(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_host")]
    pub host: String,
    #[serde(default = "default_gateway_port")]
    pub port: u16,
    /// Externally reachable base URL of this server, used for callback
    /// and media links handed to the provider.
    #[serde(default = "default_public_url")]
    pub public_url: String,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

fn default_gateway_host() -> String {
    "0.0.0.0".to_string()
}

fn default_gateway_port() -> u16 {
    18890
}

fn default_public_url() -> String {
    "http://localhost:18890".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_gateway_host(),
            port: default_gateway_port(),
            public_url: default_public_url(),
            allowed_origins: vec![],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaConfig {
    /// File extensions accepted for upload and outbound send.
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
}

fn default_allowed_extensions() -> Vec<String> {
    [
        "jpg", "jpeg", "png", "aac", "amr", "mp3", "opus", "mp4", "3gpp", "webp", "pdf", "doc",
        "docx", "txt",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            allowed_extensions: default_allowed_extensions(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub media: MediaConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn load_or_default(paths: &Paths) -> Result<Self> {
        let config_path = paths.config_file();
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn public_url(&self) -> &str {
        self.gateway.public_url.trim_end_matches('/')
    }

    pub fn ext_allowed(&self, filename: &str) -> bool {
        filename
            .rsplit_once('.')
            .map(|(_, ext)| {
                let ext = ext.to_ascii_lowercase();
                self.media.allowed_extensions.iter().any(|e| e == &ext)
            })
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_json() {
        let cfg: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.provider.base_url, "https://api.infobip.com");
        assert_eq!(cfg.routing.max_agents_per_customer, 3);
        assert!(cfg.media.allowed_extensions.contains(&"jpg".to_string()));
    }

    #[test]
    fn test_camel_case_fields() {
        let raw = r#"{
  "provider": { "fromNumber": "+15550009999", "callbackUser": "cb" },
  "routing": { "maxCustomersPerDay": 3 },
  "gateway": { "publicUrl": "https://wa.example.com/" }
}"#;
        let cfg: Config = serde_json::from_str(raw).unwrap();
        assert_eq!(cfg.provider.from_number, "+15550009999");
        assert_eq!(cfg.routing.max_customers_per_day, 3);
        assert_eq!(cfg.public_url(), "https://wa.example.com");
    }

    #[test]
    fn test_ext_allowed() {
        let cfg = Config::default();
        assert!(cfg.ext_allowed("photo.JPG"));
        assert!(!cfg.ext_allowed("script.exe"));
        assert!(!cfg.ext_allowed("noextension"));
    }
}
