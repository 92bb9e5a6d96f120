use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct AppConfig {
    /// Channel to join on startup. May carry a leading `#`; empty means
    /// the panel starts disconnected.
    #[serde(default)]
    pub channel: String,

    /// Access token from the sign-in flow. Absent means read-only chat.
    #[serde(default)]
    pub access_token: Option<String>,
}

impl AppConfig {
    fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

}

/// Load the panel config, falling back to defaults when the file is
/// missing or unreadable.
pub fn load_config() -> AppConfig {
    let Ok(project_root) = project_root::get_project_root() else {
        return AppConfig::default();
    };
    let config_path = project_root.join("config.toml");
    if !config_path.exists() {
        return AppConfig::default();
    }

    AppConfig::from_file(&config_path).unwrap_or_else(|e| {
        eprintln!("Failed to read config.toml: {}", e);
        AppConfig::default()
    })
}
