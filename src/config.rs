//! Configuration file parser for ~/.config/scribe/config.toml.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Unknown keys are accepted by serde but logged as warnings since they are
//! usually typos. Provider credentials may also come from the environment
//! (`YOUTUBE_API_KEY`, `VIMEO_API_KEY`, `FEEDLY_API_KEY`,
//! `FEEDLY_FETCH_CATEGORY_ID`), which takes precedence over the file.
//!
//! The resolved `Config` is built once at startup and handed to the provider
//! registry; nothing re-reads the environment afterwards.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite file. Defaults to `~/.local/share/scribe/scribe.db`.
    pub database_path: Option<PathBuf>,
    pub refresh: RefreshConfig,
    pub youtube: YoutubeConfig,
    pub vimeo: VimeoConfig,
    pub feedly: FeedlyConfig,
}

/// Worker pool and fetch bounds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// Concurrent refresh units (clamped to 1..=8).
    pub workers: usize,
    /// Newest items requested per source and refresh (clamped to 1..=200).
    pub max_items_per_source: usize,
    /// Timeout for a single provider HTTP request.
    pub request_timeout_secs: u64,
    /// Timeout for a whole refresh call.
    pub refresh_timeout_secs: u64,
    /// Language tag given to sources created by feed sync.
    pub default_lang: String,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            max_items_per_source: 50,
            request_timeout_secs: 20,
            refresh_timeout_secs: 300,
            default_lang: "en".to_string(),
        }
    }
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct YoutubeConfig {
    pub api_key: Option<String>,
    pub base_url: String,
}

impl Default for YoutubeConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://www.googleapis.com/youtube/v3".to_string(),
        }
    }
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct VimeoConfig {
    pub access_token: Option<String>,
    pub base_url: String,
}

impl Default for VimeoConfig {
    fn default() -> Self {
        Self {
            access_token: None,
            base_url: "https://api.vimeo.com".to_string(),
        }
    }
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct FeedlyConfig {
    pub access_token: Option<String>,
    pub base_url: String,
    /// Collection whose feeds `sync-feed` mirrors into the source table.
    pub category_id: Option<String>,
}

impl Default for FeedlyConfig {
    fn default() -> Self {
        Self {
            access_token: None,
            base_url: "https://cloud.feedly.com".to_string(),
            category_id: None,
        }
    }
}

fn redacted(secret: &Option<String>) -> Option<&'static str> {
    secret.as_ref().map(|_| "[REDACTED]")
}

// Credentials never appear in Debug output
impl std::fmt::Debug for YoutubeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("YoutubeConfig")
            .field("api_key", &redacted(&self.api_key))
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl std::fmt::Debug for VimeoConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VimeoConfig")
            .field("access_token", &redacted(&self.access_token))
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl std::fmt::Debug for FeedlyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedlyConfig")
            .field("access_token", &redacted(&self.access_token))
            .field("base_url", &self.base_url)
            .field("category_id", &self.category_id)
            .finish()
    }
}

impl RefreshConfig {
    pub fn workers(&self) -> usize {
        self.workers.clamp(1, 8)
    }

    pub fn max_items(&self) -> usize {
        self.max_items_per_source.clamp(1, 200)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_secs(self.refresh_timeout_secs.max(1))
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [(&'static str, &'static [&'static str]); 5] = [
        ("database_path", &[]),
        (
            "refresh",
            &[
                "workers",
                "max_items_per_source",
                "request_timeout_secs",
                "refresh_timeout_secs",
                "default_lang",
            ],
        ),
        ("youtube", &["api_key", "base_url"]),
        ("vimeo", &["access_token", "base_url"]),
        ("feedly", &["access_token", "base_url", "category_id"]),
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check size before reading so a huge file never lands in memory
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in unknown_keys(&raw) {
                tracing::warn!(key = %key, "Unknown key in config file, ignoring");
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            workers = config.refresh.workers(),
            max_items = config.refresh.max_items(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Apply credential overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Apply credential overrides from `lookup`. Empty values are ignored.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = get("YOUTUBE_API_KEY") {
            self.youtube.api_key = Some(key);
        }
        if let Some(token) = get("VIMEO_API_KEY") {
            self.vimeo.access_token = Some(token);
        }
        if let Some(token) = get("FEEDLY_API_KEY") {
            self.feedly.access_token = Some(token);
        }
        if let Some(category) = get("FEEDLY_FETCH_CATEGORY_ID") {
            self.feedly.category_id = Some(category);
        }
    }
}

/// Dotted paths of keys the config schema does not know about.
fn unknown_keys(raw: &toml::Table) -> Vec<String> {
    let mut unknown = Vec::new();
    for (key, value) in raw {
        match Config::KNOWN_KEYS.iter().find(|(name, _)| *name == key.as_str()) {
            None => unknown.push(key.clone()),
            Some((_, nested)) => {
                if let Some(table) = value.as_table() {
                    unknown.extend(
                        table
                            .keys()
                            .filter(|k| !nested.contains(&k.as_str()))
                            .map(|k| format!("{}.{}", key, k)),
                    );
                }
            }
        }
    }
    unknown
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn write_config(name: &str, content: &str) -> (PathBuf, PathBuf) {
        let dir = std::env::temp_dir().join(format!("scribe_config_test_{}", name));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.database_path.is_none());
        assert_eq!(config.refresh.workers(), 4);
        assert_eq!(config.refresh.max_items(), 50);
        assert_eq!(config.refresh.request_timeout(), Duration::from_secs(20));
        assert_eq!(config.refresh.default_lang, "en");
        assert!(config.youtube.api_key.is_none());
        assert_eq!(config.vimeo.base_url, "https://api.vimeo.com");
        assert!(config.feedly.category_id.is_none());
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/scribe_test_nonexistent_config.toml");
        let config = Config::load(path).unwrap();
        assert_eq!(config.refresh.workers, 4);
    }

    #[test]
    fn test_whitespace_only_file_returns_default() {
        let (dir, path) = write_config("whitespace", "   \n  \n  ");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.refresh.max_items_per_source, 50);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_full_config() {
        let content = r#"
database_path = "/var/lib/scribe/scribe.db"

[refresh]
workers = 6
max_items_per_source = 25
request_timeout_secs = 5
refresh_timeout_secs = 60
default_lang = "fr"

[youtube]
api_key = "yt-key"
base_url = "http://127.0.0.1:9000/youtube/v3"

[vimeo]
access_token = "vimeo-token"

[feedly]
access_token = "feedly-token"
category_id = "user/abc/category/skate"
"#;
        let (dir, path) = write_config("full", content);
        let config = Config::load(&path).unwrap();

        assert_eq!(
            config.database_path.as_deref(),
            Some(Path::new("/var/lib/scribe/scribe.db"))
        );
        assert_eq!(config.refresh.workers(), 6);
        assert_eq!(config.refresh.max_items(), 25);
        assert_eq!(config.refresh.refresh_timeout(), Duration::from_secs(60));
        assert_eq!(config.refresh.default_lang, "fr");
        assert_eq!(config.youtube.api_key.as_deref(), Some("yt-key"));
        assert_eq!(config.youtube.base_url, "http://127.0.0.1:9000/youtube/v3");
        assert_eq!(config.vimeo.access_token.as_deref(), Some("vimeo-token"));
        assert_eq!(config.feedly.base_url, "https://cloud.feedly.com");
        assert_eq!(
            config.feedly.category_id.as_deref(),
            Some("user/abc/category/skate")
        );

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_limits_are_clamped() {
        let (dir, path) = write_config(
            "clamped",
            "[refresh]\nworkers = 64\nmax_items_per_source = 0\nrequest_timeout_secs = 0\n",
        );
        let config = Config::load(&path).unwrap();
        assert_eq!(config.refresh.workers(), 8);
        assert_eq!(config.refresh.max_items(), 1);
        assert_eq!(config.refresh.request_timeout(), Duration::from_secs(1));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let (dir, path) = write_config("invalid", "this is not [valid toml");
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_wrong_type_returns_error() {
        let (dir, path) = write_config("wrongtype", "[refresh]\nworkers = \"four\"\n");
        assert!(Config::load(&path).is_err());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_unknown_keys_accepted_and_reported() {
        let content = r#"
theme = "dark"

[refresh]
workers = 2
wrokers = 3

[youtube]
api_key = "k"
"#;
        let (dir, path) = write_config("unknown", content);
        let config = Config::load(&path).unwrap();
        assert_eq!(config.refresh.workers, 2);

        let raw: toml::Table = content.parse().unwrap();
        let mut unknown = unknown_keys(&raw);
        unknown.sort();
        assert_eq!(unknown, vec!["refresh.wrokers".to_string(), "theme".to_string()]);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_too_large_file_rejected() {
        let (dir, path) = write_config("too_large", &"a".repeat(1_048_577));
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        assert!(err.to_string().contains("too large"));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_env_overrides_file_values() {
        let mut config = Config::default();
        config.youtube.api_key = Some("from-file".to_string());

        let env: HashMap<&str, &str> = [
            ("YOUTUBE_API_KEY", "from-env"),
            ("VIMEO_API_KEY", "vimeo-env"),
            ("FEEDLY_API_KEY", "   "),
            ("FEEDLY_FETCH_CATEGORY_ID", "user/1/category/global.all"),
        ]
        .into_iter()
        .collect();
        config.apply_env_from(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.youtube.api_key.as_deref(), Some("from-env"));
        assert_eq!(config.vimeo.access_token.as_deref(), Some("vimeo-env"));
        assert!(config.feedly.access_token.is_none());
        assert_eq!(
            config.feedly.category_id.as_deref(),
            Some("user/1/category/global.all")
        );
    }

    #[test]
    fn test_debug_masks_credentials() {
        let mut config = Config::default();
        config.youtube.api_key = Some("super-secret-key-12345".to_string());
        config.feedly.access_token = Some("feedly-secret-token".to_string());

        let debug_output = format!("{:?}", config);
        assert!(!debug_output.contains("super-secret-key-12345"));
        assert!(!debug_output.contains("feedly-secret-token"));
        assert!(debug_output.contains("[REDACTED]"));
    }

    #[test]
    fn test_debug_shows_none_when_no_credentials() {
        let debug_output = format!("{:?}", Config::default());
        assert!(debug_output.contains("None"));
        assert!(!debug_output.contains("[REDACTED]"));
    }
}
