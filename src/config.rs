use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

pub const DEFAULT_CONFIG_PATH: &str = "config.json";
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 30;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found at {0:?}")]
    NotFound(PathBuf),
    #[error("Configuration I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Configuration is incomplete: {0} is not set")]
    Incomplete(&'static str),
}

/// The persisted key/value record shared by the bot daemon and the local menu.
#[derive(Serialize, Deserialize, Clone, PartialEq)]
pub struct BotConfig {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default, deserialize_with = "deserialize_admin_id")]
    pub admin_id: i64,
    /// Monthly traffic threshold in GB, 0 means no limit.
    #[serde(default)]
    pub limit_gb: u64,
    #[serde(default)]
    pub auto_shutdown: bool,
    #[serde(default)]
    pub vnstat_interface: Option<String>,
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
    /// Periodically drop login cool-down entries that have expired.
    #[serde(default)]
    pub login_debounce_sweep: bool,
}

fn default_command_timeout_secs() -> u64 {
    DEFAULT_COMMAND_TIMEOUT_SECS
}

// Older installs wrote the admin id as a string.
fn deserialize_admin_id<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Number(i64),
        Text(String),
    }

    match RawId::deserialize(deserializer)? {
        RawId::Number(id) => Ok(id),
        RawId::Text(text) if text.trim().is_empty() => Ok(0),
        RawId::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            admin_id: 0,
            limit_gb: 0,
            auto_shutdown: false,
            vnstat_interface: None,
            command_timeout_secs: DEFAULT_COMMAND_TIMEOUT_SECS,
            login_debounce_sweep: false,
        }
    }
}

impl fmt::Debug for BotConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BotConfig")
            .field(
                "bot_token",
                &if self.bot_token.is_empty() { "<unset>" } else { "<redacted>" },
            )
            .field("admin_id", &self.admin_id)
            .field("limit_gb", &self.limit_gb)
            .field("auto_shutdown", &self.auto_shutdown)
            .field("vnstat_interface", &self.vnstat_interface)
            .field("command_timeout_secs", &self.command_timeout_secs)
            .field("login_debounce_sweep", &self.login_debounce_sweep)
            .finish()
    }
}

impl BotConfig {
    /// Auto-shutdown only means something with a non-zero threshold.
    pub fn is_armed(&self) -> bool {
        self.auto_shutdown && self.limit_gb > 0
    }

    /// The configured interface, with an empty string treated as unset.
    pub fn preferred_interface(&self) -> Option<&str> {
        self.vnstat_interface
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs.max(1))
    }

    /// Checks the fields the bot daemon cannot run without.
    pub fn validate_for_bot(&self) -> Result<(), ConfigError> {
        if self.bot_token.trim().is_empty() {
            return Err(ConfigError::Incomplete("bot_token"));
        }
        if self.admin_id == 0 {
            return Err(ConfigError::Incomplete("admin_id"));
        }
        Ok(())
    }
}

/// Owns the configuration record and is the single entry point for writes.
///
/// Every mutation goes through [`ConfigStore::update`], which holds the write
/// lock while the new record is persisted, so readers never see a torn value.
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    current: RwLock<BotConfig>,
}

impl ConfigStore {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref().to_path_buf();
        let config = read_config_file(&path)?;
        info!(path = ?path, config = ?config, "Loaded config successfully.");
        Ok(Self {
            path,
            current: RwLock::new(config),
        })
    }

    /// Writes `initial` to `path` and returns a store over it.
    pub fn create(path: impl AsRef<Path>, initial: BotConfig) -> Result<Self, ConfigError> {
        let path = path.as_ref().to_path_buf();
        write_config_file(&path, &initial)?;
        info!(path = ?path, "Created new configuration file.");
        Ok(Self {
            path,
            current: RwLock::new(initial),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot(&self) -> BotConfig {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Re-reads the file so edits made by another process are picked up.
    /// On failure the last good record is kept and returned.
    pub async fn reload(&self) -> BotConfig {
        match read_config_file_async(&self.path).await {
            Ok(fresh) => {
                let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
                if *guard != fresh {
                    info!(config = ?fresh, "Configuration changed on disk.");
                    *guard = fresh.clone();
                }
                fresh
            }
            Err(e) => {
                warn!(path = ?self.path, error = %e, "Failed to reload config, keeping previous values.");
                self.snapshot()
            }
        }
    }

    /// Applies `change` and rewrites the whole file. The in-memory record is
    /// only replaced once the file has been persisted.
    pub fn update<F>(&self, change: F) -> Result<BotConfig, ConfigError>
    where
        F: FnOnce(&mut BotConfig),
    {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = guard.clone();
        change(&mut next);
        write_config_file(&self.path, &next).map_err(|e| {
            error!(path = ?self.path, error = %e, "Failed to save config.");
            e
        })?;
        *guard = next.clone();
        Ok(next)
    }

    pub fn set_token(&self, token: &str) -> Result<BotConfig, ConfigError> {
        let token = token.trim().to_string();
        self.update(|cfg| cfg.bot_token = token)
    }

    pub fn set_admin_id(&self, admin_id: i64) -> Result<BotConfig, ConfigError> {
        self.update(|cfg| cfg.admin_id = admin_id)
    }

    /// Setting a positive limit arms auto-shutdown, setting 0 disarms it.
    pub fn set_limit(&self, limit_gb: u64) -> Result<BotConfig, ConfigError> {
        self.update(|cfg| {
            cfg.limit_gb = limit_gb;
            cfg.auto_shutdown = limit_gb > 0;
        })
    }

    pub fn disable_limit(&self) -> Result<BotConfig, ConfigError> {
        self.set_limit(0)
    }

    pub fn toggle_auto_shutdown(&self) -> Result<BotConfig, ConfigError> {
        self.update(|cfg| cfg.auto_shutdown = !cfg.auto_shutdown)
    }

    pub fn set_interface(&self, interface: Option<&str>) -> Result<BotConfig, ConfigError> {
        let interface = interface
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string);
        self.update(|cfg| cfg.vnstat_interface = interface)
    }
}

fn read_config_file(path: &Path) -> Result<BotConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }
    let contents = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

async fn read_config_file_async(path: &Path) -> Result<BotConfig, ConfigError> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        Err(e) => return Err(e.into()),
    };
    Ok(serde_json::from_str(&contents)?)
}

fn write_config_file(path: &Path, config: &BotConfig) -> Result<(), ConfigError> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    config.serialize(&mut serializer)?;
    buf.push(b'\n');

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    // Write next to the target and rename over it.
    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    temp.write_all(&buf)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_raw(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("config.json");
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_load_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let result = ConfigStore::load(dir.path().join("config.json"));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_load_scalar_document_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_raw(&dir, "\"just a string\"");
        assert!(matches!(ConfigStore::load(&path), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_accepts_legacy_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_raw(
            &dir,
            r#"{"bot_token": "123:abc", "admin_id": "42", "limit_gb": 500,
                "auto_shutdown": true, "vnstat_interface": ""}"#,
        );
        let store = ConfigStore::load(&path).unwrap();
        let cfg = store.snapshot();
        assert_eq!(cfg.admin_id, 42);
        assert_eq!(cfg.limit_gb, 500);
        assert!(cfg.is_armed());
        assert_eq!(cfg.preferred_interface(), None);
        assert_eq!(cfg.command_timeout_secs, DEFAULT_COMMAND_TIMEOUT_SECS);
        assert!(!cfg.login_debounce_sweep);
    }

    #[test]
    fn test_set_limit_persists_and_arms() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let store = ConfigStore::create(&path, BotConfig::default()).unwrap();

        store.set_limit(1024).unwrap();
        let reread = ConfigStore::load(&path).unwrap().snapshot();
        assert_eq!(reread.limit_gb, 1024);
        assert!(reread.auto_shutdown);

        store.disable_limit().unwrap();
        let reread = ConfigStore::load(&path).unwrap().snapshot();
        assert_eq!(reread.limit_gb, 0);
        assert!(!reread.auto_shutdown);
        assert!(!reread.is_armed());
    }

    #[test]
    fn test_toggle_and_interface() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let store = ConfigStore::create(&path, BotConfig::default()).unwrap();

        assert!(store.toggle_auto_shutdown().unwrap().auto_shutdown);
        assert!(!store.toggle_auto_shutdown().unwrap().auto_shutdown);

        store.set_interface(Some(" eth0 ")).unwrap();
        assert_eq!(store.snapshot().preferred_interface(), Some("eth0"));
        store.set_interface(Some("")).unwrap();
        assert_eq!(store.snapshot().vnstat_interface, None);
    }

    #[test]
    fn test_update_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let store = ConfigStore::create(&path, BotConfig::default()).unwrap();
        store.set_admin_id(7).unwrap();
        store.set_token("  t0ken ").unwrap();

        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
        let cfg = store.snapshot();
        assert_eq!(cfg.admin_id, 7);
        assert_eq!(cfg.bot_token, "t0ken");
    }

    #[tokio::test]
    async fn test_reload_keeps_previous_on_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let store = ConfigStore::create(&path, BotConfig::default()).unwrap();
        store.set_limit(500).unwrap();

        fs::write(&path, "{ not json").unwrap();
        let cfg = store.reload().await;
        assert_eq!(cfg.limit_gb, 500);

        fs::write(&path, r#"{"limit_gb": 2048, "auto_shutdown": true}"#).unwrap();
        assert_eq!(store.reload().await.limit_gb, 2048);

        fs::remove_file(&path).unwrap();
        assert_eq!(store.reload().await.limit_gb, 2048);
        assert_eq!(store.snapshot().limit_gb, 2048);
    }

    #[test]
    fn test_validate_for_bot() {
        let mut cfg = BotConfig::default();
        assert!(matches!(cfg.validate_for_bot(), Err(ConfigError::Incomplete("bot_token"))));
        cfg.bot_token = "abc".into();
        assert!(matches!(cfg.validate_for_bot(), Err(ConfigError::Incomplete("admin_id"))));
        cfg.admin_id = 1;
        assert!(cfg.validate_for_bot().is_ok());
    }

    #[test]
    fn test_debug_redacts_token() {
        let cfg = BotConfig {
            bot_token: "secret-token".into(),
            ..BotConfig::default()
        };
        let rendered = format!("{cfg:?}");
        assert!(!rendered.contains("secret-token"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_store_debug_hides_token() {
        let dir = tempfile::tempdir().unwrap();
        let initial = BotConfig {
            bot_token: "secret-token".into(),
            admin_id: 42,
            ..BotConfig::default()
        };
        let store = ConfigStore::create(dir.path().join("config.json"), initial).unwrap();

        let rendered = format!("{store:?}");
        assert!(rendered.contains("admin_id: 42"));
        assert!(!rendered.contains("secret-token"));

        let err = ConfigStore::load(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }
}
