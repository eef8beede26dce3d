//! Configuration vault – reads/writes `~/.waypost/config.toml`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use waypost_middleware::Endpoint;
use waypost_runtime::MissionConfig;

/// Where the robot's WebSocket endpoint lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for RobotSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl RobotSection {
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.host.clone(), self.port)
    }
}

/// The route `/start` runs when given no arguments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MissionSection {
    /// Location identifiers in forward order.
    #[serde(default)]
    pub locations: Vec<String>,
    #[serde(default)]
    pub charge_location: String,
    /// Where an emergency exit diverts to; must be one of `locations`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safe_location: Option<String>,
}

/// Persisted supervisor configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub robot: RobotSection,
    #[serde(default)]
    pub mission: MissionSection,
    /// Location identifier → display name.
    #[serde(default)]
    pub names: BTreeMap<String, String>,
    #[serde(default)]
    pub tuning: MissionConfig,
}

fn default_host() -> String {
    "192.168.1.100".to_string()
}
fn default_port() -> u16 {
    5000
}

/// Return the path to `~/.waypost/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".waypost").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    cfg.tuning.validate().map_err(|e| e.to_string())?;
    Ok(Some(cfg))
}

/// Apply `WAYPOST_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `WAYPOST_ROBOT_HOST` | `robot.host` |
/// | `WAYPOST_ROBOT_PORT` | `robot.port` |
/// | `WAYPOST_SAFE_LOCATION` | `mission.safe_location` |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("WAYPOST_ROBOT_HOST")
        && !v.trim().is_empty()
    {
        cfg.robot.host = v;
    }
    if let Ok(v) = std::env::var("WAYPOST_ROBOT_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.robot.port = port;
    }
    if let Ok(v) = std::env::var("WAYPOST_SAFE_LOCATION")
        && !v.trim().is_empty()
    {
        cfg.mission.safe_location = Some(v);
    }
}

/// Save the config to disk, creating `~/.waypost/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}
