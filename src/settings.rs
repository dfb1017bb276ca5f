use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

pub const SETTINGS_FILE: &str = "settings.json";
pub const DATA_DIR_ENV: &str = "EURORA_DATA_DIR";
pub const REGISTRY_ENV: &str = "EURORA_REGISTRY";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSettings {
    pub host_name: String,
    pub reconnect_delay_ms: u64,
    pub max_reconnect_delay_ms: u64,
    pub reconnect_jitter: f64,
    pub queue_capacity: usize,
    pub request_timeout_ms: u64,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            host_name: "com.eurora.app".into(),
            reconnect_delay_ms: 5_000,
            max_reconnect_delay_ms: 60_000,
            reconnect_jitter: 0.1,
            queue_capacity: 256,
            request_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetPolicy {
    /// Fetch the asset as soon as an activity opens.
    #[default]
    OnOpen,
    /// Wait until something asks for the activity's context.
    OnDemand,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivitySettings {
    pub snapshot_interval_ms: u64,
    pub asset_policy: AssetPolicy,
    pub pending_write_capacity: usize,
    pub browser_processes: Vec<String>,
}

impl Default for ActivitySettings {
    fn default() -> Self {
        Self {
            snapshot_interval_ms: 3_000,
            asset_policy: AssetPolicy::OnOpen,
            pending_write_capacity: 512,
            browser_processes: default_browser_processes(),
        }
    }
}

#[cfg(target_os = "windows")]
fn default_browser_processes() -> Vec<String> {
    ["chrome.exe", "msedge.exe", "firefox.exe", "librewolf.exe", "brave.exe", "opera.exe"]
        .iter()
        .map(|name| name.to_string())
        .collect()
}

#[cfg(target_os = "macos")]
fn default_browser_processes() -> Vec<String> {
    ["Google Chrome", "Microsoft Edge", "Firefox", "LibreWolf", "Brave Browser", "Safari"]
        .iter()
        .map(|name| name.to_string())
        .collect()
}

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
fn default_browser_processes() -> Vec<String> {
    ["chrome", "chromium", "google-chrome", "firefox", "librewolf", "brave", "msedge"]
        .iter()
        .map(|name| name.to_string())
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    pub bridge: BridgeSettings,
    pub activity: ActivitySettings,
    pub registry_path: Option<PathBuf>,
}

/// `EURORA_DATA_DIR` if set, otherwise `$HOME/.eurora`.
pub fn data_dir() -> Result<PathBuf> {
    resolve_data_dir(env::var_os(DATA_DIR_ENV), env::var_os("HOME"))
}

fn resolve_data_dir(
    explicit: Option<std::ffi::OsString>,
    home: Option<std::ffi::OsString>,
) -> Result<PathBuf> {
    if let Some(dir) = explicit.filter(|dir| !dir.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    let home = home
        .filter(|home| !home.is_empty())
        .ok_or_else(|| anyhow!("neither {DATA_DIR_ENV} nor HOME is set"))?;
    Ok(Path::new(&home).join(".eurora"))
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<CaptureSettings>,
}

impl SettingsStore {
    /// A missing file means defaults. An unreadable one is an error; a file
    /// that does not parse is replaced by defaults with a warning.
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                log::warn!("ignoring invalid settings at {}: {err}", path.display());
                CaptureSettings::default()
            })
        } else {
            CaptureSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn in_dir(dir: &Path) -> Result<Self> {
        Self::new(dir.join(SETTINGS_FILE))
    }

    fn read(&self) -> RwLockReadGuard<'_, CaptureSettings> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, CaptureSettings> {
        self.data.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current settings with environment overrides applied.
    pub fn snapshot(&self) -> CaptureSettings {
        let mut settings = self.read().clone();
        if let Some(registry) = env::var_os(REGISTRY_ENV).filter(|value| !value.is_empty()) {
            settings.registry_path = Some(PathBuf::from(registry));
        }
        settings
    }

    pub fn bridge(&self) -> BridgeSettings {
        self.read().bridge.clone()
    }

    pub fn activity(&self) -> ActivitySettings {
        self.read().activity.clone()
    }

    pub fn update_bridge(&self, settings: BridgeSettings) -> Result<()> {
        let mut guard = self.write();
        guard.bridge = settings;
        self.persist(&guard)
    }

    pub fn update_activity(&self, settings: ActivitySettings) -> Result<()> {
        let mut guard = self.write();
        guard.activity = settings;
        self.persist(&guard)
    }

    fn persist(&self, data: &CaptureSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }

    pub fn reload(&self) -> Result<()> {
        let contents = fs::read_to_string(&self.path)?;
        let data: CaptureSettings = serde_json::from_str(&contents)?;
        *self.write() = data;
        Ok(())
    }
}
