use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_false(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_target: default_true(),
            ansi_colors: default_true(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "boardlink".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub log_settings: LogSettings,

    /// Boards we have successfully unlocked before, by platform identifier.
    #[serde(default)]
    pub known_board_ids: Vec<String>,
    #[serde(default)]
    pub last_connected_id: Option<String>,

    /// Advertisements weaker than this are rejected by the device filter.
    #[serde(default = "default_rssi_floor")]
    pub rssi_floor_dbm: i16,
    /// Seconds a scan batch runs before the candidate list is returned.
    #[serde(default = "default_scan_seconds")]
    pub scan_seconds: u64,

    // Debug settings
    #[serde(default = "default_false")]
    pub debug_show_all_devices: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_settings: LogSettings::default(),
            known_board_ids: Vec::new(),
            last_connected_id: None,
            rssi_floor_dbm: default_rssi_floor(),
            scan_seconds: default_scan_seconds(),
            debug_show_all_devices: false,
        }
    }
}

fn default_rssi_floor() -> i16 {
    crate::infrastructure::bluetooth::protocol::RSSI_FLOOR_DBM
}
fn default_scan_seconds() -> u64 {
    10
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::settings_path()?;
        let settings = Self::load_from_file(&settings_path).unwrap_or_default();

        Ok(Self {
            settings,
            settings_path,
        })
    }

    fn settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("BoardLink");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &PathBuf) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn record_connected_board(&mut self, id: &str) -> anyhow::Result<()> {
        if !self.settings.known_board_ids.iter().any(|k| k == id) {
            self.settings.known_board_ids.push(id.to_string());
        }
        self.settings.last_connected_id = Some(id.to_string());
        self.save()
    }
}
