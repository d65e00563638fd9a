//! Player preferences
//!
//! Stored as XML in the user's config directory. A missing or unreadable
//! file yields defaults; values are clamped to usable ranges on load.

use quick_xml::de::from_str;
use quick_xml::se::to_string;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::audio::FeederConfig;
use crate::playback::TransportConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename = "FramepacePreferences", default)]
pub struct PlayerPreferences {
    /// Feed the audio device while fewer than this many bytes are queued
    #[serde(rename = "bufferThresholdBytes")]
    pub buffer_threshold_bytes: usize,

    /// Feeder wait when the device queue is full
    #[serde(rename = "feederIdleMs")]
    pub feeder_idle_ms: u64,

    /// Transport sleep between redraws while paused
    #[serde(rename = "pausePollMs")]
    pub pause_poll_ms: u64,

    /// Frames due within this many milliseconds are presented immediately
    #[serde(rename = "presentToleranceMs")]
    pub present_tolerance_ms: u64,

    /// How strongly the audio clock pulls video waits in (0.0 - 1.0)
    #[serde(rename = "audioSyncCorrection")]
    pub audio_sync_correction: f64,

    /// Skip hardware-accelerated decoding
    #[serde(rename = "preferSoftwareDecode")]
    pub prefer_software_decode: bool,

    /// Output volume (0.0 - 1.0)
    #[serde(rename = "volume")]
    pub volume: f32,

    #[serde(rename = "windowWidth")]
    pub window_width: u32,

    #[serde(rename = "windowHeight")]
    pub window_height: u32,

    /// Log GPU upload times (needs timestamp query support)
    #[serde(rename = "gpuUploadTiming")]
    pub gpu_upload_timing: bool,

    #[serde(rename = "lastOpenedFile", skip_serializing_if = "Option::is_none")]
    pub last_opened_file: Option<String>,
}

impl Default for PlayerPreferences {
    fn default() -> Self {
        Self {
            buffer_threshold_bytes: 16384,
            feeder_idle_ms: 5,
            pause_poll_ms: 200,
            present_tolerance_ms: 2,
            audio_sync_correction: 0.5,
            prefer_software_decode: false,
            volume: 1.0,
            window_width: 1280,
            window_height: 720,
            gpu_upload_timing: false,
            last_opened_file: None,
        }
    }
}

impl PlayerPreferences {
    /// Keep values within usable ranges
    pub fn clamp(&mut self) {
        self.buffer_threshold_bytes = self.buffer_threshold_bytes.clamp(1024, 1 << 24);
        self.feeder_idle_ms = self.feeder_idle_ms.clamp(1, 100);
        self.pause_poll_ms = self.pause_poll_ms.clamp(10, 1000);
        self.present_tolerance_ms = self.present_tolerance_ms.min(50);
        self.audio_sync_correction = if self.audio_sync_correction.is_finite() {
            self.audio_sync_correction.clamp(0.0, 1.0)
        } else {
            0.5
        };
        self.volume = if self.volume.is_finite() {
            self.volume.clamp(0.0, 1.0)
        } else {
            1.0
        };
        self.window_width = self.window_width.clamp(160, 16384);
        self.window_height = self.window_height.clamp(120, 16384);
    }

    fn prefs_path() -> Option<PathBuf> {
        dirs::config_dir().map(|mut p| {
            p.push("Framepace");
            p.push("preferences.xml");
            p
        })
    }

    /// Load from the config directory, falling back to defaults
    pub fn load() -> Self {
        let Some(path) = Self::prefs_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        match Self::load_from(&path) {
            Ok(prefs) => prefs,
            Err(e) => {
                tracing::warn!("Ignoring unreadable preferences {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, SettingsError> {
        let contents = fs::read_to_string(path)?;
        let mut prefs: Self = from_str(&contents)?;
        prefs.clamp();
        Ok(prefs)
    }

    /// Save to the config directory
    pub fn save(&self) -> Result<(), SettingsError> {
        let path = Self::prefs_path().ok_or(SettingsError::NoConfigDir)?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let xml = to_string(self)?;
        let formatted = format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{}", xml);
        fs::write(path, formatted)?;
        Ok(())
    }

    /// Remember `path` as the last opened file and save
    pub fn set_last_opened(&mut self, path: &Path) {
        self.last_opened_file = Some(path.to_string_lossy().to_string());
        if let Err(e) = self.save() {
            tracing::warn!("Failed to save preferences: {}", e);
        }
    }

    /// The last opened file, if it still exists
    pub fn last_opened(&self) -> Option<PathBuf> {
        self.last_opened_file.as_ref().map(PathBuf::from).filter(|p| p.exists())
    }

    pub fn feeder_config(&self) -> FeederConfig {
        FeederConfig {
            buffer_threshold: self.buffer_threshold_bytes,
            idle_wait: Duration::from_millis(self.feeder_idle_ms),
            ..FeederConfig::default()
        }
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            pause_poll: Duration::from_millis(self.pause_poll_ms),
            present_tolerance: Duration::from_millis(self.present_tolerance_ms),
            audio_sync_correction: self.audio_sync_correction,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML parse error: {0}")]
    XmlParse(#[from] quick_xml::DeError),

    #[error("XML write error: {0}")]
    XmlWrite(#[from] quick_xml::SeError),

    #[error("Could not find config directory")]
    NoConfigDir,
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Fresh per-test directory under the system temp dir
    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("framepace_test_{}_{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_defaults() {
        let prefs = PlayerPreferences::default();
        assert_eq!(prefs.buffer_threshold_bytes, 16384);
        assert_eq!(prefs.pause_poll_ms, 200);
        assert_eq!(prefs.audio_sync_correction, 0.5);
        assert!(!prefs.prefer_software_decode);
        assert!(prefs.last_opened_file.is_none());
    }

    #[test]
    fn test_save_and_load() {
        let dir = scratch_dir("save_and_load");
        let path = dir.join("nested").join("preferences.xml");

        let prefs = PlayerPreferences {
            volume: 0.25,
            prefer_software_decode: true,
            window_width: 1920,
            last_opened_file: Some("/videos/clip.mp4".to_string()),
            ..PlayerPreferences::default()
        };
        prefs.save_to(&path).unwrap();

        let loaded = PlayerPreferences::load_from(&path).unwrap();
        assert_eq!(loaded, prefs);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let dir = scratch_dir("missing_fields");
        let path = dir.join("preferences.xml");
        fs::write(
            &path,
            "<FramepacePreferences><volume>0.5</volume></FramepacePreferences>",
        )
        .unwrap();

        let loaded = PlayerPreferences::load_from(&path).unwrap();
        assert_eq!(loaded.volume, 0.5);
        assert_eq!(loaded.buffer_threshold_bytes, 16384);
        assert_eq!(loaded.window_height, 720);
    }

    #[test]
    fn test_load_clamps_values() {
        let dir = scratch_dir("clamps");
        let path = dir.join("preferences.xml");
        fs::write(
            &path,
            "<FramepacePreferences><volume>3.0</volume><audioSyncCorrection>-1</audioSyncCorrection>\
             <bufferThresholdBytes>10</bufferThresholdBytes></FramepacePreferences>",
        )
        .unwrap();

        let loaded = PlayerPreferences::load_from(&path).unwrap();
        assert_eq!(loaded.volume, 1.0);
        assert_eq!(loaded.audio_sync_correction, 0.0);
        assert_eq!(loaded.buffer_threshold_bytes, 1024);
    }

    #[test]
    fn test_garbage_is_an_error() {
        let dir = scratch_dir("garbage");
        let path = dir.join("preferences.xml");
        fs::write(&path, "<FramepacePreferences><volume>loud</volume></FramepacePreferences>").unwrap();
        assert!(matches!(
            PlayerPreferences::load_from(&path),
            Err(SettingsError::XmlParse(_))
        ));
    }

    #[test]
    fn test_derived_configs() {
        let prefs = PlayerPreferences {
            buffer_threshold_bytes: 8192,
            feeder_idle_ms: 3,
            pause_poll_ms: 100,
            ..PlayerPreferences::default()
        };
        let feeder = prefs.feeder_config();
        assert_eq!(feeder.buffer_threshold, 8192);
        assert_eq!(feeder.idle_wait, Duration::from_millis(3));

        let transport = prefs.transport_config();
        assert_eq!(transport.pause_poll, Duration::from_millis(100));
        assert_eq!(transport.present_tolerance, Duration::from_millis(2));
    }

    #[test]
    fn test_last_opened_requires_existing_file() {
        let file = scratch_dir("last_opened").join("clip.mp4");
        fs::write(&file, b"").unwrap();
        let mut prefs = PlayerPreferences {
            last_opened_file: Some(file.to_string_lossy().to_string()),
            ..PlayerPreferences::default()
        };
        assert_eq!(prefs.last_opened(), Some(file));

        prefs.last_opened_file = Some("/definitely/not/here.mp4".to_string());
        assert_eq!(prefs.last_opened(), None);
    }
}
