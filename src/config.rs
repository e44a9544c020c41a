use std::{fs, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    alarm::{DEFAULT_SNOOZE_MINUTES, MAX_SNOOZE_MINUTES},
    error::StoreError,
};

const APP_NAME: &str = "iskr_clock";

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct FadeSettings {
    pub duration_secs: u64,
    pub steps: u32,
}

impl Default for FadeSettings {
    fn default() -> Self {
        Self {
            duration_secs: 30,
            steps: 60,
        }
    }
}

impl FadeSettings {
    #[must_use]
    pub fn step_interval(&self) -> Duration {
        Duration::from_secs(self.duration_secs) / self.steps.max(1)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    pub interval_secs: u64,
    /// identical position samples in a row that count as a stall
    pub stall_samples: u32,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            interval_secs: 3,
            stall_samples: 3,
        }
    }
}

impl MonitorSettings {
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// The synthesized fallback tone: a beep of `beep_ms` followed by `gap_ms` of
/// silence, repeated forever.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct ToneSettings {
    pub frequency_hz: f32,
    pub beep_ms: u64,
    pub gap_ms: u64,
    pub amplitude: f32,
}

impl Default for ToneSettings {
    fn default() -> Self {
        Self {
            frequency_hz: 440.0,
            beep_ms: 300,
            gap_ms: 200,
            amplitude: 0.5,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Config {
    #[serde(default = "default_time_format")]
    pub time_format: String,
    /// playback gain once any fade-in is done, 0.0 to 1.0
    #[serde(default = "default_volume")]
    pub volume: f32,
    #[serde(default = "default_tick_millis")]
    pub tick_millis: u64,
    #[serde(default = "default_snooze_minutes")]
    pub default_snooze_minutes: u32,
    #[serde(default)]
    pub fade: FadeSettings,
    #[serde(default)]
    pub monitor: MonitorSettings,
    #[serde(default)]
    pub tone: ToneSettings,
}

fn default_time_format() -> String {
    "%H:%M".to_string()
}

const fn default_volume() -> f32 {
    1.0
}

const fn default_tick_millis() -> u64 {
    100
}

const fn default_snooze_minutes() -> u32 {
    DEFAULT_SNOOZE_MINUTES
}

impl Default for Config {
    fn default() -> Self {
        Self {
            time_format: default_time_format(),
            volume: default_volume(),
            tick_millis: default_tick_millis(),
            default_snooze_minutes: default_snooze_minutes(),
            fade: FadeSettings::default(),
            monitor: MonitorSettings::default(),
            tone: ToneSettings::default(),
        }
    }
}

impl Config {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the config at `path`. A missing or broken file gives the defaults.
    #[must_use]
    pub fn load(path: PathBuf) -> Self {
        let config = match fs::read_to_string(&path) {
            Ok(config) => config,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    log::warn!("couldn't read config file {}: {e}", path.display());
                }
                return Self::default();
            }
        };
        match toml::from_str::<Self>(&config) {
            Ok(config) => config.sanitized(),
            Err(e) => {
                log::warn!("couldn't parse config file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    pub fn save(&self, path: PathBuf) -> Result<(), StoreError> {
        let config = toml::to_string(self).map_err(|source| StoreError::Encode {
            key: "config".to_string(),
            source,
        })?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(&path, config).map_err(|source| StoreError::Io { path, source })
    }

    /// clamps every value into the range the engines can work with
    #[must_use]
    pub fn sanitized(mut self) -> Self {
        self.volume = if self.volume.is_finite() {
            self.volume.clamp(0.0, 1.0)
        } else {
            default_volume()
        };
        self.tick_millis = self.tick_millis.clamp(10, 1000);
        self.default_snooze_minutes = self.default_snooze_minutes.clamp(1, MAX_SNOOZE_MINUTES);
        self.fade.duration_secs = self.fade.duration_secs.max(1);
        self.fade.steps = self.fade.steps.clamp(60, 100);
        self.monitor.interval_secs = self.monitor.interval_secs.max(1);
        self.monitor.stall_samples = self.monitor.stall_samples.max(1);
        if !self.tone.frequency_hz.is_finite() || self.tone.frequency_hz <= 0.0 {
            self.tone.frequency_hz = ToneSettings::default().frequency_hz;
        }
        self.tone.beep_ms = self.tone.beep_ms.max(50);
        self.tone.amplitude = if self.tone.amplitude.is_finite() {
            self.tone.amplitude.clamp(0.05, 1.0)
        } else {
            ToneSettings::default().amplitude
        };
        self
    }

    #[must_use]
    pub const fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_millis)
    }

    fn project_dirs() -> Option<directories::ProjectDirs> {
        directories::ProjectDirs::from("", "", APP_NAME)
    }

    /// `None` when the platform has no home directory to put it in
    #[must_use]
    pub fn config_path() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// where the alarm and custom stations are stored
    #[must_use]
    pub fn data_dir() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.data_dir().to_path_buf())
    }

    #[must_use]
    pub fn is_config_present() -> bool {
        Self::config_path().is_some_and(|path| path.exists())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_fills_in_defaults() {
        let config: Config = toml::from_str(
            r#"
            time_format = "%l:%M %p"
            [fade]
            duration_secs = 20
            steps = 80
            "#,
        )
        .unwrap();

        assert_eq!(config.time_format, "%l:%M %p");
        assert_eq!(config.fade.steps, 80);
        assert_eq!(config.monitor, MonitorSettings::default());
        assert!((config.volume - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn sanitizing_clamps_out_of_range_values() {
        let config = Config {
            volume: 3.0,
            tick_millis: 0,
            default_snooze_minutes: 0,
            fade: FadeSettings {
                duration_secs: 0,
                steps: 5,
            },
            monitor: MonitorSettings {
                interval_secs: 0,
                stall_samples: 0,
            },
            tone: ToneSettings {
                frequency_hz: f32::NAN,
                ..ToneSettings::default()
            },
            ..Config::default()
        }
        .sanitized();

        assert!((config.volume - 1.0).abs() < f32::EPSILON);
        assert_eq!(config.tick_millis, 10);
        assert_eq!(config.default_snooze_minutes, 1);
        assert_eq!(config.fade.steps, 60);
        assert_eq!(config.fade.duration_secs, 1);
        assert_eq!(config.monitor.interval(), Duration::from_secs(1));
        assert!((config.tone.frequency_hz - 440.0).abs() < f32::EPSILON);
    }

    #[test]
    fn fade_step_interval_splits_the_window() {
        let fade = FadeSettings::default();
        assert_eq!(fade.step_interval(), Duration::from_millis(500));
    }

    #[test]
    fn broken_file_loads_defaults() {
        let path = std::env::temp_dir().join(format!("iskr_clock-config-{}.toml", uuid::Uuid::new_v4()));
        fs::write(&path, "volume = \"loud\"").unwrap();
        assert_eq!(Config::load(path.clone()), Config::default());

        let saved = Config {
            time_format: "%I:%M".to_string(),
            ..Config::default()
        };
        saved.save(path.clone()).unwrap();
        assert_eq!(Config::load(path.clone()), saved);
        fs::remove_file(path).unwrap();
    }
}
