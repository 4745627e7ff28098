use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use meloskia_core::{LiveEnvelope, MetronomeDivision, SchedulerConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LiveEnvelopeSetting {
    #[default]
    Shaped,
    Immediate,
}

impl From<LiveEnvelopeSetting> for LiveEnvelope {
    fn from(setting: LiveEnvelopeSetting) -> Self {
        match setting {
            LiveEnvelopeSetting::Shaped => LiveEnvelope::Shaped,
            LiveEnvelopeSetting::Immediate => LiveEnvelope::Immediate,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channels: 2,
        }
    }
}

/// User settings from `<config dir>/meloskia/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Searched for `<name>.json` when a song is not a path or built in.
    pub songs_dir: Option<PathBuf>,
    /// Where asset paths of built-in songs are resolved.
    pub asset_root: Option<PathBuf>,
    pub device: Option<String>,
    /// Seconds scheduled ahead of the audio clock.
    pub lookahead: f64,
    /// Default clicks per bar: 0, 1, 2 or 4.
    pub metronome: u8,
    pub live_envelope: LiveEnvelopeSetting,
    pub render: RenderConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            songs_dir: None,
            asset_root: None,
            device: None,
            lookahead: SchedulerConfig::default().lookahead,
            metronome: 0,
            live_envelope: LiveEnvelopeSetting::default(),
            render: RenderConfig::default(),
        }
    }
}

impl Config {
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("meloskia").join("config.toml"))
    }

    /// The user's config; defaults when missing or unreadable.
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }

        match Self::load_from(&path) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!(path = %path.display(), "ignoring config: {err:#}");
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn metronome(&self) -> anyhow::Result<MetronomeDivision> {
        Ok(MetronomeDivision::try_from(self.metronome)?)
    }

    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            lookahead: self.lookahead,
            live_envelope: self.live_envelope.into(),
            ..SchedulerConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            metronome = 4
            live_envelope = "immediate"

            [render]
            sample_rate = 48000
            "#,
        )
        .unwrap();

        assert_eq!(config.metronome().unwrap(), MetronomeDivision::Quarter);
        assert_eq!(config.render.sample_rate, 48000);
        assert_eq!(config.render.channels, 2);
        assert_eq!(config.lookahead, 0.15);
        assert_eq!(config.scheduler().live_envelope, LiveEnvelope::Immediate);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = Config {
            device: Some("Speakers".into()),
            songs_dir: Some(PathBuf::from("/songs")),
            ..Config::default()
        };
        config.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_invalid_metronome_is_an_error() {
        let config = Config {
            metronome: 3,
            ..Config::default()
        };
        assert!(config.metronome().is_err());
    }
}
