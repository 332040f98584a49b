//! Configuration module - environment variable parsing

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::grenade::{PredictorSettings, DEFAULT_LINGER_TICKS, DEFAULT_MAX_TRACKED, DEFAULT_TRACKING_RANGE};
use crate::trace::DEFAULT_SMOKE_OPAQUE_DEPTH;
use crate::util::time::{DEFAULT_HOST_FPS, DEFAULT_TICKRATE};

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Simulation ticks per second
    pub tickrate: u32,
    /// Rendered frames per second of the demo host
    pub host_fps: u32,

    /// Cap on simultaneously tracked grenades
    pub max_tracked_grenades: usize,
    /// Grenades farther than this from the local player are not tracked
    pub grenade_tracking_range: f32,
    /// Ticks a detonated grenade stays readable
    pub detonation_linger_ticks: u64,
    /// Chord length through smoke that counts as fully opaque
    pub smoke_opaque_depth: f32,

    /// JSON scene to load; a seeded arena is generated when unset
    pub scene_path: Option<PathBuf>,
    /// Seed for the generated arena and the demo throws
    pub demo_seed: u64,
    /// Stop after this many frames; run until Ctrl+C when unset
    pub demo_frames: Option<u64>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration from any variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let tickrate = parse_or(&lookup, "TICKRATE", DEFAULT_TICKRATE)?;
        if tickrate == 0 {
            return Err(ConfigError::Invalid {
                name: "TICKRATE",
                value: "0".to_string(),
            });
        }

        Ok(Self {
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),

            tickrate,
            host_fps: parse_or(&lookup, "HOST_FPS", DEFAULT_HOST_FPS)?.max(1),

            max_tracked_grenades: parse_or(&lookup, "MAX_TRACKED_GRENADES", DEFAULT_MAX_TRACKED)?,
            grenade_tracking_range: parse_or(&lookup, "GRENADE_TRACKING_RANGE", DEFAULT_TRACKING_RANGE)?,
            detonation_linger_ticks: parse_or(&lookup, "DETONATION_LINGER_TICKS", DEFAULT_LINGER_TICKS)?,
            smoke_opaque_depth: parse_or(&lookup, "SMOKE_OPAQUE_DEPTH", DEFAULT_SMOKE_OPAQUE_DEPTH)?,

            scene_path: lookup("SCENE_PATH").filter(|v| !v.is_empty()).map(PathBuf::from),
            demo_seed: parse_or(&lookup, "DEMO_SEED", 0)?,
            demo_frames: parse_optional(&lookup, "DEMO_FRAMES")?,
        })
    }

    pub fn predictor_settings(&self) -> PredictorSettings {
        PredictorSettings {
            max_tracked: self.max_tracked_grenades,
            tracking_range: self.grenade_tracking_range,
            linger_ticks: self.detonation_linger_ticks,
        }
    }
}

fn parse_optional<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(name) {
        Some(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { name, value }),
        _ => Ok(None),
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    Ok(parse_optional(lookup, name)?.unwrap_or(default))
}

/// Configuration errors
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.tickrate, DEFAULT_TICKRATE);
        assert_eq!(config.max_tracked_grenades, DEFAULT_MAX_TRACKED);
        assert!(config.scene_path.is_none());
        assert!(config.demo_frames.is_none());
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn values_are_parsed() {
        let config = Config::from_lookup(lookup(&[
            ("TICKRATE", "128"),
            ("DEMO_FRAMES", "300"),
            ("SCENE_PATH", "scenes/arena.json"),
        ]))
        .unwrap();
        assert_eq!(config.tickrate, 128);
        assert_eq!(config.demo_frames, Some(300));
        assert_eq!(config.scene_path, Some(PathBuf::from("scenes/arena.json")));
    }

    #[test]
    fn garbage_is_rejected() {
        let err = Config::from_lookup(lookup(&[("HOST_FPS", "fast")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                name: "HOST_FPS",
                value: "fast".to_string()
            }
        );
        assert!(Config::from_lookup(lookup(&[("TICKRATE", "0")])).is_err());
    }
}
