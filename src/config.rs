use chrono::Duration;
use serde::{Deserialize, Deserializer};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::predict::{GroundStation, PassSearch};
use crate::report::DisplayZone;
use crate::scheduler::notifications::{Subscriber, DEFAULT_SHIFT_TOLERANCE};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub station: StationConfig,
    pub satellite: SatelliteConfig,
    #[serde(default)]
    pub predict: PredictConfig,
    #[serde(default)]
    pub subscribers: Vec<SubscriberConfig>,
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub api_keys: Vec<ApiKey>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StationConfig {
    pub name: Option<String>,
    pub coordinates: String,
    #[serde(default)]
    pub altitude_m: f64,
    #[serde(default = "default_min_elevation")]
    pub min_elevation_deg: f64,
}

fn default_min_elevation() -> f64 {
    15.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct SatelliteConfig {
    /// Catalog number, exact name or name fragment to pick from `tle_file`.
    /// When absent the file must hold a single element set.
    pub name: Option<String>,
    pub tle_file: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PredictConfig {
    #[serde(default = "default_step", deserialize_with = "deserialize_duration")]
    pub step: Duration,
    #[serde(default = "default_lookahead", deserialize_with = "deserialize_duration")]
    pub lookahead: Duration,
    #[serde(
        default = "default_shift_tolerance",
        deserialize_with = "deserialize_duration"
    )]
    pub shift_tolerance: Duration,
    #[serde(
        default = "default_tick_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub tick_interval: Duration,
    #[serde(default)]
    pub display_utc_offset_hours: i32,
}

impl Default for PredictConfig {
    fn default() -> Self {
        Self {
            step: default_step(),
            lookahead: default_lookahead(),
            shift_tolerance: default_shift_tolerance(),
            tick_interval: default_tick_interval(),
            display_utc_offset_hours: 0,
        }
    }
}

fn default_step() -> Duration {
    PassSearch::default().step
}

fn default_lookahead() -> Duration {
    Duration::days(3)
}

fn default_shift_tolerance() -> Duration {
    DEFAULT_SHIFT_TOLERANCE
}

fn default_tick_interval() -> Duration {
    Duration::minutes(5)
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriberConfig {
    pub id: String,
    #[serde(
        default = "default_lead_time",
        deserialize_with = "deserialize_duration"
    )]
    pub lead_time: Duration,
}

fn default_lead_time() -> Duration {
    Duration::minutes(15)
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiKey {
    pub key: String,
    pub name: String,
    pub permissions: HashSet<Permission>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    ViewPasses,
    SubmitElements,
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_duration(&s).map_err(serde::de::Error::custom)
}

fn parse_duration(s: &str) -> Result<Duration, String> {
    humantime::parse_duration(s.trim())
        .map_err(|e| e.to_string())
        .and_then(|d| Duration::from_std(d).map_err(|e| e.to_string()))
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_yaml(&content)?;

        // Relative element files are resolved against the config location.
        if config.satellite.tle_file.is_relative() {
            if let Some(dir) = path.parent() {
                config.satellite.tle_file = dir.join(&config.satellite.tle_file);
            }
        }
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.station()?;

        let predict = &self.predict;
        if predict.step <= Duration::zero() {
            return Err(ConfigError::Invalid("predict.step must be positive".into()));
        }
        if predict.tick_interval <= Duration::zero() {
            return Err(ConfigError::Invalid(
                "predict.tick_interval must be positive".into(),
            ));
        }
        if predict.lookahead <= Duration::zero() {
            return Err(ConfigError::Invalid(
                "predict.lookahead must be positive".into(),
            ));
        }
        if !(-14..=14).contains(&predict.display_utc_offset_hours) {
            return Err(ConfigError::Invalid(format!(
                "display_utc_offset_hours {} is outside -14..=14",
                predict.display_utc_offset_hours
            )));
        }

        let mut seen = HashSet::new();
        for subscriber in &self.subscribers {
            if !seen.insert(subscriber.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate subscriber id {:?}",
                    subscriber.id
                )));
            }
        }
        Ok(())
    }

    pub fn station(&self) -> Result<GroundStation, ConfigError> {
        let station = &self.station;
        if !(-90.0..=90.0).contains(&station.min_elevation_deg) {
            return Err(ConfigError::Invalid(format!(
                "min_elevation_deg {} is outside -90..=90",
                station.min_elevation_deg
            )));
        }
        GroundStation::from_coordinates(
            &station.coordinates,
            Some(station.altitude_m),
            station.min_elevation_deg,
        )
        .map(|s| s.with_name(station.name.clone()))
        .ok_or_else(|| {
            ConfigError::Invalid(format!(
                "station coordinates {:?} are not \"lat,lon\" in degrees",
                station.coordinates
            ))
        })
    }

    pub fn pass_search(&self) -> PassSearch {
        PassSearch::with_step(self.predict.step)
    }

    pub fn subscribers(&self) -> Vec<Subscriber> {
        self.subscribers
            .iter()
            .map(|s| Subscriber::new(s.id.clone(), s.lead_time))
            .collect()
    }

    pub fn display_zone(&self) -> DisplayZone {
        DisplayZone::from_hours(self.predict.display_utc_offset_hours)
    }

    pub fn find_api_key(&self, key: &str) -> Option<&ApiKey> {
        self.api_keys.iter().find(|k| k.key == key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
station:
  name: Moscow
  coordinates: "55.7558,37.6173"
  altitude_m: 144
  min_elevation_deg: 10
satellite:
  name: "CUBESX-HSE 3"
  tle_file: data/satnogs.txt
predict:
  step: 20s
  lookahead: 2days
  shift_tolerance: 90s
  tick_interval: 1m
  display_utc_offset_hours: 3
subscribers:
  - id: chat-1
    lead_time: 10m
  - id: chat-2
web:
  bind: "127.0.0.1:9000"
api_keys:
  - key: secret
    name: bot
    permissions: [view_passes, submit_elements]
"#;

    const MINIMAL: &str = r#"
station:
  coordinates: "55.75,37.62"
satellite:
  tle_file: iss.txt
"#;

    #[test]
    fn parses_full_config() {
        let config = Config::from_yaml(FULL).unwrap();
        let station = config.station().unwrap();
        assert_eq!(station.name.as_deref(), Some("Moscow"));
        assert_eq!(station.latitude_deg, 55.7558);
        assert_eq!(station.altitude_m, 144.0);
        assert_eq!(station.min_elevation_deg, 10.0);

        assert_eq!(config.predict.step, Duration::seconds(20));
        assert_eq!(config.predict.lookahead, Duration::days(2));
        assert_eq!(config.predict.shift_tolerance, Duration::seconds(90));
        assert_eq!(config.pass_search().step, Duration::seconds(20));

        let subscribers = config.subscribers();
        assert_eq!(subscribers[0].lead_time, Duration::minutes(10));
        assert_eq!(subscribers[1].lead_time, Duration::minutes(15));

        assert_eq!(config.web.bind, "127.0.0.1:9000");
        let key = config.find_api_key("secret").unwrap();
        assert!(key.permissions.contains(&Permission::SubmitElements));
        assert!(config.find_api_key("nope").is_none());
    }

    #[test]
    fn defaults_follow_the_bot() {
        let config = Config::from_yaml(MINIMAL).unwrap();
        assert_eq!(config.station.min_elevation_deg, 15.0);
        assert_eq!(config.predict.lookahead, Duration::days(3));
        assert_eq!(config.predict.step, Duration::seconds(30));
        assert_eq!(config.predict.shift_tolerance, Duration::seconds(60));
        assert_eq!(config.predict.tick_interval, Duration::minutes(5));
        assert_eq!(config.web.bind, "0.0.0.0:8080");
        assert!(config.subscribers.is_empty());
        assert!(config.satellite.name.is_none());
    }

    #[test]
    fn rejects_bad_coordinates() {
        let yaml = MINIMAL.replace("55.75,37.62", "north,east");
        assert!(matches!(
            Config::from_yaml(&yaml),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn rejects_bad_duration() {
        let yaml = format!("{MINIMAL}predict:\n  step: fortnight\n");
        assert!(matches!(Config::from_yaml(&yaml), Err(ConfigError::Yaml(_))));
    }

    #[test]
    fn rejects_duplicate_subscribers() {
        let yaml = format!("{MINIMAL}subscribers:\n  - id: a\n  - id: a\n");
        assert!(matches!(
            Config::from_yaml(&yaml),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn rejects_zero_tick() {
        let yaml = format!("{MINIMAL}predict:\n  tick_interval: 0s\n");
        assert!(matches!(
            Config::from_yaml(&yaml),
            Err(ConfigError::Invalid(_))
        ));
    }
}
