//! Runtime configuration.
//!
//! Layering: built-in defaults, then the TOML file (path argument or
//! `PARKWATCH_CONFIG`), then `PARKWATCH_*` environment overrides, then validation.
//! Every file section is optional.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::control::{parse_ids, MonitorCommand};
use crate::evaluate::OutOfBoundsPolicy;
use crate::ingest::{infer_mode, SourceMode};
use crate::preprocess::PreprocessConfig;
use crate::spots::SpotSize;
use crate::{SpotId, OCCUPANCY_THRESHOLD, SPOT_HEIGHT, SPOT_WIDTH};

const DEFAULT_SOURCE_URL: &str = "stub://parking_lot";
const DEFAULT_TARGET_FPS: u32 = 30;
const DEFAULT_FRAME_WIDTH: u32 = 1100;
const DEFAULT_FRAME_HEIGHT: u32 = 720;
const DEFAULT_SPOT_STORE: &str = "spots.json";
const DEFAULT_SNAPSHOT_EVERY: u64 = 100;
const DEFAULT_MQTT_PREFIX: &str = "parkwatch";
const DEFAULT_MQTT_CLIENT_ID: &str = "parkwatch";

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct MonitorConfigFile {
    source: Option<SourceConfigFile>,
    spots: Option<SpotsConfigFile>,
    detection: Option<DetectionConfigFile>,
    preprocess: Option<PreprocessConfig>,
    monitor: Option<MonitorSectionFile>,
    output: Option<OutputConfigFile>,
    mqtt: Option<MqttConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    url: Option<String>,
    mode: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct SpotsConfigFile {
    store: Option<PathBuf>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    occupancy_threshold: Option<usize>,
    out_of_bounds: Option<OutOfBoundsPolicy>,
}

#[derive(Debug, Deserialize, Default)]
struct MonitorSectionFile {
    spots: Option<Vec<u32>>,
    all: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct OutputConfigFile {
    status_path: Option<PathBuf>,
    events_path: Option<PathBuf>,
    snapshot_dir: Option<PathBuf>,
    snapshot_every: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct MqttConfigFile {
    broker: Option<String>,
    topic_prefix: Option<String>,
    client_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub source: SourceSettings,
    pub spots: SpotSettings,
    pub detection: DetectionSettings,
    pub preprocess: PreprocessConfig,
    pub monitor: MonitorSelection,
    pub output: OutputSettings,
    pub mqtt: Option<MqttSettings>,
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub url: String,
    /// `None` infers the mode from the URL scheme.
    pub mode: Option<SourceMode>,
    pub target_fps: u32,
    /// Frame size for `stub://` scenes.
    pub width: u32,
    pub height: u32,
}

impl SourceSettings {
    pub fn resolved_mode(&self) -> SourceMode {
        self.mode.unwrap_or_else(|| infer_mode(&self.url))
    }
}

#[derive(Debug, Clone)]
pub struct SpotSettings {
    pub store: PathBuf,
    pub size: SpotSize,
}

#[derive(Debug, Clone)]
pub struct DetectionSettings {
    pub occupancy_threshold: usize,
    pub out_of_bounds: OutOfBoundsPolicy,
}

/// Spots monitored at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorSelection {
    None,
    All,
    Spots(Vec<SpotId>),
}

impl MonitorSelection {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(MonitorSelection::All),
            "" | "none" => Ok(MonitorSelection::None),
            _ => Ok(MonitorSelection::Spots(parse_ids(raw)?)),
        }
    }

    pub fn to_command(&self) -> Option<MonitorCommand> {
        match self {
            MonitorSelection::None => None,
            MonitorSelection::All => Some(MonitorCommand::WatchAll),
            MonitorSelection::Spots(ids) => Some(MonitorCommand::Watch(ids.clone())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OutputSettings {
    pub status_path: Option<PathBuf>,
    pub events_path: Option<PathBuf>,
    pub snapshot_dir: Option<PathBuf>,
    pub snapshot_every: u64,
}

#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub broker: String,
    pub topic_prefix: String,
    pub client_id: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            source: SourceSettings {
                url: DEFAULT_SOURCE_URL.to_string(),
                mode: None,
                target_fps: DEFAULT_TARGET_FPS,
                width: DEFAULT_FRAME_WIDTH,
                height: DEFAULT_FRAME_HEIGHT,
            },
            spots: SpotSettings {
                store: PathBuf::from(DEFAULT_SPOT_STORE),
                size: SpotSize {
                    width: SPOT_WIDTH,
                    height: SPOT_HEIGHT,
                },
            },
            detection: DetectionSettings {
                occupancy_threshold: OCCUPANCY_THRESHOLD,
                out_of_bounds: OutOfBoundsPolicy::Abort,
            },
            preprocess: PreprocessConfig::default(),
            monitor: MonitorSelection::None,
            output: OutputSettings {
                status_path: None,
                events_path: None,
                snapshot_dir: None,
                snapshot_every: DEFAULT_SNAPSHOT_EVERY,
            },
            mqtt: None,
        }
    }
}

impl MonitorConfig {
    /// Load from `path`, else `PARKWATCH_CONFIG`, else defaults; then env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var("PARKWATCH_CONFIG").ok().map(PathBuf::from);
        let file_cfg = match path.map(Path::to_path_buf).or(env_path) {
            Some(path) => Some(read_config_file(&path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse TOML text without consulting the environment.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let file: MonitorConfigFile =
            toml::from_str(raw).map_err(|e| anyhow!("invalid config: {}", e))?;
        let cfg = Self::from_file(file)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: MonitorConfigFile) -> Result<Self> {
        let mut cfg = Self::default();

        if let Some(source) = file.source {
            if let Some(url) = source.url {
                cfg.source.url = url;
            }
            if let Some(mode) = source.mode {
                cfg.source.mode = parse_mode(&mode)?;
            }
            cfg.source.target_fps = source.target_fps.unwrap_or(cfg.source.target_fps);
            cfg.source.width = source.width.unwrap_or(cfg.source.width);
            cfg.source.height = source.height.unwrap_or(cfg.source.height);
        }
        if let Some(spots) = file.spots {
            cfg.spots.store = spots.store.unwrap_or(cfg.spots.store);
            cfg.spots.size.width = spots.width.unwrap_or(cfg.spots.size.width);
            cfg.spots.size.height = spots.height.unwrap_or(cfg.spots.size.height);
        }
        if let Some(detection) = file.detection {
            cfg.detection.occupancy_threshold = detection
                .occupancy_threshold
                .unwrap_or(cfg.detection.occupancy_threshold);
            cfg.detection.out_of_bounds = detection
                .out_of_bounds
                .unwrap_or(cfg.detection.out_of_bounds);
        }
        if let Some(preprocess) = file.preprocess {
            cfg.preprocess = preprocess;
        }
        if let Some(monitor) = file.monitor {
            cfg.monitor = match (monitor.all.unwrap_or(false), monitor.spots) {
                (true, Some(_)) => {
                    return Err(anyhow!("monitor.all and monitor.spots are mutually exclusive"))
                }
                (true, None) => MonitorSelection::All,
                (false, Some(ids)) => {
                    MonitorSelection::Spots(ids.into_iter().map(SpotId).collect())
                }
                (false, None) => MonitorSelection::None,
            };
        }
        if let Some(output) = file.output {
            cfg.output.status_path = output.status_path;
            cfg.output.events_path = output.events_path;
            cfg.output.snapshot_dir = output.snapshot_dir;
            cfg.output.snapshot_every = output.snapshot_every.unwrap_or(cfg.output.snapshot_every);
        }
        if let Some(mqtt) = file.mqtt {
            let broker = mqtt
                .broker
                .ok_or_else(|| anyhow!("mqtt.broker is required when [mqtt] is present"))?;
            cfg.mqtt = Some(MqttSettings {
                broker,
                topic_prefix: mqtt
                    .topic_prefix
                    .unwrap_or_else(|| DEFAULT_MQTT_PREFIX.to_string()),
                client_id: mqtt
                    .client_id
                    .unwrap_or_else(|| DEFAULT_MQTT_CLIENT_ID.to_string()),
            });
        }
        Ok(cfg)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("PARKWATCH_SOURCE_URL") {
            if !url.trim().is_empty() {
                self.source.url = url;
            }
        }
        if let Ok(fps) = std::env::var("PARKWATCH_TARGET_FPS") {
            self.source.target_fps = fps
                .trim()
                .parse()
                .map_err(|_| anyhow!("PARKWATCH_TARGET_FPS must be an integer"))?;
        }
        if let Ok(store) = std::env::var("PARKWATCH_SPOT_STORE") {
            if !store.trim().is_empty() {
                self.spots.store = PathBuf::from(store);
            }
        }
        if let Ok(threshold) = std::env::var("PARKWATCH_THRESHOLD") {
            self.detection.occupancy_threshold = threshold
                .trim()
                .parse()
                .map_err(|_| anyhow!("PARKWATCH_THRESHOLD must be an integer pixel count"))?;
        }
        if let Ok(monitor) = std::env::var("PARKWATCH_MONITOR") {
            let parsed = split_csv(&monitor);
            if !parsed.is_empty() {
                self.monitor = MonitorSelection::parse(&parsed.join(","))?;
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.source.url.trim().is_empty() {
            return Err(anyhow!("source.url must not be empty"));
        }
        if self.source.target_fps == 0 {
            return Err(anyhow!("source.target_fps must be >= 1"));
        }
        if self.source.width == 0 || self.source.height == 0 {
            return Err(anyhow!("source.width and source.height must be non-zero"));
        }
        if self.spots.size.width == 0 || self.spots.size.height == 0 {
            return Err(anyhow!("spot width and height must be non-zero"));
        }
        if self.detection.occupancy_threshold == 0 {
            return Err(anyhow!("detection.occupancy_threshold must be >= 1"));
        }
        self.preprocess.validate()?;
        if let MonitorSelection::Spots(ids) = &self.monitor {
            if ids.iter().any(|id| id.get() == 0) {
                return Err(anyhow!("monitored spot ids start at 1"));
            }
        }
        if self.output.snapshot_every == 0 {
            return Err(anyhow!("output.snapshot_every must be >= 1"));
        }
        Ok(())
    }
}

fn parse_mode(raw: &str) -> Result<Option<SourceMode>> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "auto" => Ok(None),
        "looping" | "loop" | "demo" => Ok(Some(SourceMode::Looping)),
        "live" => Ok(Some(SourceMode::Live)),
        other => Err(anyhow!("unknown source.mode: {} (auto|looping|live)", other)),
    }
}

fn read_config_file(path: &Path) -> Result<MonitorConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() -> Result<()> {
        let cfg = MonitorConfig::from_toml_str("")?;
        assert_eq!(cfg.source.url, DEFAULT_SOURCE_URL);
        assert_eq!(cfg.source.resolved_mode(), SourceMode::Looping);
        assert_eq!(cfg.spots.size, SpotSize::default());
        assert_eq!(cfg.detection.occupancy_threshold, 900);
        assert_eq!(cfg.detection.out_of_bounds, OutOfBoundsPolicy::Abort);
        assert_eq!(cfg.monitor, MonitorSelection::None);
        assert!(cfg.mqtt.is_none());
        Ok(())
    }

    #[test]
    fn mode_follows_scheme_unless_forced() -> Result<()> {
        let cfg = MonitorConfig::from_toml_str("[source]\nurl = \"rtsp://cam/1\"\n")?;
        assert_eq!(cfg.source.resolved_mode(), SourceMode::Live);
        let cfg = MonitorConfig::from_toml_str(
            "[source]\nurl = \"stub://cam\"\nmode = \"live\"\n",
        )?;
        assert_eq!(cfg.source.resolved_mode(), SourceMode::Live);
        assert!(MonitorConfig::from_toml_str("[source]\nmode = \"sometimes\"\n").is_err());
        Ok(())
    }

    #[test]
    fn monitor_selection_forms() -> Result<()> {
        assert_eq!(MonitorSelection::parse("all")?, MonitorSelection::All);
        assert_eq!(MonitorSelection::parse("none")?, MonitorSelection::None);
        assert_eq!(
            MonitorSelection::parse("1,3")?,
            MonitorSelection::Spots(vec![SpotId(1), SpotId(3)])
        );
        assert!(MonitorSelection::parse("0").is_err());
        assert!(MonitorConfig::from_toml_str("[monitor]\nall = true\nspots = [1]\n").is_err());
        Ok(())
    }

    #[test]
    fn validation_rejects_bad_values() {
        for raw in [
            "[source]\ntarget_fps = 0\n",
            "[detection]\noccupancy_threshold = 0\n",
            "[spots]\nwidth = 0\n",
            "[preprocess]\nblock_size = 24\n",
            "[preprocess]\nmedian_size = 4\n",
            "[monitor]\nspots = [0]\n",
            "[output]\nsnapshot_every = 0\n",
            "[mqtt]\ntopic_prefix = \"lot\"\n",
            "[unknown]\nkey = 1\n",
        ] {
            assert!(MonitorConfig::from_toml_str(raw).is_err(), "accepted: {raw}");
        }
    }
}
