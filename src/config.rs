// Camera configuration: a single YAML document loaded once at startup.
// Shape grounded on `examples/original_source/pruletynvr/nvr.py`'s `conf.yaml`
// (§6 of the specification).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("reading config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("config has no cameras; refusing to start with nothing to record")]
    NoCameras,
}

/// One configured RTSP stream, either a bare URL or a mapping with extra
/// `ffmpeg` arguments.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StreamConfig {
    Bare(String),
    Full {
        url: String,
        #[serde(default)]
        ffmpeg_extra_args: Vec<String>,
    },
}

impl StreamConfig {
    pub fn url(&self) -> &str {
        match self {
            StreamConfig::Bare(url) => url,
            StreamConfig::Full { url, .. } => url,
        }
    }

    pub fn extra_args(&self) -> &[String] {
        match self {
            StreamConfig::Bare(_) => &[],
            StreamConfig::Full {
                ffmpeg_extra_args, ..
            } => ffmpeg_extra_args,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    pub topic: String,
    pub streams: BTreeMap<String, StreamConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,
}

fn default_mqtt_host() -> String {
    "localhost".to_owned()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_keepalive_secs() -> u64 {
    60
}

impl Default for MqttConfig {
    fn default() -> Self {
        MqttConfig {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            username: None,
            password: None,
            keepalive_secs: default_keepalive_secs(),
        }
    }
}

fn default_pre_roll() -> u64 {
    15
}

fn default_post_roll() -> u64 {
    15
}

fn default_segment_duration() -> u64 {
    3
}

fn default_ram_base() -> PathBuf {
    PathBuf::from("/dev/shm/nvr_buffer")
}

fn default_output_base() -> PathBuf {
    PathBuf::from("./nvr")
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub cameras: BTreeMap<String, CameraConfig>,

    #[serde(default)]
    pub mqtt: MqttConfig,

    #[serde(default = "default_pre_roll")]
    pub pre_roll_seconds: u64,

    #[serde(default = "default_post_roll")]
    pub post_roll_seconds: u64,

    #[serde(default = "default_segment_duration")]
    pub segment_duration_seconds: u64,

    #[serde(default = "default_ram_base")]
    pub ram_base: PathBuf,

    #[serde(default = "default_output_base")]
    pub output_base: PathBuf,
}

impl Config {
    pub fn load(path: &Path) -> Result<Config, Error> {
        let text = std::fs::read_to_string(path).map_err(|source| Error::Read {
            path: path.to_owned(),
            source,
        })?;
        let config: Config = serde_yaml::from_str(&text).map_err(|source| Error::Parse {
            path: path.to_owned(),
            source,
        })?;
        if config.cameras.is_empty() {
            return Err(Error::NoCameras);
        }
        Ok(config)
    }

    /// Overrides both the RAM and output base directories, used by
    /// integration tests that can't write to `/dev/shm`.
    pub fn with_base_dir(mut self, base_dir: &Path) -> Config {
        self.ram_base = base_dir.join("ram");
        self.output_base = base_dir.join("out");
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_and_full_stream_configs() {
        let yaml = r#"
cameras:
  front_door:
    topic: "birds/front_door"
    streams:
      indoor: "rtsp://cam1/indoor"
      outdoor:
        url: "rtsp://cam1/outdoor"
        ffmpeg_extra_args: ["-an"]
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let cam = config.cameras.get("front_door").unwrap();
        assert_eq!(cam.topic, "birds/front_door");
        assert_eq!(cam.streams["indoor"].url(), "rtsp://cam1/indoor");
        assert!(cam.streams["indoor"].extra_args().is_empty());
        assert_eq!(cam.streams["outdoor"].url(), "rtsp://cam1/outdoor");
        assert_eq!(cam.streams["outdoor"].extra_args(), ["-an"]);
        assert_eq!(config.pre_roll_seconds, 15);
        assert_eq!(config.post_roll_seconds, 15);
        assert_eq!(config.segment_duration_seconds, 3);
    }

    #[test]
    fn empty_cameras_is_fatal() {
        let yaml = "cameras: {}\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.cameras.is_empty());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf.yaml");
        std::fs::write(&path, yaml).unwrap();
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, Error::NoCameras));
    }

    #[test]
    fn missing_cameras_key_fails_to_parse() {
        let yaml = "mqtt:\n  host: localhost\n";
        let err = serde_yaml::from_str::<Config>(yaml).unwrap_err();
        assert!(err.to_string().contains("cameras"));
    }
}
