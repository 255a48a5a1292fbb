//! TOML session files for shadebox.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WindowStyleSetting {
    Regular,
    Headless,
    Fullscreen,
    AlwaysOnTop,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct WindowSection {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub x: Option<i32>,
    pub y: Option<i32>,
    pub style: Option<WindowStyleSetting>,
    pub cursor: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct RecordSection {
    pub dir: Option<PathBuf>,
    pub prefix: Option<String>,
    pub workers: Option<usize>,
    /// Ceiling on frames waiting to be encoded, in MiB.
    pub max_queued_mib: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct RemoteSection {
    pub port: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SessionConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub window: WindowSection,
    pub fps: Option<f32>,
    pub full_fps: Option<bool>,
    pub vflip: Option<bool>,
    #[serde(default)]
    pub include: Vec<PathBuf>,
    /// `NAME` or `NAME=VALUE`.
    #[serde(default)]
    pub defines: Vec<String>,
    /// Uniform name to image path.
    #[serde(default)]
    pub textures: BTreeMap<String, PathBuf>,
    /// Protocol commands run before the first frame.
    #[serde(default)]
    pub commands: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_duration_opt")]
    pub watch_interval: Option<Duration>,
    pub pyramid_depth: Option<u32>,
    #[serde(default)]
    pub record: RecordSection,
    #[serde(default)]
    pub remote: RemoteSection,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            window: WindowSection::default(),
            fps: None,
            full_fps: None,
            vflip: None,
            include: Vec::new(),
            defines: Vec::new(),
            textures: BTreeMap::new(),
            commands: Vec::new(),
            watch_interval: None,
            pyramid_depth: None,
            record: RecordSection::default(),
            remote: RemoteSection::default(),
        }
    }
}

fn default_version() -> u32 {
    1
}

fn deserialize_duration_opt<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    struct Visitor;
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = Option<Duration>;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a duration as milliseconds or a human-readable string")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            humantime::parse_duration(v)
                .map(Some)
                .map_err(|err| E::custom(format!("invalid duration '{v}': {err}")))
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Some(Duration::from_millis(v)))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            u64::try_from(v)
                .map(|ms| Some(Duration::from_millis(ms)))
                .map_err(|_| E::custom("duration must be non-negative"))
        }

        fn visit_none<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }
    }

    deserializer.deserialize_any(Visitor)
}

/// Splits a `NAME` or `NAME=VALUE` define.
pub fn split_define(raw: &str) -> (String, Option<String>) {
    match raw.split_once('=') {
        Some((name, value)) => (name.trim().to_string(), Some(value.trim().to_string())),
        None => (raw.trim().to_string(), None),
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|ch| ch.is_ascii_alphabetic() || ch == '_')
        && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

impl SessionConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: SessionConfig = toml::from_str(input)?;
        raw.validate()?;
        Ok(raw)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != 1 {
            return Err(ConfigError::Invalid(format!(
                "unsupported config version {}; expected 1",
                self.version
            )));
        }
        if matches!(self.window.width, Some(0)) || matches!(self.window.height, Some(0)) {
            return Err(ConfigError::Invalid("window size must be non-zero".into()));
        }
        if let Some(fps) = self.fps {
            if !fps.is_finite() || fps < 0.0 {
                return Err(ConfigError::Invalid("fps must be >= 0".into()));
            }
        }
        if let Some(interval) = self.watch_interval {
            if interval.is_zero() {
                return Err(ConfigError::Invalid("watch_interval must be greater than zero".into()));
            }
        }
        if let Some(depth) = self.pyramid_depth {
            if depth > 12 {
                return Err(ConfigError::Invalid("pyramid_depth must be at most 12".into()));
            }
        }
        for define in &self.defines {
            let (name, _) = split_define(define);
            if !is_identifier(&name) {
                return Err(ConfigError::Invalid(format!("define '{define}' is not a valid name")));
            }
        }
        for (name, path) in &self.textures {
            if !is_identifier(name) {
                return Err(ConfigError::Invalid(format!("texture uniform '{name}' is not a valid name")));
            }
            if path.as_os_str().is_empty() {
                return Err(ConfigError::Invalid(format!("texture '{name}' has an empty path")));
            }
        }
        if matches!(self.remote.port, Some(0)) {
            return Err(ConfigError::Invalid("remote.port must be non-zero".into()));
        }
        Ok(())
    }

    /// Resolves relative paths against the directory holding the session file.
    pub fn rebase(&mut self, base: &Path) {
        let join = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };
        self.include.iter_mut().for_each(join);
        self.textures.values_mut().for_each(join);
        if let Some(dir) = self.record.dir.as_mut() {
            join(dir);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
version = 1
fps = 30
defines = ["PALETTE", "STEPS=8"]
commands = ["u_gain,0.5", "fullFps,on"]
watch_interval = "250ms"
pyramid_depth = 6

[window]
width = 800
height = 600
style = "always-on-top"

[textures]
u_noise = "noise.png"

[record]
dir = "frames"
workers = 4

[remote]
port = 8000
"#;

    #[test]
    fn parses_sample_session() {
        let config = SessionConfig::from_toml_str(SAMPLE).expect("parse session");
        assert_eq!(config.window.width, Some(800));
        assert_eq!(config.window.style, Some(WindowStyleSetting::AlwaysOnTop));
        assert_eq!(config.watch_interval, Some(Duration::from_millis(250)));
        assert_eq!(config.textures.get("u_noise"), Some(&PathBuf::from("noise.png")));
        assert_eq!(config.remote.port, Some(8000));
        assert_eq!(split_define(&config.defines[1]), ("STEPS".into(), Some("8".into())));
    }

    #[test]
    fn empty_file_is_valid() {
        let config = SessionConfig::from_toml_str("").unwrap();
        assert_eq!(config, SessionConfig::default());
    }

    #[test]
    fn rejects_bad_values() {
        for input in [
            "version = 2",
            "fps = -1",
            "watch_interval = 0",
            "pyramid_depth = 40",
            "defines = [\"9LIVES\"]",
            "[window]\nwidth = 0",
        ] {
            let err = SessionConfig::from_toml_str(input).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid(_)), "{input}");
        }
        assert!(matches!(
            SessionConfig::from_toml_str("fps = \"fast\"").unwrap_err(),
            ConfigError::Parse(_)
        ));
    }

    #[test]
    fn rebases_relative_paths() {
        let mut config = SessionConfig::from_toml_str(SAMPLE).unwrap();
        config.rebase(Path::new("/sessions/demo"));
        assert_eq!(
            config.textures.get("u_noise"),
            Some(&PathBuf::from("/sessions/demo/noise.png"))
        );
        assert_eq!(config.record.dir, Some(PathBuf::from("/sessions/demo/frames")));
    }
}
