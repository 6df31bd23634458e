use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};

/// Number of entries in the fixed texture-unit table a pass may reference.
pub const TEXTURE_UNITS: u32 = 2;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SceneConfig {
    pub version: u32,
    #[serde(default)]
    pub display: DisplaySettings,
    #[serde(default)]
    pub noise: NoiseSettings,
    #[serde(default)]
    pub runtime: RuntimeSettings,
    #[serde(default)]
    pub passes: Vec<PassEntry>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DisplaySettings {
    #[serde(default = "default_scale")]
    pub scale: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aspect: Option<f32>,
    #[serde(default = "default_true")]
    pub fullscreen: bool,
    #[serde(
        default,
        deserialize_with = "deserialize_size_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub size: Option<SurfaceSize>,
    #[serde(default)]
    pub vsync: bool,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            scale: default_scale(),
            aspect: None,
            fullscreen: true,
            size: None,
            vsync: false,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct NoiseSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub on_decode_error: DecodeErrorPolicy,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DecodeErrorPolicy {
    Fail,
    #[default]
    Fallback,
}

impl std::str::FromStr for DecodeErrorPolicy {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "fail" | "abort" => Ok(Self::Fail),
            "fallback" | "generate" => Ok(Self::Fallback),
            other => Err(format!(
                "invalid noise policy '{other}'; expected 'fail' or 'fallback'"
            )),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuntimeSettings {
    #[serde(default = "default_fps_report_frames")]
    pub fps_report_frames: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(
        default,
        deserialize_with = "deserialize_duration_opt",
        serialize_with = "serialize_duration_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub exit_after: Option<Duration>,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            fps_report_frames: default_fps_report_frames(),
            seed: None,
            exit_after: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PassTargetSetting {
    Offscreen,
    Surface,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PassEntry {
    pub name: String,
    pub vertex: PathBuf,
    pub fragment: PathBuf,
    pub target: PassTargetSetting,
    #[serde(default)]
    pub channels: [u32; 2],
}

/// Width and height in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceSize {
    pub width: u32,
    pub height: u32,
}

impl SurfaceSize {
    pub fn as_tuple(self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl fmt::Display for SurfaceSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl Serialize for SurfaceSize {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl std::str::FromStr for SurfaceSize {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        parse_size(raw)
    }
}

/// Parses `WIDTHxHEIGHT`, e.g. `1024x640`.
pub fn parse_size(raw: &str) -> Result<SurfaceSize, String> {
    let normalized = raw.trim().to_ascii_lowercase();
    let (width, height) = normalized
        .split_once('x')
        .ok_or_else(|| format!("invalid size '{raw}'; expected WIDTHxHEIGHT"))?;
    let parse = |value: &str| {
        value
            .trim()
            .parse::<u32>()
            .map_err(|err| format!("invalid size '{raw}': {err}"))
    };
    let size = SurfaceSize {
        width: parse(width)?,
        height: parse(height)?,
    };
    if size.width == 0 || size.height == 0 {
        return Err(format!("invalid size '{raw}'; dimensions must be non-zero"));
    }
    Ok(size)
}

fn default_scale() -> f32 {
    0.5
}

fn default_true() -> bool {
    true
}

fn default_fps_report_frames() -> u32 {
    30
}

fn deserialize_size_opt<'de, D>(deserializer: D) -> Result<Option<SurfaceSize>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Helper {
        Str(String),
        Pair([u32; 2]),
    }

    let helper: Option<Helper> = Option::deserialize(deserializer)?;
    match helper {
        None => Ok(None),
        Some(Helper::Str(raw)) => parse_size(&raw).map(Some).map_err(de::Error::custom),
        Some(Helper::Pair([width, height])) => {
            parse_size(&format!("{width}x{height}")).map(Some).map_err(de::Error::custom)
        }
    }
}

/// Parses a duration given as seconds or a humantime string such as `"30s"`.
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    let trimmed = raw.trim();
    if let Ok(seconds) = trimmed.parse::<f64>() {
        return seconds_to_duration(seconds)
            .map_err(|err| format!("invalid duration '{raw}': {err}"));
    }
    humantime::parse_duration(trimmed).map_err(|err| format!("invalid duration '{raw}': {err}"))
}

fn seconds_to_duration(seconds: f64) -> Result<Duration, String> {
    if seconds.is_nan() || seconds.is_sign_negative() {
        return Err("must be non-negative".into());
    }
    Duration::try_from_secs_f64(seconds).map_err(|err| format!("{seconds} seconds: {err}"))
}

fn serialize_duration_opt<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match value {
        Some(duration) => serializer.collect_str(&humantime::format_duration(*duration)),
        None => serializer.serialize_none(),
    }
}

fn deserialize_duration_opt<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    struct Visitor;
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = Option<Duration>;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a duration as number of seconds or human-readable string")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            parse_duration(v).map(Some).map_err(E::custom)
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Some(Duration::from_secs(v)))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v < 0 {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Some(Duration::from_secs(v as u64)))
        }

        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            seconds_to_duration(v)
                .map(Some)
                .map_err(|err| E::custom(format!("invalid duration: {err}")))
        }

        fn visit_none<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }
    }

    deserializer.deserialize_any(Visitor)
}

impl SceneConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: SceneConfig = toml::from_str(input)?;
        raw.validate()?;
        Ok(raw)
    }

    /// Loads a file and resolves its relative paths against the file's
    /// directory.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let input = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&input)?;
        if let Some(base) = path.parent() {
            config.resolve_relative_to(base);
        }
        Ok(config)
    }

    /// Joins every relative path in the config onto `base`.
    pub fn resolve_relative_to(&mut self, base: &Path) {
        let join = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };
        if let Some(path) = self.noise.path.as_mut() {
            join(path);
        }
        for pass in &mut self.passes {
            join(&mut pass.vertex);
            join(&mut pass.fragment);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != 1 {
            return Err(ConfigError::Invalid(format!(
                "unsupported config version {}; expected 1",
                self.version
            )));
        }

        let display = &self.display;
        if !display.scale.is_finite() || display.scale <= 0.0 || display.scale > 4.0 {
            return Err(ConfigError::Invalid(format!(
                "display.scale must be in (0, 4], got {}",
                display.scale
            )));
        }
        if let Some(aspect) = display.aspect {
            if !aspect.is_finite() || aspect <= 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "display.aspect must be a positive ratio, got {aspect}"
                )));
            }
        }

        if self.runtime.fps_report_frames == 0 {
            return Err(ConfigError::Invalid(
                "runtime.fps_report_frames must be at least 1".into(),
            ));
        }

        self.validate_passes()
    }

    fn validate_passes(&self) -> Result<(), ConfigError> {
        if self.passes.is_empty() {
            return Ok(());
        }

        for (index, pass) in self.passes.iter().enumerate() {
            if pass.name.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "passes[{index}] has an empty name"
                )));
            }
            if self.passes[..index].iter().any(|other| other.name == pass.name) {
                return Err(ConfigError::Invalid(format!(
                    "pass name '{}' is used more than once",
                    pass.name
                )));
            }
            if let Some(unit) = pass.channels.iter().find(|unit| **unit >= TEXTURE_UNITS) {
                return Err(ConfigError::Invalid(format!(
                    "pass '{}' references texture unit {unit}; valid units are 0 and 1",
                    pass.name
                )));
            }
        }

        let surface_passes: Vec<&PassEntry> = self
            .passes
            .iter()
            .filter(|pass| pass.target == PassTargetSetting::Surface)
            .collect();
        if surface_passes.len() != 1 {
            return Err(ConfigError::Invalid(format!(
                "exactly one pass must target the surface, found {}",
                surface_passes.len()
            )));
        }
        if let Some(last) = self.passes.last() {
            if last.target != PassTargetSetting::Surface {
                return Err(ConfigError::Invalid(format!(
                    "the surface pass must come last, but '{}' follows it",
                    last.name
                )));
            }
        }

        Ok(())
    }

    pub fn exit_after(&self) -> Option<Duration> {
        self.runtime.exit_after
    }
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            version: 1,
            display: DisplaySettings::default(),
            noise: NoiseSettings::default(),
            runtime: RuntimeSettings::default(),
            passes: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
version = 1

[display]
scale = 0.5
aspect = 3.14159265359
fullscreen = false
size = "1024x640"

[noise]
path = "textures/noise.png"
on_decode_error = "fail"

[runtime]
fps_report_frames = 60
seed = 42
exit_after = "1m 30s"

[[passes]]
name = "scene"
vertex = "shaders/quad.vert"
fragment = "shaders/dunes.frag"
target = "offscreen"
channels = [0, 1]

[[passes]]
name = "film"
vertex = "shaders/quad.vert"
fragment = "shaders/film.frag"
target = "surface"
channels = [1, 0]
"#;

    #[test]
    fn parses_sample_config() {
        let config = SceneConfig::from_toml_str(SAMPLE).expect("parse config");
        assert_eq!(config.display.aspect, Some(3.141_592_7));
        assert!(!config.display.fullscreen);
        assert_eq!(
            config.display.size,
            Some(SurfaceSize {
                width: 1024,
                height: 640
            })
        );
        assert_eq!(config.noise.on_decode_error, DecodeErrorPolicy::Fail);
        assert_eq!(config.runtime.seed, Some(42));
        assert_eq!(config.exit_after(), Some(Duration::from_secs(90)));
        assert_eq!(config.passes.len(), 2);
        assert_eq!(config.passes[1].channels, [1, 0]);
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = SceneConfig::from_toml_str("version = 1").expect("parse");
        assert_eq!(config.display.scale, 0.5);
        assert!(config.display.fullscreen);
        assert!(!config.display.vsync);
        assert_eq!(config.noise.on_decode_error, DecodeErrorPolicy::Fallback);
        assert_eq!(config.runtime.fps_report_frames, 30);
        assert!(config.passes.is_empty());
    }

    #[test]
    fn rejects_bad_version_and_scale() {
        assert!(matches!(
            SceneConfig::from_toml_str("version = 2"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            SceneConfig::from_toml_str("version = 1\n[display]\nscale = 0.0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            SceneConfig::from_toml_str("version = 1\n[display]\naspect = -2.0"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn rejects_surface_pass_out_of_order() {
        let config = r#"
version = 1

[[passes]]
name = "film"
vertex = "a.vert"
fragment = "b.frag"
target = "surface"

[[passes]]
name = "scene"
vertex = "a.vert"
fragment = "c.frag"
target = "offscreen"
"#;
        let err = SceneConfig::from_toml_str(config).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_unknown_texture_unit() {
        let config = r#"
version = 1

[[passes]]
name = "film"
vertex = "a.vert"
fragment = "b.frag"
target = "surface"
channels = [0, 3]
"#;
        let err = SceneConfig::from_toml_str(config).unwrap_err();
        assert!(err.to_string().contains("texture unit 3"), "{err}");
    }

    #[test]
    fn parse_errors_surface_as_parse() {
        let err = SceneConfig::from_toml_str("version = ").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn size_accepts_string_or_pair() {
        assert_eq!(
            parse_size(" 800X600 "),
            Ok(SurfaceSize {
                width: 800,
                height: 600
            })
        );
        assert!(parse_size("800").is_err());
        assert!(parse_size("0x600").is_err());

        let config =
            SceneConfig::from_toml_str("version = 1\n[display]\nsize = [640, 480]").expect("pair");
        assert_eq!(config.display.size.map(SurfaceSize::as_tuple), Some((640, 480)));
    }

    #[test]
    fn durations_accept_seconds_and_humantime() {
        assert_eq!(parse_duration("2.5"), Ok(Duration::from_millis(2500)));
        assert_eq!(parse_duration("10s"), Ok(Duration::from_secs(10)));
        assert!(parse_duration("-1").is_err());
        assert!(parse_duration("soon").is_err());
        assert!(parse_duration("inf").is_err());
        assert!(parse_duration("NaN").is_err());
        assert!(parse_duration("1e30").is_err());
    }

    #[test]
    fn out_of_range_exit_after_is_a_parse_error() {
        let err = SceneConfig::from_toml_str("version = 1\n[runtime]\nexit_after = 1e30")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)), "{err}");

        let err = SceneConfig::from_toml_str("version = 1\n[runtime]\nexit_after = inf")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)), "{err}");

        let config = SceneConfig::from_toml_str("version = 1\n[runtime]\nexit_after = 0.25")
            .expect("fractional seconds");
        assert_eq!(config.exit_after(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn from_path_resolves_relative_paths() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("scenepass.toml");
        std::fs::write(&path, SAMPLE).expect("write config");

        let config = SceneConfig::from_path(&path).expect("load");
        assert_eq!(
            config.noise.path.as_deref(),
            Some(dir.path().join("textures/noise.png").as_path())
        );
        assert_eq!(config.passes[0].fragment, dir.path().join("shaders/dunes.frag"));
    }

    #[test]
    fn rendered_config_parses_again() {
        let config = SceneConfig::from_toml_str(SAMPLE).expect("parse");
        let rendered = toml::to_string_pretty(&config).expect("render");
        assert!(rendered.contains("size = \"1024x640\""), "{rendered}");
        assert!(rendered.contains("exit_after = \"1m 30s\""), "{rendered}");

        let reparsed = SceneConfig::from_toml_str(&rendered).expect("reparse");
        assert_eq!(reparsed.display.size, config.display.size);
        assert_eq!(reparsed.exit_after(), config.exit_after());
        assert_eq!(reparsed.passes.len(), 2);
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = SceneConfig::from_path(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
