//! Configuration – reads/writes `sceneparse.toml`.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working configuration.  Tables come last in the struct so the TOML
//! serialiser emits plain keys before them.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use sceneparse_runtime::{AssessorConfig, ContactModel, PropertyDatabase};
use sceneparse_types::PhysicalProperties;

/// File looked up in the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "sceneparse.toml";

/// Input stream names, as they appear in the replay log's `stream` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamNames {
    pub scene_cloud: String,
    pub background_cloud: String,
    pub detected_objects: String,
    pub hypotheses: String,
    pub transform: String,
}

impl Default for StreamNames {
    fn default() -> Self {
        Self {
            scene_cloud: "scene_cloud".to_string(),
            background_cloud: "background_cloud".to_string(),
            detected_objects: "detected_objects".to_string(),
            hypotheses: "hypotheses".to_string(),
            transform: "transform".to_string(),
        }
    }
}

/// Persisted configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Preload the background cloud from `background_path` at startup.
    #[serde(default)]
    pub load_background: bool,

    /// JSON file holding a point cloud.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub background_path: String,

    /// Derive gravity from the background plane normal.
    #[serde(default)]
    pub bg_normal_as_gravity: bool,

    /// Frame whose `+z` axis points against gravity; empty disables it.
    #[serde(default = "default_gravity_reference_frame")]
    pub gravity_reference_frame: String,

    /// Skip the hypothesis pass and re-emit the object list instead.
    #[serde(default)]
    pub best_hypothesis_only: bool,

    /// Prefix for published frame names; empty for none.
    #[serde(default)]
    pub frame_namespace: String,

    #[serde(default = "default_transform_timeout_ms")]
    pub transform_timeout_ms: u64,

    /// Deadline before the replay warns that a pass has gone quiet.
    #[serde(default = "default_completion_timeout_ms")]
    pub completion_timeout_ms: u64,

    /// Register unseen object classes with `default_property`.
    #[serde(default = "default_true")]
    pub register_unknown: bool,

    #[serde(default)]
    pub streams: StreamNames,

    #[serde(default)]
    pub physics: ContactModel,

    #[serde(default)]
    pub default_property: PhysicalProperties,

    /// Per-class properties, `[object_property.<class>]`.
    #[serde(default)]
    pub object_property: BTreeMap<String, PhysicalProperties>,
}

fn default_gravity_reference_frame() -> String {
    "world".to_string()
}
fn default_transform_timeout_ms() -> u64 {
    1_000
}
fn default_completion_timeout_ms() -> u64 {
    10_000
}
fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            load_background: false,
            background_path: String::new(),
            bg_normal_as_gravity: false,
            gravity_reference_frame: default_gravity_reference_frame(),
            best_hypothesis_only: false,
            frame_namespace: String::new(),
            transform_timeout_ms: default_transform_timeout_ms(),
            completion_timeout_ms: default_completion_timeout_ms(),
            register_unknown: true,
            streams: StreamNames::default(),
            physics: ContactModel::default(),
            default_property: PhysicalProperties::default(),
            object_property: BTreeMap::new(),
        }
    }
}

impl Config {
    pub fn assessor_config(&self) -> AssessorConfig {
        AssessorConfig {
            best_hypothesis_only: self.best_hypothesis_only,
            frame_namespace: non_empty(&self.frame_namespace),
            transform_timeout: Duration::from_millis(self.transform_timeout_ms),
            background_normal_as_gravity: self.bg_normal_as_gravity,
            gravity_reference_frame: non_empty(&self.gravity_reference_frame),
        }
    }

    pub fn property_database(&self) -> PropertyDatabase {
        PropertyDatabase::from_table(
            self.default_property,
            self.object_property
                .iter()
                .map(|(class, props)| (class.clone(), *props)),
        )
        .with_registration(self.register_unknown)
    }

    pub fn completion_timeout(&self) -> Duration {
        Duration::from_millis(self.completion_timeout_ms)
    }

    /// Background file to preload, if enabled.
    pub fn background_file(&self) -> Option<PathBuf> {
        (self.load_background && !self.background_path.is_empty())
            .then(|| PathBuf::from(&self.background_path))
    }
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

/// Resolve the config file: `explicit` if given, else [`DEFAULT_CONFIG_FILE`].
pub fn config_path(explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

/// Load the config at `path` and apply `SCENEPARSE_*` overrides.
///
/// A missing file yields the defaults.  A file named explicitly with
/// `--config` must exist.
pub fn load(explicit: Option<&Path>) -> Result<Config, String> {
    let path = config_path(explicit);
    let mut cfg = match load_from(&path)? {
        Some(cfg) => cfg,
        None if explicit.is_some() => {
            return Err(format!("Config file {} does not exist", path.display()));
        }
        None => Config::default(),
    };
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Parse the config at `path`.  Returns `None` if the file does not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    Ok(Some(cfg))
}

/// Apply `SCENEPARSE_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `SCENEPARSE_BEST_HYPOTHESIS_ONLY` | `best_hypothesis_only` |
/// | `SCENEPARSE_FRAME_NAMESPACE` | `frame_namespace` |
/// | `SCENEPARSE_GRAVITY_REFERENCE_FRAME` | `gravity_reference_frame` |
/// | `SCENEPARSE_TRANSFORM_TIMEOUT_MS` | `transform_timeout_ms` |
/// | `SCENEPARSE_BACKGROUND_PATH` | `background_path` (also enables `load_background`) |
///
/// Unparseable values are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("SCENEPARSE_BEST_HYPOTHESIS_ONLY")
        && let Ok(flag) = v.trim().parse::<bool>()
    {
        cfg.best_hypothesis_only = flag;
    }
    if let Ok(v) = std::env::var("SCENEPARSE_FRAME_NAMESPACE") {
        cfg.frame_namespace = v;
    }
    if let Ok(v) = std::env::var("SCENEPARSE_GRAVITY_REFERENCE_FRAME") {
        cfg.gravity_reference_frame = v;
    }
    if let Ok(v) = std::env::var("SCENEPARSE_TRANSFORM_TIMEOUT_MS")
        && let Ok(ms) = v.trim().parse::<u64>()
    {
        cfg.transform_timeout_ms = ms;
    }
    if let Ok(v) = std::env::var("SCENEPARSE_BACKGROUND_PATH")
        && !v.is_empty()
    {
        cfg.background_path = v;
        cfg.load_background = true;
    }
}

/// Write `cfg` to `path`, creating parent directories as needed.
pub fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))
}
