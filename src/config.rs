//! Camera and pipeline configuration.
//!
//! The configuration is read once at startup and never changes afterwards.
//! Camera keys live at the top level of the document; an optional `[pipeline]`
//! table tunes the media graph around the annotation stage.
//!
//! ```toml
//! device = "/dev/video1"
//! resolution = [1920, 1080]
//! position = [0.75, 0.0, 0.0]
//! rotation = [0.0, 180.0, -90.0]
//! fov = [0.998, 0.659]
//!
//! [pipeline]
//! sink_host = "10.0.0.5"
//! metadata = "deepstream"
//! ```

use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, Result};

const DEFAULT_DEVICE: &str = "/dev/video0";
const DEFAULT_CAPTURE_FORMAT: &str = "UYVY";
const DEFAULT_INFER_CONFIG: &str = "config_infer_primary_yoloV10.txt";
const DEFAULT_ANNOTATE_ELEMENT: &str = "osd";
const DEFAULT_SINK_HOST: &str = "127.0.0.1";
const DEFAULT_SINK_PORT: u16 = 5000;
const DEFAULT_MTU: u32 = 60000;

const PIPELINE_KEY: &str = "pipeline";

/// Validated camera parameters.
///
/// Fields are private so a `CameraConfig` can only come out of validation.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraConfig {
    device: String,
    width: u32,
    height: u32,
    position: [f64; 3],
    rotation: [f64; 3],
    fov: [f64; 2],
}

impl CameraConfig {
    /// Build a camera configuration from a parsed key/value document.
    pub fn from_document(doc: &Map<String, Value>) -> Result<Self> {
        let device = match doc.get("device") {
            None => DEFAULT_DEVICE.to_string(),
            Some(Value::String(device)) if device.trim().is_empty() => {
                return Err(ConfigError::OutOfRange {
                    key: "device",
                    index: None,
                    reason: "must not be empty".to_string(),
                })
            }
            Some(Value::String(device)) => device.clone(),
            Some(_) => {
                return Err(ConfigError::TypeMismatch {
                    key: "device",
                    index: None,
                    expected: "a string",
                })
            }
        };

        let [width, height] = resolution(doc)?;
        let position = numbers::<3>(doc, "position")?;
        let rotation = numbers::<3>(doc, "rotation")?;
        let fov = numbers::<2>(doc, "fov")?;
        for (index, extent) in fov.iter().enumerate() {
            if *extent <= 0.0 {
                return Err(ConfigError::OutOfRange {
                    key: "fov",
                    index: Some(index),
                    reason: format!("must be greater than zero, got {extent}"),
                });
            }
        }

        Ok(Self {
            device,
            width,
            height,
            position,
            rotation,
            fov,
        })
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Mounting position in meters. Only x and y feed the projection.
    pub fn position(&self) -> [f64; 3] {
        self.position
    }

    /// Mounting orientation in degrees.
    ///
    /// Validated and kept, but the ground projection does not apply it.
    pub fn rotation(&self) -> [f64; 3] {
        self.rotation
    }

    /// Ground extent in meters spanned by the frame, horizontally and vertically.
    pub fn fov(&self) -> [f64; 2] {
        self.fov
    }
}

/// Where the annotation probe finds detections on each buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetadataSource {
    /// DeepStream batch metadata, as attached by `nvinfer` and drawn by `nvdsosd`.
    #[default]
    DeepStream,
    /// `GstVideoRegionOfInterestMeta`, for graphs built from stock elements.
    Roi,
}

/// Settings for the media graph around the annotation stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    pub capture_format: String,
    pub infer_config: String,
    /// Name of the element whose sink pad carries the annotation probe.
    pub annotate_element: String,
    pub sink_host: String,
    pub sink_port: u16,
    pub mtu: u32,
    pub metadata: MetadataSource,
    /// Complete launch description, replacing the generated one.
    pub launch: Option<String>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            capture_format: DEFAULT_CAPTURE_FORMAT.to_string(),
            infer_config: DEFAULT_INFER_CONFIG.to_string(),
            annotate_element: DEFAULT_ANNOTATE_ELEMENT.to_string(),
            sink_host: DEFAULT_SINK_HOST.to_string(),
            sink_port: DEFAULT_SINK_PORT,
            mtu: DEFAULT_MTU,
            metadata: MetadataSource::default(),
            launch: None,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PipelineConfigFile {
    capture_format: Option<String>,
    infer_config: Option<String>,
    annotate_element: Option<String>,
    sink_host: Option<String>,
    sink_port: Option<u16>,
    mtu: Option<u32>,
    metadata: Option<MetadataSource>,
    launch: Option<String>,
}

impl PipelineSettings {
    fn from_document(doc: &Map<String, Value>) -> Result<Self> {
        let file: PipelineConfigFile = match doc.get(PIPELINE_KEY) {
            None => PipelineConfigFile::default(),
            Some(table) => {
                PipelineConfigFile::deserialize(table).map_err(|e| ConfigError::InvalidTable {
                    key: PIPELINE_KEY,
                    message: e.to_string(),
                })?
            }
        };

        let defaults = Self::default();
        let settings = Self {
            capture_format: file.capture_format.unwrap_or(defaults.capture_format),
            infer_config: file.infer_config.unwrap_or(defaults.infer_config),
            annotate_element: file.annotate_element.unwrap_or(defaults.annotate_element),
            sink_host: file.sink_host.unwrap_or(defaults.sink_host),
            sink_port: file.sink_port.unwrap_or(defaults.sink_port),
            mtu: file.mtu.unwrap_or(defaults.mtu),
            metadata: file.metadata.unwrap_or(defaults.metadata),
            launch: file.launch.filter(|launch| !launch.trim().is_empty()),
        };
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.annotate_element.trim().is_empty() {
            return Err(ConfigError::OutOfRange {
                key: "pipeline.annotate_element",
                index: None,
                reason: "must not be empty".to_string(),
            });
        }
        if self.sink_host.trim().is_empty() {
            return Err(ConfigError::OutOfRange {
                key: "pipeline.sink_host",
                index: None,
                reason: "must not be empty".to_string(),
            });
        }
        if self.sink_port == 0 {
            return Err(ConfigError::OutOfRange {
                key: "pipeline.sink_port",
                index: None,
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.mtu == 0 {
            return Err(ConfigError::OutOfRange {
                key: "pipeline.mtu",
                index: None,
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Everything the daemon reads at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayConfig {
    pub camera: CameraConfig,
    pub pipeline: PipelineSettings,
}

impl OverlayConfig {
    /// Load from `path`, falling back to `OVERLAY_CONFIG`, then apply environment overrides.
    ///
    /// With no file at all the document is empty, so the required camera keys
    /// are reported missing.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var("OVERLAY_CONFIG").ok().map(PathBuf::from));
        let mut doc = match path.as_deref() {
            Some(path) => read_config_file(path)?,
            None => Map::new(),
        };
        apply_env(&mut doc)?;
        Self::from_document(&doc)
    }

    pub fn from_document(doc: &Map<String, Value>) -> Result<Self> {
        Ok(Self {
            camera: CameraConfig::from_document(doc)?,
            pipeline: PipelineSettings::from_document(doc)?,
        })
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Self::from_document(&parse_document(Path::new("<inline>.toml"), raw)?)
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        Self::from_document(&parse_document(Path::new("<inline>.json"), raw)?)
    }
}

fn read_config_file(path: &Path) -> Result<Map<String, Value>> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_document(path, &raw)
}

/// Parse TOML or JSON (by extension) into one generic document.
fn parse_document(path: &Path, raw: &str) -> Result<Map<String, Value>> {
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let value: Value = if is_json {
        serde_json::from_str(raw).map_err(|e| parse_error(path, e))?
    } else {
        toml::from_str(raw).map_err(|e| parse_error(path, e))?
    };
    match value {
        Value::Object(doc) => Ok(doc),
        _ => Err(ConfigError::Parse {
            path: path.to_path_buf(),
            message: "top level must be a table".to_string(),
        }),
    }
}

fn parse_error(path: &Path, err: impl std::fmt::Display) -> ConfigError {
    ConfigError::Parse {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

fn apply_env(doc: &mut Map<String, Value>) -> Result<()> {
    if let Ok(device) = std::env::var("OVERLAY_DEVICE") {
        if !device.trim().is_empty() {
            doc.insert("device".to_string(), Value::String(device));
        }
    }
    if let Ok(host) = std::env::var("OVERLAY_SINK_HOST") {
        if !host.trim().is_empty() {
            pipeline_table(doc)?.insert("sink_host".to_string(), Value::String(host));
        }
    }
    if let Ok(port) = std::env::var("OVERLAY_SINK_PORT") {
        let port: u16 = port.trim().parse().map_err(|_| ConfigError::TypeMismatch {
            key: "OVERLAY_SINK_PORT",
            index: None,
            expected: "an integer port number",
        })?;
        pipeline_table(doc)?.insert("sink_port".to_string(), Value::from(port));
    }
    Ok(())
}

fn pipeline_table(doc: &mut Map<String, Value>) -> Result<&mut Map<String, Value>> {
    match doc
        .entry(PIPELINE_KEY)
        .or_insert_with(|| Value::Object(Map::new()))
    {
        Value::Object(table) => Ok(table),
        _ => Err(ConfigError::InvalidTable {
            key: PIPELINE_KEY,
            message: "expected a table".to_string(),
        }),
    }
}

/// Fetch a required array key and check its length.
fn array<'a>(doc: &'a Map<String, Value>, key: &'static str, len: usize) -> Result<&'a [Value]> {
    let value = doc.get(key).ok_or(ConfigError::MissingField { key })?;
    let Value::Array(items) = value else {
        return Err(ConfigError::TypeMismatch {
            key,
            index: None,
            expected: "an array",
        });
    };
    if items.len() != len {
        return Err(ConfigError::InvalidArity {
            key,
            expected: len,
            found: items.len(),
        });
    }
    Ok(items)
}

/// Non-finite floats deserialize to `null`, so they surface here as type mismatches.
fn numbers<const N: usize>(doc: &Map<String, Value>, key: &'static str) -> Result<[f64; N]> {
    let items = array(doc, key, N)?;
    let mut out = [0.0; N];
    for (index, (slot, item)) in out.iter_mut().zip(items).enumerate() {
        *slot = item
            .as_f64()
            .filter(|v| v.is_finite())
            .ok_or(ConfigError::TypeMismatch {
                key,
                index: Some(index),
                expected: "a finite number",
            })?;
    }
    Ok(out)
}

fn resolution(doc: &Map<String, Value>) -> Result<[u32; 2]> {
    const KEY: &str = "resolution";
    let items = array(doc, KEY, 2)?;
    let mut out = [0u32; 2];
    for (index, (slot, item)) in out.iter_mut().zip(items).enumerate() {
        let Some(n) = item.as_i64().or_else(|| {
            // Past i64::MAX, which is out of range anyway.
            item.as_u64().map(|_| i64::MAX)
        }) else {
            return Err(ConfigError::TypeMismatch {
                key: KEY,
                index: Some(index),
                expected: "an integer",
            });
        };
        if n <= 0 || n > i64::from(u32::MAX) {
            return Err(ConfigError::OutOfRange {
                key: KEY,
                index: Some(index),
                reason: format!("must be between 1 and {}, got {}", u32::MAX, n),
            });
        }
        *slot = n as u32;
    }
    Ok(out)
}
