//! Cloud description and shared read-only settings
//!
//! A dataset directory holds a `cloud.js` JSON description next to the
//! octree directory. It is parsed once into [`CloudInfo`] and combined with
//! the [`StreamingConfig`] into a [`GlobalInfo`] that every component shares.

use crate::core::config::StreamingConfig;
use crate::core::error::Error;
use crate::core::types::{Result, Vec3};
use crate::math::Aabb;
use crate::octree::key::NodeKey;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File name of the cloud description inside a dataset directory
pub const CLOUD_FILE: &str = "cloud.js";

/// Hierarchy fragment file extension
pub const HIERARCHY_EXT: &str = "hrc";

/// Point data file extension
pub const DATA_EXT: &str = "bin";

const DEFAULT_HIERARCHY_STEP: u32 = 5;

/// Bounding box as written in `cloud.js`
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct JsonBox {
    pub lx: f64,
    pub ly: f64,
    pub lz: f64,
    pub ux: f64,
    pub uy: f64,
    pub uz: f64,
}

impl From<JsonBox> for Aabb {
    fn from(b: JsonBox) -> Self {
        Aabb::new(
            Vec3::new(b.lx as f32, b.ly as f32, b.lz as f32),
            Vec3::new(b.ux as f32, b.uy as f32, b.uz as f32),
        )
    }
}

impl From<Aabb> for JsonBox {
    fn from(b: Aabb) -> Self {
        Self {
            lx: b.min.x as f64,
            ly: b.min.y as f64,
            lz: b.min.z as f64,
            ux: b.max.x as f64,
            uy: b.max.y as f64,
            uz: b.max.z as f64,
        }
    }
}

/// Attribute entry in `cloud.js`: a well-known name, or a name with an explicit width
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeSpec {
    Named(String),
    Sized { name: String, size: usize },
}

/// Parsed `cloud.js`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudInfo {
    #[serde(default)]
    pub version: String,
    pub octree_dir: String,
    #[serde(default)]
    pub points: u64,
    pub bounding_box: JsonBox,
    #[serde(default)]
    pub tight_bounding_box: Option<JsonBox>,
    pub point_attributes: Vec<AttributeSpec>,
    #[serde(default)]
    pub spacing: f64,
    pub scale: f64,
    #[serde(default = "default_hierarchy_step")]
    pub hierarchy_step_size: u32,
}

fn default_hierarchy_step() -> u32 {
    DEFAULT_HIERARCHY_STEP
}

impl CloudInfo {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// How an attribute's bytes are interpreted
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttributeKind {
    /// Three little-endian i32, dequantized against the node's bounding box
    PositionCartesian,
    /// Packed color bytes; the first three are R, G, B
    Color,
    /// Anything else; skipped by its width
    Other(String),
}

/// One field of a point record
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PointAttribute {
    pub name: String,
    pub kind: AttributeKind,
    pub size: usize,
}

impl PointAttribute {
    /// Attribute with a well-known Potree name, `None` if the width is unknown
    pub fn from_name(name: &str) -> Option<Self> {
        let size = match name {
            "POSITION_CARTESIAN" => 12,
            "COLOR_PACKED" | "RGBA_PACKED" | "RGBA" => 4,
            "RGB" => 3,
            "INTENSITY" => 2,
            "CLASSIFICATION" => 1,
            "RETURN_NUMBER" | "NUMBER_OF_RETURNS" => 1,
            "SOURCE_ID" => 2,
            "GPS_TIME" => 8,
            "NORMAL_SPHEREMAPPED" | "NORMAL_OCT16" => 2,
            "NORMAL" => 12,
            _ => return None,
        };
        Some(Self::with_size(name, size))
    }

    /// Attribute with an explicit width
    pub fn with_size(name: &str, size: usize) -> Self {
        let kind = match name {
            "POSITION_CARTESIAN" => AttributeKind::PositionCartesian,
            "COLOR_PACKED" | "RGBA_PACKED" | "RGBA" | "RGB" => AttributeKind::Color,
            other => AttributeKind::Other(other.to_string()),
        };
        Self { name: name.to_string(), kind, size }
    }

    fn from_spec(spec: &AttributeSpec) -> Result<Self> {
        match spec {
            AttributeSpec::Named(name) => Self::from_name(name).ok_or_else(|| {
                Error::Config(format!("attribute {name} has no known size; declare it as {{name, size}}"))
            }),
            AttributeSpec::Sized { name, size } => Ok(Self::with_size(name, *size)),
        }
    }
}

/// Ordered field layout of one point record
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PointLayout {
    attributes: Vec<PointAttribute>,
    record_size: usize,
}

impl PointLayout {
    /// Build a layout, checking that positions are present and widths are usable
    pub fn new(attributes: Vec<PointAttribute>) -> Result<Self> {
        let mut has_position = false;
        for attr in &attributes {
            match attr.kind {
                AttributeKind::PositionCartesian => {
                    if attr.size != 12 {
                        return Err(Error::Config(format!(
                            "POSITION_CARTESIAN must be 12 bytes, got {}", attr.size
                        )));
                    }
                    has_position = true;
                }
                AttributeKind::Color if attr.size < 3 => {
                    return Err(Error::Config(format!(
                        "color attribute {} must be at least 3 bytes", attr.name
                    )));
                }
                _ => {}
            }
        }
        if !has_position {
            return Err(Error::Config("point layout has no POSITION_CARTESIAN attribute".into()));
        }
        let record_size = attributes.iter().map(|a| a.size).sum();
        Ok(Self { attributes, record_size })
    }

    /// Layout from the attribute list of `cloud.js`
    pub fn from_specs(specs: &[AttributeSpec]) -> Result<Self> {
        let attributes = specs.iter()
            .map(PointAttribute::from_spec)
            .collect::<Result<Vec<_>>>()?;
        Self::new(attributes)
    }

    pub fn attributes(&self) -> &[PointAttribute] {
        &self.attributes
    }

    /// Bytes per point record
    pub fn record_size(&self) -> usize {
        self.record_size
    }

    pub fn has_color(&self) -> bool {
        self.attributes.iter().any(|a| a.kind == AttributeKind::Color)
    }
}

/// Root-level constants shared by the tree, the loaders and the scheduler
///
/// Built once when a cloud is opened and never mutated afterwards.
#[derive(Clone, Debug)]
pub struct GlobalInfo {
    /// Dataset directory holding `cloud.js`
    pub data_dir: PathBuf,
    /// Directory holding the `r/...` node tree
    pub octree_dir: PathBuf,
    pub bounding_box: Aabb,
    pub tight_bounding_box: Aabb,
    /// Quantization step of stored positions
    pub scale: f64,
    pub spacing: f64,
    /// Levels covered by one hierarchy fragment
    pub hierarchy_step_size: u32,
    pub total_points: u64,
    pub layout: PointLayout,
    pub config: StreamingConfig,
}

impl GlobalInfo {
    /// Combine a parsed cloud description with the streaming configuration
    pub fn from_cloud(
        data_dir: impl Into<PathBuf>,
        cloud: CloudInfo,
        config: StreamingConfig,
    ) -> Result<Self> {
        config.validate()?;
        if cloud.hierarchy_step_size == 0 {
            return Err(Error::Config("hierarchyStepSize must be at least 1".into()));
        }
        if !(cloud.scale > 0.0) {
            return Err(Error::Config(format!("scale must be positive, got {}", cloud.scale)));
        }

        let data_dir = data_dir.into();
        let layout = PointLayout::from_specs(&cloud.point_attributes)?;
        let bounding_box = Aabb::from(cloud.bounding_box);
        let tight_bounding_box = cloud.tight_bounding_box
            .map(Aabb::from)
            .unwrap_or(bounding_box)
            .clamped_to(&bounding_box);

        Ok(Self {
            octree_dir: data_dir.join(&cloud.octree_dir),
            data_dir,
            bounding_box,
            tight_bounding_box,
            scale: cloud.scale,
            spacing: cloud.spacing,
            hierarchy_step_size: cloud.hierarchy_step_size,
            total_points: cloud.points,
            layout,
            config,
        })
    }

    /// Read `cloud.js` from `data_dir`
    pub fn load(data_dir: impl AsRef<Path>, config: StreamingConfig) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        let path = data_dir.join(CLOUD_FILE);
        let json = std::fs::read_to_string(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::MissingFile(path.clone()),
            _ => Error::Io(e),
        })?;
        let cloud = CloudInfo::from_json_str(&json)?;
        let info = Self::from_cloud(data_dir, cloud, config)?;
        log::info!(
            "Cloud {}: {} points, hierarchy step {}, {} byte records",
            data_dir.display(),
            info.total_points,
            info.hierarchy_step_size,
            info.layout.record_size(),
        );
        Ok(info)
    }

    /// Path of one of a node's files
    pub fn node_file(&self, key: &NodeKey, ext: &str) -> PathBuf {
        self.octree_dir
            .join(key.hierarchy_dir(self.hierarchy_step_size))
            .join(format!("{key}.{ext}"))
    }

    pub fn hierarchy_file(&self, key: &NodeKey) -> PathBuf {
        self.node_file(key, HIERARCHY_EXT)
    }

    pub fn data_file(&self, key: &NodeKey) -> PathBuf {
        self.node_file(key, DATA_EXT)
    }
}
