//! Point record decoding
//!
//! A `.bin` file is a flat run of fixed-size records laid out as described
//! by the cloud's [`PointLayout`]. Positions are stored as three quantized
//! little-endian `i32` relative to the node's bounding box minimum.

use crate::core::types::Vec3;
use crate::math::Aabb;
use crate::octree::info::{AttributeKind, PointLayout};
use byteorder::{ByteOrder, LittleEndian};

/// Decoded payload of one node
///
/// `positions` holds 3 floats per point and `colors` 3 bytes per point, so
/// both are empty or both describe the same number of points.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PointBuffers {
    pub positions: Vec<f32>,
    pub colors: Vec<u8>,
}

impl PointBuffers {
    pub fn with_capacity(points: usize) -> Self {
        Self {
            positions: Vec::with_capacity(points * 3),
            colors: Vec::with_capacity(points * 3),
        }
    }

    /// Number of points
    pub fn len(&self) -> usize {
        self.positions.len() / 3
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Resident size in bytes
    pub fn byte_size(&self) -> usize {
        self.positions.len() * std::mem::size_of::<f32>() + self.colors.len()
    }

    pub fn position(&self, index: usize) -> Vec3 {
        Vec3::from_slice(&self.positions[index * 3..index * 3 + 3])
    }

    pub fn color(&self, index: usize) -> [u8; 3] {
        [self.colors[index * 3], self.colors[index * 3 + 1], self.colors[index * 3 + 2]]
    }

    /// Tight bounds of the decoded positions
    pub fn bounds(&self) -> Option<Aabb> {
        Aabb::from_points(self.positions.chunks_exact(3).map(Vec3::from_slice))
    }

    /// Drop both buffers and release their memory
    pub fn clear(&mut self) {
        self.positions = Vec::new();
        self.colors = Vec::new();
    }

    fn push(&mut self, position: [f32; 3], color: [u8; 3]) {
        self.positions.extend_from_slice(&position);
        self.colors.extend_from_slice(&color);
    }
}

/// Color given to points when the layout carries none
pub const DEFAULT_COLOR: [u8; 3] = [255, 255, 255];

/// Decode a node's point records
///
/// # Arguments
/// * `bytes` - Contents of the node's `.bin` file
/// * `layout` - Record layout from the cloud description
/// * `scale` - Quantization step
/// * `origin` - Minimum corner of the node's bounding box
///
/// # Returns
/// The decoded buffers. A partial record at the end of `bytes` is dropped.
pub fn decode_points(bytes: &[u8], layout: &PointLayout, scale: f64, origin: Vec3) -> PointBuffers {
    let record_size = layout.record_size();
    if record_size == 0 {
        return PointBuffers::default();
    }

    let count = bytes.len() / record_size;
    let remainder = bytes.len() % record_size;
    if remainder != 0 {
        log::debug!("Dropping {remainder} trailing bytes of a partial point record");
    }

    let origin = [origin.x as f64, origin.y as f64, origin.z as f64];
    let mut buffers = PointBuffers::with_capacity(count);

    for record in bytes.chunks_exact(record_size) {
        let mut position = [0.0f32; 3];
        let mut color = DEFAULT_COLOR;
        let mut rest = record;

        for attr in layout.attributes() {
            let (field, tail) = rest.split_at(attr.size);
            rest = tail;
            match attr.kind {
                AttributeKind::PositionCartesian => {
                    let mut q = [0i32; 3];
                    LittleEndian::read_i32_into(field, &mut q);
                    for axis in 0..3 {
                        position[axis] = dequantize(q[axis], scale, origin[axis]);
                    }
                }
                AttributeKind::Color => {
                    color.copy_from_slice(&field[..3]);
                }
                AttributeKind::Other(_) => {}
            }
        }

        buffers.push(position, color);
    }

    buffers
}

/// `q * scale + min`, evaluated in double precision
pub fn dequantize(q: i32, scale: f64, min: f64) -> f32 {
    (q as f64 * scale + min) as f32
}

/// Quantize a position component; inverse of [`dequantize`] up to rounding
pub fn quantize(value: f64, scale: f64, min: f64) -> i32 {
    ((value - min) / scale).round() as i32
}

/// Encode points into records of `layout`, zero-filling attributes other
/// than position and color
pub fn encode_points(
    points: &[(Vec3, [u8; 3])],
    layout: &PointLayout,
    scale: f64,
    origin: Vec3,
) -> Vec<u8> {
    let origin = [origin.x as f64, origin.y as f64, origin.z as f64];
    let mut bytes = Vec::with_capacity(points.len() * layout.record_size());
    for (position, color) in points {
        for attr in layout.attributes() {
            match attr.kind {
                AttributeKind::PositionCartesian => {
                    let q: [i32; 3] = std::array::from_fn(|axis| {
                        quantize(position[axis] as f64, scale, origin[axis])
                    });
                    let mut raw = [0u8; 12];
                    LittleEndian::write_i32_into(&q, &mut raw);
                    bytes.extend_from_slice(&raw);
                }
                AttributeKind::Color => {
                    bytes.extend_from_slice(color);
                    bytes.extend(std::iter::repeat_n(255u8, attr.size - 3));
                }
                AttributeKind::Other(_) => {
                    bytes.extend(std::iter::repeat_n(0u8, attr.size));
                }
            }
        }
    }
    bytes
}
