//! Implicit subtree availability
//!
//! A subtree covers a fixed block of tree levels. Which tiles exist, which
//! carry content, and where child subtrees attach is encoded by three
//! bitfields indexed by level-relative Morton codes.

use serde_json::Value;

use crate::content::read_u32_le;
use crate::core::error::Error;
use crate::core::types::Result;

pub const HEADER_SIZE: usize = 24;

/// How an implicit tileset subdivides
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubdivisionScheme {
    Quadtree,
    Octree,
}

impl SubdivisionScheme {
    /// Children per tile
    pub fn branching_factor(self) -> u64 {
        match self {
            SubdivisionScheme::Quadtree => 4,
            SubdivisionScheme::Octree => 8,
        }
    }

    /// Bits a Morton code grows by per level
    pub fn child_bits(self) -> u32 {
        match self {
            SubdivisionScheme::Quadtree => 2,
            SubdivisionScheme::Octree => 3,
        }
    }
}

/// One availability bitfield: all-same or an explicit bitstream
#[derive(Clone, Debug, PartialEq)]
pub enum AvailabilityBitfield {
    Constant(bool),
    Bitstream(Vec<u8>),
}

impl AvailabilityBitfield {
    pub fn get(&self, index: u64) -> bool {
        match self {
            AvailabilityBitfield::Constant(value) => *value,
            AvailabilityBitfield::Bitstream(bytes) => {
                let byte = (index / 8) as usize;
                match bytes.get(byte) {
                    Some(b) => (b >> (index % 8)) & 1 == 1,
                    None => false,
                }
            }
        }
    }
}

/// Decoded availability for one subtree block
#[derive(Clone, Debug)]
pub struct SubtreeAvailability {
    scheme: SubdivisionScheme,
    subtree_levels: u32,
    tile_availability: AvailabilityBitfield,
    content_availability: Vec<AvailabilityBitfield>,
    child_subtree_availability: AvailabilityBitfield,
}

impl SubtreeAvailability {
    pub fn new(
        scheme: SubdivisionScheme,
        subtree_levels: u32,
        tile_availability: AvailabilityBitfield,
        content_availability: Vec<AvailabilityBitfield>,
        child_subtree_availability: AvailabilityBitfield,
    ) -> Self {
        Self {
            scheme,
            subtree_levels,
            tile_availability,
            content_availability,
            child_subtree_availability,
        }
    }

    pub fn scheme(&self) -> SubdivisionScheme {
        self.scheme
    }

    pub fn subtree_levels(&self) -> u32 {
        self.subtree_levels
    }

    /// Decode a binary subtree blob. Runs on a worker task.
    pub fn decode(
        scheme: SubdivisionScheme,
        subtree_levels: u32,
        data: &[u8],
    ) -> Result<SubtreeAvailability> {
        if data.len() < HEADER_SIZE {
            return Err(Error::Parse(format!(
                "subtree is {} bytes, the header alone is {}",
                data.len(),
                HEADER_SIZE
            )));
        }

        if &data[0..4] != b"subt" {
            return Err(Error::Parse("subtree has wrong magic".to_string()));
        }

        let version = read_u32_le(data, 4).unwrap();
        if version != 1 {
            return Err(Error::Parse(format!(
                "subtree has unsupported version {}",
                version
            )));
        }

        let json_length = read_u64_le(data, 8) as usize;
        let binary_length = read_u64_le(data, 16) as usize;

        let json_end = HEADER_SIZE
            .checked_add(json_length)
            .filter(|&n| n <= data.len())
            .ok_or_else(|| Error::Parse("subtree JSON chunk overruns the blob".to_string()))?;
        let binary_end = json_end
            .checked_add(binary_length)
            .filter(|&n| n <= data.len())
            .ok_or_else(|| Error::Parse("subtree binary chunk overruns the blob".to_string()))?;

        let json: Value = serde_json::from_slice(&data[HEADER_SIZE..json_end])
            .map_err(|e| Error::Parse(format!("subtree JSON: {}", e)))?;
        let binary = &data[json_end..binary_end];

        let buffer_views = json
            .get("bufferViews")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let decode_field = |value: Option<&Value>| -> Result<AvailabilityBitfield> {
            decode_availability(value, &buffer_views, binary)
        };

        let content_availability = match json.get("contentAvailability") {
            Some(Value::Array(entries)) => entries
                .iter()
                .map(|entry| decode_field(Some(entry)))
                .collect::<Result<Vec<_>>>()?,
            other => vec![decode_field(other)?],
        };

        Ok(SubtreeAvailability {
            scheme,
            subtree_levels,
            tile_availability: decode_field(json.get("tileAvailability"))?,
            content_availability,
            child_subtree_availability: decode_field(json.get("childSubtreeAvailability"))?,
        })
    }

    /// First bit index of a level within the level-ordered bitfield
    fn level_offset(&self, relative_level: u32) -> u64 {
        let k = self.scheme.branching_factor();
        (k.pow(relative_level) - 1) / (k - 1)
    }

    /// Whether the tile at `(relative_level, relative_morton)` exists
    pub fn is_tile_available(&self, relative_level: u32, relative_morton: u64) -> bool {
        if relative_level >= self.subtree_levels {
            return false;
        }
        self.tile_availability
            .get(self.level_offset(relative_level) + relative_morton)
    }

    /// Whether the tile at `(relative_level, relative_morton)` has content
    pub fn is_content_available(
        &self,
        relative_level: u32,
        relative_morton: u64,
        content_index: usize,
    ) -> bool {
        if relative_level >= self.subtree_levels {
            return false;
        }
        match self.content_availability.get(content_index) {
            Some(field) => field.get(self.level_offset(relative_level) + relative_morton),
            None => false,
        }
    }

    /// Whether the child subtree rooted just below this block exists
    ///
    /// `child_morton` is relative to this subtree's root, at level
    /// `subtree_levels`.
    pub fn is_subtree_available(&self, child_morton: u64) -> bool {
        self.child_subtree_availability.get(child_morton)
    }
}

fn read_u64_le(data: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[offset..offset + 8]);
    u64::from_le_bytes(bytes)
}

fn decode_availability(
    value: Option<&Value>,
    buffer_views: &[Value],
    binary: &[u8],
) -> Result<AvailabilityBitfield> {
    let value = match value {
        Some(v) => v,
        None => return Ok(AvailabilityBitfield::Constant(false)),
    };

    if let Some(constant) = value.get("constant").and_then(Value::as_u64) {
        return Ok(AvailabilityBitfield::Constant(constant != 0));
    }

    let view_index = value
        .get("bitstream")
        .and_then(Value::as_u64)
        .ok_or_else(|| Error::Parse("availability has neither constant nor bitstream".to_string()))?
        as usize;

    let view = buffer_views
        .get(view_index)
        .ok_or_else(|| Error::Parse(format!("bufferView {} out of range", view_index)))?;
    let offset = view.get("byteOffset").and_then(Value::as_u64).unwrap_or(0) as usize;
    let length = view
        .get("byteLength")
        .and_then(Value::as_u64)
        .ok_or_else(|| Error::Parse("bufferView missing byteLength".to_string()))?
        as usize;

    let end = offset
        .checked_add(length)
        .filter(|&n| n <= binary.len())
        .ok_or_else(|| Error::Parse("bufferView overruns the binary chunk".to_string()))?;

    Ok(AvailabilityBitfield::Bitstream(binary[offset..end].to_vec()))
}

/// Encode a subtree blob from already-built bitfields (test support)
#[cfg(test)]
pub(crate) fn make_subtree_binary(
    tile: &AvailabilityBitfield,
    content: &AvailabilityBitfield,
    child_subtree: &AvailabilityBitfield,
) -> Vec<u8> {
    let mut binary: Vec<u8> = Vec::new();
    let mut buffer_views = Vec::new();

    let mut field_json = |field: &AvailabilityBitfield| match field {
        AvailabilityBitfield::Constant(value) => {
            serde_json::json!({ "constant": if *value { 1 } else { 0 } })
        }
        AvailabilityBitfield::Bitstream(bytes) => {
            let offset = binary.len();
            binary.extend_from_slice(bytes);
            buffer_views.push(serde_json::json!({
                "buffer": 0,
                "byteOffset": offset,
                "byteLength": bytes.len(),
            }));
            serde_json::json!({ "bitstream": buffer_views.len() - 1 })
        }
    };

    let tile_json = field_json(tile);
    let content_json = field_json(content);
    let child_json = field_json(child_subtree);
    drop(field_json);

    let json = serde_json::json!({
        "tileAvailability": tile_json,
        "contentAvailability": content_json,
        "childSubtreeAvailability": child_json,
        "bufferViews": buffer_views,
    });
    let json_bytes = serde_json::to_vec(&json).unwrap();

    let mut out = Vec::new();
    out.extend_from_slice(b"subt");
    out.extend_from_slice(&1u32.to_le_bytes());
    out.extend_from_slice(&(json_bytes.len() as u64).to_le_bytes());
    out.extend_from_slice(&(binary.len() as u64).to_le_bytes());
    out.extend_from_slice(&json_bytes);
    out.extend_from_slice(&binary);
    out
}

/// Build a bitstream with the given bit indices set (test support)
#[cfg(test)]
pub(crate) fn bitstream_with(bits: &[u64]) -> AvailabilityBitfield {
    let max = bits.iter().copied().max().unwrap_or(0);
    let mut bytes = vec![0u8; (max / 8 + 1) as usize];
    for &bit in bits {
        bytes[(bit / 8) as usize] |= 1 << (bit % 8);
    }
    AvailabilityBitfield::Bitstream(bytes)
}
