//! Binary and text glTF parsing

use crate::content::registry::{ContentLoader, ContentRegistry};
use crate::content::{read_u32_le, LoadInput, MeshModel, MeshSection, TileContent};
use crate::core::error::Error;
use crate::core::types::Result;

const GLB_MAGIC: u32 = 0x4654_6C67; // "glTF"
const CHUNK_TYPE_JSON: u32 = 0x4E4F_534A; // "JSON"
const CHUNK_TYPE_BIN: u32 = 0x004E_4942; // "BIN\0"

/// Parse a binary glTF (glb) blob into its JSON and BIN chunks
pub fn parse_glb(url: &str, data: &[u8]) -> Result<MeshSection> {
    if data.len() < 12 {
        return Err(Error::Validation(format!(
            "glb {} is {} bytes, the header alone is 12",
            url,
            data.len()
        )));
    }

    let magic = read_u32_le(data, 0).unwrap();
    if magic != GLB_MAGIC {
        return Err(Error::Validation(format!(
            "glb {} has magic {:#010x}, expected 'glTF'",
            url, magic
        )));
    }

    let version = read_u32_le(data, 4).unwrap();
    if version != 2 {
        return Err(Error::Validation(format!(
            "glb {} has unsupported version {}",
            url, version
        )));
    }

    let length = read_u32_le(data, 8).unwrap() as usize;
    if length > data.len() {
        return Err(Error::Validation(format!(
            "glb {} declares {} bytes but only {} are available",
            url,
            length,
            data.len()
        )));
    }

    let mut section = MeshSection::default();
    let mut pos = 12;
    while pos + 8 <= length {
        let chunk_length = read_u32_le(data, pos).unwrap() as usize;
        let chunk_type = read_u32_le(data, pos + 4).unwrap();
        let payload_start = pos + 8;
        let payload_end = payload_start + chunk_length;
        if payload_end > length {
            return Err(Error::Validation(format!(
                "glb {} chunk at offset {} overruns the declared length",
                url, pos
            )));
        }

        let payload = &data[payload_start..payload_end];
        match chunk_type {
            CHUNK_TYPE_JSON => section.json = payload.to_vec(),
            CHUNK_TYPE_BIN => section.binary = payload.to_vec(),
            // Unknown chunk types are skipped per the glb container rules
            _ => {}
        }

        pos = payload_end;
    }

    if section.json.is_empty() {
        return Err(Error::Validation(format!("glb {} has no JSON chunk", url)));
    }

    Ok(section)
}

/// Loads standalone glTF content, binary or text
pub struct GltfLoader;

impl ContentLoader for GltfLoader {
    fn load(&self, _registry: &ContentRegistry, input: &LoadInput<'_>) -> Result<TileContent> {
        let section = if input.data.starts_with(b"glTF") {
            parse_glb(input.url, input.data)?
        } else {
            // Text glTF: the whole body is the JSON structure
            serde_json::from_slice::<serde_json::Value>(input.data)
                .map_err(|e| Error::Parse(format!("glTF {}: {}", input.url, e)))?;
            MeshSection {
                json: input.data.to_vec(),
                binary: Vec::new(),
            }
        };

        Ok(TileContent::mesh(
            MeshModel::from_section(section),
            input.up_axis,
        ))
    }
}

/// Build a minimal valid glb for tests
#[cfg(test)]
pub(crate) fn make_glb(json: &[u8], binary: &[u8]) -> Vec<u8> {
    let mut json = json.to_vec();
    while json.len() % 4 != 0 {
        json.push(b' ');
    }
    let mut binary = binary.to_vec();
    while binary.len() % 4 != 0 {
        binary.push(0);
    }

    let mut out = Vec::new();
    let total = 12 + 8 + json.len() + if binary.is_empty() { 0 } else { 8 + binary.len() };
    out.extend_from_slice(b"glTF");
    out.extend_from_slice(&2u32.to_le_bytes());
    out.extend_from_slice(&(total as u32).to_le_bytes());
    out.extend_from_slice(&(json.len() as u32).to_le_bytes());
    out.extend_from_slice(&CHUNK_TYPE_JSON.to_le_bytes());
    out.extend_from_slice(&json);
    if !binary.is_empty() {
        out.extend_from_slice(&(binary.len() as u32).to_le_bytes());
        out.extend_from_slice(&CHUNK_TYPE_BIN.to_le_bytes());
        out.extend_from_slice(&binary);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::Axis;

    #[test]
    fn test_parse_glb_chunks() {
        let glb = make_glb(br#"{"asset":{"version":"2.0"}}"#, &[1, 2, 3, 4]);
        let section = parse_glb("t.glb", &glb).unwrap();
        assert!(section.json.starts_with(br#"{"asset""#));
        assert_eq!(section.binary, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_parse_glb_no_bin_chunk() {
        let glb = make_glb(b"{}", &[]);
        let section = parse_glb("t.glb", &glb).unwrap();
        assert!(section.binary.is_empty());
    }

    #[test]
    fn test_wrong_magic() {
        let err = parse_glb("t.glb", b"nope00000000").unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_wrong_version() {
        let mut glb = make_glb(b"{}", &[]);
        glb[4] = 1;
        assert!(matches!(parse_glb("t.glb", &glb), Err(Error::Validation(_))));
    }

    #[test]
    fn test_declared_length_overrun() {
        let mut glb = make_glb(b"{}", &[]);
        let len = (glb.len() as u32 + 100).to_le_bytes();
        glb[8..12].copy_from_slice(&len);
        assert!(matches!(parse_glb("t.glb", &glb), Err(Error::Validation(_))));
    }

    #[test]
    fn test_chunk_overrun() {
        let mut glb = make_glb(b"{}", &[]);
        // Inflate the JSON chunk length past the container end
        let bad = 0xffffu32.to_le_bytes();
        glb[12..16].copy_from_slice(&bad);
        assert!(matches!(parse_glb("t.glb", &glb), Err(Error::Validation(_))));
    }

    #[test]
    fn test_loader_handles_text_gltf() {
        let registry = ContentRegistry::new();
        let input = LoadInput {
            url: "t.gltf",
            content_type: "model/gltf+json",
            data: br#"{"asset":{"version":"2.0"}}"#,
            up_axis: Axis::Z,
        };
        match GltfLoader.load(&registry, &input).unwrap() {
            TileContent::Mesh { model, up_axis, .. } => {
                assert_eq!(model.sections.len(), 1);
                assert_eq!(up_axis, Axis::Z);
            }
            other => panic!("unexpected content {:?}", other),
        }
    }

    #[test]
    fn test_loader_rejects_text_garbage() {
        let registry = ContentRegistry::new();
        let input = LoadInput {
            url: "t.gltf",
            content_type: "",
            data: b"not json at all",
            up_axis: Axis::Y,
        };
        assert!(GltfLoader.load(&registry, &input).is_err());
    }
}
