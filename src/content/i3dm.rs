//! Instanced 3D model (`i3dm`) tiles

use crate::content::gltf::parse_glb;
use crate::content::registry::{ContentLoader, ContentRegistry};
use crate::content::{read_u32_le, LoadInput, MeshModel, TileContent};
use crate::core::error::Error;
use crate::core::types::Result;

pub const HEADER_SIZE: usize = 32;

/// Loads `i3dm` tiles: like b3dm but with a `gltfFormat` field selecting
/// between an embedded glb (1) and an external glTF URI (0)
pub struct InstancedModelLoader;

impl ContentLoader for InstancedModelLoader {
    fn load(&self, _registry: &ContentRegistry, input: &LoadInput<'_>) -> Result<TileContent> {
        let data = input.data;
        if data.len() < HEADER_SIZE {
            return Err(Error::Validation(format!(
                "i3dm {} is {} bytes, the header alone is {}",
                input.url,
                data.len(),
                HEADER_SIZE
            )));
        }

        if &data[0..4] != b"i3dm" {
            return Err(Error::Validation(format!(
                "i3dm {} does not have the expected magic value",
                input.url
            )));
        }

        let version = read_u32_le(data, 4).unwrap();
        if version != 1 {
            return Err(Error::Validation(format!(
                "i3dm {} has unsupported version {}",
                input.url, version
            )));
        }

        let byte_length = read_u32_le(data, 8).unwrap() as usize;
        if byte_length > data.len() {
            return Err(Error::Validation(format!(
                "i3dm {} declares {} bytes but only {} are available",
                input.url,
                byte_length,
                data.len()
            )));
        }

        let ft_json = read_u32_le(data, 12).unwrap() as usize;
        let ft_binary = read_u32_le(data, 16).unwrap() as usize;
        let bt_json = read_u32_le(data, 20).unwrap() as usize;
        let bt_binary = read_u32_le(data, 24).unwrap() as usize;
        let gltf_format = read_u32_le(data, 28).unwrap();

        if gltf_format != 1 {
            // The payload is a URI of an external glTF, which would need a
            // second fetch the loader cannot issue
            log::warn!(
                "i3dm {} references an external glTF; only embedded glb is supported",
                input.url
            );
            return Ok(TileContent::Unknown);
        }

        let glb_start = HEADER_SIZE
            .checked_add(ft_json)
            .and_then(|n| n.checked_add(ft_binary))
            .and_then(|n| n.checked_add(bt_json))
            .and_then(|n| n.checked_add(bt_binary))
            .filter(|&n| n <= byte_length)
            .ok_or_else(|| {
                Error::Validation(format!(
                    "i3dm {} table lengths overrun the tile",
                    input.url
                ))
            })?;

        let glb = &data[glb_start..byte_length];
        let model = if glb.is_empty() {
            MeshModel::default()
        } else {
            MeshModel::from_section(parse_glb(input.url, glb)?)
        };

        Ok(TileContent::mesh(model, input.up_axis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::gltf::make_glb;
    use crate::content::Axis;

    fn make_i3dm(gltf_format: u32, glb: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"i3dm");
        out.extend_from_slice(&1u32.to_le_bytes());
        out.extend_from_slice(&((HEADER_SIZE + glb.len()) as u32).to_le_bytes());
        out.extend_from_slice(&[0u8; 16]);
        out.extend_from_slice(&gltf_format.to_le_bytes());
        out.extend_from_slice(glb);
        out
    }

    fn load(data: &[u8]) -> Result<TileContent> {
        let registry = ContentRegistry::new();
        InstancedModelLoader.load(
            &registry,
            &LoadInput {
                url: "t.i3dm",
                content_type: "",
                data,
                up_axis: Axis::Y,
            },
        )
    }

    #[test]
    fn test_load_embedded_glb() {
        let i3dm = make_i3dm(1, &make_glb(b"{}", &[1]));
        match load(&i3dm).unwrap() {
            TileContent::Mesh { model, .. } => assert_eq!(model.sections.len(), 1),
            other => panic!("unexpected content {:?}", other),
        }
    }

    #[test]
    fn test_external_uri_is_unsupported() {
        let i3dm = make_i3dm(0, b"model.gltf");
        assert_eq!(load(&i3dm).unwrap(), TileContent::Unknown);
    }

    #[test]
    fn test_wrong_magic() {
        let mut i3dm = make_i3dm(1, &[]);
        i3dm[0..4].copy_from_slice(b"xxxx");
        assert!(matches!(load(&i3dm), Err(Error::Validation(_))));
    }

    #[test]
    fn test_too_short() {
        assert!(matches!(load(&b"i3dm"[..]), Err(Error::Validation(_))));
    }
}
