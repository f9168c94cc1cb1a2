//! Batched 3D model (`b3dm`) tiles

use crate::content::gltf::parse_glb;
use crate::content::registry::{ContentLoader, ContentRegistry};
use crate::content::{read_u32_le, LoadInput, MeshModel, TileContent};
use crate::core::error::Error;
use crate::core::types::Result;

pub const HEADER_SIZE: usize = 28;

/// Loads `b3dm` tiles: a 28-byte header, feature and batch tables, then an
/// embedded binary glTF
pub struct BatchedModelLoader;

impl ContentLoader for BatchedModelLoader {
    fn load(&self, _registry: &ContentRegistry, input: &LoadInput<'_>) -> Result<TileContent> {
        let data = input.data;
        if data.len() < HEADER_SIZE {
            return Err(Error::Validation(format!(
                "b3dm {} is {} bytes, the header alone is {}",
                input.url,
                data.len(),
                HEADER_SIZE
            )));
        }

        if &data[0..4] != b"b3dm" {
            return Err(Error::Validation(format!(
                "b3dm {} does not have the expected magic value",
                input.url
            )));
        }

        let version = read_u32_le(data, 4).unwrap();
        if version != 1 {
            return Err(Error::Validation(format!(
                "b3dm {} has unsupported version {}",
                input.url, version
            )));
        }

        let byte_length = read_u32_le(data, 8).unwrap() as usize;
        if byte_length > data.len() {
            return Err(Error::Validation(format!(
                "b3dm {} declares {} bytes but only {} are available",
                input.url,
                byte_length,
                data.len()
            )));
        }

        let ft_json = read_u32_le(data, 12).unwrap() as usize;
        let ft_binary = read_u32_le(data, 16).unwrap() as usize;
        let bt_json = read_u32_le(data, 20).unwrap() as usize;
        let bt_binary = read_u32_le(data, 24).unwrap() as usize;

        let glb_start = HEADER_SIZE
            .checked_add(ft_json)
            .and_then(|n| n.checked_add(ft_binary))
            .and_then(|n| n.checked_add(bt_json))
            .and_then(|n| n.checked_add(bt_binary))
            .filter(|&n| n <= byte_length)
            .ok_or_else(|| {
                Error::Validation(format!(
                    "b3dm {} table lengths overrun the tile",
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

/// Build a b3dm blob wrapping the given glb payload
#[cfg(test)]
pub(crate) fn make_b3dm(glb: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"b3dm");
    out.extend_from_slice(&1u32.to_le_bytes());
    out.extend_from_slice(&((HEADER_SIZE + glb.len()) as u32).to_le_bytes());
    out.extend_from_slice(&[0u8; 16]); // empty feature and batch tables
    out.extend_from_slice(glb);
    out
}
