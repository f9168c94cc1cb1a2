//! Quantized-mesh terrain tiles

use crate::content::registry::{ContentLoader, ContentRegistry};
use crate::content::{LoadInput, MeshModel, MeshSection, TileContent};
use crate::core::error::Error;
use crate::core::types::Result;

/// Minimum size of a quantized-mesh tile: the 88-byte header plus the
/// vertex count field
const MINIMUM_SIZE: usize = 92;

/// Loads `quantized-mesh-1.0` terrain tiles
///
/// The vertex and index data are carried through opaquely; decoding the
/// zigzag-encoded mesh belongs to the renderer side of the pipeline.
pub struct QuantizedMeshLoader;

impl ContentLoader for QuantizedMeshLoader {
    fn load(&self, _registry: &ContentRegistry, input: &LoadInput<'_>) -> Result<TileContent> {
        if input.data.len() < MINIMUM_SIZE {
            return Err(Error::Validation(format!(
                "quantized-mesh tile {} is {} bytes, minimum is {}",
                input.url,
                input.data.len(),
                MINIMUM_SIZE
            )));
        }

        let section = MeshSection {
            json: Vec::new(),
            binary: input.data.to_vec(),
        };

        Ok(TileContent::mesh(
            MeshModel::from_section(section),
            input.up_axis,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::Axis;

    fn load(data: &[u8]) -> Result<TileContent> {
        let registry = ContentRegistry::new();
        QuantizedMeshLoader.load(
            &registry,
            &LoadInput {
                url: "3/5/7.terrain",
                content_type: "application/vnd.quantized-mesh",
                data,
                up_axis: Axis::Y,
            },
        )
    }

    #[test]
    fn test_load_carries_payload() {
        let data = vec![0u8; 200];
        match load(&data).unwrap() {
            TileContent::Mesh { model, .. } => {
                assert_eq!(model.byte_size(), 200);
            }
            other => panic!("unexpected content {:?}", other),
        }
    }

    #[test]
    fn test_too_short() {
        assert!(matches!(load(&[0u8; 50]), Err(Error::Validation(_))));
    }
}
