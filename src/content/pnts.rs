//! Point cloud (`pnts`) tiles

use crate::content::registry::{ContentLoader, ContentRegistry};
use crate::content::{read_u32_le, LoadInput, MeshModel, MeshSection, TileContent};
use crate::core::error::Error;
use crate::core::types::Result;

pub const HEADER_SIZE: usize = 28;

/// Loads `pnts` tiles
///
/// The point payload (feature table JSON plus binary) is carried through
/// opaquely; interpreting the positions and colors belongs to the renderer
/// side of the pipeline.
pub struct PointCloudLoader;

impl ContentLoader for PointCloudLoader {
    fn load(&self, _registry: &ContentRegistry, input: &LoadInput<'_>) -> Result<TileContent> {
        let data = input.data;
        if data.len() < HEADER_SIZE {
            return Err(Error::Validation(format!(
                "pnts {} is {} bytes, the header alone is {}",
                input.url,
                data.len(),
                HEADER_SIZE
            )));
        }

        if &data[0..4] != b"pnts" {
            return Err(Error::Validation(format!(
                "pnts {} does not have the expected magic value",
                input.url
            )));
        }

        let version = read_u32_le(data, 4).unwrap();
        if version != 1 {
            return Err(Error::Validation(format!(
                "pnts {} has unsupported version {}",
                input.url, version
            )));
        }

        let byte_length = read_u32_le(data, 8).unwrap() as usize;
        if byte_length > data.len() {
            return Err(Error::Validation(format!(
                "pnts {} declares {} bytes but only {} are available",
                input.url,
                byte_length,
                data.len()
            )));
        }

        let ft_json = read_u32_le(data, 12).unwrap() as usize;
        let ft_binary = read_u32_le(data, 16).unwrap() as usize;

        let json_end = HEADER_SIZE
            .checked_add(ft_json)
            .filter(|&n| n <= byte_length)
            .ok_or_else(|| {
                Error::Validation(format!("pnts {} feature table overruns the tile", input.url))
            })?;
        let binary_end = json_end
            .checked_add(ft_binary)
            .filter(|&n| n <= byte_length)
            .ok_or_else(|| {
                Error::Validation(format!("pnts {} feature table overruns the tile", input.url))
            })?;

        let section = MeshSection {
            json: data[HEADER_SIZE..json_end].to_vec(),
            binary: data[json_end..binary_end].to_vec(),
        };

        Ok(TileContent::mesh(
            MeshModel::from_section(section),
            input.up_axis,
        ))
    }
}
