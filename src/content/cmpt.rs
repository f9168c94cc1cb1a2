//! Composite (`cmpt`) tiles: a container of inner tiles

use crate::content::registry::{ContentLoader, ContentRegistry};
use crate::content::{read_u32_le, LoadInput, TileContent};
use crate::core::error::Error;
use crate::core::types::Result;

pub const HEADER_SIZE: usize = 16;
pub const INNER_HEADER_SIZE: usize = 12;

/// Loads `cmpt` tiles by dispatching each inner tile back through the
/// registry and merging the resulting meshes
///
/// The composite's declared byte length bounds every inner read; a tile
/// that runs past the bound ends decoding with a warning. A composite with
/// exactly one successful inner tile yields that tile's content unchanged.
pub struct CompositeLoader;

impl ContentLoader for CompositeLoader {
    fn load(&self, registry: &ContentRegistry, input: &LoadInput<'_>) -> Result<TileContent> {
        let data = input.data;
        if data.len() < HEADER_SIZE {
            log::warn!(
                "Composite tile {} must be at least {} bytes",
                input.url,
                HEADER_SIZE
            );
            return Err(Error::Validation(format!(
                "composite {} shorter than its header",
                input.url
            )));
        }

        if &data[0..4] != b"cmpt" {
            log::warn!(
                "Composite tile {} does not have the expected magic value 'cmpt'",
                input.url
            );
            return Err(Error::Validation(format!(
                "composite {} has wrong magic",
                input.url
            )));
        }

        let version = read_u32_le(data, 4).unwrap();
        if version != 1 {
            log::warn!("Unsupported composite tile version {}", version);
            return Err(Error::Validation(format!(
                "composite {} has unsupported version {}",
                input.url, version
            )));
        }

        let byte_length = read_u32_le(data, 8).unwrap() as usize;
        if byte_length > data.len() {
            log::warn!(
                "Composite tile byteLength is {} but only {} bytes are available",
                byte_length,
                data.len()
            );
            return Err(Error::Validation(format!(
                "composite {} length overrun",
                input.url
            )));
        }

        let tiles_length = read_u32_le(data, 12).unwrap();

        let mut contents: Vec<TileContent> = Vec::new();
        let mut pos = HEADER_SIZE;
        for _ in 0..tiles_length {
            if pos >= byte_length {
                break;
            }
            if pos + INNER_HEADER_SIZE > byte_length {
                log::warn!("Composite tile ends before all embedded tiles could be read");
                break;
            }

            let inner_length = read_u32_le(data, pos + 8).unwrap() as usize;
            let inner_end = match pos.checked_add(inner_length) {
                Some(end) if end <= byte_length && inner_length >= INNER_HEADER_SIZE => end,
                _ => {
                    log::warn!("Composite tile ends before all embedded tiles could be read");
                    break;
                }
            };

            let inner = input.derive(&data[pos..inner_end]);
            pos = inner_end;

            match registry.dispatch(&inner) {
                Ok(TileContent::Unknown) | Ok(TileContent::Empty) => {}
                Ok(content) => contents.push(content),
                Err(e) => {
                    log::warn!("Inner tile of composite {} failed to load: {}", input.url, e);
                }
            }
        }

        if contents.is_empty() {
            if tiles_length > 0 {
                log::warn!(
                    "Composite tile {} does not contain any loadable inner tiles",
                    input.url
                );
            }
            return Err(Error::Validation(format!(
                "composite {} has no loadable inner tiles",
                input.url
            )));
        }

        let mut contents = contents.into_iter();
        let mut result = contents.next().unwrap();
        for content in contents {
            if let (
                TileContent::Mesh { model, .. },
                TileContent::Mesh {
                    model: inner_model, ..
                },
            ) = (&mut result, content)
            {
                model.merge(inner_model);
            }
        }

        Ok(result)
    }
}

/// Build a cmpt blob from raw inner tiles
#[cfg(test)]
pub(crate) fn make_cmpt(inner_tiles: &[Vec<u8>]) -> Vec<u8> {
    let total: usize = HEADER_SIZE + inner_tiles.iter().map(Vec::len).sum::<usize>();
    let mut out = Vec::new();
    out.extend_from_slice(b"cmpt");
    out.extend_from_slice(&1u32.to_le_bytes());
    out.extend_from_slice(&(total as u32).to_le_bytes());
    out.extend_from_slice(&(inner_tiles.len() as u32).to_le_bytes());
    for inner in inner_tiles {
        out.extend_from_slice(inner);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::b3dm::make_b3dm;
    use crate::content::gltf::make_glb;
    use crate::content::Axis;

    fn load(data: &[u8]) -> Result<TileContent> {
        let registry = ContentRegistry::with_defaults();
        registry.dispatch(&LoadInput {
            url: "t.cmpt",
            content_type: "",
            data,
            up_axis: Axis::Y,
        })
    }

    #[test]
    fn test_single_inner_tile_passes_through() {
        let b3dm = make_b3dm(&make_glb(br#"{"nodes":[]}"#, &[7, 7]));
        let cmpt = make_cmpt(&[b3dm.clone()]);

        let direct = load(&b3dm).unwrap();
        let wrapped = load(&cmpt).unwrap();
        assert_eq!(direct, wrapped);
    }

    #[test]
    fn test_two_inner_tiles_merge() {
        let a = make_b3dm(&make_glb(br#"{"a":1}"#, &[1]));
        let b = make_b3dm(&make_glb(br#"{"b":2}"#, &[2]));
        let cmpt = make_cmpt(&[a, b]);

        match load(&cmpt).unwrap() {
            TileContent::Mesh { model, .. } => assert_eq!(model.sections.len(), 2),
            other => panic!("unexpected content {:?}", other),
        }
    }

    #[test]
    fn test_nested_composite() {
        let b3dm = make_b3dm(&make_glb(b"{}", &[1]));
        let inner_cmpt = make_cmpt(&[b3dm]);
        let outer = make_cmpt(&[inner_cmpt]);

        match load(&outer).unwrap() {
            TileContent::Mesh { model, .. } => assert_eq!(model.sections.len(), 1),
            other => panic!("unexpected content {:?}", other),
        }
    }

    #[test]
    fn test_inner_length_overrun_stops_decoding() {
        let good = make_b3dm(&make_glb(b"{}", &[]));
        let mut bad = make_b3dm(&make_glb(b"{}", &[]));
        // Inflate the inner byteLength past the composite's end
        bad[8..12].copy_from_slice(&10_000u32.to_le_bytes());

        let cmpt = make_cmpt(&[good, bad]);
        match load(&cmpt).unwrap() {
            TileContent::Mesh { model, .. } => assert_eq!(model.sections.len(), 1),
            other => panic!("unexpected content {:?}", other),
        }
    }

    #[test]
    fn test_empty_composite_fails() {
        let cmpt = make_cmpt(&[]);
        assert!(load(&cmpt).is_err());
    }

    #[test]
    fn test_wrong_version() {
        let mut cmpt = make_cmpt(&[make_b3dm(&[])]);
        cmpt[4..8].copy_from_slice(&2u32.to_le_bytes());
        assert!(load(&cmpt).is_err());
    }

    #[test]
    fn test_declared_length_bounds_inner_reads() {
        let b3dm = make_b3dm(&make_glb(b"{}", &[]));
        let mut cmpt = make_cmpt(&[b3dm]);
        // Truncate the declared composite length into the inner tile
        cmpt[8..12].copy_from_slice(&(HEADER_SIZE as u32 + 4).to_le_bytes());
        assert!(load(&cmpt).is_err());
    }
}
