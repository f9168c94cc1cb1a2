//! External tileset JSON content

use crate::content::registry::{ContentLoader, ContentRegistry};
use crate::content::{LoadInput, TileContent};
use crate::core::error::Error;
use crate::core::types::Result;

/// Loads a JSON blob as a pointer to another tileset
///
/// The JSON is parsed on the worker task; the main thread grafts the
/// external root as a child of the pointing tile when the content is
/// promoted to `Done`.
pub struct ExternalTilesetLoader;

impl ContentLoader for ExternalTilesetLoader {
    fn load(&self, _registry: &ContentRegistry, input: &LoadInput<'_>) -> Result<TileContent> {
        let tileset: serde_json::Value = serde_json::from_slice(input.data)
            .map_err(|e| Error::Parse(format!("external tileset {}: {}", input.url, e)))?;

        if !tileset.is_object() {
            return Err(Error::Parse(format!(
                "external tileset {} is not a JSON object",
                input.url
            )));
        }

        Ok(TileContent::External {
            root_url: input.url.to_string(),
            tileset,
        })
    }
}
