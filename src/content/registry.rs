//! Dispatches raw byte blobs to the right content loader

use std::collections::HashMap;
use std::sync::Arc;

use crate::content::{LoadInput, TileContent};
use crate::core::types::Result;

/// Produces tile content from one raw blob
pub trait ContentLoader: Send + Sync {
    /// Parse the input. Runs on a worker task. Loaders that embed other
    /// tiles re-enter the registry through `registry`.
    fn load(&self, registry: &ContentRegistry, input: &LoadInput<'_>) -> Result<TileContent>;
}

/// Keyed loader maps: by magic, by MIME type, by URL extension
///
/// Resolution order is fixed: magic, then content type (lowercased, before
/// any `;` parameter), then lowercased URL extension, then a JSON sniff for
/// external tilesets. Anything else is "not understood" content.
pub struct ContentRegistry {
    by_magic: HashMap<String, Arc<dyn ContentLoader>>,
    by_content_type: HashMap<String, Arc<dyn ContentLoader>>,
    by_extension: HashMap<String, Arc<dyn ContentLoader>>,
}

impl ContentRegistry {
    pub fn new() -> Self {
        Self {
            by_magic: HashMap::new(),
            by_content_type: HashMap::new(),
            by_extension: HashMap::new(),
        }
    }

    /// A registry with the standard loaders registered
    pub fn with_defaults() -> Self {
        use crate::content::{b3dm, cmpt, external, gltf, i3dm, pnts, quantized_mesh};

        let mut registry = Self::new();

        let b3dm = Arc::new(b3dm::BatchedModelLoader);
        let i3dm = Arc::new(i3dm::InstancedModelLoader);
        let cmpt = Arc::new(cmpt::CompositeLoader);
        let pnts = Arc::new(pnts::PointCloudLoader);
        let gltf = Arc::new(gltf::GltfLoader);
        let external = Arc::new(external::ExternalTilesetLoader);
        let terrain = Arc::new(quantized_mesh::QuantizedMeshLoader);

        registry.register_magic("b3dm", b3dm.clone());
        registry.register_magic("i3dm", i3dm.clone());
        registry.register_magic("cmpt", cmpt.clone());
        registry.register_magic("pnts", pnts.clone());
        registry.register_magic("glTF", gltf.clone());
        registry.register_magic("json", external.clone());

        registry.register_content_type("application/json", external.clone());
        registry.register_content_type("model/gltf-binary", gltf.clone());
        registry.register_content_type("model/gltf+json", gltf.clone());
        registry.register_content_type("application/vnd.quantized-mesh", terrain.clone());

        registry.register_file_extension(".b3dm", b3dm);
        registry.register_file_extension(".i3dm", i3dm);
        registry.register_file_extension(".cmpt", cmpt);
        registry.register_file_extension(".pnts", pnts);
        registry.register_file_extension(".glb", gltf.clone());
        registry.register_file_extension(".gltf", gltf);
        registry.register_file_extension(".json", external);
        registry.register_file_extension(".terrain", terrain);

        registry
    }

    pub fn register_magic(&mut self, magic: &str, loader: Arc<dyn ContentLoader>) {
        log::info!("Registering content loader for magic {}", magic);
        self.by_magic.insert(magic.to_string(), loader);
    }

    pub fn register_content_type(&mut self, content_type: &str, loader: Arc<dyn ContentLoader>) {
        log::info!("Registering content loader for content type {}", content_type);
        self.by_content_type
            .insert(content_type.to_lowercase(), loader);
    }

    pub fn register_file_extension(&mut self, extension: &str, loader: Arc<dyn ContentLoader>) {
        log::info!("Registering content loader for extension {}", extension);
        self.by_extension.insert(extension.to_lowercase(), loader);
    }

    /// Select a loader for the blob and run it
    pub fn dispatch(&self, input: &LoadInput<'_>) -> Result<TileContent> {
        let magic = magic_of(input.data);

        if let Some(magic) = &magic {
            if let Some(loader) = self.by_magic.get(magic.as_ref()) {
                return loader.load(self, input);
            }
        }

        let base_content_type = input
            .content_type
            .split(';')
            .next()
            .unwrap_or("")
            .to_lowercase();
        if let Some(loader) = self.by_content_type.get(&base_content_type) {
            return loader.load(self, input);
        }

        if let Some(extension) = extension_of(input.url) {
            if let Some(loader) = self.by_extension.get(&extension) {
                return loader.load(self, input);
            }
        }

        // Plausibly a JSON external tileset?
        let first = input.data.iter().find(|b| !b.is_ascii_whitespace());
        if first == Some(&b'{') {
            if let Some(loader) = self.by_magic.get("json") {
                return loader.load(self, input);
            }
        }

        log::warn!(
            "No loader registered for tile {} with content type '{}' and magic '{}'",
            input.url,
            base_content_type,
            magic.as_deref().unwrap_or("")
        );
        Ok(TileContent::Unknown)
    }
}

impl Default for ContentRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// First four bytes of the blob as ASCII, if present
fn magic_of(data: &[u8]) -> Option<std::borrow::Cow<'_, str>> {
    if data.len() >= 4 {
        Some(String::from_utf8_lossy(&data[..4]))
    } else {
        None
    }
}

/// Lowercased extension of the URL, queries stripped
fn extension_of(url: &str) -> Option<String> {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    let dot = without_query.rfind('.')?;
    if without_query[dot..].contains('/') {
        return None;
    }
    Some(without_query[dot..].to_lowercase())
}
