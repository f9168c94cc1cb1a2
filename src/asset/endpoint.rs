//! Asset-service endpoint descriptors and their cache

use std::collections::HashMap;
use std::sync::Mutex;

use serde::Deserialize;

use crate::asset::url;
use crate::core::error::Error;
use crate::core::types::Result;

/// What kind of dataset an asset-service endpoint serves
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssetKind {
    Tiles3d,
    Terrain,
    Imagery,
}

/// An attribution entry the service asks to be displayed
#[derive(Clone, Debug, Deserialize)]
pub struct Attribution {
    #[serde(default)]
    pub html: String,
    #[serde(default)]
    pub collapsible: bool,
}

/// A parsed asset-service endpoint descriptor
#[derive(Clone, Debug)]
pub struct Endpoint {
    pub kind: AssetKind,
    /// Resolved dataset URL. For terrain assets this already points at the
    /// layer descriptor (`layer.json`).
    pub url: String,
    pub access_token: String,
    pub attributions: Vec<Attribution>,
}

#[derive(Deserialize)]
struct EndpointJson {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    url: String,
    #[serde(rename = "accessToken", default)]
    access_token: String,
    #[serde(default)]
    attributions: Vec<Attribution>,
}

impl Endpoint {
    /// Parse an endpoint response body
    pub fn parse(data: &[u8]) -> Result<Endpoint> {
        let json: EndpointJson = serde_json::from_slice(data)
            .map_err(|e| Error::Parse(format!("endpoint response: {}", e)))?;

        let kind = match json.kind.as_str() {
            "3DTILES" => AssetKind::Tiles3d,
            "TERRAIN" => AssetKind::Terrain,
            "IMAGERY" => AssetKind::Imagery,
            other => {
                return Err(Error::Unsupported(format!(
                    "asset endpoint type '{}'",
                    other
                )))
            }
        };

        let endpoint_url = if kind == AssetKind::Terrain {
            // Terrain assets serve a layer descriptor next to the root URL
            url::resolve(&json.url, "layer.json")
        } else {
            json.url
        };

        Ok(Endpoint {
            kind,
            url: endpoint_url,
            access_token: json.access_token,
            attributions: json.attributions,
        })
    }

    /// The request header granting access to this endpoint's assets
    pub fn authorization_header(&self) -> (String, String) {
        (
            "Authorization".to_string(),
            format!("Bearer {}", self.access_token),
        )
    }
}

/// Build the URL of an asset's endpoint descriptor
pub fn endpoint_url(api_base: &str, asset_id: u64, access_token: Option<&str>) -> String {
    let base = url::resolve(api_base, &format!("v1/assets/{}/endpoint", asset_id));
    match access_token {
        Some(token) if !token.is_empty() => url::add_query(&base, "access_token", token),
        _ => base,
    }
}

/// Maps endpoint-descriptor URLs to parsed endpoints
///
/// Mutated on the main thread only; entries live as long as the cache.
#[derive(Default)]
pub struct EndpointCache {
    inner: Mutex<HashMap<String, Endpoint>>,
}

impl EndpointCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, url: &str) -> Option<Endpoint> {
        self.inner.lock().unwrap().get(url).cloned()
    }

    pub fn insert(&self, url: &str, endpoint: Endpoint) {
        self.inner
            .lock()
            .unwrap()
            .insert(url.to_string(), endpoint);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_3dtiles_endpoint() {
        let body = br#"{
            "type": "3DTILES",
            "url": "https://assets.example.com/1/tileset.json",
            "accessToken": "tok123",
            "attributions": [{"html": "<span>Data</span>", "collapsible": true}]
        }"#;

        let endpoint = Endpoint::parse(body).unwrap();
        assert_eq!(endpoint.kind, AssetKind::Tiles3d);
        assert_eq!(endpoint.url, "https://assets.example.com/1/tileset.json");
        assert_eq!(endpoint.access_token, "tok123");
        assert_eq!(endpoint.attributions.len(), 1);
        assert!(endpoint.attributions[0].collapsible);

        let (name, value) = endpoint.authorization_header();
        assert_eq!(name, "Authorization");
        assert_eq!(value, "Bearer tok123");
    }

    #[test]
    fn test_parse_terrain_appends_layer_json() {
        let body = br#"{
            "type": "TERRAIN",
            "url": "https://assets.example.com/2/",
            "accessToken": "t"
        }"#;

        let endpoint = Endpoint::parse(body).unwrap();
        assert_eq!(endpoint.kind, AssetKind::Terrain);
        assert_eq!(endpoint.url, "https://assets.example.com/2/layer.json");
    }

    #[test]
    fn test_parse_unknown_type() {
        let body = br#"{"type": "GEOJSON", "url": "x", "accessToken": "t"}"#;
        assert!(matches!(
            Endpoint::parse(body),
            Err(Error::Unsupported(_))
        ));
    }

    #[test]
    fn test_parse_garbage() {
        assert!(matches!(Endpoint::parse(b"not json"), Err(Error::Parse(_))));
    }

    #[test]
    fn test_endpoint_url() {
        assert_eq!(
            endpoint_url("https://api.example.com/", 1234, Some("tok")),
            "https://api.example.com/v1/assets/1234/endpoint?access_token=tok"
        );
        assert_eq!(
            endpoint_url("https://api.example.com/", 1234, None),
            "https://api.example.com/v1/assets/1234/endpoint"
        );
    }

    #[test]
    fn test_cache_roundtrip() {
        let cache = EndpointCache::new();
        assert!(cache.get("u").is_none());

        let endpoint = Endpoint {
            kind: AssetKind::Tiles3d,
            url: "https://x".to_string(),
            access_token: "t".to_string(),
            attributions: Vec::new(),
        };
        cache.insert("u", endpoint);
        assert_eq!(cache.get("u").unwrap().access_token, "t");
    }
}
