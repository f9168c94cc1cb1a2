//! Asset retrieval: the fetch interface, URL handling, and service endpoints

pub mod accessor;
pub mod url;
pub mod endpoint;

pub use accessor::{AssetAccessor, Response, StaticAccessor};
pub use endpoint::{AssetKind, Endpoint, EndpointCache};
