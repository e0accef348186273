//! ArcGIS map-service connector core
//!
//! # Module Structure
//!
//! - [`url`] - canonical layer URLs and file names
//! - [`http`] - client configuration and the [`http::Transport`] seam
//! - [`metadata`] - service metadata and the version gate
//! - [`features`] - object ID enumeration and feature retrieval
//! - [`error`] - the connector error taxonomy
//!
//! # Example
//!
//! ```ignore
//! use arcgis_import::arcgis::{canonicalize, fetch_features, fetch_ids, fetch_metadata};
//! use arcgis_import::arcgis::http::{HttpClientConfig, ReqwestTransport};
//!
//! async fn example() -> arcgis_import::arcgis::Result<()> {
//!     let transport = ReqwestTransport::new(&HttpClientConfig::default())?;
//!     let layer = canonicalize("https://host/arcgis/rest/services/Parks/MapServer")?;
//!     let metadata = fetch_metadata(&transport, &layer).await?;
//!     let ids = fetch_ids(&transport, &layer).await?;
//!     let features = fetch_features(&transport, &layer, &ids, &metadata.fields).await?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod features;
pub mod http;
pub mod metadata;
pub mod url;

pub use error::{ArcGisError, Result};
pub use features::{fetch_features, fetch_ids, FeatureRecord};
pub use metadata::{
    fetch_metadata, FieldDescriptor, ServiceMetadata, DEFAULT_MAX_RECORDS_PER_QUERY,
    MINIMUM_SUPPORTED_VERSION,
};
pub use self::url::{canonicalize, filename_from};
