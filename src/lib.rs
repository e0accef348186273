//! Import connector for ArcGIS map-service layers.
//!
//! The [`datasource::ArcGisDatasource`] facade implements the generic
//! [`datasource::Datasource`] contract used by import pipelines; the
//! [`arcgis`] module holds the individual protocol steps.

pub mod arcgis;
pub mod config;
pub mod datasource;

pub use arcgis::{ArcGisError, FeatureRecord, FieldDescriptor, ServiceMetadata};
pub use datasource::{ArcGisDatasource, Datasource, ResourceDescriptor};
