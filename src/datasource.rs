//! Datasource contract and the ArcGIS facade
//!
//! Import pipelines talk to every remote source through [`Datasource`]. The
//! ArcGIS implementation is a two step protocol: `get_resource_metadata`
//! discovers the field catalogue, `get_resource` uses it to pull features.

use crate::arcgis::http::{HttpClientConfig, ReqwestTransport, Transport};
use crate::arcgis::{
    canonicalize, fetch_features, fetch_ids, fetch_metadata, filename_from, ArcGisError,
    FeatureRecord, Result, ServiceMetadata,
};
use async_trait::async_trait;
use serde::Serialize;

/// Name every ArcGIS resource is tagged with
pub const DATASOURCE_NAME: &str = "arcgis";

/// Public summary of a remote resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceDescriptor {
    pub id: String,
    pub title: String,
    /// Direct download URL, if the source offers one
    pub url: Option<String>,
    pub service: String,
    pub checksum: Option<String>,
    /// Size in bytes, 0 when unknown
    pub size: u64,
    pub filename: String,
}

/// Generic contract shared by all import sources
#[async_trait]
pub trait Datasource: Send + Sync {
    /// What [`Datasource::get_resource`] yields
    type Resource;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Source name used to select a connector
    fn name(&self) -> &'static str;

    /// Whether resources can be downloaded from a plain URL instead of
    /// calling [`Datasource::get_resource`]
    fn providers_download_url(&self) -> bool;

    /// List available resources, narrowed by `filter`
    fn get_resources_list(&self, filter: Vec<String>) -> Vec<String>;

    /// Look up a resource and remember whatever the retrieval step needs
    async fn get_resource_metadata(
        &mut self,
        id: &str,
    ) -> std::result::Result<ResourceDescriptor, Self::Error>;

    /// Retrieve the contents of a resource
    async fn get_resource(&self, id: &str) -> std::result::Result<Self::Resource, Self::Error>;

    /// Current listing filter
    fn filter(&self) -> Vec<String>;

    fn set_filter(&mut self, filter: Vec<String>);

    /// Whether the source needs a long-lived import state between calls
    fn persists_state_via_data_import(&self) -> bool;
}

/// ArcGIS map-service datasource.
///
/// Holds the metadata of the last successful `get_resource_metadata` call.
/// One instance serves one import job; it is not meant to be shared.
pub struct ArcGisDatasource<T = ReqwestTransport> {
    transport: T,
    metadata: Option<ServiceMetadata>,
    max_records_override: Option<usize>,
}

impl ArcGisDatasource<ReqwestTransport> {
    /// Create a datasource backed by reqwest
    pub fn new(config: &HttpClientConfig) -> Result<Self> {
        Ok(Self::with_transport(ReqwestTransport::new(config)?))
    }
}

impl<T: Transport> ArcGisDatasource<T> {
    pub fn with_transport(transport: T) -> Self {
        Self {
            transport,
            metadata: None,
            max_records_override: None,
        }
    }

    /// Request fewer features per query than the service advertises.
    ///
    /// The service limit still applies when the cap is larger.
    pub fn with_max_records_per_query(mut self, max_records: usize) -> Self {
        self.max_records_override = Some(max_records.max(1));
        self
    }

    /// Metadata cached by the last successful metadata fetch
    pub fn metadata(&self) -> Option<&ServiceMetadata> {
        self.metadata.as_ref()
    }

    /// Retrieve all features of a layer using explicitly supplied metadata.
    ///
    /// IDs are requested in chunks of at most `max_records_per_query`; the
    /// first failing chunk aborts the retrieval.
    pub async fn fetch_features_with(
        &self,
        id: &str,
        metadata: &ServiceMetadata,
    ) -> Result<Vec<FeatureRecord>> {
        let layer_url = canonicalize(id)?;
        let ids = fetch_ids(&self.transport, &layer_url).await?;

        // The service never returns more than it advertises per query
        let chunk_size = self
            .max_records_override
            .map_or(metadata.max_records_per_query, |cap| {
                cap.min(metadata.max_records_per_query)
            })
            .max(1);

        let mut records = Vec::with_capacity(ids.len());
        for (index, chunk) in ids.chunks(chunk_size).enumerate() {
            tracing::debug!(
                "Fetching chunk {} ({} ids) from {}",
                index + 1,
                chunk.len(),
                layer_url
            );
            let batch = fetch_features(&self.transport, &layer_url, chunk, &metadata.fields).await?;
            records.extend(batch);
        }

        tracing::info!("Retrieved {} features from {}", records.len(), layer_url);
        Ok(records)
    }
}

#[async_trait]
impl<T: Transport> Datasource for ArcGisDatasource<T> {
    type Resource = Vec<FeatureRecord>;
    type Error = ArcGisError;

    fn name(&self) -> &'static str {
        DATASOURCE_NAME
    }

    fn providers_download_url(&self) -> bool {
        false
    }

    /// There is no catalogue to browse; callers must supply a layer URL
    fn get_resources_list(&self, filter: Vec<String>) -> Vec<String> {
        filter
    }

    /// Fetch layer metadata and cache it for [`Datasource::get_resource`].
    ///
    /// Any failure clears the cache, so a later `get_resource` cannot run on
    /// stale or rejected metadata.
    async fn get_resource_metadata(&mut self, id: &str) -> Result<ResourceDescriptor> {
        self.metadata = None;

        let layer_url = canonicalize(id)?;
        let metadata = fetch_metadata(&self.transport, &layer_url).await?;

        let descriptor = ResourceDescriptor {
            id: id.to_string(),
            title: metadata.name.clone(),
            url: None,
            service: DATASOURCE_NAME.to_string(),
            checksum: None,
            size: 0,
            filename: filename_from(&metadata.name),
        };
        self.metadata = Some(metadata);

        Ok(descriptor)
    }

    async fn get_resource(&self, id: &str) -> Result<Vec<FeatureRecord>> {
        let Some(metadata) = self.metadata.as_ref() else {
            return Err(ArcGisError::invalid_input(
                "no layer metadata loaded, call get_resource_metadata first",
            ));
        };
        self.fetch_features_with(id, metadata).await
    }

    fn filter(&self) -> Vec<String> {
        Vec::new()
    }

    fn set_filter(&mut self, _filter: Vec<String>) {}

    fn persists_state_via_data_import(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arcgis::features::{features_url, ids_url};
    use crate::arcgis::http::fake::StaticTransport;
    use crate::arcgis::metadata::metadata_url;
    use crate::arcgis::metadata::tests::{sample_metadata_json, LAYER};
    use serde_json::{json, Value};

    const RAW_ID: &str = "https://host/arcgis/rest/services/Parks/MapServer/4?f=pjson";

    fn features_body(ids: &[i64]) -> Value {
        let features: Vec<Value> = ids
            .iter()
            .map(|id| {
                json!({
                    "attributes": {"OBJECTID": id, "NAME": format!("park {id}"), "AREA": 1.0, "EXTRA": true},
                    "geometry": {"rings": []}
                })
            })
            .collect();
        json!({
            "fields": [{"name": "OBJECTID"}, {"name": "NAME"}, {"name": "AREA"}, {"name": "EXTRA"}],
            "features": features
        })
    }

    fn full_transport(ids: &[i64], chunk: usize) -> StaticTransport {
        let metadata = ServiceMetadata::from_json(&sample_metadata_json()).unwrap();
        let mut transport = StaticTransport::new()
            .with_json(metadata_url(LAYER), &sample_metadata_json())
            .with_json(ids_url(LAYER), &json!({ "objectIds": ids }));
        for part in ids.chunks(chunk) {
            transport =
                transport.with_json(features_url(LAYER, part, &metadata.fields), &features_body(part));
        }
        transport
    }

    #[test]
    fn test_contract_constants() {
        let source = ArcGisDatasource::with_transport(StaticTransport::new());
        assert_eq!(source.name(), "arcgis");
        assert!(!source.providers_download_url());
        assert!(!source.persists_state_via_data_import());
        assert!(source.filter().is_empty());
        assert!(source.metadata().is_none());
    }

    #[test]
    fn test_resources_list_echoes_filter_and_set_filter_is_noop() {
        let mut source = ArcGisDatasource::with_transport(StaticTransport::new());
        let filter = vec!["a".to_string(), "b".to_string()];
        assert_eq!(source.get_resources_list(filter.clone()), filter);

        source.set_filter(filter);
        assert!(source.filter().is_empty());
    }

    #[tokio::test]
    async fn test_get_resource_metadata_returns_descriptor() {
        let mut source = ArcGisDatasource::with_transport(full_transport(&[1], 1000));
        let descriptor = source.get_resource_metadata(RAW_ID).await.unwrap();

        assert_eq!(
            descriptor,
            ResourceDescriptor {
                id: RAW_ID.to_string(),
                title: "Parks & Rec".to_string(),
                url: None,
                service: "arcgis".to_string(),
                checksum: None,
                size: 0,
                filename: "parks___rec".to_string(),
            }
        );
        assert_eq!(source.metadata().unwrap().fields.len(), 3);
    }

    #[tokio::test]
    async fn test_get_resource_before_metadata_is_invalid_input() {
        let source = ArcGisDatasource::with_transport(full_transport(&[1], 1000));
        let err = source.get_resource(RAW_ID).await.unwrap_err();
        assert!(matches!(err, ArcGisError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn test_get_resource_returns_filtered_features() {
        let mut source = ArcGisDatasource::with_transport(full_transport(&[1, 2, 3], 1000));
        source.get_resource_metadata(RAW_ID).await.unwrap();

        let records = source.get_resource(RAW_ID).await.unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[1].attributes["NAME"], "park 2");
        assert!(!records[1].attributes.contains_key("EXTRA"));
    }

    #[tokio::test]
    async fn test_get_resource_requests_in_chunks() {
        let ids: Vec<i64> = (1..=5).collect();
        let mut source =
            ArcGisDatasource::with_transport(full_transport(&ids, 2)).with_max_records_per_query(2);
        source.get_resource_metadata(RAW_ID).await.unwrap();

        let records = source.get_resource(RAW_ID).await.unwrap();
        let object_ids: Vec<i64> = records
            .iter()
            .map(|r| r.attributes["OBJECTID"].as_i64().unwrap())
            .collect();
        assert_eq!(object_ids, ids);

        let feature_queries = source
            .transport
            .requested()
            .into_iter()
            .filter(|url| url.contains("objectIds="))
            .count();
        assert_eq!(feature_queries, 3);
    }

    #[tokio::test]
    async fn test_override_above_service_limit_uses_service_limit() {
        let mut body = sample_metadata_json();
        body["maxRecordCount"] = json!(2);
        let metadata = ServiceMetadata::from_json(&body).unwrap();

        let ids = [1, 2, 3];
        let mut transport = StaticTransport::new()
            .with_json(metadata_url(LAYER), &body)
            .with_json(ids_url(LAYER), &json!({ "objectIds": ids }));
        for part in ids.chunks(2) {
            transport =
                transport.with_json(features_url(LAYER, part, &metadata.fields), &features_body(part));
        }
        let mut source = ArcGisDatasource::with_transport(transport).with_max_records_per_query(1000);
        source.get_resource_metadata(RAW_ID).await.unwrap();

        let records = source.get_resource(RAW_ID).await.unwrap();
        assert_eq!(records.len(), 3);

        let feature_queries: Vec<String> = source
            .transport
            .requested()
            .into_iter()
            .filter(|url| url.contains("objectIds="))
            .collect();
        assert_eq!(feature_queries.len(), 2);
        assert!(feature_queries[0].contains("objectIds=1%2C2&"));
    }

    #[tokio::test]
    async fn test_truncated_chunk_fails_whole_retrieval() {
        let metadata = ServiceMetadata::from_json(&sample_metadata_json()).unwrap();
        let mut truncated = features_body(&[1, 2]);
        truncated["exceededTransferLimit"] = json!(true);
        let transport = StaticTransport::new()
            .with_json(metadata_url(LAYER), &sample_metadata_json())
            .with_json(ids_url(LAYER), &json!({ "objectIds": [1, 2, 3] }))
            .with_json(features_url(LAYER, &[1, 2, 3], &metadata.fields), &truncated);
        let mut source = ArcGisDatasource::with_transport(transport);
        source.get_resource_metadata(RAW_ID).await.unwrap();

        let err = source.get_resource(RAW_ID).await.unwrap_err();
        assert!(matches!(err, ArcGisError::Response { .. }));
    }

    #[tokio::test]
    async fn test_failed_metadata_clears_cache() {
        let mut source = ArcGisDatasource::with_transport(full_transport(&[1], 1000));
        source.get_resource_metadata(RAW_ID).await.unwrap();
        assert!(source.metadata().is_some());

        let err = source.get_resource_metadata("not a url").await.unwrap_err();
        assert!(matches!(err, ArcGisError::InvalidInput { .. }));
        assert!(source.metadata().is_none());
    }

    #[tokio::test]
    async fn test_unsupported_version_is_not_cached() {
        let mut body = sample_metadata_json();
        body["currentVersion"] = json!(9.3);
        let transport = StaticTransport::new().with_json(metadata_url(LAYER), &body);
        let mut source = ArcGisDatasource::with_transport(transport);

        let err = source.get_resource_metadata(RAW_ID).await.unwrap_err();
        assert!(matches!(err, ArcGisError::UnsupportedVersion { .. }));
        assert!(source.metadata().is_none());
    }

    #[tokio::test]
    async fn test_fetch_features_with_explicit_metadata() {
        let source = ArcGisDatasource::with_transport(full_transport(&[9], 1000));
        let metadata = ServiceMetadata::from_json(&sample_metadata_json()).unwrap();

        let records = source.fetch_features_with(RAW_ID, &metadata).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].geometry, json!({"rings": []}));
    }
}
