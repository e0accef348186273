//! Feature retrieval
//!
//! Object IDs are enumerated with one `returnIdsOnly` query, then features are
//! fetched by ID with an explicit field list.

use super::error::{ArcGisError, Result};
use super::http::{get_json, Transport};
use super::metadata::FieldDescriptor;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashSet;

/// Output spatial reference, WGS84
const OUTPUT_SPATIAL_REFERENCE: u32 = 4326;

/// One retrieved feature
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureRecord {
    /// Attribute values, restricted to the requested fields
    pub attributes: Map<String, Value>,
    /// Geometry exactly as the service returned it
    pub geometry: Value,
}

pub(crate) fn ids_url(layer_url: &str) -> String {
    format!("{layer_url}/query?where=1%3D1&returnIdsOnly=true&f=json")
}

pub(crate) fn features_url(layer_url: &str, ids: &[i64], fields: &[FieldDescriptor]) -> String {
    let ids = ids
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",");
    let fields = fields
        .iter()
        .map(|field| field.name.as_str())
        .collect::<Vec<_>>()
        .join(",");

    format!(
        "{}/query?objectIds={}&outFields={}&outSR={}&f=json",
        layer_url,
        urlencoding::encode(&ids),
        urlencoding::encode(&fields),
        OUTPUT_SPATIAL_REFERENCE
    )
}

/// Fetch every object ID of a layer
pub async fn fetch_ids<T: Transport + ?Sized>(transport: &T, layer_url: &str) -> Result<Vec<i64>> {
    let url = ids_url(layer_url);
    let body = get_json(transport, &url).await?;

    let ids = body
        .get("objectIds")
        .ok_or_else(|| ArcGisError::missing_key("objectIds"))?
        .as_array()
        .ok_or_else(|| ArcGisError::response("'objectIds' must be an array"))?
        .iter()
        .map(|id| {
            id.as_i64()
                .ok_or_else(|| ArcGisError::response(format!("invalid object id {id}")))
        })
        .collect::<Result<Vec<_>>>()?;

    if ids.is_empty() {
        return Err(ArcGisError::response("empty ids list"));
    }

    tracing::debug!("Layer {} has {} features", layer_url, ids.len());
    Ok(ids)
}

/// Fetch the features with the given IDs, restricted to `fields`.
///
/// Fails if the service silently drops any requested field.
pub async fn fetch_features<T: Transport + ?Sized>(
    transport: &T,
    layer_url: &str,
    ids: &[i64],
    fields: &[FieldDescriptor],
) -> Result<Vec<FeatureRecord>> {
    if ids.is_empty() {
        return Err(ArcGisError::invalid_input("'ids' empty or invalid"));
    }
    if fields.is_empty() {
        return Err(ArcGisError::invalid_input("'fields' empty or invalid"));
    }

    let url = features_url(layer_url, ids, fields);
    let body = get_json(transport, &url).await?;

    let retrieved_fields = non_empty_array(&body, "fields")?;
    let retrieved_items = non_empty_array(&body, "features")?;

    if body.get("exceededTransferLimit").and_then(|v| v.as_bool()) == Some(true) {
        return Err(ArcGisError::response(format!(
            "transfer limit exceeded, {} of {} features returned",
            retrieved_items.len(),
            ids.len()
        )));
    }
    if retrieved_items.len() < ids.len() {
        return Err(ArcGisError::response(format!(
            "incomplete batch, {} of {} features returned",
            retrieved_items.len(),
            ids.len()
        )));
    }

    let obtained: HashSet<&str> = retrieved_fields
        .iter()
        .filter_map(|field| field.get("name").and_then(|v| v.as_str()))
        .collect();
    let missing: Vec<&str> = fields
        .iter()
        .map(|field| field.name.as_str())
        .filter(|name| !obtained.contains(name))
        .collect();
    if !missing.is_empty() {
        tracing::warn!("Service dropped requested fields: {}", missing.join(", "));
        return Err(ArcGisError::response(format!(
            "missing required fields: {}",
            missing.join(", ")
        )));
    }

    let desired: HashSet<&str> = fields.iter().map(|field| field.name.as_str()).collect();
    retrieved_items
        .iter()
        .map(|item| {
            let attributes = item
                .get("attributes")
                .and_then(|v| v.as_object())
                .ok_or_else(|| ArcGisError::response("feature without 'attributes'"))?
                .iter()
                .filter(|(name, _)| desired.contains(name.as_str()))
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect();
            let geometry = item.get("geometry").cloned().unwrap_or(Value::Null);
            Ok(FeatureRecord {
                attributes,
                geometry,
            })
        })
        .collect()
}

fn non_empty_array<'a>(body: &'a Value, key: &str) -> Result<&'a Vec<Value>> {
    let items = body
        .get(key)
        .ok_or_else(|| ArcGisError::missing_key(key))?
        .as_array()
        .filter(|items| !items.is_empty())
        .ok_or_else(|| ArcGisError::response(format!("'{key}' empty or invalid")))?;
    Ok(items)
}
