//! Service metadata retrieval
//!
//! Fetches `{layer}?f=json`, checks that every key the importer relies on is
//! present and gates on the minimum supported service revision.

use super::error::{ArcGisError, Result};
use super::http::{get_json, Transport};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Oldest service revision the connector talks to
pub const MINIMUM_SUPPORTED_VERSION: f64 = 10.1;

/// Batch size used when the service does not advertise `maxRecordCount`
pub const DEFAULT_MAX_RECORDS_PER_QUERY: usize = 500;

/// One attribute column of a layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
}

/// Layer metadata as reported by the service
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceMetadata {
    pub version: f64,
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub layer_type: String,
    pub geometry_type: String,
    pub copyright: String,
    pub fields: Vec<FieldDescriptor>,
    pub max_records_per_query: usize,
    pub supported_formats: BTreeSet<String>,
    pub advanced_queries_supported: bool,
}

impl ServiceMetadata {
    /// Build metadata from the parsed `?f=json` document.
    ///
    /// Does not apply the version gate, see [`ServiceMetadata::ensure_supported`].
    pub fn from_json(data: &Value) -> Result<Self> {
        let Some(data) = data.as_object() else {
            return Err(ArcGisError::response("metadata is not a JSON object"));
        };

        if data.get("fields").is_none() {
            return Err(ArcGisError::missing_key("fields"));
        }

        let version = require(data, "currentVersion")?
            .as_f64()
            .ok_or_else(|| wrong_type("currentVersion", "a number"))?;
        let name = string_or_empty(data, "name")?;
        let description = string_or_empty(data, "description")?;
        let layer_type = string_or_empty(data, "type")?;
        let geometry_type = string_or_empty(data, "geometryType")?;
        let copyright = string_or_empty(data, "copyrightText")?;
        let fields = parse_fields(require(data, "fields")?)?;

        let supported_formats = match require(data, "supportedQueryFormats")? {
            Value::Null => BTreeSet::new(),
            Value::String(s) => parse_formats(s),
            _ => return Err(wrong_type("supportedQueryFormats", "a string")),
        };

        let advanced_queries_supported = match require(data, "supportsAdvancedQueries")? {
            Value::Null => false,
            Value::Bool(b) => *b,
            _ => return Err(wrong_type("supportsAdvancedQueries", "a boolean")),
        };

        let max_records_per_query = match data.get("maxRecordCount") {
            None | Some(Value::Null) => DEFAULT_MAX_RECORDS_PER_QUERY,
            Some(value) => match (value.as_u64(), value.as_i64()) {
                (Some(n), _) if n > 0 => n as usize,
                // zero or negative means "no advertised limit"
                (Some(_), _) | (None, Some(_)) => DEFAULT_MAX_RECORDS_PER_QUERY,
                _ => return Err(wrong_type("maxRecordCount", "an integer")),
            },
        };

        Ok(Self {
            version,
            name,
            description,
            layer_type,
            geometry_type,
            copyright,
            fields,
            max_records_per_query,
            supported_formats,
            advanced_queries_supported,
        })
    }

    /// Reject services older than [`MINIMUM_SUPPORTED_VERSION`]
    pub fn ensure_supported(&self) -> Result<()> {
        if self.version < MINIMUM_SUPPORTED_VERSION {
            return Err(ArcGisError::UnsupportedVersion {
                version: self.version,
                minimum: MINIMUM_SUPPORTED_VERSION,
            });
        }
        Ok(())
    }
}

/// Fetch and validate the metadata of a canonical layer URL
pub async fn fetch_metadata<T: Transport + ?Sized>(
    transport: &T,
    layer_url: &str,
) -> Result<ServiceMetadata> {
    let url = metadata_url(layer_url);
    let data = get_json(transport, &url).await?;

    let metadata = ServiceMetadata::from_json(&data)?;
    metadata.ensure_supported()?;

    tracing::info!(
        "Loaded metadata for '{}' (version {}, {} fields, {} records per query)",
        metadata.name,
        metadata.version,
        metadata.fields.len(),
        metadata.max_records_per_query
    );

    Ok(metadata)
}

pub(crate) fn metadata_url(layer_url: &str) -> String {
    format!("{layer_url}?f=json")
}

fn require<'a>(data: &'a Map<String, Value>, key: &str) -> Result<&'a Value> {
    data.get(key).ok_or_else(|| ArcGisError::missing_key(key))
}

fn wrong_type(key: &str, expected: &str) -> ArcGisError {
    ArcGisError::response(format!("'{key}' must be {expected}"))
}

fn string_or_empty(data: &Map<String, Value>, key: &str) -> Result<String> {
    match require(data, key)? {
        Value::Null => Ok(String::new()),
        Value::String(s) => Ok(s.clone()),
        _ => Err(wrong_type(key, "a string")),
    }
}

fn parse_fields(value: &Value) -> Result<Vec<FieldDescriptor>> {
    let Some(items) = value.as_array() else {
        return Err(wrong_type("fields", "an array"));
    };

    let fields = items
        .iter()
        .map(|field| {
            let name = field
                .get("name")
                .and_then(|v| v.as_str())
                .ok_or_else(|| ArcGisError::response("field without a 'name'"))?;
            let field_type = field
                .get("type")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            Ok(FieldDescriptor {
                name: name.to_string(),
                field_type: field_type.to_string(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    if fields.is_empty() {
        return Err(ArcGisError::response("'fields' empty"));
    }
    Ok(fields)
}

fn parse_formats(raw: &str) -> BTreeSet<String> {
    raw.split(',')
        .map(|token| token.split_whitespace().collect::<String>())
        .filter(|token| !token.is_empty())
        .collect()
}
