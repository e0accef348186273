//! Layer URL canonicalization
//!
//! Turns whatever the user pasted (a service URL, a layer URL, a URL with a
//! query string) into the endpoint of layer `0` of a map service.

use super::error::{ArcGisError, Result};
use url::Url;

/// Path marker every ArcGIS REST endpoint carries
const ARCGIS_REST_MARKER: &str = "arcgis/rest";

const MAP_SERVER_SEGMENT: &str = "MapServer/";

/// Only the first layer of a map service is ever imported
const LAYER_INDEX: &str = "0";

/// Normalize a user supplied identifier into a canonical layer URL.
///
/// A trailing numeric layer index is replaced by `0`, never appended to.
pub fn canonicalize(raw_id: &str) -> Result<String> {
    let raw_id = raw_id.trim();
    if !looks_like_arcgis_url(raw_id) {
        return Err(ArcGisError::invalid_input(format!(
            "'{raw_id}' does not look like an ArcGIS server URL"
        )));
    }

    // No query params
    let mut id = raw_id.split('?').next().unwrap_or_default().to_string();

    let without_digits = id.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    id.truncate(without_digits);

    if !id.ends_with('/') {
        id.push('/');
    }

    if !id.ends_with(&format!("/{MAP_SERVER_SEGMENT}")) {
        id.push_str(MAP_SERVER_SEGMENT);
    }

    id.push_str(LAYER_INDEX);
    Ok(id)
}

fn looks_like_arcgis_url(raw_id: &str) -> bool {
    match Url::parse(raw_id) {
        Ok(parsed) => {
            matches!(parsed.scheme(), "http" | "https") && parsed.path().contains(ARCGIS_REST_MARKER)
        }
        Err(_) => false,
    }
}

/// Derive a file name from a service name: every non-word character becomes
/// `_` and the result is lower-cased.
pub fn filename_from(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}
