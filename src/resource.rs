// SPDX-License-Identifier: Apache-2.0

//! Read-only resource passthrough to Loki's metadata endpoints.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use queryhub_core::{BackendClient, EngineError, EngineResult};

/// URL prefixes that may be forwarded
pub const ALLOWED_RESOURCE_PREFIXES: [&str; 4] = ["labels?", "label/", "series?", "index/stats?"];

const LOKI_API_PREFIX: &str = "loki/api/v1";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceRequest {
    pub method: String,
    /// Path and query relative to the Loki API root, e.g. `labels?start=..`
    pub url: String,
}

impl ResourceRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: "GET".to_string(),
            url: url.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResourceResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Bytes,
}

/// Checks a passthrough request and returns the backend path to forward to.
pub fn resource_path(request: &ResourceRequest) -> EngineResult<String> {
    if !request.method.eq_ignore_ascii_case("GET") {
        return Err(EngineError::invalid_resource(format!(
            "method '{}' is not allowed",
            request.method
        )));
    }
    let url = request.url.trim_start_matches('/');
    if !ALLOWED_RESOURCE_PREFIXES
        .iter()
        .any(|prefix| url.starts_with(prefix))
    {
        return Err(EngineError::invalid_resource(format!(
            "url '{}' is not allowed",
            request.url
        )));
    }
    Ok(format!("{LOKI_API_PREFIX}/{url}"))
}

/// Forwards an allowed request verbatim and returns the backend's answer.
#[instrument(skip(client), fields(url = %request.url))]
pub async fn call_resource(
    request: &ResourceRequest,
    client: &dyn BackendClient,
) -> EngineResult<ResourceResponse> {
    let path = resource_path(request)?;
    let raw = client.raw_get(&path).await?;
    debug!(status = raw.status, bytes = raw.body.len(), "Resource call finished");

    let mut headers = BTreeMap::new();
    headers.insert("content-type".to_string(), "application/json".to_string());
    if let Some(encoding) = raw.encoding {
        headers.insert("content-encoding".to_string(), encoding);
    }

    Ok(ResourceResponse {
        status: raw.status,
        headers,
        body: raw.body,
    })
}
