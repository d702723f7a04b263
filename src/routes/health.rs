//! Liveness endpoint

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;

use crate::types::Result;

use super::json_response;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service version
    pub version: &'static str,
}

/// Handle GET /xrpc/_health
pub fn handle_health() -> Result<Response<Full<Bytes>>> {
    json_response(
        StatusCode::OK,
        &HealthResponse {
            version: env!("CARGO_PKG_VERSION"),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn test_health_reports_version() {
        let response = handle_health().unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
    }
}
