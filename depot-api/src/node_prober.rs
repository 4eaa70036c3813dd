//! HTTP liveness probe for storage replicas.
//!
//! Each node is expected to answer `GET <url>/health` with a 2xx status.
//! Anything else, including a connect error, counts as one failed probe.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use depot_storage::NodeProber;

use crate::config::StorageNode;
use crate::error::{ApiError, ApiResult};

/// Probes storage nodes over HTTP.
#[derive(Debug, Clone)]
pub struct HttpNodeProber {
    client: reqwest::Client,
    urls: HashMap<String, String>,
}

impl HttpNodeProber {
    /// Build a prober for `nodes`. `timeout` bounds each individual request.
    pub fn new(nodes: &[StorageNode], timeout: Duration) -> ApiResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::internal_error(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            urls: nodes
                .iter()
                .map(|node| (node.id.clone(), node.url.clone()))
                .collect(),
        })
    }

    fn health_url(&self, node_id: &str) -> Option<String> {
        self.urls.get(node_id).map(|base| format!("{}/health", base))
    }
}

#[async_trait]
impl NodeProber for HttpNodeProber {
    async fn probe(&self, node_id: &str) -> Result<(), String> {
        let url = self
            .health_url(node_id)
            .ok_or_else(|| format!("no address configured for node {}", node_id))?;

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| format!("request failed: {}", e))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(format!("health endpoint returned {}", status))
        }
    }
}
