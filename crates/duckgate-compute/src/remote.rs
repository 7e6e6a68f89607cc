//! Client side of the ComputeWorker RPC service.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use duckgate_core::{ComputeConfig, ComputeEndpoint};
use serde_json::Value;
use tonic::Request;
use tonic::metadata::{Ascii, MetadataValue};
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, warn};

use crate::error::ComputeError;
use crate::proto::compute_worker_client::ComputeWorkerClient;
use crate::proto::{
    CancelRequest, ExecuteRequest, ExecuteResponse, HealthRequest, HealthResponse,
};
use crate::result::ExecutionResult;

/// Metadata key carrying the shared agent token.
pub const AGENT_TOKEN_HEADER: &str = "x-agent-token";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ChannelKey {
    name: String,
    url: String,
    token: Option<String>,
}

impl ChannelKey {
    fn of(endpoint: &ComputeEndpoint) -> Self {
        Self {
            name: endpoint.name.clone(),
            url: endpoint.url.clone(),
            token: endpoint.auth_token.clone(),
        }
    }
}

/// Turn an endpoint URL into a URI tonic can dial.
///
/// `grpc://` and `http://` are accepted; TLS schemes are rejected.
pub fn dial_uri(url: &str) -> Result<String, ComputeError> {
    let url = url.trim().trim_end_matches('/');
    if let Some(rest) = url.strip_prefix("grpc://") {
        return Ok(format!("http://{}", rest));
    }
    if url.starts_with("http://") {
        return Ok(url.to_string());
    }
    if url.starts_with("grpcs://") || url.starts_with("https://") {
        return Err(ComputeError::InvalidEndpoint(format!(
            "TLS endpoints are not supported: {}",
            url
        )));
    }
    Err(ComputeError::InvalidEndpoint(format!(
        "expected grpc://host:port, got '{}'",
        url
    )))
}

/// Dispatches SQL to remote agents over lazily connected, cached channels.
pub struct RemoteClient {
    channels: RwLock<HashMap<ChannelKey, Channel>>,
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl RemoteClient {
    pub fn new(config: &ComputeConfig) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            request_timeout: Duration::from_secs(config.remote_timeout_secs),
        }
    }

    fn channel(&self, endpoint: &ComputeEndpoint) -> Result<Channel, ComputeError> {
        let key = ChannelKey::of(endpoint);
        if let Ok(channels) = self.channels.read() {
            if let Some(channel) = channels.get(&key) {
                return Ok(channel.clone());
            }
        }

        let uri = dial_uri(&endpoint.url)?;
        let channel = Endpoint::from_shared(uri)
            .map_err(|e| ComputeError::InvalidEndpoint(format!("{}: {}", endpoint.url, e)))?
            .connect_timeout(self.connect_timeout)
            .timeout(self.request_timeout)
            .connect_lazy();

        let mut channels = self
            .channels
            .write()
            .map_err(|e| ComputeError::Internal(format!("channel cache poisoned: {}", e)))?;
        // A changed URL or token leaves a stale entry under the old key.
        channels.retain(|k, _| k.name != key.name);
        channels.insert(key, channel.clone());
        debug!(endpoint = %endpoint.name, url = %endpoint.url, "created remote channel");
        Ok(channel)
    }

    /// Drop the cached channel of one endpoint.
    pub fn evict(&self, endpoint_name: &str) {
        if let Ok(mut channels) = self.channels.write() {
            channels.retain(|k, _| k.name != endpoint_name);
        }
    }

    fn request<T>(&self, endpoint: &ComputeEndpoint, message: T) -> Result<Request<T>, ComputeError> {
        let mut request = Request::new(message);
        if let Some(token) = &endpoint.auth_token {
            let value: MetadataValue<Ascii> = token.parse().map_err(|_| {
                ComputeError::InvalidEndpoint(format!(
                    "auth token of '{}' is not valid ASCII metadata",
                    endpoint.name
                ))
            })?;
            request.metadata_mut().insert(AGENT_TOKEN_HEADER, value);
        }
        Ok(request)
    }

    /// Run `sql` on the endpoint's agent. Every failure is reported as
    /// [`ComputeError::RemoteUnavailable`].
    pub async fn execute(
        &self,
        endpoint: &ComputeEndpoint,
        sql: &str,
        request_id: &str,
    ) -> Result<ExecutionResult, ComputeError> {
        let channel = self.channel(endpoint)?;
        let request = self.request(
            endpoint,
            ExecuteRequest {
                sql: sql.to_string(),
                request_id: request_id.to_string(),
            },
        )?;

        let response = ComputeWorkerClient::new(channel)
            .execute(request)
            .await
            .map_err(|status| {
                warn!(
                    endpoint = %endpoint.name,
                    code = ?status.code(),
                    error = %status.message(),
                    "remote execute failed"
                );
                ComputeError::RemoteUnavailable {
                    endpoint: endpoint.name.clone(),
                    reason: format!("{:?}: {}", status.code(), status.message()),
                }
            })?;

        Ok(decode_response(response.into_inner()))
    }

    /// Call the agent's `Health` RPC.
    pub async fn health(&self, endpoint: &ComputeEndpoint) -> Result<HealthResponse, ComputeError> {
        let channel = self.channel(endpoint)?;
        let request = self.request(endpoint, HealthRequest {})?;
        let response = ComputeWorkerClient::new(channel)
            .health(request)
            .await
            .map_err(|status| ComputeError::RemoteUnavailable {
                endpoint: endpoint.name.clone(),
                reason: format!("{:?}: {}", status.code(), status.message()),
            })?;
        Ok(response.into_inner())
    }

    /// Fail unless the agent answers `Health` with status `ok`.
    pub async fn ping(&self, endpoint: &ComputeEndpoint) -> Result<(), ComputeError> {
        let health = self.health(endpoint).await?;
        if health.status != "ok" {
            return Err(ComputeError::RemoteUnavailable {
                endpoint: endpoint.name.clone(),
                reason: format!("agent reported status '{}'", health.status),
            });
        }
        Ok(())
    }

    /// Ask the agent to stop the `Execute` call tagged `request_id`.
    /// Returns whether a running call was found.
    pub async fn cancel(
        &self,
        endpoint: &ComputeEndpoint,
        request_id: &str,
    ) -> Result<bool, ComputeError> {
        let channel = self.channel(endpoint)?;
        let request = self.request(
            endpoint,
            CancelRequest {
                request_id: request_id.to_string(),
            },
        )?;
        let response = ComputeWorkerClient::new(channel)
            .cancel(request)
            .await
            .map_err(|status| ComputeError::RemoteUnavailable {
                endpoint: endpoint.name.clone(),
                reason: format!("{:?}: {}", status.code(), status.message()),
            })?;
        Ok(response.into_inner().cancelled)
    }
}

fn decode_response(response: ExecuteResponse) -> ExecutionResult {
    let rows: Vec<Vec<Value>> = response
        .rows
        .into_iter()
        .map(|row| {
            row.cells
                .into_iter()
                .map(|cell| {
                    if cell.is_null {
                        Value::Null
                    } else {
                        Value::String(cell.text)
                    }
                })
                .collect()
        })
        .collect();

    let row_count = if response.row_count == 0 {
        rows.len() as u64
    } else {
        response.row_count
    };
    ExecutionResult {
        columns: response.columns,
        rows,
        row_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::{Cell, Row};

    #[test]
    fn test_dial_uri() {
        assert_eq!(dial_uri("grpc://10.0.0.1:50051").unwrap(), "http://10.0.0.1:50051");
        assert_eq!(dial_uri("http://agent:50051/").unwrap(), "http://agent:50051");
        assert!(matches!(
            dial_uri("grpcs://agent:50051"),
            Err(ComputeError::InvalidEndpoint(_))
        ));
        assert!(dial_uri("agent:50051").is_err());
    }

    #[test]
    fn test_decode_response_keeps_nulls() {
        let response = ExecuteResponse {
            columns: vec!["answer".into(), "missing".into()],
            rows: vec![Row {
                cells: vec![
                    Cell {
                        is_null: false,
                        text: "42".into(),
                    },
                    Cell {
                        is_null: true,
                        text: String::new(),
                    },
                ],
            }],
            row_count: 1,
            request_id: "r1".into(),
        };
        let result = decode_response(response);
        assert_eq!(result.rows[0][0], Value::String("42".into()));
        assert_eq!(result.rows[0][1], Value::Null);
        assert_eq!(result.row_count, 1);
    }

    #[tokio::test]
    async fn test_channel_is_cached_per_endpoint() {
        let client = RemoteClient::new(&ComputeConfig::default());
        let endpoint = ComputeEndpoint::remote("gpu", "grpc://127.0.0.1:1", None);
        client.channel(&endpoint).unwrap();
        client.channel(&endpoint).unwrap();
        assert_eq!(client.channels.read().unwrap().len(), 1);

        let moved = ComputeEndpoint::remote("gpu", "grpc://127.0.0.1:2", None);
        client.channel(&moved).unwrap();
        assert_eq!(client.channels.read().unwrap().len(), 1);

        client.evict("gpu");
        assert!(client.channels.read().unwrap().is_empty());
    }
}
