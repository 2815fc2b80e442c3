//! HTTP client for the chain application gateway.

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;

use crate::chain::{ChainClient, ChainError, QueryRequest, SignedOperation, TxReceipt};

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct RejectResponse {
    error: String,
}

#[derive(Clone, Debug)]
pub struct RpcClient {
    base_url: String,
    http: Client,
}

impl RpcClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ChainError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self { base_url: base_url.trim_end_matches('/').to_string(), http })
    }

    fn app_url(&self, app_id: &str, tail: &str) -> String {
        format!("{}/applications/{app_id}/{tail}", self.base_url)
    }
}

#[async_trait]
impl ChainClient for RpcClient {
    async fn query(&self, request: &QueryRequest) -> Result<Value, ChainError> {
        let url = self.app_url(&request.app_id, "query");
        debug!("query {} {}", request.app_id, request.method);
        let resp = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "method": request.method, "args": request.args }))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            warn!("query {} on {} failed with status {}", request.method, request.app_id, status.as_u16());
            return Err(ChainError::Http(status.as_u16()));
        }
        let body: QueryResponse = serde_json::from_slice(&resp.bytes().await?)?;
        match (body.error, body.data) {
            (Some(err), _) => Err(ChainError::Rejected(err)),
            (None, data) => Ok(data.unwrap_or(Value::Null)),
        }
    }

    async fn submit(&self, operation: &SignedOperation) -> Result<TxReceipt, ChainError> {
        let url = self.app_url(&operation.operation.app_id, "transactions");
        debug!("submit {} {} nonce={}", operation.operation.app_id, operation.operation.method, operation.nonce);
        let resp = self.http.post(&url).json(operation).send().await?;
        let status = resp.status();
        let bytes = resp.bytes().await?;
        if status.is_client_error() {
            // Applications explain rejections in the body
            if let Ok(reject) = serde_json::from_slice::<RejectResponse>(&bytes) {
                return Err(ChainError::Rejected(reject.error));
            }
        }
        if !status.is_success() {
            return Err(ChainError::Http(status.as_u16()));
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn receipt(&self, tx_hash: &str) -> Result<Option<TxReceipt>, ChainError> {
        let url = format!("{}/transactions/{tx_hash}", self.base_url);
        let resp = self.http.get(&url).send().await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(serde_json::from_slice(&resp.bytes().await?)?)),
            status => Err(ChainError::Http(status.as_u16())),
        }
    }
}
