//! Executor client directory.
//!
//! One [`ExecutorClient`] per executor address, created on first use and
//! kept for the life of the process.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::debug;
use uuid::Uuid;

use jobwheel_core::JobId;

use crate::error::{Result, RouteError};

pub const ACCESS_TOKEN_HEADER: &str = "x-access-token";

/// Body of a `POST {address}/run` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerParam {
    pub job_id: JobId,
    pub trigger_id: Uuid,
    pub executor_handler: String,
    pub executor_params: Option<String>,
    /// Seconds; 0 = no executor-side limit.
    pub executor_timeout: i64,
    pub broadcast_index: u32,
    pub broadcast_total: u32,
    /// Epoch ms at which the trigger was issued.
    pub trigger_time: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutorResponse {
    pub code: i32,
    #[serde(default)]
    pub msg: Option<String>,
}

impl ExecutorResponse {
    pub const SUCCESS_CODE: i32 = 200;

    pub fn is_success(&self) -> bool {
        self.code == Self::SUCCESS_CODE
    }
}

/// Handle on a single executor.
pub struct ExecutorClient {
    address: String,
    access_token: Option<String>,
    timeout: Duration,
    http: OnceCell<reqwest::Client>,
}

impl ExecutorClient {
    pub fn new(address: impl Into<String>, access_token: Option<String>, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            access_token,
            timeout,
            http: OnceCell::new(),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// The transport is built on first call, so a broken TLS setup or the
    /// like shows up as an error here and not at resolve time.
    async fn http(&self) -> Result<&reqwest::Client> {
        self.http
            .get_or_try_init(|| async {
                reqwest::Client::builder()
                    .timeout(self.timeout)
                    .build()
                    .map_err(RouteError::from)
            })
            .await
    }

    pub async fn run(&self, param: &TriggerParam) -> Result<ExecutorResponse> {
        let url = format!("{}/run", self.address.trim_end_matches('/'));
        debug!(url = %url, job_id = param.job_id, trigger_id = %param.trigger_id, "calling executor");

        let mut req = self.http().await?.post(&url).json(param);
        if let Some(token) = &self.access_token {
            req = req.header(ACCESS_TOKEN_HEADER, token);
        }

        let resp: ExecutorResponse = req.send().await?.error_for_status()?.json().await?;
        if !resp.is_success() {
            return Err(RouteError::Executor {
                code: resp.code,
                msg: resp.msg.unwrap_or_default(),
            });
        }
        Ok(resp)
    }
}

/// Address -> client cache. Entries are never evicted.
pub struct ExecutorDirectory {
    clients: DashMap<String, Arc<ExecutorClient>>,
    access_token: Option<String>,
    timeout: Duration,
}

impl ExecutorDirectory {
    pub fn new(access_token: Option<String>, timeout: Duration) -> Self {
        Self {
            clients: DashMap::new(),
            access_token,
            timeout,
        }
    }

    /// Client for `address`, creating and caching it on a miss.
    ///
    /// Blank addresses are rejected. Otherwise this never fails.
    pub fn resolve(&self, address: &str) -> Result<Arc<ExecutorClient>> {
        let address = address.trim();
        if address.is_empty() {
            return Err(RouteError::InvalidAddress(address.to_string()));
        }
        if let Some(client) = self.clients.get(address) {
            return Ok(Arc::clone(client.value()));
        }
        let client = self
            .clients
            .entry(address.to_string())
            .or_insert_with(|| {
                debug!(address, "new executor client");
                Arc::new(ExecutorClient::new(
                    address,
                    self.access_token.clone(),
                    self.timeout,
                ))
            });
        Ok(Arc::clone(client.value()))
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
