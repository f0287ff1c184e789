//! HTTP remote.
//!
//! - `POST {base}/sync/{table}` with `{"operationId", "records"}`, answered
//!   by `{"success": bool}`
//! - `GET {base}/sync/{table}` returning the remote snapshot as a JSON array
//! - `GET {base}/health` as a reachability probe

use std::marker::PhantomData;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tether_engine::SyncableRecord;

use crate::remote::{Remote, RemoteError};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ApplyRequest<'a, T> {
    operation_id: &'a str,
    records: &'a [T],
}

#[derive(Deserialize)]
struct ApplyResponse {
    success: bool,
}

/// A [`Remote`] speaking JSON over HTTP.
pub struct HttpRemote<T> {
    client: reqwest::Client,
    base_url: String,
    name: String,
    fetch_snapshots: bool,
    _record: PhantomData<fn() -> T>,
}

impl<T> HttpRemote<T> {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self::with_client(client, name, base_url)
    }

    pub fn with_client(client: reqwest::Client, name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            name: name.into(),
            fetch_snapshots: false,
            _record: PhantomData,
        }
    }

    /// Fetch the remote snapshot before each apply so it can be merged.
    pub fn with_fetch(mut self, enabled: bool) -> Self {
        self.fetch_snapshots = enabled;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `{base}/sync/{table}`, with the table name escaped as one path segment.
    fn table_url(&self, table: &str) -> Result<reqwest::Url, RemoteError> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| RemoteError::Transport(format!("invalid base url {}: {e}", self.base_url)))?;
        url.path_segments_mut()
            .map_err(|()| RemoteError::Transport(format!("base url {} cannot carry a path", self.base_url)))?
            .pop_if_empty()
            .push("sync")
            .push(table);
        Ok(url)
    }

    /// Whether `GET /health` answers with a 2xx status.
    pub async fn ping(&self) -> bool {
        match self.client.get(format!("{}/health", self.base_url)).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::trace!(remote = %self.name, error = %e, "Health probe failed");
                false
            }
        }
    }
}

async fn read_json<R: DeserializeOwned>(response: reqwest::Response) -> Result<R, RemoteError> {
    let status = response.status();
    if !status.is_success() {
        return Err(RemoteError::Transport(format!("unexpected status {status}")));
    }
    let body = response
        .text()
        .await
        .map_err(|e| RemoteError::Transport(e.to_string()))?;
    serde_json::from_str(&body).map_err(|e| {
        let preview: String = body.chars().take(64).collect();
        RemoteError::MalformedResponse(format!("{e} (body starts with {preview:?})"))
    })
}

#[async_trait]
impl<T> Remote<T> for HttpRemote<T>
where
    T: SyncableRecord + Serialize + DeserializeOwned,
{
    async fn apply(&self, table: &str, records: &[T], operation_id: &str) -> Result<bool, RemoteError> {
        let response = self
            .client
            .post(self.table_url(table)?)
            .json(&ApplyRequest { operation_id, records })
            .send()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;

        let reply: ApplyResponse = read_json(response).await?;
        tracing::debug!(remote = %self.name, table = %table, success = reply.success, "Remote apply answered");
        Ok(reply.success)
    }

    async fn fetch(&self, table: &str) -> Result<Option<Vec<T>>, RemoteError> {
        if !self.fetch_snapshots {
            return Ok(None);
        }
        let response = self
            .client
            .get(self.table_url(table)?)
            .send()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        read_json(response).await.map(Some)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
