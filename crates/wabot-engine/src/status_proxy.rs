// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Status Proxy
//!
//! Asks a running worker for its live state over its local control port.
//! Reads are advisory: any failure yields [`StatusSnapshot::offline`] instead
//! of an error. Control commands (`regenerate_code`) do report failures.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};

/// Timeout for status reads.
pub const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for control commands.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Status reported when the worker cannot be reached.
pub const OFFLINE: &str = "offline";

/// Live state reported by a worker's `GET /status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Connection state as reported by the worker.
    pub status: String,
    /// Current pairing code, if one is outstanding.
    #[serde(rename = "pairingCode", default)]
    pub pairing_code: Option<String>,
    /// Whether the pairing code is still usable.
    #[serde(rename = "pairingCodeValid", default)]
    pub pairing_code_valid: bool,
    /// Seconds until the pairing code lapses.
    #[serde(rename = "pairingCodeRemainingSeconds", default)]
    pub remaining_seconds: Option<i64>,
    /// Account the worker is logged in as, once paired.
    #[serde(rename = "user", default)]
    pub connected_user: Option<Value>,
}

impl StatusSnapshot {
    /// The degraded snapshot returned for unreachable workers.
    pub fn offline() -> Self {
        Self {
            status: OFFLINE.to_string(),
            pairing_code: None,
            pairing_code_valid: false,
            remaining_seconds: None,
            connected_user: None,
        }
    }

    /// Whether this is the degraded snapshot.
    pub fn is_offline(&self) -> bool {
        self.status == OFFLINE
    }
}

/// Source of live worker state.
#[async_trait]
pub trait WorkerStatusSource: Send + Sync {
    /// Query live status. Never fails; degrades to [`StatusSnapshot::offline`].
    async fn query(&self, instance_id: &str, port: u16, timeout: Duration) -> StatusSnapshot;

    /// Ask the worker for a fresh pairing code and return its reply verbatim.
    async fn regenerate_code(&self, instance_id: &str, port: u16, timeout: Duration)
    -> Result<Value>;
}

/// [`WorkerStatusSource`] speaking HTTP to `http://<host>:<port>`.
#[derive(Debug, Clone)]
pub struct HttpStatusProxy {
    client: reqwest::Client,
    host: String,
}

impl Default for HttpStatusProxy {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpStatusProxy {
    /// Proxy for workers bound to the loopback interface.
    pub fn new() -> Self {
        Self::with_host("127.0.0.1")
    }

    /// Proxy for workers bound to `host`.
    pub fn with_host(host: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            host: host.into(),
        }
    }

    fn url(&self, port: u16, path: &str) -> String {
        format!("http://{}:{}{}", self.host, port, path)
    }
}

#[async_trait]
impl WorkerStatusSource for HttpStatusProxy {
    async fn query(&self, instance_id: &str, port: u16, timeout: Duration) -> StatusSnapshot {
        let response = match self
            .client
            .get(self.url(port, "/status"))
            .timeout(timeout)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                debug!(instance_id = %instance_id, port = port, error = %e, "Worker unreachable");
                return StatusSnapshot::offline();
            }
        };

        if !response.status().is_success() {
            debug!(
                instance_id = %instance_id,
                port = port,
                http_status = %response.status(),
                "Worker returned error status"
            );
            return StatusSnapshot::offline();
        }

        match response.json::<StatusSnapshot>().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                debug!(
                    instance_id = %instance_id,
                    port = port,
                    error = %e,
                    "Malformed worker status"
                );
                StatusSnapshot::offline()
            }
        }
    }

    async fn regenerate_code(
        &self,
        instance_id: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<Value> {
        let unreachable = |e: reqwest::Error| {
            Error::UpstreamUnreachable(format!("instance {} on port {}: {}", instance_id, port, e))
        };

        let response = self
            .client
            .post(self.url(port, "/regenerate-code"))
            .timeout(timeout)
            .send()
            .await
            .map_err(unreachable)?
            .error_for_status()
            .map_err(unreachable)?;

        response.json::<Value>().await.map_err(unreachable)
    }
}
