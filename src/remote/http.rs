//! HTTP implementations of the remote collaborators.
//!
//! One adapter over the backend REST API. Non-success responses surface the
//! server's `message` field when the body carries one, else a short
//! per-operation fallback; 4xx maps to a rejection, 5xx and transport
//! failures to a transport error.

use crate::alert::AlertPayload;
use crate::config::RemoteConfig;
use crate::error::{CoreError, Result};
use crate::liveness::HeartbeatSnapshot;
use crate::remote::{AlertDispatcher, GuideStatePayload, GuideStepPayload, GuideStore, HeartbeatSource};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const GUIDE_PATH: &str = "/api/permissions/guide";
const ALERTS_PATH: &str = "/api/emergency/alerts";
const DEVICE_STATUS_PATH: &str = "/api/device/status";

/// Backend API adapter shared by all three collaborator roles.
#[derive(Clone)]
pub struct HttpRemote {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SaveGuideBody<'a> {
    device_id: &'a str,
    steps: &'a [GuideStepPayload],
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

impl HttpRemote {
    /// Create an adapter against the configured base URL.
    #[must_use]
    pub fn new(config: &RemoteConfig) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

fn transport(err: reqwest::Error) -> CoreError {
    CoreError::Transport(err.to_string())
}

/// Map a non-success response to an error, extracting the server's message
/// when the body has one.
async fn error_from(response: reqwest::Response, fallback: &str) -> CoreError {
    let status = response.status();
    let message = response
        .json::<ErrorBody>()
        .await
        .ok()
        .and_then(|body| body.message)
        .unwrap_or_else(|| fallback.to_owned());
    if status.is_client_error() {
        CoreError::Rejected(message)
    } else {
        CoreError::Transport(message)
    }
}

#[async_trait]
impl GuideStore for HttpRemote {
    async fn fetch(&self, device_key: &str) -> Result<GuideStatePayload> {
        if device_key.is_empty() {
            return Err(CoreError::Unbound);
        }
        let response = self
            .client
            .get(self.url(GUIDE_PATH))
            .query(&[("deviceId", device_key)])
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(error_from(response, "guide state fetch failed").await);
        }
        response.json().await.map_err(transport)
    }

    async fn persist(
        &self,
        device_key: &str,
        steps: Vec<GuideStepPayload>,
    ) -> Result<GuideStatePayload> {
        if device_key.is_empty() {
            return Err(CoreError::Unbound);
        }
        let body = SaveGuideBody {
            device_id: device_key,
            steps: &steps,
        };
        let response = self
            .client
            .put(self.url(GUIDE_PATH))
            .json(&body)
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(error_from(response, "guide state save failed").await);
        }
        response.json().await.map_err(transport)
    }
}

#[async_trait]
impl AlertDispatcher for HttpRemote {
    async fn dispatch(&self, payload: &AlertPayload) -> Result<()> {
        let response = self
            .client
            .post(self.url(ALERTS_PATH))
            .json(payload)
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(error_from(response, "alert dispatch failed").await);
        }
        // Success is an ack; the body (if any) carries nothing we keep.
        Ok(())
    }
}

#[async_trait]
impl HeartbeatSource for HttpRemote {
    async fn fetch(&self, subject_id: &str) -> Result<HeartbeatSnapshot> {
        if subject_id.is_empty() {
            return Err(CoreError::Unbound);
        }
        let response = self
            .client
            .get(self.url(DEVICE_STATUS_PATH))
            .query(&[("deviceId", subject_id)])
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(error_from(response, "device status fetch failed").await);
        }
        response.json().await.map_err(transport)
    }
}
