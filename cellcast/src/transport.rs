use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use thiserror::Error;
use tracing::debug;

use crate::model::PredictionResult;
use crate::SelectedFile;

pub const DEFAULT_BASE_URL: &str = "https://bms-server-lc3t.onrender.com";
pub const PREDICT_PATH: &str = "/predict";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    pub base_url: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    pub fn predict_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), PREDICT_PATH)
    }
}

/// A validated upload. Built by the controller, consumed by one transport call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadRequest {
    pub file: SelectedFile,
    pub future_cycles: u32,
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("server error: {status} - {body}")]
    Status { status: u16, body: String },
    #[error("request failed: {0}")]
    Network(#[source] reqwest::Error),
    #[error("malformed prediction response: {0}")]
    MalformedResponse(#[source] serde_json::Error),
    #[error("could not encode upload: {0}")]
    Encode(#[source] reqwest::Error),
}

/// Sends one upload to the inference server. Exactly one attempt per call.
#[async_trait(?Send)]
pub trait PredictionTransport {
    async fn submit_prediction(
        &self,
        request: UploadRequest,
    ) -> Result<PredictionResult, TransportError>;
}

#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: Client,
    endpoint: String,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> Self {
        Self::with_client(config, Client::new())
    }

    pub fn with_client(config: &ClientConfig, client: Client) -> Self {
        Self {
            client,
            endpoint: config.predict_url(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn build_form(request: UploadRequest) -> Result<Form, TransportError> {
    let UploadRequest {
        file,
        future_cycles,
    } = request;
    let mime = file.mime_type();
    let SelectedFile { name, bytes } = file;
    let part = Part::bytes(bytes)
        .file_name(name)
        .mime_str(mime)
        .map_err(TransportError::Encode)?;
    Ok(Form::new()
        .part("file", part)
        .text("future_cycles", future_cycles.to_string()))
}

#[async_trait(?Send)]
impl PredictionTransport for HttpTransport {
    async fn submit_prediction(
        &self,
        request: UploadRequest,
    ) -> Result<PredictionResult, TransportError> {
        debug!(
            endpoint = %self.endpoint,
            file = request.file.name(),
            bytes = request.file.len(),
            future_cycles = request.future_cycles,
            "posting prediction request"
        );
        let form = build_form(request)?;
        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(TransportError::Network)?;

        let status = response.status();
        if !status.is_success() {
            // An unreadable error body is reported as empty.
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let body = response.text().await.map_err(TransportError::Network)?;
        debug!(status = status.as_u16(), bytes = body.len(), "prediction response received");
        PredictionResult::from_json(&body).map_err(TransportError::MalformedResponse)
    }
}
