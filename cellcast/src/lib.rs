//! Core battery-capacity prediction client.
//!
//! A spreadsheet of cycle data is uploaded to a remote inference server
//! (`transport`), the round trip is driven by a single state owner
//! (`controller`) and the returned series is turned into chart-ready data
//! (`presenter`).

pub mod controller;
pub mod model;
pub mod presenter;
pub mod transport;

use thiserror::Error;

pub use controller::{
    Controller, DashboardState, LoadingFlag, LoadingGuard, PendingSubmission, Screen,
    SubmitError, UploadForm, ValidationError, ViewState,
};
pub use model::{Prediction, PredictionMeta, PredictionResult};
pub use presenter::{AxisBound, ChartPoint, DashboardView, Summary, SummaryCard, YDomain};
pub use transport::{ClientConfig, HttpTransport, PredictionTransport, TransportError, UploadRequest};

/// Extensions the file picker offers; the server does the actual parsing.
pub const ACCEPTED_EXTENSIONS: &[&str] = &["csv", "xlsx"];

pub const MIN_FUTURE_CYCLES: i64 = 1;
pub const MAX_FUTURE_CYCLES: i64 = 500;
pub const DEFAULT_FUTURE_CYCLES: i64 = 50;

#[derive(Error, Debug)]
pub enum CellcastError {
    #[error("unsupported file format: {0} (expected .csv or .xlsx)")]
    UnsupportedFormat(String),
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid prediction document: {0}")]
    InvalidDocument(#[from] serde_json::Error),
}

/// A spreadsheet chosen by the user, held in memory until it is uploaded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SelectedFile {
    name: String,
    bytes: Vec<u8>,
}

impl SelectedFile {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Result<Self, CellcastError> {
        let name = name.into();
        if !has_accepted_extension(&name) {
            return Err(CellcastError::UnsupportedFormat(name));
        }
        Ok(Self { name, bytes })
    }

    pub fn from_path(path: &std::path::Path) -> Result<Self, CellcastError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        if !has_accepted_extension(&name) {
            return Err(CellcastError::UnsupportedFormat(name));
        }
        let bytes = std::fs::read(path).map_err(|source| CellcastError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self { name, bytes })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Content type sent with the multipart `file` part.
    pub fn mime_type(&self) -> &'static str {
        match extension(&self.name).as_str() {
            "csv" => "text/csv",
            "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            _ => "application/octet-stream",
        }
    }
}

fn extension(name: &str) -> String {
    match name.rsplit_once('.') {
        Some((_, ext)) => ext.to_ascii_lowercase(),
        None => String::new(),
    }
}

pub fn has_accepted_extension(name: &str) -> bool {
    let ext = extension(name);
    ACCEPTED_EXTENSIONS.iter().any(|accepted| *accepted == ext)
}

/// Parse the "future cycles" text field. Anything that is not an integer in
/// range falls back to the default instead of being rejected.
pub fn parse_future_cycles_input(raw: &str) -> i64 {
    match raw.trim().parse::<i64>() {
        Ok(value) if (MIN_FUTURE_CYCLES..=MAX_FUTURE_CYCLES).contains(&value) => value,
        _ => DEFAULT_FUTURE_CYCLES,
    }
}
