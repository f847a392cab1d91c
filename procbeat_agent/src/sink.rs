//! Report delivery. One attempt per flush; failures are the caller's to log.

use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use tracing::debug;

use crate::error::DeliveryError;
use crate::report::{gzip, Report};

#[allow(async_fn_in_trait)]
pub trait ReportSink {
    async fn deliver(&self, report: &Report) -> Result<(), DeliveryError>;
}

/// POSTs the report as JSON to a fixed endpoint.
#[derive(Debug, Clone)]
pub struct HttpSink {
    client: reqwest::Client,
    url: String,
    gzip: bool,
}

impl HttpSink {
    pub fn new(url: impl Into<String>, timeout: Duration, gzip: bool) -> Result<Self, DeliveryError> {
        let url = url.into();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("procbeat_agent/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|source| DeliveryError::Transport {
                url: url.clone(),
                source,
            })?;
        Ok(Self { client, url, gzip })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl ReportSink for HttpSink {
    async fn deliver(&self, report: &Report) -> Result<(), DeliveryError> {
        let json = report.to_json()?;
        let mut req = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json");
        let body = if self.gzip {
            req = req.header(CONTENT_ENCODING, "gzip");
            gzip(&json).map_err(DeliveryError::Compress)?
        } else {
            json
        };
        let len = body.len();
        let resp = req
            .body(body)
            .send()
            .await
            .map_err(|source| DeliveryError::Transport {
                url: self.url.clone(),
                source,
            })?;
        let status = resp.status();
        if !status.is_success() {
            return Err(DeliveryError::Status {
                url: self.url.clone(),
                status: status.as_u16(),
            });
        }
        debug!(bytes = len, status = status.as_u16(), "report accepted");
        Ok(())
    }
}

/// Prints each report as one JSON line on stdout (`--dry-run`).
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

impl ReportSink for StdoutSink {
    async fn deliver(&self, report: &Report) -> Result<(), DeliveryError> {
        let mut json = report.to_json()?;
        json.push(b'\n');
        let mut out = std::io::stdout().lock();
        out.write_all(&json)?;
        out.flush()?;
        Ok(())
    }
}

/// Keeps delivered reports in memory. Used by tests and embedders.
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    reports: Arc<Mutex<Vec<Report>>>,
    fail: bool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose every delivery fails; nothing is recorded.
    pub fn failing() -> Self {
        Self {
            reports: Arc::default(),
            fail: true,
        }
    }

    pub fn reports(&self) -> Vec<Report> {
        self.reports
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl ReportSink for RecordingSink {
    async fn deliver(&self, report: &Report) -> Result<(), DeliveryError> {
        if self.fail {
            return Err(DeliveryError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "recording sink set to fail",
            )));
        }
        let mut guard = self.reports.lock().unwrap_or_else(|e| e.into_inner());
        guard.push(report.clone());
        Ok(())
    }
}
