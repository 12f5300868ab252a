//! Report wire format for child→parent result delivery.
//!
//! ## Wire Format
//!
//! One JSON document sent as the entire body of a single loopback TCP
//! connection. There is no length prefix and no framing beyond the
//! connection itself: the sender writes the document, flushes, and shuts
//! down its write side; the receiver reads until EOF and decodes the
//! accumulated bytes. The channel is strictly one-shot, so the close *is*
//! the frame boundary.
//!
//! ## Fields
//!
//! | Field       | Present when           | Meaning                        |
//! |-------------|------------------------|--------------------------------|
//! | `success`   | always                 | the command actually ran       |
//! | `output`    | command ran            | captured stdout, line by line  |
//! | `exit_code` | command ran            | shell exit status              |
//! | `error`     | setup/execution failed | human-readable failure cause   |
//!
//! Exactly one of {`output`+`exit_code`} or {`error`} is populated; the
//! pairing with `success` is a structural invariant checked on both encode
//! and decode.

use serde::{Deserialize, Serialize};

/// Maximum encoded report size accepted by the receiving side (16 MB).
pub const MAX_REPORT_SIZE: usize = 16 * 1024 * 1024;

/// Wire format error.
#[derive(Debug)]
pub enum ReportError {
    TooLarge(usize),
    Malformed(String),
    Inconsistent(&'static str),
}

impl std::fmt::Display for ReportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooLarge(size) => write!(f, "report too large: {size} bytes"),
            Self::Malformed(msg) => write!(f, "malformed report: {msg}"),
            Self::Inconsistent(msg) => write!(f, "inconsistent report: {msg}"),
        }
    }
}

impl std::error::Error for ReportError {}

/// Outcome of one detached launch, as sent over the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Report {
    /// Report for a command that ran to completion, whatever its status.
    pub fn ran(exit_code: i32, output: Vec<String>) -> Self {
        Self {
            success: true,
            output: Some(output),
            exit_code: Some(exit_code),
            error: None,
        }
    }

    /// Report for a launch that failed before or while starting the command.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            exit_code: None,
            error: Some(error.into()),
        }
    }

    /// Encode as a JSON document. Validates the structural invariant first.
    pub fn encode(&self) -> Result<Vec<u8>, ReportError> {
        self.validate()?;
        serde_json::to_vec(self).map_err(|e| ReportError::Malformed(e.to_string()))
    }

    /// Decode a full connection body. Enforces the size cap and the
    /// structural invariant.
    pub fn decode(data: &[u8]) -> Result<Self, ReportError> {
        if data.len() > MAX_REPORT_SIZE {
            return Err(ReportError::TooLarge(data.len()));
        }
        let report: Self =
            serde_json::from_slice(data).map_err(|e| ReportError::Malformed(e.to_string()))?;
        report.validate()?;
        Ok(report)
    }

    fn validate(&self) -> Result<(), ReportError> {
        match (&self.output, self.exit_code, &self.error) {
            (Some(_), Some(_), None) if self.success => Ok(()),
            (Some(_), Some(_), None) => Err(ReportError::Inconsistent(
                "ran report must set success",
            )),
            (None, None, Some(_)) if !self.success => Ok(()),
            (None, None, Some(_)) => Err(ReportError::Inconsistent(
                "failure report must clear success",
            )),
            _ => Err(ReportError::Inconsistent(
                "exactly one of output+exit_code or error must be populated",
            )),
        }
    }
}
