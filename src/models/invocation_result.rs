use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::error::InvocationError;

/// Uniform outcome of every forward or compensating invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ServiceInvocationResult {
    pub success: bool,
    pub result: HashMap<String, Value>,
    pub error_message: Option<String>,
    /// `InvocationError::kind()` of the failure, if any
    pub error_kind: Option<String>,
    pub status_code: Option<u16>,
    pub execution_time_ms: u64,
}

impl ServiceInvocationResult {
    pub fn success(result: HashMap<String, Value>, execution_time_ms: u64) -> Self {
        Self {
            success: true,
            result,
            execution_time_ms,
            ..Default::default()
        }
    }

    pub fn failure(error_message: impl Into<String>, execution_time_ms: u64) -> Self {
        Self {
            success: false,
            error_message: Some(error_message.into()),
            execution_time_ms,
            ..Default::default()
        }
    }

    pub fn from_invocation_error(error: &InvocationError, execution_time_ms: u64) -> Self {
        Self {
            success: false,
            error_message: Some(error.to_string()),
            error_kind: Some(error.kind().to_string()),
            status_code: error.status_code(),
            execution_time_ms,
            ..Default::default()
        }
    }

    pub fn with_status_code(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    pub fn is_timeout(&self) -> bool {
        self.error_kind.as_deref() == Some("timeout")
    }

    /// Error message suitable for recording on a step
    pub fn error_or_default(&self) -> String {
        self.error_message
            .clone()
            .unwrap_or_else(|| "invocation failed without an error message".to_string())
    }
}
