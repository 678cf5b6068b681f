//! Wire protocol: one request per text frame, one JSON reply per request.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TelemetryError;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    GetStats,
    GetProcesses,
    GetTopProcesses {
        #[serde(default)]
        limit: Option<usize>,
    },
    KillProcess {
        pid: u32,
        #[serde(default, rename = "expectedName")]
        expected_name: Option<String>,
    },
}

impl Request {
    pub fn op(&self) -> &'static str {
        match self {
            Request::GetStats => "get_stats",
            Request::GetProcesses => "get_processes",
            Request::GetTopProcesses { .. } => "get_top_processes",
            Request::KillProcess { .. } => "kill_process",
        }
    }
}

/// Accepts the bare operation names for argument-free requests, or a JSON object.
pub fn parse_request(text: &str) -> Result<Request, String> {
    let text = text.trim();
    match text {
        "get_stats" => Ok(Request::GetStats),
        "get_processes" => Ok(Request::GetProcesses),
        "get_top_processes" => Ok(Request::GetTopProcesses { limit: None }),
        _ if text.starts_with('{') => {
            serde_json::from_str(text).map_err(|e| format!("malformed request: {e}"))
        }
        _ => Err(format!("unknown request {text:?}")),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reply {
    pub op: String,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Reply {
    pub fn ok<T: Serialize>(op: &str, data: &T) -> Self {
        match serde_json::to_value(data) {
            Ok(v) => Reply {
                op: op.to_string(),
                ok: true,
                data: Some(v),
                error: None,
            },
            Err(e) => Self::failure(op, "Internal", e.to_string()),
        }
    }

    pub fn err(op: &str, e: &TelemetryError) -> Self {
        Self::failure(op, e.kind(), e.to_string())
    }

    pub fn bad_request(message: String) -> Self {
        Self::failure("unknown", "BadRequest", message)
    }

    fn failure(op: &str, kind: &str, message: String) -> Self {
        Reply {
            op: op.to_string(),
            ok: false,
            data: None,
            error: Some(ErrorBody {
                kind: kind.to_string(),
                message,
            }),
        }
    }
}
