//! Public protocol structs for WebSocket and HTTP endpoints (serde ready).
//! Keep this small and stable to evolve backend and frontend independently.

use serde::{Deserialize, Serialize};

use crate::domain::ResponseLength;
use crate::progress::ProgressRecord;
use crate::session::{Notice, SessionView};
use crate::validate::{EnhanceProblemRequest, GenerateProblemRequest};

/// Messages the client can send over WebSocket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientWsMessage {
    Ping,
    Generate {
        #[serde(flatten)]
        selection: GenerateProblemRequest,
    },
    UpdateCode {
        code: String,
    },
    Check,
    Run,
    Chat {
        message: String,
        #[serde(default, rename = "responseLength")]
        response_length: Option<String>,
    },
    Import {
        #[serde(flatten)]
        problem: EnhanceProblemRequest,
    },
    NewChat,
    Progress,
}

/// Messages the server sends back over WebSocket.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerWsMessage {
    Pong,
    State {
        view: SessionView,
    },
    Notice {
        notice: Notice,
    },
    Progress {
        progress: ProgressRecord,
        #[serde(rename = "overallPercent")]
        overall_percent: u32,
    },
    Error {
        message: String,
    },
}

impl ServerWsMessage {
    pub fn progress(progress: ProgressRecord) -> Self {
        let overall_percent = progress.overall_percent();
        ServerWsMessage::Progress { progress, overall_percent }
    }
}

/// `responseLength` as sent by clients; unknown or missing means medium.
pub fn parse_response_length(raw: Option<&str>) -> ResponseLength {
    raw.and_then(|s| s.parse().ok()).unwrap_or_default()
}

//
// HTTP request/response DTOs
//

/// Successful flow call.
#[derive(Debug, Serialize)]
pub struct FlowOut<T> {
    pub response: T,
}

#[derive(Debug, Serialize)]
pub struct ErrorOut {
    pub error: String,
}

#[derive(Serialize)]
pub struct HealthOut {
    pub ok: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct OpenSessionIn {
    pub id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CodeIn {
    pub code: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatIn {
    pub message: String,
    pub response_length: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressOut {
    pub progress: ProgressRecord,
    pub overall_percent: u32,
}

#[derive(Debug, Default, Deserialize)]
pub struct WsParams {
    /// Resume this session id instead of starting a fresh one.
    pub session: Option<String>,
}
