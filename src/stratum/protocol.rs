//! Stratum protocol message definitions
//!
//! Line-delimited JSON-RPC: every message is one JSON object terminated by a
//! single `\n`. Params stay as raw `serde_json::Value`s so optional or
//! unknown fields pass through the proxy untouched.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Stratum error code: no job / bad parameters.
pub const ERR_NO_JOB: i32 = 20;
/// Stratum error code: stale share.
pub const ERR_STALE_SHARE: i32 = 21;
/// Stratum error code: share above the session target.
pub const ERR_LOW_DIFFICULTY: i32 = 23;

/// Stratum protocol methods
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StratumMethod {
    /// Client subscribes to mining notifications
    Subscribe,
    /// Client authorizes with credentials
    Authorize,
    /// Client submits a share
    Submit,
    /// Server notifies client of new work
    Notify,
    /// Server sets the share target
    SetTarget,
    /// Server sets the share difficulty
    SetDifficulty,
    /// Server sets extra nonce
    SetExtranonce,
    /// Client requests job transactions
    GetTransactions,
    /// Client opts into extranonce updates
    ExtranonceSubscribe,
    /// Client suggests a starting difficulty
    SuggestDifficulty,
    /// Client suggests a starting target
    SuggestTarget,
    /// Unknown method
    Unknown(String),
}

impl StratumMethod {
    /// Parse method from string
    pub fn parse_method(s: &str) -> Self {
        match s {
            "mining.subscribe" => Self::Subscribe,
            "mining.authorize" => Self::Authorize,
            "mining.submit" => Self::Submit,
            "mining.notify" => Self::Notify,
            "mining.set_target" => Self::SetTarget,
            "mining.set_difficulty" => Self::SetDifficulty,
            "mining.set_extranonce" => Self::SetExtranonce,
            "mining.get_transactions" => Self::GetTransactions,
            "mining.extranonce.subscribe" => Self::ExtranonceSubscribe,
            "mining.suggest_difficulty" => Self::SuggestDifficulty,
            "mining.suggest_target" => Self::SuggestTarget,
            _ => Self::Unknown(s.to_string()),
        }
    }

    /// Convert to string representation
    pub fn as_str(&self) -> &str {
        match self {
            Self::Subscribe => "mining.subscribe",
            Self::Authorize => "mining.authorize",
            Self::Submit => "mining.submit",
            Self::Notify => "mining.notify",
            Self::SetTarget => "mining.set_target",
            Self::SetDifficulty => "mining.set_difficulty",
            Self::SetExtranonce => "mining.set_extranonce",
            Self::GetTransactions => "mining.get_transactions",
            Self::ExtranonceSubscribe => "mining.extranonce.subscribe",
            Self::SuggestDifficulty => "mining.suggest_difficulty",
            Self::SuggestTarget => "mining.suggest_target",
            Self::Unknown(s) => s,
        }
    }
}

/// Stratum request message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StratumRequest {
    /// Request ID
    pub id: Value,
    /// Method name
    pub method: String,
    /// Method parameters
    pub params: Vec<Value>,
}

impl StratumRequest {
    /// Create a new request
    pub fn new(id: impl Into<Value>, method: &str, params: Vec<Value>) -> Self {
        Self {
            id: id.into(),
            method: method.to_string(),
            params,
        }
    }

    /// Get the method as enum
    pub fn method_enum(&self) -> StratumMethod {
        StratumMethod::parse_method(&self.method)
    }
}

/// Stratum response message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StratumResponse {
    /// Request ID this responds to
    pub id: Value,
    /// Result if successful
    pub result: Option<Value>,
    /// Error if failed
    pub error: Option<Value>,
}

impl StratumResponse {
    /// Create a successful response
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response: `{"result": false, "error": [code, msg, null]}`
    pub fn error(id: Value, code: i32, message: &str) -> Self {
        Self {
            id,
            result: Some(Value::Bool(false)),
            error: Some(Value::Array(vec![
                Value::Number(code.into()),
                Value::String(message.to_string()),
                Value::Null,
            ])),
        }
    }

    /// Whether the result field is boolean true
    pub fn is_ok(&self) -> bool {
        matches!(self.result, Some(Value::Bool(true)))
    }
}

/// Stratum notification (no response expected, id is null)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StratumNotification {
    /// Method name
    pub method: String,
    /// Method parameters
    pub params: Vec<Value>,
    /// Always null for notifications
    #[serde(default)]
    pub id: Value,
}

impl StratumNotification {
    /// Create a new notification
    pub fn new(method: &str, params: Vec<Value>) -> Self {
        Self {
            method: method.to_string(),
            params,
            id: Value::Null,
        }
    }
}

/// Generic Stratum message
#[derive(Debug, Clone)]
pub enum StratumMessage {
    /// Request from a peer
    Request(StratumRequest),
    /// Response to an earlier request
    Response(StratumResponse),
    /// Notification, no response expected
    Notification(StratumNotification),
}

impl StratumMessage {
    /// Parse a single line into a Stratum message.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(json.trim())?;

        if value.get("method").is_some() {
            if value.get("id") == Some(&Value::Null) || value.get("id").is_none() {
                let notification: StratumNotification = serde_json::from_value(value)?;
                Ok(StratumMessage::Notification(notification))
            } else {
                let request: StratumRequest = serde_json::from_value(value)?;
                Ok(StratumMessage::Request(request))
            }
        } else {
            let response: StratumResponse = serde_json::from_value(value)?;
            Ok(StratumMessage::Response(response))
        }
    }
}

/// Serialize any Stratum message to a newline-terminated frame. A frame is
/// always a complete object plus exactly one trailing `\n`.
pub fn to_line<T: Serialize>(message: &T) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}
