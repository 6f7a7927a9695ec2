use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::identity::ActorContext;
use crate::model::{ActionKind, AppKindTag, LifecycleAction};
use crate::pool::PoolState;

fn default_history_limit() -> usize {
    20
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Run one lifecycle action against an application, by name or id.
    Perform {
        target: String,
        action: LifecycleAction,
        actor: ActorContext,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    ListApps {
        actor: ActorContext,
    },
    ListPools {
        actor: ActorContext,
    },
    History {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<String>,
        #[serde(default = "default_history_limit")]
        limit: usize,
        actor: ActorContext,
    },
    Grant {
        target: String,
        owner: String,
        actor: ActorContext,
    },
    Revoke {
        target: String,
        owner: String,
        actor: ActorContext,
    },
    AddApp {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        executable: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        arguments: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        working_directory: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pool: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        site: Option<String>,
        #[serde(default)]
        elevated: bool,
        actor: ActorContext,
    },
    RemoveApp {
        target: String,
        actor: ActorContext,
    },
    /// Shut the daemon down.
    Kill,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Outcome {
        outcome: ActionOutcome,
    },
    Apps {
        apps: Vec<AppRow>,
    },
    Pools {
        pools: Vec<PoolRow>,
    },
    Activity {
        records: Vec<ActivityRow>,
    },
    Success {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Error {
        message: String,
    },
}

/// Result of one lifecycle or administrative action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub success: bool,
    pub message: String,
}

impl ActionOutcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppRow {
    pub id: Uuid,
    pub name: String,
    pub kind: AppKindTag,
    pub is_started: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_launched_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_launch_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolRow {
    pub pool_name: String,
    pub state: PoolState,
    /// Name of the registered application backing this pool, when one
    /// exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRow {
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub action: ActionKind,
    pub application: String,
    pub detail: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("failed to serialize/deserialize JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub fn encode_request(req: &Request) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = serde_json::to_vec(req)?;
    buf.push(b'\n');
    Ok(buf)
}

pub fn decode_request(line: &str) -> Result<Request, ProtocolError> {
    let trimmed = line.trim_end();
    Ok(serde_json::from_str(trimmed)?)
}

pub fn encode_response(resp: &Response) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = serde_json::to_vec(resp)?;
    buf.push(b'\n');
    Ok(buf)
}

pub fn decode_response(line: &str) -> Result<Response, ProtocolError> {
    let trimmed = line.trim_end();
    Ok(serde_json::from_str(trimmed)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip_request(req: &Request) -> Request {
        let bytes = encode_request(req).unwrap();
        let line = std::str::from_utf8(&bytes).unwrap();
        decode_request(line).unwrap()
    }

    fn roundtrip_response(resp: &Response) -> Response {
        let bytes = encode_response(resp).unwrap();
        let line = std::str::from_utf8(&bytes).unwrap();
        decode_response(line).unwrap()
    }

    #[test]
    fn test_perform_roundtrip() {
        let req = Request::Perform {
            target: "checkout".to_string(),
            action: LifecycleAction::Restart,
            actor: ActorContext::from_login("CORP\\msander"),
            reason: Some("deployment".to_string()),
        };
        assert_eq!(roundtrip_request(&req), req);
    }

    #[test]
    fn test_history_limit_defaults() {
        let decoded = decode_request(r#"{"type":"history","actor":{"login_name":"CORP\\x"}}"#)
            .unwrap();
        match decoded {
            Request::History { limit, target, .. } => {
                assert_eq!(limit, 20);
                assert!(target.is_none());
            }
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[test]
    fn test_add_app_roundtrip() {
        let req = Request::AddApp {
            name: "checkout".to_string(),
            executable: None,
            arguments: None,
            working_directory: None,
            pool: Some("CheckoutPool".to_string()),
            site: Some("Default Web Site".to_string()),
            elevated: false,
            actor: ActorContext::from_login("CORP\\admin"),
        };
        assert_eq!(roundtrip_request(&req), req);
    }

    #[test]
    fn test_outcome_response_roundtrip() {
        let resp = Response::Outcome {
            outcome: ActionOutcome::failed("pool 'X' did not reach started"),
        };
        assert_eq!(roundtrip_response(&resp), resp);
    }

    #[test]
    fn test_pools_response_roundtrip() {
        let resp = Response::Pools {
            pools: vec![PoolRow {
                pool_name: "CheckoutPool".to_string(),
                state: PoolState::Started,
                application: Some("checkout".to_string()),
                application_id: Some(Uuid::new_v4()),
            }],
        };
        assert_eq!(roundtrip_response(&resp), resp);
    }

    #[test]
    fn test_malformed_request_errors() {
        assert!(decode_request("{not json").is_err());
        assert!(decode_request(r#"{"type":"no_such_request"}"#).is_err());
    }
}
