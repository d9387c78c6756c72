//! Local JSON command protocol.
//!
//! One command per line, e.g.
//! `{"id": 7, "type": "request_heat", "system": "sauna", "target": 80}`.

use crate::subsystems::SystemId;
use crate::telemetry::EngineStatus;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MAX_COMMAND_SIZE: usize = 512;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Echoed in the response.
    #[serde(default)]
    pub id: u32,
    #[serde(flatten)]
    pub command_type: CommandType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandType {
    RequestHeat { system: SystemId, target: f32 },
    RequestOff { system: SystemId },
    SetLight { on: bool },
    SetFan { on: bool },
    /// Global off with a lockout that holds until `reset_emergency_stop`.
    EmergencyStop,
    ResetEmergencyStop,
    Status,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Success,
    /// Refused by the engine (lockout, fault latch, handshake failure, bad target).
    Rejected,
    InvalidCommand,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub id: u32,
    pub status: ResponseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine_status: Option<EngineStatus>,
}

impl CommandResponse {
    pub fn success(id: u32) -> Self {
        Self {
            id,
            status: ResponseStatus::Success,
            message: None,
            engine_status: None,
        }
    }

    pub fn rejected(id: u32, reason: impl Into<String>) -> Self {
        Self {
            id,
            status: ResponseStatus::Rejected,
            message: Some(reason.into()),
            engine_status: None,
        }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self {
            id: 0,
            status: ResponseStatus::InvalidCommand,
            message: Some(reason.into()),
            engine_status: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("command exceeds {MAX_COMMAND_SIZE} bytes")]
    MessageTooLarge,
    #[error("invalid command JSON: {0}")]
    InvalidJson(String),
}

pub fn parse_command(json: &str) -> Result<Command, ProtocolError> {
    if json.len() > MAX_COMMAND_SIZE {
        return Err(ProtocolError::MessageTooLarge);
    }
    serde_json::from_str(json).map_err(|e| ProtocolError::InvalidJson(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flat_tagged_commands() {
        let cmd = parse_command(r#"{"id": 7, "type": "request_heat", "system": "sauna", "target": 80}"#)
            .unwrap();
        assert_eq!(cmd.id, 7);
        assert_eq!(
            cmd.command_type,
            CommandType::RequestHeat {
                system: SystemId::Sauna,
                target: 80.0
            }
        );

        let cmd = parse_command(r#"{"type": "status"}"#).unwrap();
        assert_eq!(cmd.id, 0);
        assert_eq!(cmd.command_type, CommandType::Status);

        let cmd = parse_command(r#"{"id": 2, "type": "reset_emergency_stop"}"#).unwrap();
        assert_eq!(cmd.command_type, CommandType::ResetEmergencyStop);
    }

    #[test]
    fn rejects_unknown_and_oversized_input() {
        assert!(matches!(
            parse_command(r#"{"type": "reboot"}"#),
            Err(ProtocolError::InvalidJson(_))
        ));
        assert!(matches!(
            parse_command(r#"{"type": "request_off", "system": "pool"}"#),
            Err(ProtocolError::InvalidJson(_))
        ));
        let huge = format!(r#"{{"type": "status", "pad": "{}"}}"#, "x".repeat(MAX_COMMAND_SIZE));
        assert_eq!(parse_command(&huge), Err(ProtocolError::MessageTooLarge));
    }

    #[test]
    fn response_omits_empty_fields() {
        let json = serde_json::to_string(&CommandResponse::success(3)).unwrap();
        assert_eq!(json, r#"{"id":3,"status":"success"}"#);
    }
}
