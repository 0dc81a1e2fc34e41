use serde::{Deserialize, Serialize};

use crate::{ModelError, ResultEvent, SuiteRef, WorkerId};

/// One record of the slot ⇄ worker protocol.
///
/// Messages travel as single-line JSON objects tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Message {
    /// Server booted and may accept a suite.
    ReadyForTests,
    /// Runner announces its worker id.
    RunnerId { runner_id: WorkerId },
    /// One lifecycle/result event of the running suite.
    TestResults { event: ResultEvent },
    /// The runner finished its suite.
    SuiteDone { suite: SuiteRef },
    /// Graceful stop request.
    Shutdown {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        custom_id: Option<String>,
    },
    /// Reset mocked external calls on the server between tests.
    ClearMocks {
        start: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        runner_id: Option<WorkerId>,
    },
}

impl Message {
    /// Wire name of the message type.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::ReadyForTests => "readyForTests",
            Message::RunnerId { .. } => "runnerId",
            Message::TestResults { .. } => "testResults",
            Message::SuiteDone { .. } => "suiteDone",
            Message::Shutdown { .. } => "shutdown",
            Message::ClearMocks { .. } => "clearMocks",
        }
    }

    /// Stamp the sending runner's id on every message that carries one.
    pub fn with_runner_id(self, id: WorkerId) -> Self {
        match self {
            Message::RunnerId { .. } => Message::RunnerId { runner_id: id },
            Message::ClearMocks { start, .. } => Message::ClearMocks {
                start,
                runner_id: Some(id),
            },
            other => other,
        }
    }

    /// Encode as one newline-terminated JSON line.
    pub fn to_line(&self) -> Result<String, ModelError> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    /// Decode one JSON line (surrounding whitespace is ignored).
    pub fn from_line(line: &str) -> Result<Self, ModelError> {
        Ok(serde_json::from_str(line.trim())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_shape_uses_type_tag_and_camel_case() {
        let line = Message::RunnerId { runner_id: 7 }.to_line().unwrap();
        assert_eq!(line, "{\"type\":\"runnerId\",\"runnerId\":7}\n");

        let line = Message::Shutdown { custom_id: Some("r-2".into()) }.to_line().unwrap();
        assert_eq!(line.trim(), r#"{"type":"shutdown","customId":"r-2"}"#);
    }

    #[test]
    fn decodes_messages_written_by_hand() {
        let msg = Message::from_line(r#" {"type":"clearMocks","start":1700000000000} "#).unwrap();
        assert_eq!(
            msg,
            Message::ClearMocks {
                start: 1_700_000_000_000,
                runner_id: None
            }
        );
        assert_eq!(msg.kind(), "clearMocks");

        let msg = Message::from_line(r#"{"type":"readyForTests"}"#).unwrap();
        assert_eq!(msg, Message::ReadyForTests);
    }

    #[test]
    fn unknown_type_is_a_codec_error() {
        let err = Message::from_line(r#"{"type":"reboot"}"#).unwrap_err();
        assert!(matches!(err, ModelError::Codec(_)));
    }

    #[test]
    fn runner_id_is_stamped_where_the_message_has_room_for_it() {
        assert_eq!(
            Message::ClearMocks { start: 5, runner_id: None }.with_runner_id(3),
            Message::ClearMocks { start: 5, runner_id: Some(3) }
        );
        assert_eq!(
            Message::RunnerId { runner_id: 99 }.with_runner_id(3),
            Message::RunnerId { runner_id: 3 }
        );
        assert_eq!(Message::ReadyForTests.with_runner_id(3), Message::ReadyForTests);
    }
}
