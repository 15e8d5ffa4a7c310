//! Host events (sandbox → display)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{RunId, Severity};

/// One unit of output, grouping or clearing produced by a run.
///
/// The wire shape is the message format the display's handler switches on
/// (`command` + `type`/`body`). Order of delivery is the order of emission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "kebab-case")]
pub enum DiagnosticEvent {
    /// A line of output, already indented for the current group depth
    #[serde(rename = "push-output")]
    Output {
        #[serde(rename = "type")]
        severity: Severity,
        #[serde(rename = "body")]
        text: String,
    },

    /// Wipe the display
    #[serde(rename = "clear-output")]
    Clear,

    /// Open a nested group
    #[serde(rename = "push-group")]
    GroupPush {
        #[serde(rename = "body")]
        label: String,
    },

    /// Close the innermost group
    #[serde(rename = "close-group")]
    GroupPop,
}

impl DiagnosticEvent {
    #[must_use]
    pub fn output(severity: Severity, text: impl Into<String>) -> Self {
        Self::Output {
            severity,
            text: text.into(),
        }
    }

    #[must_use]
    pub fn info(text: impl Into<String>) -> Self {
        Self::output(Severity::Info, text)
    }

    #[must_use]
    pub fn warn(text: impl Into<String>) -> Self {
        Self::output(Severity::Warn, text)
    }

    #[must_use]
    pub fn error(text: impl Into<String>) -> Self {
        Self::output(Severity::Error, text)
    }

    #[must_use]
    pub fn group_push(label: impl Into<String>) -> Self {
        Self::GroupPush {
            label: label.into(),
        }
    }
}

/// Out-of-band notification for the embedding application.
///
/// Independent of the event stream; a host may drop these freely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "notice", rename_all = "kebab-case")]
pub enum HostNotice {
    /// A run is about to execute
    RunStarted { run_id: RunId, at: DateTime<Utc> },

    /// A run terminated with an error (or could not start)
    RunFailed {
        run_id: Option<RunId>,
        message: String,
        at: DateTime<Utc>,
    },
}

impl HostNotice {
    #[must_use]
    pub fn run_started(run_id: RunId) -> Self {
        Self::RunStarted {
            run_id,
            at: Utc::now(),
        }
    }

    #[must_use]
    pub fn run_failed(run_id: Option<RunId>, message: impl Into<String>) -> Self {
        Self::RunFailed {
            run_id,
            message: message.into(),
            at: Utc::now(),
        }
    }
}

/// Anything a host forwards to its display, in a single stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HostMessage {
    Event(DiagnosticEvent),
    Notice(HostNotice),
}

impl From<DiagnosticEvent> for HostMessage {
    fn from(event: DiagnosticEvent) -> Self {
        Self::Event(event)
    }
}

impl From<HostNotice> for HostMessage {
    fn from(notice: HostNotice) -> Self {
        Self::Notice(notice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_wire_shape() {
        let event = DiagnosticEvent::warn("  careful");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"command": "push-output", "type": "warn", "body": "  careful"})
        );
    }

    #[test]
    fn unit_events_carry_only_the_command() {
        let clear = serde_json::to_string(&DiagnosticEvent::Clear).unwrap();
        assert_eq!(clear, r#"{"command":"clear-output"}"#);
        let pop = serde_json::to_string(&DiagnosticEvent::GroupPop).unwrap();
        assert_eq!(pop, r#"{"command":"close-group"}"#);
    }

    #[test]
    fn group_push_parses_from_display_format() {
        let event: DiagnosticEvent =
            serde_json::from_str(r#"{"command":"push-group","body":"Setup"}"#).unwrap();
        assert_eq!(event, DiagnosticEvent::group_push("Setup"));
    }

    #[test]
    fn notice_serialization() {
        let run_id = RunId::new();
        let notice = HostNotice::run_failed(Some(run_id), "Little Box | boom");
        let json = serde_json::to_value(&notice).unwrap();
        assert_eq!(json["notice"], "run-failed");
        assert_eq!(json["message"], "Little Box | boom");
        assert_eq!(json["run_id"], run_id.0.to_string());
    }

    #[test]
    fn host_message_is_untagged() {
        let msg = HostMessage::from(DiagnosticEvent::info("x"));
        let json = serde_json::to_string(&msg).unwrap();
        let back: HostMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);

        let notice = HostMessage::from(HostNotice::run_started(RunId::new()));
        let json = serde_json::to_string(&notice).unwrap();
        assert!(json.contains("run-started"));
        assert!(matches!(
            serde_json::from_str::<HostMessage>(&json).unwrap(),
            HostMessage::Notice(HostNotice::RunStarted { .. })
        ));
    }
}
