//! Host commands (display → host)

use serde::{Deserialize, Serialize};

/// Requests a display can send to the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "kebab-case")]
pub enum HostCommand {
    /// Run the text currently in the code box
    RunPrototype { body: String },

    /// Abort the active run, if any
    CancelRun,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_prototype_from_display() {
        let cmd: HostCommand =
            serde_json::from_str(r#"{"command":"run-prototype","body":"console.log(1)"}"#).unwrap();
        assert_eq!(
            cmd,
            HostCommand::RunPrototype {
                body: "console.log(1)".into()
            }
        );
    }

    #[test]
    fn cancel_run_has_no_payload() {
        let json = serde_json::to_string(&HostCommand::CancelRun).unwrap();
        assert_eq!(json, r#"{"command":"cancel-run"}"#);
    }

    #[test]
    fn unknown_command_is_rejected() {
        assert!(serde_json::from_str::<HostCommand>(r#"{"command":"get-data"}"#).is_err());
    }
}
