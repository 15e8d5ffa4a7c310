//! Run announcements and failure reporting

use littlebox_protocol::{DiagnosticEvent, HostNotice, RunId};

use crate::sink::{EventSink, Notifier};
use crate::{RunError, ScriptError};

/// Turns run lifecycle and failures into display events and host notices
pub struct Reporter<'a> {
    preface: &'a str,
    sink: &'a dyn EventSink,
    notifier: &'a dyn Notifier,
}

impl<'a> Reporter<'a> {
    pub fn new(preface: &'a str, sink: &'a dyn EventSink, notifier: &'a dyn Notifier) -> Self {
        Self {
            preface,
            sink,
            notifier,
        }
    }

    /// Tells the host a run is starting, then clears the display.
    ///
    /// The notice goes first so a host sharing one stream for both learns the
    /// run id before any of the run's events.
    pub fn begin(&self, run_id: RunId) {
        self.notifier.notify(HostNotice::run_started(run_id));
        if let Err(err) = self.sink.emit(DiagnosticEvent::Clear) {
            tracing::warn!(%run_id, error = %err, "Could not clear display");
        }
    }

    /// Appends the failure to the stream and raises a host notice.
    ///
    /// The notice goes out even if the sink refuses the error line.
    pub fn fail(&self, run_id: RunId, error: &RunError) {
        let text = error.to_string();
        if let Err(err) = self.sink.emit(DiagnosticEvent::error(text.clone())) {
            tracing::warn!(%run_id, error = %err, "Could not display run failure");
        }
        self.notifier
            .notify(HostNotice::run_failed(Some(run_id), self.notice_text(&text)));
    }

    /// Notice for a run that was refused before it started
    pub fn refuse(&self, error: &ScriptError) {
        self.notifier
            .notify(HostNotice::run_failed(None, self.notice_text(&error.to_string())));
    }

    fn notice_text(&self, text: &str) -> String {
        format!("{} | {}", self.preface, text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{ChannelSink, RecordingNotifier, RecordingSink, SinkError};
    use littlebox_protocol::HostMessage;
    use tokio::sync::mpsc;
    use crate::Thrown;

    #[test]
    fn begin_notifies_and_clears() {
        let sink = RecordingSink::new();
        let notifier = RecordingNotifier::new();
        let run_id = RunId::new();
        Reporter::new("Little Box", &sink, &notifier).begin(run_id);

        assert_eq!(sink.events(), vec![DiagnosticEvent::Clear]);
        assert!(matches!(
            notifier.notices().as_slice(),
            [HostNotice::RunStarted { run_id: id, .. }] if *id == run_id
        ));
    }

    #[test]
    fn start_notice_precedes_clear_on_a_shared_stream() {
        let (tx, mut rx) = mpsc::channel(4);
        let channel = ChannelSink::new(tx);
        Reporter::new("Little Box", &channel, &channel).begin(RunId::new());
        drop(channel);

        assert!(matches!(
            rx.blocking_recv(),
            Some(HostMessage::Notice(HostNotice::RunStarted { .. }))
        ));
        assert_eq!(
            rx.blocking_recv(),
            Some(HostMessage::Event(DiagnosticEvent::Clear))
        );
        assert_eq!(rx.blocking_recv(), None);
    }

    #[test]
    fn fail_appends_error_and_prefixed_notice() {
        let sink = RecordingSink::new();
        let notifier = RecordingNotifier::new();
        let run_id = RunId::new();
        let error = RunError::Uncaught(Thrown::Text("nope".into()));
        Reporter::new("Little Box", &sink, &notifier).fail(run_id, &error);

        assert_eq!(
            sink.events(),
            vec![DiagnosticEvent::error("Uncaught exception: nope")]
        );
        match notifier.notices().as_slice() {
            [HostNotice::RunFailed {
                run_id: Some(id),
                message,
                ..
            }] => {
                assert_eq!(*id, run_id);
                assert_eq!(message, "Little Box | Uncaught exception: nope");
            }
            other => panic!("unexpected notices: {other:?}"),
        }
    }

    #[test]
    fn notice_survives_broken_sink() {
        let broken = |_event: DiagnosticEvent| -> Result<(), SinkError> {
            Err(SinkError::Disconnected)
        };
        let notifier = RecordingNotifier::new();
        Reporter::new("LB", &broken, &notifier).fail(RunId::new(), &RunError::Cancelled);
        assert_eq!(notifier.notices().len(), 1);
    }

    #[test]
    fn refusal_has_no_run_id() {
        let sink = RecordingSink::new();
        let notifier = RecordingNotifier::new();
        Reporter::new("LB", &sink, &notifier).refuse(&ScriptError::Busy);

        assert!(sink.is_empty());
        assert!(matches!(
            notifier.notices().as_slice(),
            [HostNotice::RunFailed { run_id: None, message, .. }]
                if message == "LB | Another script is already running"
        ));
    }
}
