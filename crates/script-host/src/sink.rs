//! Host-side sinks for the event stream and notices
//!
//! The script host never talks to a display directly. It pushes
//! [`DiagnosticEvent`]s into an [`EventSink`] and out-of-band [`HostNotice`]s
//! into a [`Notifier`], both supplied by the embedding application.

use std::cell::RefCell;
use std::rc::Rc;

use littlebox_protocol::{DiagnosticEvent, HostMessage, HostNotice};
use tokio::sync::mpsc;

/// Receives events in emission order, synchronously.
///
/// Called from inside the running script's call stack: an error returned here
/// is thrown back into the script at the console call that produced it.
pub trait EventSink {
    fn emit(&self, event: DiagnosticEvent) -> Result<(), SinkError>;
}

/// Receives best-effort notices. May drop them.
pub trait Notifier {
    fn notify(&self, notice: HostNotice);
}

/// Sink errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    #[error("Display disconnected")]
    Disconnected,
    #[error("Display buffer full")]
    Full,
    #[error("Display error: {0}")]
    Other(String),
}

impl<F> EventSink for F
where
    F: Fn(DiagnosticEvent) -> Result<(), SinkError>,
{
    fn emit(&self, event: DiagnosticEvent) -> Result<(), SinkError> {
        self(event)
    }
}

/// Keeps every event in memory
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    events: Rc<RefCell<Vec<DiagnosticEvent>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything emitted so far
    pub fn events(&self) -> Vec<DiagnosticEvent> {
        self.events.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.events.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.borrow().is_empty()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: DiagnosticEvent) -> Result<(), SinkError> {
        self.events.borrow_mut().push(event);
        Ok(())
    }
}

/// Keeps every notice in memory
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    notices: Rc<RefCell<Vec<HostNotice>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notices(&self) -> Vec<HostNotice> {
        self.notices.borrow().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notice: HostNotice) {
        self.notices.borrow_mut().push(notice);
    }
}

/// Discards notices
#[derive(Debug, Clone, Copy, Default)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _notice: HostNotice) {}
}

/// Forwards events and notices over a tokio channel.
///
/// Uses blocking sends, so it must be driven from a blocking thread
/// (see [`ScriptHost::execute`](crate::ScriptHost::execute)).
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<HostMessage>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<HostMessage>) -> Self {
        Self { tx }
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: DiagnosticEvent) -> Result<(), SinkError> {
        self.tx
            .blocking_send(HostMessage::Event(event))
            .map_err(|_| SinkError::Disconnected)
    }
}

impl Notifier for ChannelSink {
    fn notify(&self, notice: HostNotice) {
        if self.tx.blocking_send(HostMessage::Notice(notice)).is_err() {
            tracing::debug!("Notice dropped, display channel closed");
        }
    }
}
