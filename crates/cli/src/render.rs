//! Terminal rendering of the event stream

use std::ffi::OsStr;
use std::io::{self, Write};

use littlebox_protocol::{DiagnosticEvent, HostMessage, HostNotice, Severity};

const YELLOW: &str = "\x1b[33m";
const RED: &str = "\x1b[31m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

/// Whether to color output on a terminal, honoring `NO_COLOR`
pub fn color_wanted(is_terminal: bool) -> bool {
    color_allowed(is_terminal, std::env::var_os("NO_COLOR").as_deref())
}

fn color_allowed(is_terminal: bool, no_color: Option<&OsStr>) -> bool {
    // Any non-empty NO_COLOR disables color
    is_terminal && no_color.map_or(true, OsStr::is_empty)
}

/// Plays display events onto a terminal.
///
/// Output lines arrive already indented. Group labels do not, so the display
/// tracks its own depth to place them.
pub struct TerminalDisplay<W: Write> {
    out: W,
    color: bool,
    indent_width: usize,
    depth: usize,
    printed: bool,
}

impl<W: Write> TerminalDisplay<W> {
    pub fn new(out: W, color: bool, indent_width: usize) -> Self {
        Self {
            out,
            color,
            indent_width,
            depth: 0,
            printed: false,
        }
    }

    pub fn show(&mut self, message: &HostMessage) -> io::Result<()> {
        match message {
            HostMessage::Event(event) => self.show_event(event),
            HostMessage::Notice(notice) => {
                match notice {
                    HostNotice::RunStarted { run_id, .. } => {
                        tracing::debug!(%run_id, "Run started");
                    }
                    HostNotice::RunFailed { message, .. } => {
                        tracing::warn!("{message}");
                    }
                }
                Ok(())
            }
        }
    }

    fn show_event(&mut self, event: &DiagnosticEvent) -> io::Result<()> {
        match event {
            DiagnosticEvent::Output { severity, text } => {
                self.printed = true;
                match (severity, self.color) {
                    (Severity::Info, _) => writeln!(self.out, "{text}"),
                    (Severity::Warn, true) => writeln!(self.out, "{YELLOW}{text}{RESET}"),
                    (Severity::Error, true) => writeln!(self.out, "{RED}{text}{RESET}"),
                    (severity, false) => writeln!(self.out, "[{severity}] {text}"),
                }
            }
            DiagnosticEvent::GroupPush { label } => {
                self.printed = true;
                let indent = " ".repeat(self.depth * self.indent_width);
                self.depth += 1;
                if self.color {
                    writeln!(self.out, "{indent}{BOLD}{label}{RESET}")
                } else {
                    writeln!(self.out, "{indent}{label}")
                }
            }
            DiagnosticEvent::GroupPop => {
                self.depth = self.depth.saturating_sub(1);
                Ok(())
            }
            DiagnosticEvent::Clear => {
                if self.printed {
                    writeln!(self.out, "--- console cleared ---")?;
                    self.printed = false;
                }
                Ok(())
            }
        }
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}
