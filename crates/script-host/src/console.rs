//! Shadow console handed to user scripts
//!
//! [`Console`] owns all state that spans several diagnostic calls within one
//! run: the open groups, named counters and named timers. A fresh instance is
//! built for every run, so nothing leaks between runs. Arguments arrive
//! already rendered to display strings; the JavaScript side lives in
//! [`bindings`](crate::bindings).

use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use littlebox_protocol::{DiagnosticEvent, Severity};
use thiserror::Error;

use crate::sink::{EventSink, SinkError};

/// Label used by `count`/`time` and friends when none is given
pub const DEFAULT_LABEL: &str = "default";

/// Default number of spaces per open group
pub const DEFAULT_INDENT_WIDTH: usize = 2;

/// Errors raised by console methods
#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error("console.{method} is not yet implemented")]
    Unsupported { method: &'static str },

    #[error(transparent)]
    Sink(#[from] SinkError),
}

/// Console methods that exist on the ambient console but are not emulated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Unsupported {
    Dir,
    Dirxml,
    Table,
    Trace,
    Profile,
    ProfileEnd,
    TimeStamp,
}

impl Unsupported {
    pub const ALL: [Unsupported; 7] = [
        Self::Dir,
        Self::Dirxml,
        Self::Table,
        Self::Trace,
        Self::Profile,
        Self::ProfileEnd,
        Self::TimeStamp,
    ];

    /// Name of the method on the console object
    #[must_use]
    pub const fn method(&self) -> &'static str {
        match self {
            Self::Dir => "dir",
            Self::Dirxml => "dirxml",
            Self::Table => "table",
            Self::Trace => "trace",
            Self::Profile => "profile",
            Self::ProfileEnd => "profileEnd",
            Self::TimeStamp => "timeStamp",
        }
    }
}

/// Monotonic time source for `console.time`
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    origin: Instant,
    offset_nanos: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset_nanos: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let nanos = u64::try_from(by.as_nanos()).unwrap_or(u64::MAX);
        self.offset_nanos.fetch_add(nanos, Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + Duration::from_nanos(self.offset_nanos.load(Ordering::SeqCst))
    }
}

/// Open group labels, innermost last
#[derive(Debug, Default)]
pub struct GroupStack {
    labels: Vec<String>,
}

impl GroupStack {
    pub fn push(&mut self, label: String) {
        self.labels.push(label);
    }

    /// Pops the innermost group. Empty stack is a no-op.
    pub fn pop(&mut self) -> Option<String> {
        self.labels.pop()
    }

    pub fn depth(&self) -> usize {
        self.labels.len()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }
}

/// Named counters. Entries are reset, never removed.
#[derive(Debug, Default)]
pub struct CounterRegistry {
    counts: HashMap<String, u64>,
}

impl CounterRegistry {
    /// Increments `label` (starting from 0) and returns the new count
    pub fn increment(&mut self, label: &str) -> u64 {
        let count = self.counts.entry(label.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn reset(&mut self, label: &str) {
        self.counts.insert(label.to_string(), 0);
    }

    pub fn get(&self, label: &str) -> Option<u64> {
        self.counts.get(label).copied()
    }
}

/// Named timers
#[derive(Debug, Default)]
pub struct TimerRegistry {
    started: HashMap<String, Instant>,
}

impl TimerRegistry {
    /// Starts `label`, overwriting any running timer of the same name
    pub fn start(&mut self, label: &str, at: Instant) {
        self.started.insert(label.to_string(), at);
    }

    pub fn elapsed(&self, label: &str, now: Instant) -> Option<Duration> {
        self.started
            .get(label)
            .map(|start| now.saturating_duration_since(*start))
    }

    pub fn remove(&mut self, label: &str) -> Option<Instant> {
        self.started.remove(label)
    }

    pub fn contains(&self, label: &str) -> bool {
        self.started.contains_key(label)
    }
}

/// Formats an elapsed duration the way timer lines show it: `12.345 ms`
pub fn format_elapsed(elapsed: Duration) -> String {
    format!("{:.3} ms", elapsed.as_secs_f64() * 1000.0)
}

/// The diagnostic surface a script sees as `console`
pub struct Console {
    sink: Rc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    indent_width: usize,
    groups: GroupStack,
    counters: CounterRegistry,
    timers: TimerRegistry,
    last_unsupported: Option<&'static str>,
}

impl Console {
    pub fn new(sink: Rc<dyn EventSink>, indent_width: usize) -> Self {
        Self::with_clock(sink, indent_width, Arc::new(SystemClock))
    }

    pub fn with_clock(sink: Rc<dyn EventSink>, indent_width: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            sink,
            clock,
            indent_width,
            groups: GroupStack::default(),
            counters: CounterRegistry::default(),
            timers: TimerRegistry::default(),
            last_unsupported: None,
        }
    }

    pub fn log(&mut self, parts: &[String]) -> Result<(), ConsoleError> {
        self.print(Severity::Info, parts)
    }

    pub fn info(&mut self, parts: &[String]) -> Result<(), ConsoleError> {
        self.print(Severity::Info, parts)
    }

    pub fn debug(&mut self, parts: &[String]) -> Result<(), ConsoleError> {
        self.print(Severity::Info, parts)
    }

    pub fn warn(&mut self, parts: &[String]) -> Result<(), ConsoleError> {
        self.print(Severity::Warn, parts)
    }

    pub fn error(&mut self, parts: &[String]) -> Result<(), ConsoleError> {
        self.print(Severity::Error, parts)
    }

    /// Behaves like [`error`](Self::error) when `condition` is false
    pub fn assert(&mut self, condition: bool, parts: &[String]) -> Result<(), ConsoleError> {
        if condition {
            return Ok(());
        }
        if parts.is_empty() {
            return self.error(&["Assertion failed".to_string()]);
        }
        self.error(parts)
    }

    /// Clears the display only; groups, counters and timers are untouched
    pub fn clear(&mut self) -> Result<(), ConsoleError> {
        self.emit(DiagnosticEvent::Clear)
    }

    pub fn count(&mut self, label: Option<&str>) -> Result<(), ConsoleError> {
        let label = label.unwrap_or(DEFAULT_LABEL);
        let count = self.counters.increment(label);
        self.print(Severity::Info, &[format!("{label}: {count}")])
    }

    pub fn count_reset(&mut self, label: Option<&str>) -> Result<(), ConsoleError> {
        self.counters.reset(label.unwrap_or(DEFAULT_LABEL));
        Ok(())
    }

    pub fn group(&mut self, parts: &[String]) -> Result<(), ConsoleError> {
        let label = parts.join(" ");
        self.groups.push(label.clone());
        self.emit(DiagnosticEvent::GroupPush { label })
    }

    pub fn group_end(&mut self) -> Result<(), ConsoleError> {
        self.groups.pop();
        self.emit(DiagnosticEvent::GroupPop)
    }

    pub fn time(&mut self, label: Option<&str>) -> Result<(), ConsoleError> {
        let now = self.clock.now();
        self.timers.start(label.unwrap_or(DEFAULT_LABEL), now);
        Ok(())
    }

    pub fn time_log(&mut self, label: Option<&str>, data: &[String]) -> Result<(), ConsoleError> {
        self.report_timer(label.unwrap_or(DEFAULT_LABEL), data)
            .map(|_| ())
    }

    pub fn time_end(&mut self, label: Option<&str>) -> Result<(), ConsoleError> {
        let label = label.unwrap_or(DEFAULT_LABEL);
        if self.report_timer(label, &[])? {
            self.timers.remove(label);
        }
        Ok(())
    }

    /// Refuses a method the console does not emulate
    pub fn unsupported(&mut self, method: Unsupported) -> Result<(), ConsoleError> {
        self.last_unsupported = Some(method.method());
        Err(ConsoleError::Unsupported {
            method: method.method(),
        })
    }

    /// Method name of the most recent unsupported call, if any
    pub fn last_unsupported(&self) -> Option<&'static str> {
        self.last_unsupported
    }

    pub fn depth(&self) -> usize {
        self.groups.depth()
    }

    pub fn groups(&self) -> &GroupStack {
        &self.groups
    }

    pub fn counters(&self) -> &CounterRegistry {
        &self.counters
    }

    pub fn timers(&self) -> &TimerRegistry {
        &self.timers
    }

    /// Emits the elapsed line for `label`, or a warning if it was never
    /// started. Returns whether the timer existed.
    fn report_timer(&mut self, label: &str, data: &[String]) -> Result<bool, ConsoleError> {
        let Some(elapsed) = self.timers.elapsed(label, self.clock.now()) else {
            self.print(
                Severity::Warn,
                &[format!("Timer '{label}' does not exist")],
            )?;
            return Ok(false);
        };

        let mut parts = Vec::with_capacity(data.len() + 1);
        parts.push(format!("{label}: {}", format_elapsed(elapsed)));
        parts.extend(data.iter().cloned());
        self.print(Severity::Info, &parts)?;
        Ok(true)
    }

    fn print(&mut self, severity: Severity, parts: &[String]) -> Result<(), ConsoleError> {
        let indent = " ".repeat(self.groups.depth() * self.indent_width);
        let text = format!("{indent}{}", parts.join(" "));
        self.emit(DiagnosticEvent::Output { severity, text })
    }

    fn emit(&self, event: DiagnosticEvent) -> Result<(), ConsoleError> {
        self.sink.emit(event).map_err(ConsoleError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::RecordingSink;

    fn strings(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|p| p.to_string()).collect()
    }

    fn console() -> (Console, RecordingSink, ManualClock) {
        let sink = RecordingSink::new();
        let clock = ManualClock::new();
        let console = Console::with_clock(
            Rc::new(sink.clone()),
            DEFAULT_INDENT_WIDTH,
            Arc::new(clock.clone()),
        );
        (console, sink, clock)
    }

    #[test]
    fn log_joins_parts_with_spaces() {
        let (mut console, sink, _) = console();
        console.log(&strings(&["a", "b", "c"])).unwrap();
        console.warn(&strings(&["w"])).unwrap();
        console.error(&strings(&["e", "1"])).unwrap();
        console.debug(&strings(&["d"])).unwrap();
        assert_eq!(
            sink.events(),
            vec![
                DiagnosticEvent::info("a b c"),
                DiagnosticEvent::warn("w"),
                DiagnosticEvent::error("e 1"),
                DiagnosticEvent::info("d"),
            ]
        );
    }

    #[test]
    fn groups_indent_following_output() {
        let (mut console, sink, _) = console();
        console.group(&strings(&["A"])).unwrap();
        console.log(&strings(&["x"])).unwrap();
        console.group_end().unwrap();
        console.log(&strings(&["y"])).unwrap();
        assert_eq!(
            sink.events(),
            vec![
                DiagnosticEvent::group_push("A"),
                DiagnosticEvent::info("  x"),
                DiagnosticEvent::GroupPop,
                DiagnosticEvent::info("y"),
            ]
        );
    }

    #[test]
    fn nested_groups_use_configured_width() {
        let sink = RecordingSink::new();
        let mut console = Console::new(Rc::new(sink.clone()), 4);
        console.group(&strings(&["outer", "group"])).unwrap();
        console.group(&[]).unwrap();
        console.info(&strings(&["deep"])).unwrap();
        assert_eq!(console.depth(), 2);
        assert_eq!(console.groups().labels(), ["outer group", ""]);
        assert_eq!(sink.events()[2], DiagnosticEvent::info("        deep"));
    }

    #[test]
    fn group_end_on_empty_stack_still_emits() {
        let (mut console, sink, _) = console();
        console.group_end().unwrap();
        console.group_end().unwrap();
        console.log(&strings(&["flat"])).unwrap();
        assert_eq!(console.depth(), 0);
        assert_eq!(
            sink.events(),
            vec![
                DiagnosticEvent::GroupPop,
                DiagnosticEvent::GroupPop,
                DiagnosticEvent::info("flat"),
            ]
        );
    }

    #[test]
    fn count_and_reset() {
        let (mut console, sink, _) = console();
        console.count(Some("a")).unwrap();
        console.count(Some("a")).unwrap();
        console.count(Some("a")).unwrap();
        console.count_reset(Some("a")).unwrap();
        console.count(Some("a")).unwrap();
        console.count(None).unwrap();
        assert_eq!(
            sink.events(),
            vec![
                DiagnosticEvent::info("a: 1"),
                DiagnosticEvent::info("a: 2"),
                DiagnosticEvent::info("a: 3"),
                DiagnosticEvent::info("a: 1"),
                DiagnosticEvent::info("default: 1"),
            ]
        );
    }

    #[test]
    fn count_reset_creates_entry_silently() {
        let (mut console, sink, _) = console();
        console.count_reset(Some("fresh")).unwrap();
        assert_eq!(console.counters().get("fresh"), Some(0));
        assert!(sink.is_empty());
    }

    #[test]
    fn assert_only_fires_on_false() {
        let (mut console, sink, _) = console();
        console.assert(true, &strings(&["never"])).unwrap();
        console.assert(false, &strings(&["broken", "42"])).unwrap();
        console.assert(false, &[]).unwrap();
        assert_eq!(
            sink.events(),
            vec![
                DiagnosticEvent::error("broken 42"),
                DiagnosticEvent::error("Assertion failed"),
            ]
        );
    }

    #[test]
    fn clear_keeps_state() {
        let (mut console, sink, _) = console();
        console.group(&strings(&["g"])).unwrap();
        console.count(None).unwrap();
        console.time(Some("t")).unwrap();
        console.clear().unwrap();
        console.count(None).unwrap();

        assert_eq!(console.depth(), 1);
        assert!(console.timers().contains("t"));
        let events = sink.events();
        assert_eq!(events[2], DiagnosticEvent::Clear);
        assert_eq!(events[3], DiagnosticEvent::info("  default: 2"));
    }

    #[test]
    fn missing_timer_warns() {
        let (mut console, sink, _) = console();
        console.time_log(Some("missing"), &[]).unwrap();
        console.time_end(None).unwrap();
        assert_eq!(
            sink.events(),
            vec![
                DiagnosticEvent::warn("Timer 'missing' does not exist"),
                DiagnosticEvent::warn("Timer 'default' does not exist"),
            ]
        );
    }

    #[test]
    fn timers_report_elapsed_then_end() {
        let (mut console, sink, clock) = console();
        console.time(Some("load")).unwrap();
        clock.advance(Duration::from_micros(1_500));
        console
            .time_log(Some("load"), &strings(&["halfway"]))
            .unwrap();
        clock.advance(Duration::from_millis(2));
        console.time_end(Some("load")).unwrap();
        console.time_end(Some("load")).unwrap();

        assert_eq!(
            sink.events(),
            vec![
                DiagnosticEvent::info("load: 1.500 ms halfway"),
                DiagnosticEvent::info("load: 3.500 ms"),
                DiagnosticEvent::warn("Timer 'load' does not exist"),
            ]
        );
        assert!(!console.timers().contains("load"));
    }

    #[test]
    fn time_overwrites_running_timer() {
        let (mut console, sink, clock) = console();
        console.time(None).unwrap();
        clock.advance(Duration::from_millis(10));
        console.time(None).unwrap();
        clock.advance(Duration::from_millis(1));
        console.time_end(None).unwrap();
        assert_eq!(sink.events(), vec![DiagnosticEvent::info("default: 1.000 ms")]);
    }

    #[test]
    fn unsupported_methods_fail_loudly() {
        let (mut console, sink, _) = console();
        for method in Unsupported::ALL {
            let err = console.unsupported(method).unwrap_err();
            assert!(matches!(err, ConsoleError::Unsupported { .. }));
            assert_eq!(
                err.to_string(),
                format!("console.{} is not yet implemented", method.method())
            );
        }
        assert_eq!(console.last_unsupported(), Some("timeStamp"));
        assert!(sink.is_empty());
    }

    #[test]
    fn sink_failure_surfaces_as_console_error() {
        let failing = |_event: DiagnosticEvent| -> Result<(), SinkError> { Err(SinkError::Full) };
        let mut console = Console::new(Rc::new(failing), DEFAULT_INDENT_WIDTH);
        let err = console.log(&strings(&["lost"])).unwrap_err();
        assert!(matches!(err, ConsoleError::Sink(SinkError::Full)));
    }

    #[test]
    fn elapsed_formatting() {
        assert_eq!(format_elapsed(Duration::ZERO), "0.000 ms");
        assert_eq!(format_elapsed(Duration::from_micros(12_345)), "12.345 ms");
    }
}
