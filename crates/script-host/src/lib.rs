//! Little Box Script Host
//!
//! QuickJS sandbox for running user scripts against a shadow console.
//!
//! ## Script API
//!
//! A script receives exactly one binding, `console`, and nothing else from the
//! host. Supported methods:
//!
//! - `console.log/info/debug/warn/error(...data)` - Print a line
//! - `console.assert(condition, ...data)` - Print an error line if falsy
//! - `console.clear()` - Clear the display
//! - `console.count(label)` / `console.countReset(label)` - Named counters
//! - `console.group(...label)` / `console.groupEnd()` - Nested, indented groups
//! - `console.time(label)` / `console.timeLog(label, ...data)` /
//!   `console.timeEnd(label)` - Named timers
//!
//! `dir`, `dirxml`, `table`, `trace`, `profile`, `profileEnd` and `timeStamp`
//! throw `NotImplementedError`.
//!
//! Any use of `eval` is refused: a source guard shadows the identifier and the
//! global binding is replaced (see [`sanitize`]). The `Function` constructor is
//! left alone. QuickJS itself gives no file system, network or host access,
//! but nothing stops a script from spinning forever unless
//! [`ScriptConfig::deadline`] is set.

pub mod bindings;
pub mod console;
mod report;
mod runtime;
pub mod sanitize;
pub mod sink;

pub use bindings::TYPESCRIPT_DEFINITIONS;
pub use console::{Clock, Console, ConsoleError, ManualClock, SystemClock, Unsupported};
pub use report::*;
pub use runtime::*;
pub use sanitize::{sanitize, SanitizedSource};
pub use sink::*;

use std::time::Duration;

use littlebox_protocol::RunId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A value thrown out of a script
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Thrown {
    /// `throw "text"`
    Text(String),
    /// An `Error` instance
    Error {
        name: String,
        message: String,
        stack: Option<String>,
    },
    /// Anything else (`throw 42`, `throw {}`...)
    Other { type_name: String, value: String },
}

impl std::fmt::Display for Thrown {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(text) => write!(f, "Uncaught exception: {text}"),
            Self::Error {
                name,
                message,
                stack,
            } => {
                write!(f, "{name}: {message}")?;
                match stack.as_deref().map(str::trim_end) {
                    Some(stack) if !stack.is_empty() => write!(f, "\n{stack}"),
                    _ => Ok(()),
                }
            }
            Self::Other { type_name, value } => {
                write!(f, "Unexpected error type '{type_name}' - {value}")
            }
        }
    }
}

/// Why a run stopped early
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunError {
    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    #[error("{0}")]
    Uncaught(Thrown),

    #[error("NotImplementedError: console.{method} is not yet implemented")]
    Unsupported { method: String },

    #[error("Script exceeded its deadline of {} ms", .0.as_millis())]
    Timeout(Duration),

    #[error("Script was cancelled")]
    Cancelled,

    #[error("Script too long ({len} bytes, maximum {max})")]
    SourceTooLarge { len: usize, max: usize },

    #[error("Runtime initialization failed: {0}")]
    Init(String),

    #[error("Engine error: {0}")]
    Engine(String),
}

/// Errors that stop a run from starting at all
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("Another script is already running")]
    Busy,

    #[error("Script task failed: {0}")]
    Join(String),
}

/// Configuration for script execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptConfig {
    /// Spaces of indentation per open group
    pub indent_width: usize,
    /// Wall-clock budget per run. `None` runs until the script returns.
    pub deadline: Option<Duration>,
    /// QuickJS heap limit in bytes
    pub memory_limit: usize,
    /// QuickJS stack limit in bytes
    pub max_stack_size: usize,
    /// Reject sources longer than this many bytes
    pub max_source_len: Option<usize>,
    /// Prefix for failure notices
    pub notice_preface: String,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            indent_width: console::DEFAULT_INDENT_WIDTH,
            deadline: None,
            memory_limit: 64 * 1024 * 1024, // 64 MB
            max_stack_size: 1024 * 1024,    // 1 MB
            max_source_len: None,
            notice_preface: "Little Box".to_string(),
        }
    }
}

/// What a finished run looks like to the host
#[derive(Debug, Clone)]
pub struct RunResult {
    pub run_id: RunId,
    pub elapsed: Duration,
    /// Rendered value of a top-level `return`, if the script had one
    pub return_value: Option<String>,
    pub error: Option<RunError>,
}

impl RunResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}
