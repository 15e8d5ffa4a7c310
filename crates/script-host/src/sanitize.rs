//! Pre-execution guard against `eval`
//!
//! The script runs as the body of a function, so a function declaration named
//! `eval` placed in front of it shadows the global one for every reference in
//! the script: direct calls, aliases and indirect `(0, eval)(...)` calls.
//!
//! Code can still reach global scope, either as `globalThis.eval` or by
//! closing the function wrapper early, so the executor also replaces the
//! global binding with the same guard ([`guard_global_eval`]). The `Function`
//! constructor stays reachable and the body is not scanned.

use rquickjs::{Ctx, Function};

/// Message of the error thrown by the guard
pub const FORBIDDEN_EVAL_MESSAGE: &str = "Invalid use of 'eval'.";

/// Error constructor used by the guard
pub const FORBIDDEN_EVAL_ERROR: &str = "EvalError";

/// Kept on one line so user line numbers stay put
const EVAL_GUARD: &str =
    "function eval() { throw new EvalError(\"Invalid use of 'eval'.\"); } ";

/// User source with the `eval` guard in front
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanitizedSource(String);

impl SanitizedSource {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl AsRef<str> for SanitizedSource {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Prefix `raw` with the `eval` guard
pub fn sanitize(raw: &str) -> SanitizedSource {
    let mut source = String::with_capacity(EVAL_GUARD.len() + raw.len());
    source.push_str(EVAL_GUARD);
    source.push_str(raw);
    tracing::debug!(raw_len = raw.len(), "Sanitized script source");
    SanitizedSource(source)
}

/// Replace the global `eval` of `ctx` with the guard
pub fn guard_global_eval(ctx: &Ctx<'_>) -> rquickjs::Result<()> {
    let guard: Function = ctx.eval(format!("({})", EVAL_GUARD.trim_end()))?;
    ctx.globals().set("eval", guard)
}
