//! QuickJS runtime with sandbox limits

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use littlebox_protocol::{HostMessage, RunId};
use rquickjs::{Context, Ctx, Function, Runtime, Value};
use tokio::sync::mpsc;

use crate::bindings::{self, display_value, js_typeof, NOT_IMPLEMENTED_ERROR};
use crate::console::{Clock, Console, ConsoleError, SystemClock};
use crate::report::Reporter;
use crate::sanitize::{
    guard_global_eval, sanitize, SanitizedSource, FORBIDDEN_EVAL_ERROR, FORBIDDEN_EVAL_MESSAGE,
};
use crate::sink::{ChannelSink, EventSink, Notifier};
use crate::{RunError, RunResult, ScriptConfig, ScriptError, Thrown};

/// Name of the single parameter the script body is compiled with
const CONSOLE_BINDING: &str = "console";

/// Thread-safe cancellation flag
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }
}

/// Marks a host busy for as long as it lives
struct ActiveRun<'a>(&'a AtomicBool);

impl<'a> ActiveRun<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Runs user scripts, one at a time.
///
/// Every run gets a brand new QuickJS runtime and console, so nothing a
/// script does survives into the next run.
#[derive(Clone)]
pub struct ScriptHost {
    config: ScriptConfig,
    cancellation: CancellationToken,
    active: Arc<AtomicBool>,
    clock: Arc<dyn Clock>,
}

impl ScriptHost {
    pub fn new(config: ScriptConfig) -> Self {
        Self {
            config,
            cancellation: CancellationToken::new(),
            active: Arc::new(AtomicBool::new(false)),
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the time source used by `console.time`
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &ScriptConfig {
        &self.config
    }

    /// Get the cancellation token for this host
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Cancel the active run.
    ///
    /// A cancel that lands while a run is queued but not yet started applies
    /// to that run; the flag is cleared when a run finishes.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    pub fn is_running(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Run `source` to completion on the calling thread.
    ///
    /// Events go to `sink` as the script produces them. Script failures are
    /// reported on the stream and in the returned [`RunResult`]; the only
    /// error returned is a refusal to start because another run is active.
    pub fn run(
        &self,
        source: &str,
        sink: Rc<dyn EventSink>,
        notifier: &dyn Notifier,
    ) -> Result<RunResult, ScriptError> {
        let reporter = Reporter::new(&self.config.notice_preface, &*sink, notifier);

        let Some(_active) = ActiveRun::acquire(&self.active) else {
            tracing::warn!("Refusing to start a run while another is active");
            reporter.refuse(&ScriptError::Busy);
            return Err(ScriptError::Busy);
        };

        let run_id = RunId::new();
        tracing::info!(%run_id, source_len = source.len(), "Script run starting");
        reporter.begin(run_id);

        let started = Instant::now();
        let outcome = self.execute_sync(source, sink.clone(), started);
        let elapsed = started.elapsed();
        self.cancellation.reset();

        let (return_value, error) = match outcome {
            Ok(value) => {
                tracing::info!(%run_id, ?elapsed, "Script run finished");
                (value, None)
            }
            Err(err) => {
                tracing::info!(%run_id, ?elapsed, error = %err, "Script run failed");
                reporter.fail(run_id, &err);
                (None, Some(err))
            }
        };

        Ok(RunResult {
            run_id,
            elapsed,
            return_value,
            error,
        })
    }

    /// Run `source` on a blocking thread, streaming events and notices into
    /// `events` as they happen.
    pub async fn execute(
        &self,
        source: String,
        events: mpsc::Sender<HostMessage>,
    ) -> Result<RunResult, ScriptError> {
        let host = self.clone();
        tokio::task::spawn_blocking(move || {
            let channel = ChannelSink::new(events);
            host.run(&source, Rc::new(channel.clone()), &channel)
        })
        .await
        .map_err(|e| ScriptError::Join(e.to_string()))?
    }

    fn execute_sync(
        &self,
        source: &str,
        sink: Rc<dyn EventSink>,
        started: Instant,
    ) -> Result<Option<String>, RunError> {
        if let Some(max) = self.config.max_source_len {
            if source.len() > max {
                return Err(RunError::SourceTooLarge {
                    len: source.len(),
                    max,
                });
            }
        }

        let sanitized = sanitize(source);

        let runtime = Runtime::new().map_err(|e| RunError::Init(e.to_string()))?;
        runtime.set_memory_limit(self.config.memory_limit);
        runtime.set_max_stack_size(self.config.max_stack_size);

        let deadline = self.config.deadline;
        let cancel_flag = self.cancellation.cancelled.clone();
        runtime.set_interrupt_handler(Some(Box::new(move || {
            cancel_flag.load(Ordering::SeqCst)
                || deadline.is_some_and(|limit| started.elapsed() > limit)
        })));

        let context = Context::full(&runtime).map_err(|e| RunError::Init(e.to_string()))?;
        tracing::debug!(
            memory_limit = self.config.memory_limit,
            ?deadline,
            "Sandbox runtime ready"
        );

        let console = Rc::new(RefCell::new(Console::with_clock(
            sink,
            self.config.indent_width,
            self.clock.clone(),
        )));

        context.with(|ctx| match invoke(&ctx, &sanitized, console.clone()) {
            Ok(value) => Ok(value),
            Err(err) => {
                let thrown = matches!(err, rquickjs::Error::Exception).then(|| ctx.catch());
                if self.cancellation.is_cancelled() {
                    return Err(RunError::Cancelled);
                }
                if let Some(limit) = deadline.filter(|limit| started.elapsed() > *limit) {
                    return Err(RunError::Timeout(limit));
                }
                match thrown {
                    Some(value) => Err(classify(&ctx, &value, &console)),
                    None => Err(RunError::Engine(err.to_string())),
                }
            }
        })
    }
}

impl Default for ScriptHost {
    fn default() -> Self {
        Self::new(ScriptConfig::default())
    }
}

/// Compile the sanitized source as `function (console) { ... }` and call it
/// with the shadow console as its only argument.
fn invoke<'js>(
    ctx: &Ctx<'js>,
    source: &SanitizedSource,
    console: Rc<RefCell<Console>>,
) -> rquickjs::Result<Option<String>> {
    guard_global_eval(ctx)?;
    let facade = bindings::console_object(ctx, console)?;
    let function_ctor: Function<'js> = ctx.globals().get("Function")?;
    let script: Function<'js> = function_ctor.call((CONSOLE_BINDING, source.as_str()))?;
    let value: Value<'js> = script.call((facade,))?;
    Ok((!value.is_undefined()).then(|| display_value(ctx, &value)))
}

/// Sort a caught value into the run error taxonomy
fn classify<'js>(ctx: &Ctx<'js>, thrown: &Value<'js>, console: &RefCell<Console>) -> RunError {
    if let Some(text) = thrown.as_string() {
        return RunError::Uncaught(Thrown::Text(text.to_string().unwrap_or_default()));
    }

    if let Some(exception) = thrown.as_exception() {
        let name = exception
            .get::<_, Option<String>>("name")
            .ok()
            .flatten()
            .unwrap_or_else(|| "Error".to_string());
        let message = exception.message().unwrap_or_default();

        if name == FORBIDDEN_EVAL_ERROR && message == FORBIDDEN_EVAL_MESSAGE {
            return RunError::Forbidden { message };
        }
        if name == NOT_IMPLEMENTED_ERROR {
            let method = console.try_borrow().ok().and_then(|c| c.last_unsupported());
            if let Some(method) = method {
                if message == (ConsoleError::Unsupported { method }).to_string() {
                    return RunError::Unsupported {
                        method: method.to_string(),
                    };
                }
            }
        }
        return RunError::Uncaught(Thrown::Error {
            name,
            message,
            stack: exception.stack(),
        });
    }

    RunError::Uncaught(Thrown::Other {
        type_name: js_typeof(thrown).to_string(),
        value: display_value(ctx, thrown),
    })
}
