//! JavaScript bindings for the shadow console
//!
//! Builds the `console` object handed to user scripts and converts JavaScript
//! values into the display strings the [`Console`] works with.

use std::cell::RefCell;
use std::rc::Rc;

use rquickjs::convert::Coerced;
use rquickjs::function::{Opt, Rest};
use rquickjs::{Ctx, Exception, Function, Object, Type, Value};

use crate::console::{Console, ConsoleError, Unsupported};

/// `name` given to errors thrown by unsupported console methods
pub const NOT_IMPLEMENTED_ERROR: &str = "NotImplementedError";

type Printer = fn(&mut Console, &[String]) -> Result<(), ConsoleError>;
type Labeled = fn(&mut Console, Option<&str>) -> Result<(), ConsoleError>;

/// Build the `console` object for one run
pub fn console_object<'js>(
    ctx: &Ctx<'js>,
    console: Rc<RefCell<Console>>,
) -> rquickjs::Result<Object<'js>> {
    let object = Object::new(ctx.clone())?;

    let printers: [(&str, Printer); 7] = [
        ("log", Console::log),
        ("info", Console::info),
        ("debug", Console::debug),
        ("warn", Console::warn),
        ("error", Console::error),
        ("group", Console::group),
        ("groupCollapsed", Console::group),
    ];
    for (name, op) in printers {
        bind_printer(ctx, &object, name, console.clone(), op)?;
    }

    let labeled: [(&str, Labeled); 4] = [
        ("count", Console::count),
        ("countReset", Console::count_reset),
        ("time", Console::time),
        ("timeEnd", Console::time_end),
    ];
    for (name, op) in labeled {
        bind_labeled(ctx, &object, name, console.clone(), op)?;
    }

    let c = console.clone();
    let assert_fn = Function::new(
        ctx.clone(),
        move |ctx: Ctx<'js>, args: Rest<Value<'js>>| -> rquickjs::Result<()> {
            let mut args = args.0.into_iter();
            let condition = args.next().map(|v| is_truthy(&v)).unwrap_or(false);
            let parts = render_all(&ctx, args);
            with_console(&ctx, &c, |console| console.assert(condition, &parts))
        },
    )?
    .with_name("assert")?;
    object.set("assert", assert_fn)?;

    let c = console.clone();
    let clear_fn = Function::new(ctx.clone(), move |ctx: Ctx<'js>| -> rquickjs::Result<()> {
        with_console(&ctx, &c, Console::clear)
    })?
    .with_name("clear")?;
    object.set("clear", clear_fn)?;

    let c = console.clone();
    let group_end_fn = Function::new(ctx.clone(), move |ctx: Ctx<'js>| -> rquickjs::Result<()> {
        with_console(&ctx, &c, Console::group_end)
    })?
    .with_name("groupEnd")?;
    object.set("groupEnd", group_end_fn)?;

    let c = console.clone();
    let time_log_fn = Function::new(
        ctx.clone(),
        move |ctx: Ctx<'js>, args: Rest<Value<'js>>| -> rquickjs::Result<()> {
            let mut args = args.0.into_iter();
            let label = args.next().and_then(|v| label_of(&ctx, &v));
            let data = render_all(&ctx, args);
            with_console(&ctx, &c, |console| console.time_log(label.as_deref(), &data))
        },
    )?
    .with_name("timeLog")?;
    object.set("timeLog", time_log_fn)?;

    for method in Unsupported::ALL {
        let c = console.clone();
        let refuse = Function::new(
            ctx.clone(),
            move |ctx: Ctx<'js>, _args: Rest<Value<'js>>| -> rquickjs::Result<()> {
                with_console(&ctx, &c, |console| console.unsupported(method))
            },
        )?
        .with_name(method.method())?;
        object.set(method.method(), refuse)?;
    }

    Ok(object)
}

fn bind_printer<'js>(
    ctx: &Ctx<'js>,
    object: &Object<'js>,
    name: &str,
    console: Rc<RefCell<Console>>,
    op: Printer,
) -> rquickjs::Result<()> {
    let func = Function::new(
        ctx.clone(),
        move |ctx: Ctx<'js>, args: Rest<Value<'js>>| -> rquickjs::Result<()> {
            let parts = render_all(&ctx, args.0);
            with_console(&ctx, &console, |console| op(console, &parts))
        },
    )?
    .with_name(name)?;
    object.set(name, func)
}

fn bind_labeled<'js>(
    ctx: &Ctx<'js>,
    object: &Object<'js>,
    name: &str,
    console: Rc<RefCell<Console>>,
    op: Labeled,
) -> rquickjs::Result<()> {
    let func = Function::new(
        ctx.clone(),
        move |ctx: Ctx<'js>, label: Opt<Value<'js>>| -> rquickjs::Result<()> {
            let label = label.0.and_then(|v| label_of(&ctx, &v));
            with_console(&ctx, &console, |console| op(console, label.as_deref()))
        },
    )?
    .with_name(name)?;
    object.set(name, func)
}

/// Runs `op` on the console, turning failures into JavaScript exceptions.
///
/// Values must be rendered before calling this: rendering can re-enter the
/// console (a `toJSON` that logs), which would otherwise hit a held borrow.
fn with_console<'js, R>(
    ctx: &Ctx<'js>,
    console: &RefCell<Console>,
    op: impl FnOnce(&mut Console) -> Result<R, ConsoleError>,
) -> rquickjs::Result<R> {
    let mut console = console
        .try_borrow_mut()
        .map_err(|_| Exception::throw_message(ctx, "console is already in use"))?;
    op(&mut console).map_err(|err| throw_console_error(ctx, err))
}

fn throw_console_error<'js>(ctx: &Ctx<'js>, err: ConsoleError) -> rquickjs::Error {
    match err {
        ConsoleError::Unsupported { .. } => {
            let exception = match Exception::from_message(ctx.clone(), &err.to_string()) {
                Ok(exception) => exception,
                Err(e) => return e,
            };
            if let Err(e) = exception.set("name", NOT_IMPLEMENTED_ERROR) {
                return e;
            }
            exception.throw()
        }
        ConsoleError::Sink(sink_err) => {
            tracing::warn!(error = %sink_err, "Display sink failed during console call");
            Exception::throw_message(ctx, &sink_err.to_string())
        }
    }
}

/// Label argument of `count`/`time`: `undefined` means the default label
fn label_of<'js>(ctx: &Ctx<'js>, value: &Value<'js>) -> Option<String> {
    if value.is_undefined() {
        None
    } else {
        Some(display_value(ctx, value))
    }
}

fn render_all<'js>(ctx: &Ctx<'js>, values: impl IntoIterator<Item = Value<'js>>) -> Vec<String> {
    values.into_iter().map(|v| display_value(ctx, &v)).collect()
}

/// JavaScript truthiness
pub fn is_truthy(value: &Value<'_>) -> bool {
    if value.is_undefined() || value.is_null() {
        return false;
    }
    if let Some(b) = value.as_bool() {
        return b;
    }
    if let Some(n) = value.as_number() {
        return n != 0.0 && !n.is_nan();
    }
    if let Some(s) = value.as_string() {
        return s.to_string().map(|s| !s.is_empty()).unwrap_or(true);
    }
    if value.type_of() == Type::BigInt {
        return value
            .get::<Coerced<String>>()
            .map(|s| s.0 != "0")
            .unwrap_or(true);
    }
    true
}

/// Result of the `typeof` operator
pub fn js_typeof(value: &Value<'_>) -> &'static str {
    match value.type_of() {
        Type::Uninitialized | Type::Undefined => "undefined",
        Type::Bool => "boolean",
        Type::Int | Type::Float => "number",
        Type::String => "string",
        Type::Symbol => "symbol",
        Type::BigInt => "bigint",
        Type::Function | Type::Constructor => "function",
        _ => "object",
    }
}

/// Renders a value for display.
///
/// Strings print raw, errors as `name: message`, plain objects and arrays as
/// JSON, everything else through JavaScript's `String()` conversion.
pub fn display_value<'js>(ctx: &Ctx<'js>, value: &Value<'js>) -> String {
    if let Some(s) = value.as_string() {
        if let Ok(s) = s.to_string() {
            return s;
        }
    }
    if let Some(exception) = value.as_exception() {
        let name = exception
            .get::<_, Option<String>>("name")
            .ok()
            .flatten()
            .unwrap_or_else(|| "Error".to_string());
        return match exception.message() {
            Some(message) if !message.is_empty() => format!("{name}: {message}"),
            _ => name,
        };
    }
    if value.is_object() && !value.is_function() {
        match ctx.json_stringify(value.clone()) {
            Ok(Some(json)) => {
                if let Ok(json) = json.to_string() {
                    return json;
                }
            }
            Ok(None) => {}
            Err(_) => {
                // Cyclic or throwing toJSON; drop the pending exception
                let _ = ctx.catch();
            }
        }
    }
    match value.get::<Coerced<String>>() {
        Ok(coerced) => coerced.0,
        Err(_) => {
            let _ = ctx.catch();
            format!("[{}]", js_typeof(value))
        }
    }
}

/// TypeScript definition for the console surface scripts can use
pub const TYPESCRIPT_DEFINITIONS: &str = r#"
/**
 * Little Box console
 *
 * The only object a script receives. Output appears in the display panel.
 */
declare namespace console {
    /** Print an info line. Arguments are joined with single spaces. */
    function log(...data: any[]): void;
    /** Same as log. */
    function info(...data: any[]): void;
    /** Same as log. */
    function debug(...data: any[]): void;
    /** Print a warning line. */
    function warn(...data: any[]): void;
    /** Print an error line. */
    function error(...data: any[]): void;
    /** Print an error line when `condition` is falsy. */
    function assert(condition?: any, ...data: any[]): void;
    /** Clear the display. Groups, counters and timers are kept. */
    function clear(): void;
    /** Increment and print the counter `label` ("default" when omitted). */
    function count(label?: string): void;
    /** Reset the counter `label` to zero. */
    function countReset(label?: string): void;
    /** Open a group; later lines are indented until groupEnd. */
    function group(...label: any[]): void;
    /** Same as group. */
    function groupCollapsed(...label: any[]): void;
    /** Close the innermost group. Extra calls are ignored. */
    function groupEnd(): void;
    /** Start (or restart) the timer `label`. */
    function time(label?: string): void;
    /** Print the elapsed time of `label` followed by `data`. */
    function timeLog(label?: string, ...data: any[]): void;
    /** Print the elapsed time of `label` and stop it. */
    function timeEnd(label?: string): void;

    /** Not implemented: throws NotImplementedError. */
    function dir(item?: any, options?: any): never;
    /** Not implemented: throws NotImplementedError. */
    function dirxml(...data: any[]): never;
    /** Not implemented: throws NotImplementedError. */
    function table(tabularData?: any, properties?: string[]): never;
    /** Not implemented: throws NotImplementedError. */
    function trace(...data: any[]): never;
    /** Not implemented: throws NotImplementedError. */
    function profile(label?: string): never;
    /** Not implemented: throws NotImplementedError. */
    function profileEnd(label?: string): never;
    /** Not implemented: throws NotImplementedError. */
    function timeStamp(label?: string): never;
}
"#;
