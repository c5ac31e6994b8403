//! JavaScript Global Objects
//!
//! Registers `console`, the `host` logging namespace and the `native`
//! function table in a JavaScript context.

use rquickjs::function::Rest;
use rquickjs::{Ctx, Exception, Function, Object, Result as JsResult, Value as JsValue};

use crate::convert::Marshal;
use crate::native::NativeLibrary;

/// Register every global the scripting host provides
pub fn register_host_globals(ctx: &Ctx<'_>, marshal: &Marshal, natives: &NativeLibrary) -> JsResult<()> {
    register_console(ctx)?;
    register_host(ctx)?;
    register_natives(ctx, marshal, natives)
}

/// `host.log/debug/warn/error`
fn register_host(ctx: &Ctx<'_>) -> JsResult<()> {
    let host = Object::new(ctx.clone())?;

    host.set("log", Function::new(ctx.clone(), |msg: String| {
        tracing::info!(target: "script_js", "{}", msg);
    })?)?;

    host.set("debug", Function::new(ctx.clone(), |msg: String| {
        tracing::debug!(target: "script_js", "{}", msg);
    })?)?;

    host.set("warn", Function::new(ctx.clone(), |msg: String| {
        tracing::warn!(target: "script_js", "{}", msg);
    })?)?;

    host.set("error", Function::new(ctx.clone(), |msg: String| {
        tracing::error!(target: "script_js", "{}", msg);
    })?)?;

    ctx.globals().set("host", host)?;
    Ok(())
}

/// Register the console object with log, info, warn, error, debug methods
fn register_console(ctx: &Ctx<'_>) -> JsResult<()> {
    let globals = ctx.globals();

    if globals.get::<_, Object>("console").is_ok() {
        return Ok(());
    }

    let console = Object::new(ctx.clone())?;

    console.set("log", Function::new(ctx.clone(), |args: Rest<String>| {
        tracing::info!(target: "script_js.console", "{}", args.0.join(" "));
    })?)?;

    console.set("info", Function::new(ctx.clone(), |args: Rest<String>| {
        tracing::info!(target: "script_js.console", "{}", args.0.join(" "));
    })?)?;

    console.set("warn", Function::new(ctx.clone(), |args: Rest<String>| {
        tracing::warn!(target: "script_js.console", "{}", args.0.join(" "));
    })?)?;

    console.set("error", Function::new(ctx.clone(), |args: Rest<String>| {
        tracing::error!(target: "script_js.console", "{}", args.0.join(" "));
    })?)?;

    console.set("debug", Function::new(ctx.clone(), |args: Rest<String>| {
        tracing::debug!(target: "script_js.console", "{}", args.0.join(" "));
    })?)?;

    globals.set("console", console)?;
    Ok(())
}

/// One `native.<name>` function per library entry
fn register_natives<'js>(ctx: &Ctx<'js>, marshal: &Marshal, natives: &NativeLibrary) -> JsResult<()> {
    let table = Object::new(ctx.clone())?;

    for name in natives.names() {
        let Some(native) = natives.get(&name) else {
            continue;
        };
        let marshal = marshal.clone();
        let fn_name = name.clone();
        let func = Function::new(
            ctx.clone(),
            move |ctx: Ctx<'js>, args: Rest<JsValue<'js>>| -> JsResult<JsValue<'js>> {
                let args = args
                    .0
                    .into_iter()
                    .map(|a| marshal.from_js(a))
                    .collect::<JsResult<Vec<_>>>()?;
                match native(&args) {
                    Ok(value) => marshal.export_to_js(&ctx, &fn_name, value),
                    Err(message) => Err(Exception::throw_message(
                        &ctx,
                        &format!("{}: {}", fn_name, message),
                    )),
                }
            },
        )?;
        table.set(name, func)?;
    }

    ctx.globals().set("native", table)?;
    Ok(())
}
