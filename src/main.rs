use anyhow::Context;
use brrtstream::data::{DataFunctionArgs, HandlerResult, Thrown};
use brrtstream::deferred::{defer, DeferredError, Promise};
use brrtstream::logging::{init_logging_with_config, LogConfig};
use brrtstream::response::{redirect, Response, ResponseInit};
use brrtstream::routes::{RouteModule, RouteTable};
use brrtstream::runtime_config::RuntimeConfig;
use brrtstream::server::{AppService, HttpServer};
use brrtstream::stream::PageShell;
use clap::Parser;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Demo server streaming deferred loader data.
#[derive(Parser, Debug)]
#[command(name = "brrtstream-demo", version, about)]
struct Args {
    /// Address to listen on
    #[arg(long, env = "BRRTS_ADDR", default_value = "127.0.0.1:8080")]
    addr: String,
    /// YAML runtime config; `BRRTS_*` variables still apply on top
    #[arg(long)]
    config: Option<PathBuf>,
}

fn slow(ms: u64, value: serde_json::Value) -> Promise {
    Promise::spawn(move || {
        may::coroutine::sleep(Duration::from_millis(ms));
        Ok(value)
    })
}

fn root_loader(_args: DataFunctionArgs) -> HandlerResult {
    Ok(defer()
        .value("site", "brrtstream demo")
        .pending("visitors", slow(150, json!(1024)))
        .header("Cache-Control", "no-store")
        .build()?
        .into())
}

fn post_loader(args: DataFunctionArgs) -> HandlerResult {
    let id = args.param("id").unwrap_or_default().to_string();
    if id == "missing" {
        return Err(Response::json_with_init(
            &json!({ "message": "post not found" }),
            ResponseInit::status(404),
        )
        .into());
    }
    let comments = Promise::spawn(move || {
        may::coroutine::sleep(Duration::from_millis(400));
        if id == "broken" {
            Err(DeferredError::error("comments backend unavailable"))
        } else {
            Ok(json!([{ "author": "ada", "body": "first" }]))
        }
    });
    Ok(defer()
        .value("title", format!("Post {}", args.param("id").unwrap_or_default()))
        .pending("comments", comments)
        .pending("related", slow(50, json!(["a", "b"])))
        .build()?
        .into())
}

fn post_action(args: DataFunctionArgs) -> HandlerResult {
    let fields = args.request.form();
    if fields.iter().any(|(k, _)| k == "delete") {
        return Err(Thrown::Response(redirect("/")));
    }
    Ok(json!({ "saved": fields.len() }).into())
}

fn demo_routes() -> RouteTable {
    let routes = RouteTable::new();
    routes.add(RouteModule::new("root", "/").loader(root_loader));
    routes.add(
        RouteModule::new("post", "/posts/:id")
            .parent("root")
            .loader(post_loader)
            .action(post_action),
    );
    routes.add(
        RouteModule::new("old", "/old/*")
            .parent("root")
            .loader(|_args: DataFunctionArgs| -> HandlerResult { Err(redirect("/posts/1").into()) }),
    );
    routes
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging_with_config(&LogConfig::from_env())?;

    let config = match &args.config {
        Some(path) => RuntimeConfig::from_yaml_file(path)
            .with_context(|| format!("loading {}", path.display()))?
            .with_env_overrides(),
        None => RuntimeConfig::from_env(),
    };
    may::config().set_stack_size(config.stack_size);
    info!(
        stack_size = config.stack_size,
        abort_delay_ms = config.abort_delay.as_millis() as u64,
        server_mode = ?config.server_mode,
        response_mode = ?config.response_mode,
        "Runtime configured"
    );

    let service = AppService::new(
        Arc::new(demo_routes()),
        Arc::new(PageShell::new("brrtstream demo")),
        config,
    );
    let handle = HttpServer(service)
        .start(args.addr.as_str())
        .with_context(|| format!("binding {}", args.addr))?;
    handle.wait_ready()?;
    info!(addr = %handle.local_addr(), "Demo ready");

    wait_for_shutdown()?;
    handle.stop();
    Ok(())
}

#[cfg(unix)]
fn wait_for_shutdown() -> anyhow::Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    if let Some(sig) = signals.forever().next() {
        info!(signal = sig, "Shutdown signal received");
    }
    Ok(())
}

#[cfg(not(unix))]
fn wait_for_shutdown() -> anyhow::Result<()> {
    loop {
        std::thread::park();
    }
}
