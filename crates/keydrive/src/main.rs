//! keydrive: a headless priority input dispatch engine for game automation.
//!
//! Loads a RON profile, arms the lifecycle hotkey, and runs until ctrl-c.
//! The engine itself never prints; this binary subscribes to the bus and
//! turns state changes and error events into log lines.

use std::{
    path::{Path, PathBuf},
    process,
    sync::Arc,
};

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;

use keydrive_engine::Engine;
use keydrive_protocol::{BusEvent, ConfigSnapshot, Topic};
use sendkey::InputSink;

#[derive(Parser, Debug)]
#[command(
    name = "keydrive",
    about = "Priority-scheduled input dispatch for game automation",
    version
)]
struct Cli {
    #[command(flatten)]
    log: logging::LogArgs,

    /// Do not inject any input; everything else runs normally
    #[arg(long)]
    dry_run: bool,

    /// Path to the profile file (RON). Defaults to an empty profile with
    /// only the system hotkeys armed.
    profile: Option<PathBuf>,
}

fn load_profile(path: Option<&Path>) -> Result<ConfigSnapshot, String> {
    let Some(path) = path else {
        return Ok(ConfigSnapshot::default());
    };
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read profile {}: {e}", path.display()))?;
    ron::from_str(&text).map_err(|e| format!("cannot parse profile {}: {e}", path.display()))
}

fn build_sink(dry_run: bool, config: &ConfigSnapshot) -> Arc<dyn InputSink> {
    if dry_run {
        info!("dry run: input injection disabled");
        return Arc::new(sendkey::NoopSink);
    }
    #[cfg(windows)]
    {
        Arc::new(sendkey::WinSink::new(config.send_mode.clone()))
    }
    #[cfg(not(windows))]
    {
        let _ = config;
        warn!("no input backend on this platform; running with a no-op sink");
        Arc::new(sendkey::NoopSink)
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = logging::env_filter_from_spec(&cli.log.spec());
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().without_time())
        .init();

    let config = match load_profile(cli.profile.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            process::exit(1);
        }
    };

    let sink = build_sink(cli.dry_run, &config);
    let engine = Engine::new(sink, config);

    let bus = engine.bus();
    bus.subscribe(Topic::StateChanged, |event| {
        if let BusEvent::StateChanged { old, new } = event {
            info!(%old, %new, "state_changed");
        }
    });
    bus.subscribe(Topic::CoreError, |event| {
        if let BusEvent::CoreError { context, cause } = event {
            warn!(%context, %cause, "core_error");
        }
    });
    bus.subscribe(Topic::HandlerError, |event| {
        if let BusEvent::HandlerError { topic, cause } = event {
            warn!(%topic, %cause, "handler_error");
        }
    });

    engine.start();

    #[cfg(windows)]
    let _backend = match keyhook::HookBackend::start(engine.hook_manager()) {
        Ok(backend) => Some(backend),
        Err(e) => {
            error!(code = 3, error = %e, "hook_backend_unavailable");
            None
        }
    };
    #[cfg(not(windows))]
    warn!("no hook backend on this platform; lifecycle hotkeys are inert");

    info!(
        root = %engine.hook_manager().root_key(),
        "armed; press the root hotkey to start, ctrl-c to exit"
    );

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "signal_wait_failed");
    }
    engine.shutdown();
}
