//! `listctl` – headless host and test harness for the OpenList lifecycle
//! manager.
//!
//! Builds the manager, process host and command bridge once, then either
//! runs a single command, hosts the engine in the foreground, serves the
//! command surface over a Unix socket, or replays a scripted scenario.

mod logging;
mod serve;
mod settings;

use anyhow::Context;
use clap::{Parser, Subcommand};
use lifecycle::host::ForegroundNotice;
use lifecycle::platform::DirAssetSource;
use lifecycle::traits::{CapResult, ForegroundNotifier};
use lifecycle::types::*;
use lifecycle::{
    BridgeContext, CommandRegistry, CommandResult, HostContext, LifecycleManager, ProcessEngine,
    ProcessEngineOptions, ProcessHost,
};
use settings::Settings;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

// ===========================================================================
// CLI definition
// ===========================================================================

#[derive(Parser)]
#[command(
    name = "listctl",
    version,
    about = "Host and test harness for the OpenList engine lifecycle"
)]
struct Cli {
    /// Settings file, layered over ./listctl.yaml.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Host directory for preferences and the engine data root.
    #[arg(long, global = true)]
    app_dir: Option<PathBuf>,

    /// Path to the `openlist` engine binary.
    #[arg(long, global = true)]
    engine_bin: Option<PathBuf>,

    /// Directory holding the bundled web assets.
    #[arg(long, global = true)]
    assets_dir: Option<PathBuf>,

    /// Application package archive used as the asset fallback.
    #[arg(long, global = true)]
    package: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Invoke a service command by name with JSON args.
    ///
    /// The engine lives only as long as this process, so startService,
    /// stopService and resetAdminPassword are refused here; use `run` or
    /// `serve` for those.
    Call {
        /// Command name (e.g. "getHttpPort", "applyConfig").
        cmd: String,
        /// JSON args to pass to the command.
        #[arg(long, default_value = "{}")]
        args: String,
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Start the engine and keep it running until Ctrl-C.
    Run {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Serve the command surface over a Unix socket.
    Serve {
        /// Path for the Unix domain socket.
        #[arg(long)]
        socket: PathBuf,
    },

    /// Run a scripted scenario from a YAML file.
    RunScenario {
        /// Path to the scenario YAML file.
        file: PathBuf,
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
}

// ===========================================================================
// Composition root
// ===========================================================================

/// Foreground notices become log lines in a terminal host.
struct LogNotifier;

impl ForegroundNotifier for LogNotifier {
    fn show(&self, notice: &ForegroundNotice) -> CapResult<()> {
        tracing::info!(
            id = notice.id,
            channel = %notice.channel_id,
            title = %notice.title,
            "{}",
            notice.text
        );
        Ok(())
    }

    fn cancel(&self, id: u32) -> CapResult<()> {
        tracing::info!(id, "service notice withdrawn");
        Ok(())
    }
}

pub(crate) struct Runtime {
    pub bridge: BridgeContext,
    pub registry: CommandRegistry,
}

impl Runtime {
    /// Run one command off the async runtime; engine calls block.
    pub async fn execute(self: &Arc<Self>, name: String, args: serde_json::Value) -> CommandResult {
        let rt = Arc::clone(self);
        let fallback_name = name.clone();
        tokio::task::spawn_blocking(move || rt.registry.execute(&name, args, &rt.bridge))
            .await
            .unwrap_or_else(|e| {
                result_err(
                    &fallback_name,
                    &new_run_id(),
                    0,
                    ErrorCode::InternalError,
                    format!("command task failed: {}", e),
                )
            })
    }
}

fn apply_overrides(cli: &Cli, settings: &mut Settings) {
    if let Some(dir) = &cli.app_dir {
        settings.app_dir = Some(dir.clone());
    }
    if let Some(bin) = &cli.engine_bin {
        settings.engine.binary = bin.clone();
    }
    if let Some(dir) = &cli.assets_dir {
        settings.assets.resource_root = Some(dir.clone());
    }
    if let Some(archive) = &cli.package {
        settings.assets.package_archive = Some(archive.clone());
    }
}

fn build_runtime(settings: &Settings) -> anyhow::Result<Runtime> {
    let app_dir = settings.app_dir();
    std::fs::create_dir_all(&app_dir)
        .with_context(|| format!("cannot create app directory {}", app_dir.display()))?;

    let engine = Arc::new(ProcessEngine::new(ProcessEngineOptions {
        binary: settings.engine.binary.clone(),
        extra_args: settings.engine.extra_args.clone(),
        outbound_probe_url: settings.engine.outbound_probe_url.clone(),
    }));

    let mut ctx = HostContext::new(&app_dir, engine)
        .with_package_archive(settings.assets.package_archive.clone());
    if let Some(root) = &settings.assets.resource_root {
        ctx = ctx.with_assets(Arc::new(DirAssetSource::new(root)));
    }

    let manager = Arc::new(LifecycleManager::new(ctx));
    let host = Arc::new(
        ProcessHost::new(Arc::clone(&manager), Arc::new(LogNotifier))
            .with_shutdown_timeout(settings.engine.shutdown_timeout()),
    );
    tracing::debug!(app_dir = %app_dir.display(), "runtime ready");
    Ok(Runtime {
        bridge: BridgeContext::new(manager, host),
        registry: CommandRegistry::new(),
    })
}

// ===========================================================================
// Main
// ===========================================================================

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut settings = match settings::load_settings(cli.config.as_deref()) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: failed to load settings: {}", e);
            return ExitCode::from(2);
        }
    };
    apply_overrides(&cli, &mut settings);
    logging::init_logging(&settings.logging);

    let runtime = match build_runtime(&settings) {
        Ok(rt) => Arc::new(rt),
        Err(e) => {
            tracing::error!(error = %format!("{:#}", e), "startup failed");
            return ExitCode::from(2);
        }
    };

    match cli.command {
        Commands::Call { cmd, args, json } => cmd_call(&runtime, cmd, &args, json).await,
        Commands::Run { json } => cmd_run(&runtime, json).await,
        Commands::Serve { socket } => match serve::run_daemon(socket, Arc::clone(&runtime)).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                tracing::error!(error = %format!("{:#}", e), "daemon failed");
                ExitCode::from(2)
            }
        },
        Commands::RunScenario { file, json } => cmd_run_scenario(&runtime, &file, json).await,
    }
}

// ===========================================================================
// Subcommand implementations
// ===========================================================================

/// Commands whose effect ends with the process that ran them.
const PROCESS_BOUND_COMMANDS: [&str; 3] = ["startService", "stopService", "resetAdminPassword"];

fn refuse_process_bound(cmd: &str) -> Option<CommandResult> {
    PROCESS_BOUND_COMMANDS.contains(&cmd).then(|| {
        result_err(
            cmd,
            &new_run_id(),
            0,
            ErrorCode::InvalidInput,
            format!(
                "{} needs a long-lived engine; use `listctl run` or `listctl serve`",
                cmd
            ),
        )
    })
}

async fn cmd_call(runtime: &Arc<Runtime>, cmd: String, args_str: &str, json: bool) -> ExitCode {
    if let Some(refused) = refuse_process_bound(&cmd) {
        return output_result(&refused, json);
    }
    let args: serde_json::Value = match serde_json::from_str(args_str) {
        Ok(v) => v,
        Err(e) => {
            let r = result_err(
                &cmd,
                &new_run_id(),
                0,
                ErrorCode::InvalidInput,
                format!("invalid JSON args: {}", e),
            );
            return output_result(&r, json);
        }
    };

    let result = runtime.execute(cmd, args).await;
    output_result(&result, json)
}

async fn cmd_run(runtime: &Arc<Runtime>, json: bool) -> ExitCode {
    let started = runtime
        .execute("startService".into(), serde_json::Value::Null)
        .await;
    let code = output_result(&started, json);
    if started.data != serde_json::Value::Bool(true) {
        return match started.status {
            Status::Pass => ExitCode::from(1),
            _ => code,
        };
    }

    let address = runtime
        .execute("getServiceAddress".into(), serde_json::Value::Null)
        .await;
    tracing::info!(
        address = %address.data,
        port = runtime.bridge.manager().http_port(),
        "engine running, press Ctrl-C to stop"
    );

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "cannot listen for Ctrl-C, stopping now");
    }
    let stopped = runtime
        .execute("stopService".into(), serde_json::Value::Null)
        .await;
    output_result(&stopped, json)
}

async fn cmd_run_scenario(runtime: &Arc<Runtime>, file: &PathBuf, json: bool) -> ExitCode {
    let label = file.display().to_string();
    let yaml = match std::fs::read_to_string(file) {
        Ok(s) => s,
        Err(e) => {
            let r = result_err(
                &label,
                &new_run_id(),
                0,
                ErrorCode::InvalidInput,
                format!("cannot read scenario file: {}", e),
            );
            return output_result(&r, json);
        }
    };

    let scenario = match lifecycle::scenario::load_scenario(&yaml) {
        Ok(s) => s,
        Err(e) => {
            let r = result_err(
                &label,
                &new_run_id(),
                0,
                ErrorCode::InvalidInput,
                e.to_string(),
            );
            return output_result(&r, json);
        }
    };

    let rt = Arc::clone(runtime);
    let scenario_result = match tokio::task::spawn_blocking(move || {
        lifecycle::scenario::run_scenario(&scenario, &rt.bridge, &rt.registry)
    })
    .await
    {
        Ok(r) => r,
        Err(e) => {
            let r = result_err(
                &label,
                &new_run_id(),
                0,
                ErrorCode::InternalError,
                format!("scenario task failed: {}", e),
            );
            return output_result(&r, json);
        }
    };

    if json {
        let j = serde_json::to_string_pretty(&scenario_result).unwrap_or_default();
        println!("{}", j);
    } else {
        println!(
            "Scenario: {}",
            scenario_result.name.as_deref().unwrap_or("<unnamed>")
        );
        println!("Overall: {:?}", scenario_result.overall_status);
        for (i, sr) in scenario_result.step_results.iter().enumerate() {
            println!(
                "  Step {}: {} -> {:?} ({}ms)",
                i, sr.command, sr.status, sr.timing_ms
            );
        }
    }

    exit_code(scenario_result.overall_status)
}

// ===========================================================================
// Output helpers
// ===========================================================================

fn exit_code(status: Status) -> ExitCode {
    match status {
        Status::Pass => ExitCode::SUCCESS,
        Status::Fail => ExitCode::from(1),
        Status::Error => ExitCode::from(2),
    }
}

fn output_result(result: &CommandResult, json: bool) -> ExitCode {
    if json {
        let j = serde_json::to_string_pretty(result).unwrap_or_default();
        println!("{}", j);
    } else {
        print_human(result);
    }
    exit_code(result.status)
}

fn print_human(r: &CommandResult) {
    let status_icon = match r.status {
        Status::Pass => "PASS",
        Status::Fail => "FAIL",
        Status::Error => "ERROR",
    };

    println!("[{}] {}", status_icon, r.command);
    println!("  run_id: {}", r.run_id);
    println!("  timing: {}ms", r.timing_ms);

    if let Some(ref err) = r.error {
        println!("  error:  {} – {}", err.code, err.message);
    }

    if !r.data.is_null() {
        if let Ok(s) = serde_json::to_string_pretty(&r.data) {
            for line in s.lines() {
                println!("  {}", line);
            }
        }
    }

    println!(
        "  env: os={} arch={} headless={}",
        r.env_summary.os, r.env_summary.arch, r.env_summary.headless
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_refuses_process_bound_commands() {
        for cmd in ["startService", "stopService", "resetAdminPassword"] {
            let refused = refuse_process_bound(cmd).unwrap();
            assert_eq!(refused.status, Status::Error);
            let err = refused.error.unwrap();
            assert_eq!(err.code, ErrorCode::InvalidInput);
            assert!(err.message.contains("listctl run"));
        }
        assert!(refuse_process_bound("getHttpPort").is_none());
        assert!(refuse_process_bound("applyConfig").is_none());
    }
}
