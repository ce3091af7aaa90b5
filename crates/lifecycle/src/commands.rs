//! Command registry and the service command surface.
//!
//! Commands are registered by name and invoked with JSON input/output.

use crate::config::{ProxyConfig, ProxyMode};
use crate::host::ProcessHost;
use crate::manager::{LifecycleError, LifecycleManager, DEFAULT_HTTP_PORT};
use crate::types::*;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Signature for all service commands.
pub type CommandHandler = fn(Value, &BridgeContext) -> Result<Value, CommandError>;

/// What command handlers operate on. Built once by the host's composition
/// root and shared with every dispatch surface.
#[derive(Clone)]
pub struct BridgeContext {
    manager: Arc<LifecycleManager>,
    host: Arc<ProcessHost>,
}

impl BridgeContext {
    pub fn new(manager: Arc<LifecycleManager>, host: Arc<ProcessHost>) -> Self {
        Self { manager, host }
    }

    pub fn manager(&self) -> &LifecycleManager {
        &self.manager
    }

    pub fn host(&self) -> &ProcessHost {
        &self.host
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

impl CommandError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            CommandError::InvalidInput(_) => ErrorCode::InvalidInput,
            CommandError::Lifecycle(e) => match e {
                LifecycleError::Initialization(_) => ErrorCode::InitializationFailed,
                LifecycleError::AlreadyRunning => ErrorCode::AlreadyRunning,
                LifecycleError::NotInitialized => ErrorCode::NotInitialized,
                LifecycleError::Config(_) | LifecycleError::Preferences(_) => {
                    ErrorCode::ConfigIoError
                }
                LifecycleError::EngineCall {
                    source: crate::traits::CapError::Unsupported(_),
                    ..
                } => ErrorCode::Unsupported,
                LifecycleError::EngineCall { .. } => ErrorCode::EngineCallFailed,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

pub struct CommandRegistry {
    handlers: HashMap<String, CommandHandler>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        let mut reg = Self {
            handlers: HashMap::new(),
        };
        reg.register("startService", cmd_start_service);
        reg.register("stopService", cmd_stop_service);
        reg.register("isServiceRunning", cmd_is_service_running);
        reg.register("getServiceAddress", cmd_get_service_address);
        reg.register("getHttpPort", cmd_get_http_port);
        reg.register("getInitialAdminPassword", cmd_get_initial_admin_password);
        reg.register("clearInitialAdminPassword", cmd_clear_initial_admin_password);
        reg.register("resetAdminPassword", cmd_reset_admin_password);
        reg.register("applyConfig", cmd_apply_config);
        reg.register("openAutoStartSettings", cmd_open_auto_start_settings);
        reg
    }

    pub fn register(&mut self, name: &str, handler: CommandHandler) {
        self.handlers.insert(name.to_string(), handler);
    }

    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(|s| s.as_str()).collect();
        names.sort();
        names
    }

    /// Execute a command by name and return a full CommandResult.
    pub fn execute(&self, name: &str, args: Value, ctx: &BridgeContext) -> CommandResult {
        let run_id = new_run_id();
        let start = Instant::now();

        let Some(handler) = self.handlers.get(name) else {
            return result_err(
                name,
                &run_id,
                start.elapsed().as_millis() as u64,
                ErrorCode::InvalidInput,
                format!("unknown command: {}", name),
            );
        };

        match handler(args, ctx) {
            Ok(data) => {
                tracing::debug!(command = name, %run_id, "command succeeded");
                result_ok(name, &run_id, start.elapsed().as_millis() as u64, data)
            }
            Err(e) => {
                let code = e.error_code();
                tracing::warn!(command = name, %run_id, %code, error = %e, "command failed");
                result_err(name, &run_id, start.elapsed().as_millis() as u64, code, e.to_string())
            }
        }
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ===========================================================================
// Service commands
// ===========================================================================

fn cmd_start_service(_args: Value, ctx: &BridgeContext) -> Result<Value, CommandError> {
    Ok(json!(ctx.host().start_service()))
}

fn cmd_stop_service(_args: Value, ctx: &BridgeContext) -> Result<Value, CommandError> {
    Ok(json!(ctx.host().stop_service()))
}

fn cmd_is_service_running(_args: Value, ctx: &BridgeContext) -> Result<Value, CommandError> {
    Ok(json!(ctx.manager().is_running()))
}

fn cmd_get_service_address(_args: Value, ctx: &BridgeContext) -> Result<Value, CommandError> {
    Ok(json!(ctx.manager().service_address()))
}

fn cmd_get_http_port(_args: Value, ctx: &BridgeContext) -> Result<Value, CommandError> {
    Ok(json!(ctx.manager().http_port()))
}

/// Returns the captured password, or `null` when none is stored.
fn cmd_get_initial_admin_password(
    _args: Value,
    ctx: &BridgeContext,
) -> Result<Value, CommandError> {
    Ok(json!(ctx.manager().initial_admin_password()))
}

fn cmd_clear_initial_admin_password(
    _args: Value,
    ctx: &BridgeContext,
) -> Result<Value, CommandError> {
    ctx.manager().clear_initial_admin_password()?;
    Ok(json!(true))
}

fn cmd_reset_admin_password(_args: Value, ctx: &BridgeContext) -> Result<Value, CommandError> {
    Ok(json!(ctx.manager().reset_admin_password()?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ApplyConfigArgs {
    port: u16,
    proxy_mode: String,
    proxy_host: String,
    proxy_port: u16,
}

impl Default for ApplyConfigArgs {
    fn default() -> Self {
        Self {
            port: DEFAULT_HTTP_PORT,
            proxy_mode: ProxyMode::None.as_str().to_string(),
            proxy_host: "127.0.0.1".to_string(),
            proxy_port: 7890,
        }
    }
}

/// `applyConfig` – persist port and proxy choice.
///
/// Args: `{ "port": 5244, "proxyMode": "none|system|custom", "proxyHost": "...", "proxyPort": 7890 }`,
/// every field optional. Rejected with `ALREADY_RUNNING` while the engine runs.
fn cmd_apply_config(args: Value, ctx: &BridgeContext) -> Result<Value, CommandError> {
    let args: ApplyConfigArgs = match args {
        Value::Null => ApplyConfigArgs::default(),
        other => serde_json::from_value(other)
            .map_err(|e| CommandError::InvalidInput(e.to_string()))?,
    };
    let mode: ProxyMode = args
        .proxy_mode
        .parse()
        .map_err(CommandError::InvalidInput)?;
    let proxy = ProxyConfig {
        mode,
        host: args.proxy_host,
        port: args.proxy_port,
    };
    ctx.manager().apply_config(args.port, &proxy)?;
    Ok(json!(true))
}

/// Best-effort; failure to open the settings UI yields `false`.
fn cmd_open_auto_start_settings(
    _args: Value,
    ctx: &BridgeContext,
) -> Result<Value, CommandError> {
    match ctx.manager().context().system().open_autostart_settings() {
        Ok(()) => Ok(json!(true)),
        Err(e) => {
            tracing::warn!(error = %e, "could not open auto-start settings");
            Ok(json!(false))
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
