//! Daemon mode – line-delimited JSON over a Unix socket.
//!
//! Each request line is `{"id", "method", "params"}` where `method` names a
//! service command; each response line is `{"id", "result"}` or
//! `{"id", "error"}`. Connections are handled one at a time so commands
//! reach the manager in order.

use crate::Runtime;
use anyhow::Context;
use lifecycle::types::*;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

pub async fn run_daemon(socket_path: PathBuf, runtime: Arc<Runtime>) -> anyhow::Result<()> {
    // Remove stale socket if it exists
    let _ = std::fs::remove_file(&socket_path);

    let listener = UnixListener::bind(&socket_path)
        .with_context(|| format!("cannot bind socket {}", socket_path.display()))?;
    tracing::info!(socket = %socket_path.display(), "listctl daemon listening");

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };
    serve_on(listener, Arc::clone(&runtime), shutdown).await;

    if runtime.bridge.manager().is_running() {
        runtime
            .execute("stopService".into(), serde_json::Value::Null)
            .await;
    }
    let _ = std::fs::remove_file(&socket_path);
    tracing::info!("listctl daemon stopped");
    Ok(())
}

/// Accept connections until `shutdown` completes.
pub async fn serve_on(
    listener: UnixListener,
    runtime: Arc<Runtime>,
    shutdown: impl Future<Output = ()>,
) {
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _addr)) => {
                    tokio::select! {
                        _ = &mut shutdown => break,
                        _ = handle_connection(stream, &runtime) => {}
                    }
                }
                Err(e) => tracing::warn!(error = %e, "accept error"),
            },
        }
    }
}

async fn handle_connection(stream: UnixStream, runtime: &Arc<Runtime>) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        let response = handle_request(&line, runtime).await;
        let mut resp_json = serde_json::to_string(&response).unwrap_or_else(|_| "{}".into());
        resp_json.push('\n');
        if writer.write_all(resp_json.as_bytes()).await.is_err() {
            break;
        }
    }
}

async fn handle_request(line: &str, runtime: &Arc<Runtime>) -> DaemonResponse {
    let req: DaemonRequest = match serde_json::from_str(line) {
        Ok(r) => r,
        Err(e) => {
            return DaemonResponse {
                id: "unknown".into(),
                result: None,
                error: Some(ErrorInfo {
                    code: ErrorCode::InvalidInput,
                    message: format!("invalid JSON request: {}", e),
                    details: serde_json::Value::Null,
                }),
            };
        }
    };

    if runtime.registry.list().binary_search(&req.method.as_str()).is_err() {
        return DaemonResponse {
            id: req.id,
            result: None,
            error: Some(ErrorInfo {
                code: ErrorCode::InvalidInput,
                message: format!("unknown method: {}", req.method),
                details: serde_json::Value::Null,
            }),
        };
    }

    tracing::debug!(id = %req.id, method = %req.method, "daemon request");
    let result = runtime.execute(req.method, req.params).await;
    DaemonResponse {
        id: req.id,
        result: Some(result),
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;
    use serde_json::json;

    fn runtime(app: &std::path::Path) -> Arc<Runtime> {
        let mut settings = Settings::default();
        settings.app_dir = Some(app.to_path_buf());
        settings.engine.binary = app.join("missing-openlist");
        Arc::new(crate::build_runtime(&settings).unwrap())
    }

    #[tokio::test]
    async fn test_handle_request_dispatches_by_method() {
        let app = tempfile::tempdir().unwrap();
        let rt = runtime(app.path());

        let line = json!({ "id": "1", "method": "getHttpPort" }).to_string();
        let resp = handle_request(&line, &rt).await;
        assert_eq!(resp.id, "1");
        let result = resp.result.unwrap();
        assert_eq!(result.status, Status::Pass);
        assert_eq!(result.data, json!(5244));
    }

    #[tokio::test]
    async fn test_handle_request_errors() {
        let app = tempfile::tempdir().unwrap();
        let rt = runtime(app.path());

        let resp = handle_request("not json", &rt).await;
        assert_eq!(resp.id, "unknown");
        assert_eq!(resp.error.unwrap().code, ErrorCode::InvalidInput);

        let line = json!({ "id": "2", "method": "reboot" }).to_string();
        let resp = handle_request(&line, &rt).await;
        assert_eq!(resp.id, "2");
        assert!(resp.result.is_none());
        assert_eq!(resp.error.unwrap().code, ErrorCode::InvalidInput);

        // The engine binary does not exist, so starting reports false.
        let line = json!({ "id": "3", "method": "startService" }).to_string();
        let result = handle_request(&line, &rt).await.result.unwrap();
        assert_eq!(result.data, json!(false));
    }

    #[tokio::test]
    async fn test_socket_round_trip() {
        let app = tempfile::tempdir().unwrap();
        let rt = runtime(app.path());
        let socket = app.path().join("listctl.sock");
        let listener = UnixListener::bind(&socket).unwrap();

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(serve_on(listener, rt, async {
            let _ = stop_rx.await;
        }));

        let stream = UnixStream::connect(&socket).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let request = json!({
            "id": "a",
            "method": "applyConfig",
            "params": { "port": 8080, "proxyMode": "custom", "proxyHost": "10.0.0.5", "proxyPort": 8888 }
        });
        writer
            .write_all(format!("{}\n", request).as_bytes())
            .await
            .unwrap();
        writer
            .write_all(b"{\"id\":\"b\",\"method\":\"getHttpPort\"}\n")
            .await
            .unwrap();

        let mut lines = BufReader::new(reader).lines();
        let first: DaemonResponse =
            serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        let second: DaemonResponse =
            serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(first.id, "a");
        assert_eq!(first.result.unwrap().data, json!(true));
        assert_eq!(second.result.unwrap().data, json!(8080));

        drop(writer);
        stop_tx.send(()).unwrap();
        server.await.unwrap();
    }
}
