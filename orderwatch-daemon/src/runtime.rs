use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, watch};

use orderwatch_core::config::root_at;
use orderwatch_core::{Order, SourceConfig, TransportKind, WatchConfig};
use orderwatch_sync::{NotificationPolicy, NotificationSink};

use crate::engine::{self, EngineHandle, EngineOptions};
use crate::error::{io_err, DaemonError};
use crate::feed::{ChannelFeed, DirectoryFeed};
use crate::paths::socket_path;
use crate::protocol::{DaemonRequest, DaemonResponse};
use crate::source::{DirectoryOrderSource, HttpOrderSource};
use crate::transport::{
    ChangeFeed, OrderSource, PollingTransport, PushTransport, SubscriptionFilter, Transport,
};

const RELAY_CAPACITY: usize = 256;

/// Everything a socket client can reach.
#[derive(Clone)]
struct Controls {
    engine: EngineHandle<Order>,
    visibility: Arc<watch::Sender<bool>>,
    relay: ChannelFeed,
    config: Arc<WatchConfig>,
    shutdown: broadcast::Sender<()>,
    started_at_unix: u64,
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(
    home: &Path,
    config: WatchConfig,
    sink: Arc<dyn NotificationSink>,
    json_logs: bool,
) -> Result<(), DaemonError> {
    init_tracing(json_logs);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf(), config, sink))
}

/// Run the engine and its control socket until `stop`, ctrl-c, or the
/// engine tearing itself down.
pub async fn run(
    home: PathBuf,
    config: WatchConfig,
    sink: Arc<dyn NotificationSink>,
) -> Result<(), DaemonError> {
    config.validate()?;
    ensure_runtime_dirs(&home)?;

    let relay = ChannelFeed::new(config.table.clone(), RELAY_CAPACITY);
    let transport = build_transport(&config, &relay);
    let (visibility_tx, visibility_rx) = watch::channel(true);
    let policy = NotificationPolicy::new(sink)
        .on_new_order(|order: &Order| {
            tracing::info!(order = %order.id, status = ?order.status, "new order");
        })
        .on_order_update(|order: &Order| {
            tracing::info!(order = %order.id, status = ?order.status, "order updated");
        });
    let options = EngineOptions::new(policy)
        .enabled(config.enabled)
        .visibility(visibility_rx);
    let (engine, engine_task) = engine::spawn(transport, options);

    let (shutdown_tx, _) = broadcast::channel::<()>(16);
    let controls = Controls {
        engine: engine.clone(),
        visibility: Arc::new(visibility_tx),
        relay,
        config: Arc::new(config),
        shutdown: shutdown_tx.clone(),
        started_at_unix: unix_seconds_now(),
    };

    let engine_handle = {
        let shutdown = shutdown_tx.clone();
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut engine_task = engine_task;
            let finished = tokio::select! {
                joined = &mut engine_task => Some(joined),
                _ = shutdown_rx.recv() => None,
            };
            let joined = match finished {
                Some(joined) => joined,
                None => {
                    engine.stop();
                    engine_task.await
                }
            };
            let _ = shutdown.send(());
            joined.map_err(|err| DaemonError::Protocol(format!("engine task join failure: {err}")))
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let result = socket_server_task(home, controls, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    let (engine_result, socket_result, signal_result) =
        tokio::join!(engine_handle, socket_handle, signal_handle);

    handle_join("engine", engine_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

/// Pick the source and transport the config asks for.
///
/// HTTP sources take push events from the socket relay; directory sources
/// watch the spool directory itself.
pub fn build_transport(config: &WatchConfig, relay: &ChannelFeed) -> Box<dyn Transport<Order>> {
    let owner = config.owner_filter.clone();
    let source: Arc<dyn OrderSource<Order>> = match &config.source {
        SourceConfig::Http { url } => Arc::new(HttpOrderSource::new(
            url.clone(),
            owner.clone(),
            config.fetch_timeout(),
        )),
        SourceConfig::Directory { path } => {
            Arc::new(DirectoryOrderSource::new(path.clone(), owner.clone()))
        }
    };

    match config.transport {
        TransportKind::Poll => Box::new(PollingTransport::new(
            source,
            config.refresh_interval(),
            config.fetch_timeout(),
        )),
        TransportKind::Push => {
            let feed: Arc<dyn ChangeFeed> = match &config.source {
                SourceConfig::Http { .. } => Arc::new(relay.clone()),
                SourceConfig::Directory { path } => Arc::new(DirectoryFeed::new(path.clone())),
            };
            let filter = SubscriptionFilter {
                table: config.table.clone(),
                owner,
            };
            Box::new(PushTransport::new(
                source,
                feed,
                filter,
                config.fetch_timeout(),
            ))
        }
    }
}

async fn socket_server_task(
    home: PathBuf,
    controls: Controls,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let socket = socket_path(&home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "control socket listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let home = home.clone();
                let controls = controls.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, home, controls).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(
    stream: UnixStream,
    home: PathBuf,
    controls: Controls,
) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request: DaemonRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let stopping = request.cmd == "stop";
        let response = dispatch(&home, &controls, request);
        write_response(&mut writer, &response).await?;
        if stopping {
            break;
        }
    }

    Ok(())
}

fn dispatch(home: &Path, controls: &Controls, request: DaemonRequest) -> DaemonResponse {
    let engine = &controls.engine;
    let result = match request.cmd.as_str() {
        "status" => Ok(build_status_payload(home, controls)),
        "orders" => serde_json::to_value(engine.view().snapshot.as_slice()).map_err(DaemonError::from),
        "refresh" => engine.refresh().map(|()| json!({ "refreshing": true })),
        "seen" => engine.mark_seen().map(|()| json!({ "unseen_count": 0 })),
        "pause" => engine.pause().map(|()| json!({ "paused": true })),
        "resume" => engine.resume().map(|()| json!({ "paused": false })),
        "visibility" => match request.visible {
            Some(visible) => {
                controls.visibility.send_replace(visible);
                Ok(json!({ "visible": visible }))
            }
            None => Err(DaemonError::Protocol(
                "visibility requires a 'visible' flag".to_string(),
            )),
        },
        "event" => match request.event {
            Some(event) => Ok(json!({ "delivered": controls.relay.publish(event) })),
            None => Err(DaemonError::Protocol(
                "event requires an 'event' payload".to_string(),
            )),
        },
        "stop" => {
            let _ = controls.shutdown.send(());
            Ok(json!({ "stopping": true }))
        }
        other => Err(DaemonError::Protocol(format!("unknown command '{other}'"))),
    };

    match result {
        Ok(data) => DaemonResponse::ok(data),
        Err(err) => DaemonResponse::error(err.to_string()),
    }
}

fn build_status_payload(home: &Path, controls: &Controls) -> Value {
    let view = controls.engine.view();
    let last_error = view.last_error.as_ref().map(|err| {
        json!({
            "kind": err.kind(),
            "message": err.to_string(),
        })
    });

    json!({
        "running": true,
        "started_at_unix": controls.started_at_unix,
        "transport": view.transport,
        "lifecycle": view.lifecycle,
        "paused": view.is_paused,
        "loading": view.is_loading,
        "channel": view.channel,
        "unseen_count": view.unseen_count,
        "order_count": view.snapshot.len(),
        "last_sync_at": view.last_sync_at.map(|at| at.to_rfc3339()),
        "last_error": last_error,
        "refresh_interval_ms": controls.config.refresh_interval_ms,
        "owner_filter": controls.config.owner_filter,
        "socket": socket_path(home).display().to_string(),
    })
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    let root = root_at(home);
    if !root.exists() {
        fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;
    }
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn init_tracing(json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt().with_env_filter(filter).with_target(false);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}
