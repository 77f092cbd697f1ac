use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;

use axum::body::Body;
use axum::http::Request;
use futures_util::future;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
#[cfg(unix)]
use socket2::{Domain, Protocol, Socket, Type};
use stallguard::config::{
    apply_env_overrides, load_config_or_default, AppConfig, ServerConfig, CONFIG_PATH_ENV,
    DEFAULT_CONFIG_PATH, PORT_ENV,
};
use stallguard::lifecycle::StreamGate;
use stallguard::observability::init_tracing;
use stallguard::routing::dispatch::{dispatch_request, normalize_base_path};
use stallguard::state::AppState;
use stallguard::transport::HttpTransport;

const DEFAULT_LISTEN_BACKLOG: i32 = 1024;

fn main() {
    let config_path =
        std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let (mut config, used_defaults) = load_config_or_default(&config_path).unwrap_or_else(|e| {
        eprintln!("Failed to load configuration from {config_path}: {e}");
        std::process::exit(1);
    });
    apply_env_overrides(&mut config, std::env::var(PORT_ENV).ok().as_deref());

    init_tracing(&config.features.log_level, config.features.log_format);
    if used_defaults {
        tracing::info!(
            "{config_path} not found; using built-in defaults (copy config.example.yaml to customize)"
        );
    }
    let runtime = build_runtime(&config);

    runtime.block_on(async move {
        run(config).await;
    });
}

fn build_runtime(config: &AppConfig) -> tokio::runtime::Runtime {
    let worker_threads = config.server.runtime_worker_threads;
    let mut runtime_builder = if worker_threads == Some(1) {
        tokio::runtime::Builder::new_current_thread()
    } else {
        let mut builder = tokio::runtime::Builder::new_multi_thread();
        if let Some(threads) = worker_threads {
            builder.worker_threads(threads);
        }
        builder
    };
    runtime_builder.enable_io();
    runtime_builder.enable_time();
    runtime_builder.build().unwrap_or_else(|e| {
        eprintln!("Failed to initialize Tokio runtime: {e}");
        std::process::exit(1);
    })
}

async fn run(config: AppConfig) {
    let host = config.server.host.clone();
    let port = config.server.port;
    let base_path = normalize_base_path(&config.server.base_path);
    let shutdown_grace = config.server.shutdown_grace();

    let transport = HttpTransport::new(&config.server, &config.relay).unwrap_or_else(|err| {
        eprintln!("Failed to build upstream HTTP client: {err}");
        std::process::exit(1);
    });
    let stream_gate = StreamGate::new();
    let state = Arc::new(AppState::with_stream_gate(
        config,
        transport,
        stream_gate.clone(),
    ));
    let dispatch_base_path = Arc::<str>::from(base_path.clone());

    tracing::info!(
        services = state.services().len(),
        sentinel = %state.config.relay.sentinel,
        inactivity_timeout_ms = state.config.relay.inactivity_timeout_ms,
        "stallguard starting on {}:{} with base_path='{}'",
        host,
        port,
        base_path
    );

    let listeners = build_server_listeners(&state.config.server, &host, port)
        .await
        .unwrap_or_else(|err| {
            eprintln!("Failed to bind to {host}:{port}: {err}");
            std::process::exit(1);
        });
    let reuse_port_enabled = state.config.server.tcp_reuse_port_listener_count.is_some();

    tracing::info!(
        "stallguard is ready to accept connections (listeners={}, reuse_port={})",
        listeners.len(),
        reuse_port_enabled
    );
    let conn_builder = AutoBuilder::new(TokioExecutor::new());
    let mut accept_tasks = Vec::with_capacity(listeners.len());
    for listener in listeners {
        let loop_builder = conn_builder.clone();
        let request_state = Arc::clone(&state);
        let request_base_path = Arc::clone(&dispatch_base_path);
        accept_tasks.push(tokio::spawn(async move {
            serve_accept_loop(listener, loop_builder, request_state, request_base_path).await;
        }));
    }

    shutdown_signal().await;
    tracing::info!(
        active_streams = stream_gate.active_sessions(),
        "shutdown signal received; refusing new streams"
    );
    stream_gate.close();
    for task in &accept_tasks {
        task.abort();
    }

    if tokio::time::timeout(shutdown_grace, stream_gate.drained())
        .await
        .is_err()
    {
        tracing::warn!(
            active_streams = stream_gate.active_sessions(),
            grace = ?shutdown_grace,
            "grace period elapsed with streams still open"
        );
    } else {
        tracing::info!("all streams drained");
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {err}");
            future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!("failed to listen for SIGTERM: {err}");
                future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

async fn serve_accept_loop(
    listener: tokio::net::TcpListener,
    conn_builder: AutoBuilder<TokioExecutor>,
    dispatch_state: Arc<AppState>,
    dispatch_base_path: Arc<str>,
) {
    loop {
        let (stream, remote_addr) = match listener.accept().await {
            Ok((stream, remote_addr)) => (stream, remote_addr),
            Err(err) => {
                tracing::warn!("accept error: {err}");
                continue;
            }
        };

        if let Err(err) = stream.set_nodelay(true) {
            tracing::debug!("failed to enable TCP_NODELAY for {remote_addr}: {err}");
        }

        let io = TokioIo::new(stream);
        let conn_builder = conn_builder.clone();
        let request_state = Arc::clone(&dispatch_state);
        let request_base_path = Arc::clone(&dispatch_base_path);
        let hyper_service = service_fn(move |request: Request<Incoming>| {
            dispatch_request(
                Arc::clone(&request_state),
                Arc::clone(&request_base_path),
                request.map(Body::new),
            )
        });

        tokio::spawn(async move {
            if let Err(err) = conn_builder.serve_connection(io, hyper_service).await {
                tracing::debug!("failed to serve connection from {remote_addr}: {err:#}");
            }
        });
    }
}

async fn build_server_listeners(
    server: &ServerConfig,
    host: &str,
    port: u16,
) -> io::Result<Vec<tokio::net::TcpListener>> {
    let reuse_port_enabled = server.tcp_reuse_port_listener_count.is_some();
    let mut listener_count = server.tcp_reuse_port_listener_count.map_or(1, |n| n.max(1));
    if reuse_port_enabled && !cfg!(unix) {
        tracing::warn!(
            "server.tcp_reuse_port_listener_count is set but this platform does not support SO_REUSEPORT; fallback to single listener"
        );
        listener_count = 1;
    }

    if listener_count == 1 {
        let listener = tokio::net::TcpListener::bind(format!("{host}:{port}")).await?;
        return Ok(vec![listener]);
    }

    let mut listeners = Vec::with_capacity(listener_count);
    for _ in 0..listener_count {
        listeners.push(bind_reuse_port_listener(host, port)?);
    }
    Ok(listeners)
}

#[cfg(unix)]
fn bind_reuse_port_listener(host: &str, port: u16) -> io::Result<tokio::net::TcpListener> {
    let mut last_err = None;
    for addr in (host, port).to_socket_addrs()? {
        match bind_reuse_port_listener_addr(addr) {
            Ok(listener) => return Ok(listener),
            Err(err) => last_err = Some(err),
        }
    }

    Err(last_err.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("no bindable socket address for {host}:{port}"),
        )
    }))
}

#[cfg(unix)]
fn bind_reuse_port_listener_addr(addr: SocketAddr) -> io::Result<tokio::net::TcpListener> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_reuse_port(true)?;
    socket.bind(&addr.into())?;
    socket.listen(DEFAULT_LISTEN_BACKLOG)?;
    socket.set_nonblocking(true)?;

    let std_listener: std::net::TcpListener = socket.into();
    tokio::net::TcpListener::from_std(std_listener)
}

#[cfg(not(unix))]
fn bind_reuse_port_listener(_host: &str, _port: u16) -> io::Result<tokio::net::TcpListener> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "SO_REUSEPORT is only supported on Unix-like platforms",
    ))
}
