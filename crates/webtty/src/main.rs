// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `webttyd`: serve a command over the ttyd protocol.
//!
//! The core library handles the upgrade and the session; this front-end owns
//! flag parsing, credential resolution, listener setup, and the route table
//! (`/` index page, `/token`, `/ws`), optionally behind HTTP basic auth.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, Response, StatusCode};
use axum::response::{Html, IntoResponse};
use axum::routing::{any, get};
use axum::Router;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use clap::Parser;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, UnixListener};
use tracing::{debug, info};

use webtty::{BasicAuthTokenHandler, CompressionMode, Handler, Options, SpawnCommand};

const INDEX_HTML: &str = include_str!("../static/index.html");

/// Serve a command over the ttyd protocol.
#[derive(Debug, Parser)]
#[command(name = "webttyd", version, about)]
struct Cli {
    /// Address to listen on; use port 0 to select a random port.
    #[arg(long, env = "WEBTTY_ADDR", default_value = "127.0.0.1:7681")]
    addr: String,

    /// Unix socket to listen on; takes precedence over --addr.
    #[arg(long, env = "WEBTTY_SOCKET")]
    socket: Option<PathBuf>,

    /// Basic auth credential (user:password).
    #[arg(long, env = "WEBTTY_BASIC")]
    basic: Option<String>,

    /// Forward client input to the terminal.
    #[arg(long)]
    writable: bool,

    /// Negotiate permessage-deflate compression.
    #[arg(long)]
    compress: bool,

    /// Run the command as this user id.
    #[arg(long)]
    uid: Option<u32>,

    /// Run the command as this group id.
    #[arg(long)]
    gid: Option<u32>,

    /// Working directory for the command; inherited if not provided.
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// Command to run, with its arguments.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    command: Vec<String>,
}

#[derive(Clone)]
struct AppState {
    handler: Arc<Handler>,
    basic: Option<(String, String)>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "webtty=info,webttyd=info".into()),
        )
        .init();

    let cli = Cli::parse();

    let basic = match &cli.basic {
        Some(credential) => match credential.split_once(':') {
            Some((user, pass)) => Some((user.to_owned(), pass.to_owned())),
            None => bail!("invalid basic auth credential, expected user:password"),
        },
        None => None,
    };

    // When only one of uid/gid is given, the other defaults to the current
    // process's id, mirroring how a shell would resolve it.
    let (uid, gid) = match (cli.uid, cli.gid) {
        (None, None) => (None, None),
        (uid, gid) => (
            Some(uid.unwrap_or_else(|| nix::unistd::getuid().as_raw())),
            Some(gid.unwrap_or_else(|| nix::unistd::getgid().as_raw())),
        ),
    };

    let mut command = SpawnCommand::new(cli.command.clone());
    command.cwd = cli.cwd.clone();
    command.uid = uid;
    command.gid = gid;

    let mut options = Options::new().writable(cli.writable);
    if cli.compress {
        options = options.compression(CompressionMode::ContextTakeover);
    }

    let handler = match &basic {
        Some((user, pass)) => Arc::new(Handler::with_token_handler(
            command.clone(),
            Arc::new(BasicAuthTokenHandler::new(user, pass, command)),
            options,
        )),
        None => Arc::new(Handler::new(command, options)),
    };

    let app = Router::new()
        .route("/", get(index))
        .route("/token", get(token))
        .route("/ws", any(ws))
        .with_state(AppState { handler, basic });

    if let Some(path) = &cli.socket {
        let _ = std::fs::remove_file(path);
        let listener = UnixListener::bind(path)
            .with_context(|| format!("failed to listen on {}", path.display()))?;
        info!(socket = %path.display(), "listening");
        loop {
            let (stream, _) = listener.accept().await.context("accept failed")?;
            let app = app.clone();
            tokio::spawn(serve_connection(stream, app));
        }
    }

    let listener = TcpListener::bind(&cli.addr)
        .await
        .with_context(|| format!("failed to listen on {}", cli.addr))?;
    let local: SocketAddr = listener.local_addr().context("local addr")?;
    info!(addr = %local, "listening");
    loop {
        let (stream, _) = listener.accept().await.context("accept failed")?;
        let app = app.clone();
        tokio::spawn(serve_connection(stream, app));
    }
}

/// Serve one connection with both HTTP/1.1 upgrades and HTTP/2 extended
/// CONNECT enabled.
async fn serve_connection<S>(stream: S, app: Router)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = TowerToHyperService::new(app);
    let mut builder = auto::Builder::new(TokioExecutor::new());
    builder.http2().enable_connect_protocol();
    if let Err(err) = builder
        .serve_connection_with_upgrades(TokioIo::new(stream), service)
        .await
    {
        debug!(error = %err, "connection ended with error");
    }
}

/// Check HTTP basic auth when configured; mirrors the gate the original CLI
/// puts in front of every route.
fn check_basic(state: &AppState, headers: &axum::http::HeaderMap) -> Result<(), Response<Body>> {
    let Some((user, pass)) = &state.basic else {
        return Ok(());
    };
    let expected = BASE64.encode(format!("{user}:{pass}"));
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Basic "));
    if presented == Some(expected.as_str()) {
        return Ok(());
    }
    Err(Response::builder()
        .status(StatusCode::UNAUTHORIZED)
        .header(header::WWW_AUTHENTICATE, "Basic realm=\"webtty\"")
        .body(Body::from("Unauthorized"))
        .expect("static response must build"))
}

async fn index(State(state): State<AppState>, req: Request) -> Response<Body> {
    if let Err(response) = check_basic(&state, req.headers()) {
        return response;
    }
    Html(INDEX_HTML).into_response()
}

async fn token(State(state): State<AppState>, req: Request) -> Response<Body> {
    if let Err(response) = check_basic(&state, req.headers()) {
        return response;
    }
    let (parts, _) = req.into_parts();
    webtty::serve_token(state.handler.token_handler().as_ref(), &parts)
}

async fn ws(State(state): State<AppState>, req: Request) -> Response<Body> {
    if let Err(response) = check_basic(&state, req.headers()) {
        return response;
    }
    state.handler.clone().serve(req).await
}
