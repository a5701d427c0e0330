//! WebSocket accept loop and per-connection dispatch.
//!
//! One thread per connection. The route is resolved inside the handshake
//! callback, so a bad path or session id is refused with an HTTP status
//! before any session file is opened or any upstream is dialed.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::Path;
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use rfbrelay_core::{
    RelayError, SessionStore, WsPeer, allocate_id, bridge_live, bridge_process, bridge_recorded,
    replay,
};
use serde_json::{Value, json};
use tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tungstenite::protocol::WebSocketConfig;
use tungstenite::{WebSocket, accept_hdr_with_config};

use crate::config::ServerConfig;
use crate::error::{Result, ServerError};
use crate::route::{Route, RouteRejection};
use crate::telemetry::TelemetryLog;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Numbers connections for log correlation. Owned by the server.
#[derive(Debug, Default)]
pub struct ConnectionCounter(AtomicU64);

impl ConnectionCounter {
    /// Next connection number, starting at 1.
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// A bound relay server.
#[derive(Debug)]
pub struct Server {
    config: ServerConfig,
    listener: TcpListener,
    local_addr: SocketAddr,
    connections: ConnectionCounter,
    telemetry: TelemetryLog,
    sessions: SessionStore,
    rfb_files: SessionStore,
}

impl Server {
    pub fn bind(config: ServerConfig) -> Result<Self> {
        let listener = TcpListener::bind(&config.listen).map_err(|source| ServerError::Bind {
            addr: config.listen.clone(),
            source,
        })?;
        let local_addr = listener.local_addr()?;
        let telemetry = TelemetryLog::open(config.telemetry_path.as_deref())?;
        Ok(Self {
            sessions: config.session_store(),
            rfb_files: config.rfb_store(),
            config,
            listener,
            local_addr,
            connections: ConnectionCounter::default(),
            telemetry,
        })
    }

    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections forever, one thread each.
    pub fn serve(&self) -> Result<()> {
        tracing::info!(
            addr = %self.local_addr,
            sessions = %self.sessions.root().display(),
            record = self.config.record,
            "listening"
        );
        thread::scope(|scope| -> Result<()> {
            loop {
                let (stream, client) = match self.listener.accept() {
                    Ok(accepted) => accepted,
                    Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                    Err(error) => {
                        tracing::error!(%error, "accept failed");
                        thread::sleep(ACCEPT_BACKOFF);
                        continue;
                    }
                };
                let conn = self.connections.next();
                let spawned = thread::Builder::new()
                    .name(format!("rfbrelay-conn-{conn}"))
                    .spawn_scoped(scope, move || self.handle(stream, client, conn));
                if let Err(error) = spawned {
                    tracing::error!(conn, %error, "cannot start connection thread");
                }
            }
        })
    }

    fn handle(&self, stream: TcpStream, client: SocketAddr, conn: u64) {
        let span = tracing::info_span!(
            "conn",
            conn,
            client = %client,
            route = tracing::field::Empty
        );
        let _entered = span.enter();
        let mut events = self.telemetry.connection(conn);

        let (socket, route) = match self.accept(stream) {
            Ok(accepted) => accepted,
            Err(error) => {
                tracing::info!(%error, "handshake failed");
                events.emit(
                    "session_error",
                    json!({ "stage": "handshake", "error": error.to_string() }),
                );
                return;
            }
        };
        span.record("route", route.name());
        events.emit(
            "session_start",
            json!({ "route": route.name(), "client": client.to_string(), "detail": route_detail(&route) }),
        );

        let peer = match WsPeer::new(socket, self.config.peer_poll) {
            Ok(peer) => peer,
            Err(error) => {
                tracing::warn!(%error, "cannot configure websocket");
                events.emit("session_error", json!({ "stage": "setup", "error": error.to_string() }));
                return;
            }
        };

        match self.dispatch(&route, &peer, conn) {
            Ok(report) => events.emit("session_end", report),
            Err(error) => {
                tracing::warn!(%error, "session failed to start");
                events.emit("session_error", json!({ "stage": "setup", "error": error.to_string() }));
            }
        }
    }

    fn accept(&self, stream: TcpStream) -> io::Result<(WebSocket<TcpStream>, Route)> {
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(self.config.handshake_timeout))?;
        let ws_config = WebSocketConfig::default()
            .max_message_size(Some(self.config.max_message_bytes))
            .max_frame_size(Some(self.config.max_message_bytes))
            .write_buffer_size(0);

        let mut admitted = None;
        let callback = |request: &Request, response: Response| {
            match self.admit(request.uri().path()) {
                Ok(route) => {
                    admitted = Some(route);
                    Ok(response)
                }
                Err(rejection) => {
                    tracing::info!(status = rejection.status().as_u16(), %rejection, "handshake rejected");
                    Err(rejection_response(&rejection))
                }
            }
        };
        let socket = accept_hdr_with_config(stream, callback, Some(ws_config)).map_err(|error| {
            io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("websocket handshake failed: {error}"),
            )
        })?;
        let route = admitted.ok_or_else(|| io::Error::other("handshake completed without a route"))?;
        Ok((socket, route))
    }

    /// Resolve `path` to a route whose target exists.
    fn admit(&self, path: &str) -> std::result::Result<Route, RouteRejection> {
        let route = Route::parse(path)?;
        match &route {
            Route::Playback { id } if !self.sessions.contains(id) => {
                Err(RouteRejection::MissingSession(id.clone()))
            }
            Route::PlaybackRfb { id } if !self.rfb_files.contains(id) => {
                Err(RouteRejection::MissingSession(id.clone()))
            }
            _ => Ok(route),
        }
    }

    fn dispatch(&self, route: &Route, peer: &WsPeer, conn: u64) -> rfbrelay_core::Result<Value> {
        let bridge = &self.config.bridge;
        match route {
            Route::Live { target } if self.config.record => {
                let id = allocate_id(conn);
                let summary = bridge_recorded(peer, target, &self.sessions, &id, bridge)?;
                Ok(json!({ "session": id, "bridge": summary }))
            }
            Route::Live { target } => {
                let summary = bridge_live(peer, target, bridge)?;
                Ok(json!({ "bridge": summary }))
            }
            Route::Playback { id } => {
                let summary = replay(peer, &self.sessions, id, &self.config.player)?;
                Ok(json!({ "session": id, "playback": summary }))
            }
            Route::PlaybackRfb { id } => {
                let file = self.rfb_files.resolve(id)?;
                let (mut command, program) = self.player_command(&file)?;
                let summary = bridge_process(peer, &mut command, &program, bridge)?;
                Ok(json!({ "file": id, "bridge": summary }))
            }
            Route::Debug { target } => {
                let target = target.as_deref().unwrap_or(&self.config.debug_upstream);
                let summary = bridge_live(peer, target, bridge)?;
                Ok(json!({ "bridge": summary }))
            }
        }
    }

    fn player_command(&self, file: &Path) -> rfbrelay_core::Result<(Command, String)> {
        let Some((program, args)) = self.config.player_command.split_first() else {
            return Err(RelayError::unavailable(
                "player command",
                io::Error::new(io::ErrorKind::InvalidInput, "no program configured"),
            ));
        };
        let mut command = Command::new(program);
        command.args(args).arg(file);
        Ok((command, program.clone()))
    }
}

fn route_detail(route: &Route) -> Value {
    match route {
        Route::Live { target } => json!({ "target": target }),
        Route::Playback { id } | Route::PlaybackRfb { id } => json!({ "id": id }),
        Route::Debug { target } => json!({ "target": target }),
    }
}

fn rejection_response(rejection: &RouteRejection) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(rejection.to_string()));
    *response.status_mut() = rejection.status();
    response
}
