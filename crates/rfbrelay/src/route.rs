//! WebSocket route table.
//!
//! | Path | Session |
//! |------|---------|
//! | `/websockify/<host:port>` | Live bridge, recorded unless recording is off |
//! | `/playback/<id>` | Paced replay of a recorded session |
//! | `/playback-rfb/<id>` | Bridge to the external player fed `<rfb-dir>/<id>` |
//! | `/playback-rfb-dbg[/<host:port>]` | Bridge to a debug player already listening |

use std::fmt;

use rfbrelay_core::validate_session_id;
use tungstenite::http::StatusCode;

/// A parsed, validated route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Live { target: String },
    Playback { id: String },
    PlaybackRfb { id: String },
    Debug { target: Option<String> },
}

/// Why a request path was turned away during the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteRejection {
    NotFound(String),
    InvalidId { id: String, reason: &'static str },
    InvalidTarget(String),
    MissingSession(String),
}

impl RouteRejection {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) | Self::MissingSession(_) => StatusCode::NOT_FOUND,
            Self::InvalidId { .. } => StatusCode::FORBIDDEN,
            Self::InvalidTarget(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl fmt::Display for RouteRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(path) => write!(f, "no route for {path}"),
            Self::InvalidId { id, reason } => write!(f, "invalid session id {id:?}: {reason}"),
            Self::InvalidTarget(target) => write!(f, "invalid upstream address {target:?}"),
            Self::MissingSession(id) => write!(f, "no such session {id:?}"),
        }
    }
}

impl Route {
    /// Parse a request path (without query string).
    pub fn parse(path: &str) -> Result<Self, RouteRejection> {
        let trimmed = path.strip_prefix('/').unwrap_or(path);
        let (head, rest) = match trimmed.split_once('/') {
            Some((head, rest)) => (head, Some(rest)),
            None => (trimmed, None),
        };
        match (head, rest) {
            ("websockify", Some(target)) => parse_target(target).map(|target| Self::Live { target }),
            ("playback", Some(id)) => parse_id(id).map(|id| Self::Playback { id }),
            ("playback-rfb", Some(id)) => parse_id(id).map(|id| Self::PlaybackRfb { id }),
            ("playback-rfb-dbg", None | Some("")) => Ok(Self::Debug { target: None }),
            ("playback-rfb-dbg", Some(target)) => parse_target(target).map(|target| Self::Debug {
                target: Some(target),
            }),
            _ => Err(RouteRejection::NotFound(path.to_string())),
        }
    }

    /// Short name used in logs and telemetry.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Live { .. } => "websockify",
            Self::Playback { .. } => "playback",
            Self::PlaybackRfb { .. } => "playback-rfb",
            Self::Debug { .. } => "playback-rfb-dbg",
        }
    }
}

/// A session id is taken as-is; anything that could leave the storage
/// directory is refused.
fn parse_id(raw: &str) -> Result<String, RouteRejection> {
    validate_session_id(raw).map_err(|_| RouteRejection::InvalidId {
        id: raw.to_string(),
        reason: id_reason(raw),
    })?;
    Ok(raw.to_string())
}

fn id_reason(raw: &str) -> &'static str {
    if raw.contains('/') || raw.contains('\\') || raw.starts_with('.') {
        "path traversal"
    } else {
        "not a plain file name"
    }
}

/// `host:port` with a non-empty host and a numeric port.
fn parse_target(raw: &str) -> Result<String, RouteRejection> {
    let invalid = || RouteRejection::InvalidTarget(raw.to_string());
    if raw.contains('/') {
        return Err(invalid());
    }
    let (host, port) = raw.rsplit_once(':').ok_or_else(invalid)?;
    if host.is_empty() || port.parse::<u16>().is_err() {
        return Err(invalid());
    }
    Ok(raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_every_route() {
        assert_eq!(
            Route::parse("/websockify/localhost:5901"),
            Ok(Route::Live {
                target: "localhost:5901".to_string()
            })
        );
        assert_eq!(
            Route::parse("/websockify/[::1]:5900"),
            Ok(Route::Live {
                target: "[::1]:5900".to_string()
            })
        );
        assert_eq!(
            Route::parse("/playback/1700000000-000001"),
            Ok(Route::Playback {
                id: "1700000000-000001".to_string()
            })
        );
        assert_eq!(
            Route::parse("/playback-rfb/demo.rfb"),
            Ok(Route::PlaybackRfb {
                id: "demo.rfb".to_string()
            })
        );
        assert_eq!(Route::parse("/playback-rfb-dbg"), Ok(Route::Debug { target: None }));
        assert_eq!(Route::parse("/playback-rfb-dbg/"), Ok(Route::Debug { target: None }));
        assert_eq!(
            Route::parse("/playback-rfb-dbg/127.0.0.1:9000"),
            Ok(Route::Debug {
                target: Some("127.0.0.1:9000".to_string())
            })
        );
    }

    #[test]
    fn traversal_ids_are_forbidden() {
        for path in [
            "/playback/../../etc/passwd",
            "/playback/..",
            "/playback-rfb/../secret",
            "/playback/a/b",
            "/playback/",
        ] {
            let rejection = Route::parse(path).expect_err(path);
            assert_eq!(rejection.status(), StatusCode::FORBIDDEN, "{path}");
        }
        assert_eq!(
            Route::parse("/playback/../x"),
            Err(RouteRejection::InvalidId {
                id: "../x".to_string(),
                reason: "path traversal"
            })
        );
    }

    #[test]
    fn unknown_paths_are_not_found() {
        for path in ["/", "", "/websockify", "/vnc.html", "/playback", "/other/x"] {
            let rejection = Route::parse(path).expect_err(path);
            assert_eq!(rejection.status(), StatusCode::NOT_FOUND, "{path}");
        }
    }

    #[test]
    fn malformed_targets_are_bad_requests() {
        for path in ["/websockify/localhost", "/websockify/:5900", "/websockify/host:port", "/websockify/a:1/b"] {
            let rejection = Route::parse(path).expect_err(path);
            assert_eq!(rejection.status(), StatusCode::BAD_REQUEST, "{path}");
        }
    }

    #[test]
    fn rejection_messages() {
        assert_eq!(
            RouteRejection::MissingSession("s1".to_string()).to_string(),
            "no such session \"s1\""
        );
        assert_eq!(Route::Debug { target: None }.name(), "playback-rfb-dbg");
    }
}
