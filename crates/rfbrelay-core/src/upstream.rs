//! Byte-stream upstreams: a dialed TCP connection or a spawned subprocess.
//!
//! An [`Upstream`] is handed to the bridge already split into independent
//! reader and writer halves plus a [`Closer`] that unblocks both halves.
//! Closing is the cancellation mechanism: shutting a socket down or killing
//! a child wakes any thread blocked on its streams.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::process::{Child, Command, Stdio};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::error::{RelayError, Result};

/// Releases the resource behind an upstream. Must be idempotent.
pub trait Closer: Send + Sync {
    fn close(&self);
}

/// One byte-stream endpoint of a bridge.
pub struct Upstream {
    label: String,
    pub(crate) reader: Box<dyn Read + Send>,
    pub(crate) writer: Box<dyn Write + Send>,
    pub(crate) diagnostics: Option<Box<dyn Read + Send>>,
    pub(crate) closer: Box<dyn Closer>,
}

impl std::fmt::Debug for Upstream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Upstream")
            .field("label", &self.label)
            .field("diagnostics", &self.diagnostics.is_some())
            .finish_non_exhaustive()
    }
}

impl Upstream {
    /// Dial `addr` (`host:port`), trying each resolved address in turn.
    pub fn dial(addr: &str, timeout: Duration) -> Result<Self> {
        let resource = format!("upstream {addr}");
        let candidates = addr
            .to_socket_addrs()
            .map_err(|error| RelayError::unavailable(resource.clone(), error))?;

        let mut last_error = None;
        for candidate in candidates {
            match TcpStream::connect_timeout(&candidate, timeout) {
                Ok(stream) => {
                    tracing::debug!(%addr, peer = %candidate, "upstream connected");
                    return Self::from_tcp(stream, addr)
                        .map_err(|error| RelayError::unavailable(resource, error));
                }
                Err(error) => last_error = Some(error),
            }
        }
        Err(RelayError::unavailable(
            resource,
            last_error.unwrap_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, "address resolved to nothing")
            }),
        ))
    }

    /// Wrap an already-connected TCP stream.
    pub fn from_tcp(stream: TcpStream, label: impl Into<String>) -> io::Result<Self> {
        stream.set_nodelay(true)?;
        let reader = stream.try_clone()?;
        let closer = stream.try_clone()?;
        Ok(Self {
            label: label.into(),
            reader: Box::new(reader),
            writer: Box::new(stream),
            diagnostics: None,
            closer: Box::new(TcpCloser(closer)),
        })
    }

    /// Spawn `command` with piped stdin/stdout/stderr.
    ///
    /// stdout is the server-to-client stream, stdin the client-to-server
    /// stream, and stderr is drained into the log by the bridge. The child is
    /// killed and reaped when the upstream closes or is dropped.
    pub fn spawn(command: &mut Command, label: impl Into<String>) -> Result<Self> {
        let label = label.into();
        let resource = format!("process {label}");
        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|error| RelayError::unavailable(resource.clone(), error))?;

        let pipes = (child.stdin.take(), child.stdout.take(), child.stderr.take());
        let closer = ChildCloser(Mutex::new(child));
        let (Some(stdin), Some(stdout), Some(stderr)) = pipes else {
            closer.close();
            return Err(RelayError::unavailable(
                resource,
                io::Error::other("child pipes were not captured"),
            ));
        };

        Ok(Self {
            label,
            reader: Box::new(stdout),
            writer: Box::new(stdin),
            diagnostics: Some(Box::new(stderr)),
            closer: Box::new(closer),
        })
    }

    /// Assemble an upstream from arbitrary halves.
    pub fn from_parts(
        label: impl Into<String>,
        reader: Box<dyn Read + Send>,
        writer: Box<dyn Write + Send>,
        diagnostics: Option<Box<dyn Read + Send>>,
        closer: Box<dyn Closer>,
    ) -> Self {
        Self {
            label: label.into(),
            reader,
            writer,
            diagnostics,
            closer,
        }
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub fn has_diagnostics(&self) -> bool {
        self.diagnostics.is_some()
    }
}

struct TcpCloser(TcpStream);

impl Closer for TcpCloser {
    fn close(&self) {
        let _ = self.0.shutdown(Shutdown::Both);
    }
}

struct ChildCloser(Mutex<Child>);

impl Closer for ChildCloser {
    fn close(&self) {
        let mut child = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        let _ = child.kill();
        match child.wait() {
            Ok(status) => tracing::debug!(pid = child.id(), %status, "upstream process reaped"),
            Err(error) => tracing::warn!(pid = child.id(), %error, "upstream process wait failed"),
        }
    }
}

impl Drop for ChildCloser {
    fn drop(&mut self) {
        self.close();
    }
}
