//! On-disk session storage.
//!
//! Sessions live as flat files directly under one root directory. Identifiers
//! are validated before any path is built, so an id can never name a file
//! outside the root.

use std::fs::{self, File, OpenOptions};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use time::OffsetDateTime;

use crate::codec::SessionStats;
use crate::error::{RelayError, Result};

const MAX_ID_LEN: usize = 128;

/// Check that `id` is a single, plain path component.
///
/// Accepts ASCII letters, digits, `-`, `_` and `.`, not starting with `.`.
pub fn validate_session_id(id: &str) -> Result<()> {
    let reject = |reason| {
        Err(RelayError::InvalidSessionId {
            id: id.to_string(),
            reason,
        })
    };
    if id.is_empty() {
        return reject("empty");
    }
    if id.len() > MAX_ID_LEN {
        return reject("too long");
    }
    if id.starts_with('.') {
        return reject("starts with '.'");
    }
    if !id
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
    {
        return reject("contains characters outside [A-Za-z0-9._-]");
    }
    Ok(())
}

/// Directory of recorded sessions.
#[derive(Debug, Clone)]
pub struct SessionStore {
    root: PathBuf,
}

impl SessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of session `id`, after validation.
    pub fn resolve(&self, id: &str) -> Result<PathBuf> {
        validate_session_id(id)?;
        Ok(self.root.join(id))
    }

    /// Whether session `id` exists. Invalid ids never exist.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.resolve(id).is_ok_and(|path| path.is_file())
    }

    /// Create a new, empty session file. Fails if `id` is already taken.
    pub fn create(&self, id: &str) -> Result<File> {
        let path = self.resolve(id)?;
        fs::create_dir_all(&self.root)
            .map_err(|error| RelayError::unavailable(self.root.display().to_string(), error))?;
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|error| RelayError::unavailable(format!("session {id}"), error))
    }

    /// Open session `id` for reading.
    pub fn open(&self, id: &str) -> Result<File> {
        let path = self.resolve(id)?;
        File::open(&path).map_err(|error| RelayError::unavailable(format!("session {id}"), error))
    }

    /// Walk session `id` and summarize it.
    pub fn inspect(&self, id: &str) -> Result<SessionStats> {
        let file = self.open(id)?;
        Ok(SessionStats::scan(BufReader::new(file)))
    }
}

/// Session id `<unix-seconds>-<microseconds>-<conn>` for connection `conn`.
///
/// The connection number keeps ids unique when two connections arrive in the
/// same microsecond.
#[must_use]
pub fn allocate_id(conn: u64) -> String {
    let now = OffsetDateTime::now_utc();
    format!("{}-{:06}-{conn}", now.unix_timestamp(), now.microsecond())
}
