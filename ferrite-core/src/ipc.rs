//! IPC transport via Unix domain sockets.
//!
//! Only path management lives here; the reactor wraps the returned std
//! listener in its own readiness type.

use std::io;
use std::os::unix::net::UnixListener;
use std::path::Path;
use tracing::debug;

/// Bind a non-blocking Unix domain socket listener.
///
/// A leftover socket file from a previous process is removed first.
///
/// # Errors
///
/// Returns an error if the stale file cannot be removed or the bind fails.
pub fn bind_listener(path: &Path) -> io::Result<UnixListener> {
    if path.exists() {
        debug!(path = %path.display(), "[IPC] removing stale socket file");
        std::fs::remove_file(path)?;
    }
    let listener = UnixListener::bind(path)?;
    listener.set_nonblocking(true)?;
    Ok(listener)
}

/// Remove the socket file of an unbound listener. Missing files are ignored.
pub fn cleanup(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "[IPC] socket file removed"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => debug!(path = %path.display(), error = %e, "[IPC] cleanup failed"),
    }
}
