//! Platform directories.

use std::path::PathBuf;

/// Root of everything mcplink persists, e.g. `~/.local/share/mcplink`.
pub fn data_dir() -> Option<PathBuf> {
    dirs::data_local_dir().map(|p| p.join("mcplink"))
}

/// Where the session service keeps its records.
pub fn server_data_dir() -> Option<PathBuf> {
    data_dir().map(|p| p.join("data"))
}

/// Where the client runtime keeps connection records.
pub fn client_data_dir() -> Option<PathBuf> {
    data_dir().map(|p| p.join("client"))
}
