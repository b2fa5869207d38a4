use std::path::{Path, PathBuf};

use orderwatch_core::config::root_at;

pub const DAEMON_SOCKET: &str = "orderwatch.sock";

pub fn socket_path(home: &Path) -> PathBuf {
    root_at(home).join(DAEMON_SOCKET)
}
