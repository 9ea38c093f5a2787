use std::path::{Path, PathBuf};

pub const DAEMON_SOCKET: &str = "daemon.sock";

pub fn roster_root(home: &Path) -> PathBuf {
    roster_core::store::roster_dir_at(home)
}

pub fn socket_path(home: &Path) -> PathBuf {
    roster_root(home).join(DAEMON_SOCKET)
}
