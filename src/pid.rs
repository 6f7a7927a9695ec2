use crate::paths::Paths;
use crate::sys;
use std::fs;
use std::io;

pub fn write_pid_file(paths: &Paths) -> io::Result<()> {
    let pid = std::process::id();
    fs::write(paths.pid_file(), pid.to_string())
}

pub fn read_pid_file(paths: &Paths) -> Option<u32> {
    fs::read_to_string(paths.pid_file())
        .ok()
        .and_then(|s| s.trim().parse().ok())
}

pub fn remove_pid_file(paths: &Paths) {
    let _ = fs::remove_file(paths.pid_file());
}

pub fn is_daemon_running(paths: &Paths) -> io::Result<bool> {
    let pid = match read_pid_file(paths) {
        Some(p) => p,
        None => return Ok(false),
    };

    match sys::check_pid(pid) {
        Ok(true) => Ok(true),
        Ok(false) => {
            // Process doesn't exist — stale PID file
            remove_pid_file(paths);
            Ok(false)
        }
        Err(e) => Err(e),
    }
}
