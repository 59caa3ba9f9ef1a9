//! PID file manager
//!
//! The file holds the master's pid as bare decimal text. It is never locked;
//! administrative commands assume a single operator.

use crate::error::{Result, SupervisorError};
use std::fs;
use std::path::Path;

/// Overwrite `path` with `pid`
pub fn write(path: &Path, pid: u32) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, pid.to_string())?;
    Ok(())
}

pub fn read(path: &Path) -> Result<u32> {
    let content = fs::read_to_string(path).map_err(|_| SupervisorError::PidFileNotFound {
        path: path.to_path_buf(),
    })?;
    content
        .trim()
        .parse()
        .map_err(|_| SupervisorError::InvalidPidFile {
            path: path.to_path_buf(),
            content,
        })
}

/// Remove `path` if it still names `pid`
///
/// A master that exits must not delete a file a newer instance has written.
pub fn remove_if_owned(path: &Path, pid: u32) -> Result<bool> {
    match read(path) {
        Ok(recorded) if recorded == pid => {
            fs::remove_file(path)?;
            Ok(true)
        }
        _ => Ok(false),
    }
}
