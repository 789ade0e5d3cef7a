//! Cross-process writer lock on `<root>/LOCK`.
//!
//! Promotion and recovery both rewrite shared paths, so every process that
//! does either takes this lock first. Readers never touch it.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

use fd_lock::RwLock;

use crate::layout::lock_path;

fn lock_file(root: &Path) -> io::Result<RwLock<File>> {
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(lock_path(root))?;
    Ok(RwLock::new(file))
}

/// Runs `work` while holding the writer lock, waiting for other holders.
pub(crate) fn exclusive<T>(root: &Path, work: impl FnOnce() -> T) -> io::Result<T> {
    let mut lock = lock_file(root)?;
    let _guard = lock.write()?;
    Ok(work())
}

/// Runs `work` under the writer lock, or returns `None` at once if another
/// holder has it.
pub(crate) fn try_exclusive<T>(root: &Path, work: impl FnOnce() -> T) -> io::Result<Option<T>> {
    let mut lock = lock_file(root)?;
    match lock.try_write() {
        Ok(_guard) => Ok(Some(work())),
        Err(error) if error.kind() == io::ErrorKind::WouldBlock => Ok(None),
        Err(error) => Err(error),
    }
}
