//! Advisory lock held for a whole flashing session.
//!
//! Nothing in the hardware stops two processes from interleaving commands on
//! the ASMI register. Every cooperating instance takes an exclusive `flock`
//! on the same file before mapping the bridge, and a second one fails fast.

use std::{
    fs::{File, OpenOptions},
    io,
    path::{Path, PathBuf},
};

pub const DEFAULT_LOCK_PATH: &str = "/run/lock/asmiflash.lock";

/// Released when dropped.
#[derive(Debug)]
pub struct SessionLock {
    _file: File,
    path: PathBuf,
}

impl SessionLock {
    #[cfg(unix)]
    pub fn acquire<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        use std::os::unix::io::AsRawFd;

        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let ret = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if ret != 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                return Err(io::Error::new(
                    io::ErrorKind::WouldBlock,
                    format!("{} is held by another process", path.display()),
                ));
            }
            return Err(err);
        }
        log::debug!("acquired session lock {}", path.display());
        Ok(SessionLock {
            _file: file,
            path: path.to_path_buf(),
        })
    }

    #[cfg(not(unix))]
    pub fn acquire<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        log::warn!("advisory locking unsupported here, {} not locked", path.display());
        Ok(SessionLock {
            _file: file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
