//! One run per application at a time, enforced with `flock(2)` on
//! `<lock_dir>/appforge-<code>.lock`. The lock is released when the file
//! descriptor closes, including on crash.

use std::{
    fs::{File, OpenOptions},
    io::Write,
    os::unix::io::AsRawFd,
    path::{Path, PathBuf},
};

use nix::{
    errno::Errno,
    fcntl::{flock, FlockArg},
};
use tracing::debug;

use crate::{
    errors::{DeployError, Result},
    model::CodeName,
    util,
};

#[derive(Debug)]
pub struct AppLock {
    file: File,
    path: PathBuf,
}

impl AppLock {
    pub fn acquire(dir: &Path, code: &CodeName) -> Result<Self> {
        util::ensure_dir(dir).map_err(|err| DeployError::io(dir, err))?;
        let path = dir.join(format!("appforge-{code}.lock"));
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|err| DeployError::io(&path, err))?;

        match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
            Ok(()) => {}
            Err(Errno::EAGAIN) => return Err(DeployError::LockHeld(code.to_string())),
            Err(errno) => return Err(DeployError::io(&path, errno.into())),
        }

        file.set_len(0)
            .and_then(|()| writeln!(file, "{}", std::process::id()))
            .map_err(|err| DeployError::io(&path, err))?;
        debug!(lock = %path.display(), "lock acquired");
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for AppLock {
    fn drop(&mut self) {
        let _ = flock(self.file.as_raw_fd(), FlockArg::Unlock);
    }
}
