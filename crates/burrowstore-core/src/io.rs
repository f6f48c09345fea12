//! I/O handle — the store directory and its file-creation policy
//!
//! The io handle owns the on-disk layout: the store directory itself plus
//! the `log/` and `extents/` subdirectories. Every subsystem that creates
//! files goes through [`IoHandle::open_append`] so the configured permission
//! bits are applied uniformly.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::config::IoConfig;
use crate::error::{EngineError, EngineResult};

/// Handle to the store directory tree.
#[derive(Debug)]
pub struct IoHandle {
    cfg: IoConfig,
    log_dir: PathBuf,
    extent_dir: PathBuf,
}

impl IoHandle {
    /// Validate the configuration and create the directory tree.
    pub fn init(cfg: IoConfig) -> EngineResult<Self> {
        cfg.validate()?;

        let log_dir = cfg.path.join("log");
        let extent_dir = cfg.path.join("extents");
        for dir in [&cfg.path, &log_dir, &extent_dir] {
            create_dir_with_perms(dir, cfg.perms)?;
        }

        Ok(Self {
            cfg,
            log_dir,
            extent_dir,
        })
    }

    /// Store root directory.
    pub fn dir(&self) -> &Path {
        &self.cfg.path
    }

    /// Directory holding shard-log files.
    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Directory holding extent files.
    pub fn extent_dir(&self) -> &Path {
        &self.extent_dir
    }

    pub fn config(&self) -> &IoConfig {
        &self.cfg
    }

    /// Open a file for appending, creating it with the configured perms.
    pub fn open_append(&self, path: &Path) -> EngineResult<File> {
        open_append_with_perms(path, self.cfg.perms)
    }
}

/// Open a file for appending, creating it with the given permission bits.
///
/// Subsystems that rotate files after init keep the perms from the io
/// config and come back through here.
pub fn open_append_with_perms(path: &Path, perms: u32) -> EngineResult<File> {
    let mut opts = OpenOptions::new();
    opts.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(perms);
    }
    #[cfg(not(unix))]
    let _ = perms;
    opts.open(path)
        .map_err(|e| EngineError::io(path, "failed to open file for append", e))
}

fn create_dir_with_perms(dir: &Path, perms: u32) -> EngineResult<()> {
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(perms);
    }
    #[cfg(not(unix))]
    let _ = perms;
    builder
        .create(dir)
        .map_err(|e| EngineError::io(dir, "failed to create directory", e))
}
