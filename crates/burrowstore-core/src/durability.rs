//! Platform-specific durable sync
//!
//! Plain `fsync` semantics differ across platforms; this module maps to the
//! strongest durability primitive each one offers:
//!
//! - Linux: `fdatasync()`, which syncs file data but not metadata
//! - macOS/iOS: `fcntl(F_FULLFSYNC)`, which bypasses the drive's volatile write cache
//! - Windows: `FlushFileBuffers()`
//! - Other: `File::sync_data()` fallback

use std::fs::File;
use std::io;

/// Block until the file's data has reached persistent storage.
///
/// May stall for extended periods under heavy I/O; callers must not hold
/// locks that the sync could deadlock against.
pub fn durable_sync(file: &File) -> io::Result<()> {
    #[cfg(target_os = "linux")]
    {
        use std::os::unix::io::AsRawFd;
        // SAFETY: fdatasync operates on the valid, open descriptor owned by `file`.
        let rc = unsafe { libc::fdatasync(file.as_raw_fd()) };
        if rc == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    #[cfg(any(target_os = "macos", target_os = "ios"))]
    {
        use std::os::unix::io::AsRawFd;
        // fsync on Apple platforms only reaches the drive's volatile cache;
        // F_FULLFSYNC is required for power-loss durability.
        // SAFETY: fcntl operates on the valid, open descriptor owned by `file`.
        let rc = unsafe { libc::fcntl(file.as_raw_fd(), libc::F_FULLFSYNC) };
        if rc == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    #[cfg(target_os = "windows")]
    {
        use std::os::windows::io::AsRawHandle;
        use winapi::um::fileapi::FlushFileBuffers;
        // SAFETY: FlushFileBuffers operates on the valid handle owned by `file`.
        let rc = unsafe { FlushFileBuffers(file.as_raw_handle() as *mut _) };
        if rc != 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    #[cfg(not(any(
        target_os = "linux",
        target_os = "macos",
        target_os = "ios",
        target_os = "windows"
    )))]
    {
        file.sync_data()
    }
}
