// SSMP shared memory region: one named POSIX shared-memory object per run.
//
// The first caller creates the object (O_CREAT|O_EXCL) and sizes it; every
// later caller, in this process or another, attaches to the same object.

use std::time::{Duration, Instant};

use crate::error::{SsmpError, SsmpResult};

#[cfg(unix)]
use memmap2::{MmapOptions, MmapRaw};
#[cfg(unix)]
use std::ffi::CString;
#[cfg(unix)]
use std::fs::File;
#[cfg(unix)]
use std::os::unix::io::{FromRawFd, OwnedFd};

/// A mapped POSIX shared-memory object.
///
/// The handle that created the object unlinks it on drop, but only from the
/// process that created it: a forked child inherits the handle, not the duty.
#[derive(Debug)]
pub struct ShmRegion {
    #[cfg(unix)]
    map: MmapRaw,
    #[cfg(unix)]
    file: File,
    name: String,
    size: usize,
    owner: bool,
    creator_pid: u32,
}

#[cfg(unix)]
fn c_name(name: &str) -> SsmpResult<CString> {
    CString::new(name).map_err(|e| {
        SsmpError::Memory(format!(
            "Invalid shm name '{}': names cannot contain null bytes: {}",
            name, e
        ))
    })
}

#[cfg(unix)]
impl ShmRegion {
    /// Create the object with `size` bytes, or attach to it if it exists.
    ///
    /// An attacher waits up to `timeout` for the creator to finish sizing the
    /// object; a smaller object after that is a layout mismatch.
    pub fn create_or_attach(name: &str, size: usize, timeout: Duration) -> SsmpResult<Self> {
        if size == 0 {
            return Err(SsmpError::invalid_input("shared region size must be non-zero"));
        }
        let cname = c_name(name)?;

        // SAFETY: cname is a valid null-terminated CString; flags are valid POSIX constants
        let fd = unsafe {
            libc::shm_open(
                cname.as_ptr(),
                libc::O_CREAT | libc::O_RDWR | libc::O_EXCL,
                0o666,
            )
        };

        let (file, owner) = if fd >= 0 {
            // SAFETY: fd was just returned by shm_open and is owned by nobody else
            let file = File::from(unsafe { OwnedFd::from_raw_fd(fd) });
            if let Err(e) = file.set_len(size as u64) {
                // SAFETY: cname is a valid null-terminated CString
                unsafe { libc::shm_unlink(cname.as_ptr()) };
                return Err(SsmpError::Memory(format!(
                    "Failed to size shm '{}' to {} bytes: {}",
                    name, size, e
                )));
            }
            log::debug!("created shm '{}' ({} bytes)", name, size);
            (file, true)
        } else {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::EEXIST) {
                return Err(SsmpError::Memory(format!(
                    "Failed to create shm '{}': {}",
                    name, err
                )));
            }
            let file = Self::open_existing(&cname, name)?;
            Self::wait_for_size(&file, name, size, timeout)?;
            log::debug!("attached to shm '{}' ({} bytes)", name, size);
            (file, false)
        };

        let map = MmapOptions::new()
            .len(size)
            .map_raw(&file)
            .map_err(|e| SsmpError::Memory(format!("Failed to mmap shm '{}': {}", name, e)))?;

        Ok(Self {
            map,
            file,
            name: name.to_string(),
            size,
            owner,
            creator_pid: std::process::id(),
        })
    }

    fn open_existing(cname: &CString, name: &str) -> SsmpResult<File> {
        // SAFETY: cname is a valid null-terminated CString
        let fd = unsafe { libc::shm_open(cname.as_ptr(), libc::O_RDWR, 0o666) };
        if fd < 0 {
            return Err(SsmpError::Memory(format!(
                "Failed to open shm '{}': {}",
                name,
                std::io::Error::last_os_error()
            )));
        }
        // SAFETY: fd was just returned by shm_open and is owned by nobody else
        Ok(File::from(unsafe { OwnedFd::from_raw_fd(fd) }))
    }

    fn wait_for_size(file: &File, name: &str, size: usize, timeout: Duration) -> SsmpResult<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let len = file.metadata()?.len();
            if len >= size as u64 {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(SsmpError::layout_mismatch(
                    name,
                    format!("object is {} bytes, this run needs {}", len, size),
                ));
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    /// Base address of the mapping.
    pub fn as_ptr(&self) -> *mut u8 {
        self.map.as_mut_ptr()
    }

    /// Whether the name still refers to the object this handle maps.
    pub fn still_linked(&self) -> bool {
        use std::os::unix::fs::MetadataExt;

        let Ok(cname) = c_name(&self.name) else {
            return false;
        };
        // SAFETY: cname is a valid null-terminated CString
        let fd = unsafe { libc::shm_open(cname.as_ptr(), libc::O_RDONLY, 0) };
        if fd < 0 {
            return false;
        }
        // SAFETY: fd was just returned by shm_open and is owned by nobody else
        let current = File::from(unsafe { OwnedFd::from_raw_fd(fd) });
        match (current.metadata(), self.file.metadata()) {
            (Ok(a), Ok(b)) => a.dev() == b.dev() && a.ino() == b.ino(),
            _ => false,
        }
    }
}

/// Whether a process with `pid` exists (signal 0 only checks, nothing is delivered).
#[cfg(unix)]
pub(crate) fn process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    // SAFETY: signal 0 performs only the existence and permission check
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH)
}

#[cfg(not(unix))]
pub(crate) fn process_alive(_pid: u32) -> bool {
    true
}

#[cfg(unix)]
impl Drop for ShmRegion {
    fn drop(&mut self) {
        if self.owner && self.creator_pid == std::process::id() {
            if let Ok(cname) = c_name(&self.name) {
                // SAFETY: cname is a valid null-terminated CString
                unsafe { libc::shm_unlink(cname.as_ptr()) };
                log::debug!("unlinked shm '{}'", self.name);
            }
        }
    }
}

#[cfg(not(unix))]
impl ShmRegion {
    pub fn create_or_attach(name: &str, _size: usize, _timeout: Duration) -> SsmpResult<Self> {
        Err(SsmpError::Unsupported(format!(
            "POSIX shared memory is unavailable on this platform (region '{}')",
            name
        )))
    }

    pub fn as_ptr(&self) -> *mut u8 {
        std::ptr::null_mut()
    }

    pub fn still_linked(&self) -> bool {
        false
    }
}

impl ShmRegion {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Whether this handle created the object.
    pub fn is_owner(&self) -> bool {
        self.owner
    }
}

/// Remove a named object left behind by a crashed run.
///
/// Returns `Ok(false)` when nothing by that name exists.
#[cfg(unix)]
pub fn unlink_region(name: &str) -> SsmpResult<bool> {
    let cname = c_name(name)?;
    // SAFETY: cname is a valid null-terminated CString
    if unsafe { libc::shm_unlink(cname.as_ptr()) } == 0 {
        log::info!("removed stale shm '{}'", name);
        return Ok(true);
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ENOENT) {
        Ok(false)
    } else {
        Err(SsmpError::Memory(format!(
            "Failed to unlink shm '{}': {}",
            name, err
        )))
    }
}

#[cfg(not(unix))]
pub fn unlink_region(name: &str) -> SsmpResult<bool> {
    Err(SsmpError::Unsupported(format!(
        "POSIX shared memory is unavailable on this platform (region '{}')",
        name
    )))
}

// SAFETY: the mapping is process-shared memory with no thread-local state;
// every access to its contents goes through atomics in the layout types
unsafe impl Send for ShmRegion {}
unsafe impl Sync for ShmRegion {}
