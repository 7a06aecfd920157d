use crate::error::{SsmpError, SsmpResult};

/// Number of online CPUs.
pub fn online_cpus() -> usize {
    num_cpus::get()
}

/// Pin the calling thread (and thus a single-threaded endpoint process) to `core`.
#[cfg(target_os = "linux")]
pub fn set_cpu(core: usize) -> SsmpResult<()> {
    let available = online_cpus();
    if core >= available {
        return Err(SsmpError::Affinity(format!(
            "CPU {} does not exist (max: {})",
            core,
            available.saturating_sub(1)
        )));
    }

    // SAFETY: cpu_set_t is plain data; CPU_SET stays in bounds because core < online CPUs
    let result = unsafe {
        let mut cpuset: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut cpuset);
        libc::CPU_SET(core, &mut cpuset);
        libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &cpuset)
    };

    if result == 0 {
        log::debug!("pinned to CPU {}", core);
        Ok(())
    } else {
        Err(SsmpError::Affinity(format!(
            "sched_setaffinity({}) failed: {}",
            core,
            std::io::Error::last_os_error()
        )))
    }
}

#[cfg(not(target_os = "linux"))]
pub fn set_cpu(core: usize) -> SsmpResult<()> {
    log::debug!("CPU pinning unavailable on this OS, ignoring core {}", core);
    Ok(())
}

/// CPU the caller is currently running on, if the OS reports it.
#[cfg(target_os = "linux")]
pub fn get_cpu() -> Option<usize> {
    // SAFETY: sched_getcpu takes no arguments and only reads scheduler state
    let cpu = unsafe { libc::sched_getcpu() };
    if cpu < 0 {
        None
    } else {
        Some(cpu as usize)
    }
}

#[cfg(not(target_os = "linux"))]
pub fn get_cpu() -> Option<usize> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_core_beyond_online_count() {
        let err = set_cpu(online_cpus() + 64);
        #[cfg(target_os = "linux")]
        assert!(matches!(err, Err(SsmpError::Affinity(_))));
        #[cfg(not(target_os = "linux"))]
        assert!(err.is_ok());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn pinned_thread_reports_its_core() {
        std::thread::spawn(|| {
            if set_cpu(0).is_ok() {
                assert_eq!(get_cpu(), Some(0));
            }
        })
        .join()
        .unwrap();
    }
}
