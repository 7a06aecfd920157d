//! Fork-per-endpoint process launcher.

use std::panic::{self, AssertUnwindSafe};

use ssmp_core::{set_cpu, Endpoint, Ssmp, SsmpConfig, SsmpError, SsmpResult};

/// Create the region, then run `body` once per endpoint, each in its own
/// process pinned to the endpoint's core.
///
/// Endpoint 0 runs in the calling process; endpoints `1..n` run in forked
/// children. Must be called before the program starts any threads. Returns
/// an error if any child exits unsuccessfully.
pub fn launch<F>(config: SsmpConfig, num_endpoints: u32, body: F) -> SsmpResult<()>
where
    F: Fn(&Endpoint),
{
    let ssmp = Ssmp::with_config(config, num_endpoints)?;
    log::info!(
        "launching {} endpoints on region {}",
        num_endpoints,
        ssmp.region().name()
    );

    let mut children = Vec::with_capacity(num_endpoints.saturating_sub(1) as usize);
    for id in 1..num_endpoints {
        // Safety: single-threaded at this point; the child only touches the
        // inherited mapping and its own stack before exiting.
        let pid = unsafe { libc::fork() };
        match pid {
            -1 => {
                reap(&children);
                return Err(std::io::Error::last_os_error().into());
            }
            0 => {
                let code = run_child(&ssmp, id, &body);
                std::process::exit(code);
            }
            child => children.push((id, child)),
        }
    }

    let result = run_endpoint(&ssmp, 0, &body);
    let failed = reap(&children);
    result?;
    if failed.is_empty() {
        Ok(())
    } else {
        Err(SsmpError::protocol(format!("endpoints {:?} exited with failure", failed)))
    }
}

fn run_endpoint<F>(ssmp: &Ssmp, id: u32, body: &F) -> SsmpResult<()>
where
    F: Fn(&Endpoint),
{
    set_cpu(ssmp.core_of(id))?;
    let ep = ssmp.mem_init(id)?;
    body(&ep);
    ep.term();
    Ok(())
}

fn run_child<F>(ssmp: &Ssmp, id: u32, body: &F) -> i32
where
    F: Fn(&Endpoint),
{
    match panic::catch_unwind(AssertUnwindSafe(|| run_endpoint(ssmp, id, body))) {
        Ok(Ok(())) => 0,
        Ok(Err(err)) => {
            log::error!("endpoint {}: {}", id, err);
            1
        }
        Err(_) => 101,
    }
}

/// Wait for every child; return the ids of those that failed.
fn reap(children: &[(u32, libc::pid_t)]) -> Vec<u32> {
    let mut failed = Vec::new();
    for &(id, pid) in children {
        let mut status: libc::c_int = 0;
        let rc = unsafe { libc::waitpid(pid, &mut status, 0) };
        let ok = rc == pid && libc::WIFEXITED(status) && libc::WEXITSTATUS(status) == 0;
        if !ok {
            log::warn!("endpoint {} (pid {}) failed with status {}", id, pid, status);
            failed.push(id);
        }
    }
    failed
}
