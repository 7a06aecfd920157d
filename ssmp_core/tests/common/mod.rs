//! Shared helpers: threads stand in for endpoint processes on one region.

#![allow(dead_code)]

use std::sync::Arc;
use std::thread;

use ssmp_core::{Endpoint, Ssmp, SsmpConfig, SyncMode};

/// Region name unique to this test and process, short enough for macOS.
pub fn unique_name(tag: &str) -> String {
    format!(
        "/t{}_{}_{}",
        tag,
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .subsec_nanos()
    )
}

/// Config that fits any CI box: every endpoint placed on core 0.
pub fn test_config(tag: &str, n: u32) -> SsmpConfig {
    SsmpConfig {
        shm_name: unique_name(tag),
        core_map: vec![0; n as usize],
        attach_timeout_ms: 2_000,
        ..SsmpConfig::default()
    }
}

pub fn test_config_with(tag: &str, n: u32, sync: SyncMode) -> SsmpConfig {
    SsmpConfig {
        sync_strategy: sync,
        ..test_config(tag, n)
    }
}

/// Run `body` once per endpoint id, each on its own thread, and re-raise
/// the first panic.
pub fn run_endpoints<F>(config: SsmpConfig, n: u32, body: F)
where
    F: Fn(Endpoint) + Send + Sync + 'static,
{
    let _ = env_logger::builder().is_test(true).try_init();
    let ssmp = Ssmp::with_config(config, n).unwrap();
    let body = Arc::new(body);

    let handles: Vec<_> = (0..n)
        .map(|id| {
            let ssmp = ssmp.clone();
            let body = body.clone();
            thread::Builder::new()
                .name(format!("endpoint-{}", id))
                .spawn(move || {
                    let ep = ssmp.mem_init(id).unwrap();
                    body(ep);
                })
                .unwrap()
        })
        .collect();

    let mut first_panic = None;
    for h in handles {
        if let Err(e) = h.join() {
            first_panic.get_or_insert(e);
        }
    }
    if let Some(e) = first_panic {
        std::panic::resume_unwind(e);
    }
}
