//! # SSMP Core
//!
//! Shared-memory message passing between endpoints pinned one per core on a
//! single machine. Endpoints busy-poll cache-line mailboxes in one POSIX
//! shared region instead of going through the kernel.
//!
//! - **Mailboxes**: one single-slot SPSC buffer per ordered endpoint pair
//! - **Channel**: blocking and best-effort send, directed and any-source receive
//! - **Colors**: filtered, fair polling over a subset of peers
//! - **Barriers**: a fixed table of reusable ticket barriers
//! - **Bulk transfer**: payloads larger than a message, streamed in 8 KiB chunks
//! - **Platform**: cycle counter, fences, pause, CPU pinning
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ssmp_core::{Message, Ssmp, SsmpConfig};
//!
//! let ssmp = Ssmp::with_config(SsmpConfig::default(), 2)?;
//! let peer = ssmp.clone();
//! let echo = std::thread::spawn(move || -> ssmp_core::SsmpResult<()> {
//!     let ep = peer.mem_init(1)?;
//!     let msg = ep.recv_from(0u32);
//!     ep.send(0u32, &Message::with_w0(msg.w0() + 1));
//!     ep.term();
//!     Ok(())
//! });
//!
//! let ep = ssmp.mem_init(0)?;
//! ep.send(1u32, &Message::with_w0(41));
//! assert_eq!(ep.recv_from(1u32).w0(), 42);
//! ep.term();
//! # echo.join().unwrap()?;
//! # Ok::<(), ssmp_core::SsmpError>(())
//! ```

pub mod barrier;
pub mod channel;
pub mod chunk;
pub mod color;
pub mod config;
pub mod context;
pub mod error;
pub mod mailbox;
pub mod memory;
pub mod platform;
pub mod topology;
pub mod types;
pub(crate) mod utils;

pub use barrier::{BarrierSlot, BarrierState};
pub use chunk::{chunk_count, ChunkSlot};
pub use color::{
    AllEndpoints, ColorBuffer, Membership, ParticipantMask, PeerList, Predicate, SharedForm,
};
pub use config::{SsmpConfig, SyncMode, DEFAULT_SHM_NAME};
pub use context::{Endpoint, Ssmp};
pub use error::{OrExit, SsmpError, SsmpResult};
pub use mailbox::{Mailbox, Message, SyncStrategy};
pub use memory::{unlink_region, SharedRegion};
pub use platform::{
    calibrate_ticks_correction, get_cpu, get_ticks, set_cpu, ticks_calibrated, ticks_correction,
    wait_cycles, wtime, Ticks,
};
pub use topology::Topology;
pub use types::{EndpointId, BARRIER_ALL, CHUNK_SIZE, MAX_ENDPOINTS, MSG_WORDS, NUM_BARRIERS};
pub use utils::CachePadded;
