//! Shared memory: the named POSIX object and the typed layout on top of it.

pub mod layout;
pub mod shm_region;

pub use layout::{RegionHeader, RegionLayout, SharedRegion, REGION_MAGIC, REGION_VERSION};
pub use shm_region::{unlink_region, ShmRegion};
