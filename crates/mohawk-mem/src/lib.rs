//! # Mohawk-mem
//!
//! An in-memory [`Host`](mohawk::host::Host) for mohawk: an arena of nodes
//! addressed by opaque handles, with an operation log for asserting what the
//! patch engine actually did, event firing for driving listeners, and markup
//! rendering for snapshots and server-side output.
//!
//! This is the reference host implementation. It is used by the integration
//! tests, by headless rendering, and as prior art for writing a `Host` of
//! your own.
pub mod arena;
pub mod ticks;

pub use arena::{HostOp, MemHost};
pub use ticks::ExecutorTicks;

pub mod prelude {
    //! Re-exports for convenience.
    pub use super::arena::{HostOp, MemHost};
    pub use super::ticks::ExecutorTicks;
    pub use mohawk::prelude::*;
}
