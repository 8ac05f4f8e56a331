//! Shared run model for the Boardwatch control plane.
//!
//! Everything that crosses a crate seam lives here: the run state machine,
//! the queue payload, counter snapshots, bounded error samples, and the
//! canonical tunables. The dispatcher, worker, ledger, and CLI all agree on
//! these types; nothing in this crate touches I/O.

pub mod defaults;
pub mod ids;
pub mod types;

pub use ids::{IdParseError, RunId, TenantId};
pub use types::{
    CounterSnapshot, ErrorSample, ErrorSampleBuffer, RunDescriptor, RunStatus, RunType,
    RunTypeParseError,
};
