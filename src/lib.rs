//! A GDB RSP debug server for mesh manycore targets.
//!
//! The target is a grid of simple little-endian RISC cores, each with a
//! local scratchpad, sharing a flat global address space (`(row,col) << 20`
//! windows plus external memory banks). Every core is presented to the GDB
//! client as one thread; rectangular workgroups of cores are presented as
//! processes, multiplexed over a single RSP connection.
//!
//! The crate splits along the protocol/machine seam:
//!
//! - `protocol` (crate-private): RSP framing, checksums, escapes, and
//!   per-command packet parsing.
//! - [`stub`]: the server state machine - dispatch, the process/thread
//!   model, matchpoints, execution control (software single-step by
//!   control-transfer prediction), semihosting, and `qXfer` providers.
//! - [`target`]: the narrow capability boundary to the hardware, and its
//!   one concrete implementation over a runtime-loaded driver plugin.
//! - [`arch`]: register numbering and the instruction decoder that powers
//!   single-step.
//!
//! The `eserver` binary wires these together behind a CLI and a TCP
//! listener.

pub mod arch;
pub mod common;
pub mod conn;
pub mod stub;
pub mod target;

mod protocol;
