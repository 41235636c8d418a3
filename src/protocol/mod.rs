//! GDB Remote Serial Protocol framing and command parsing.

pub mod commands;
pub mod common;

mod packet;
mod recv_packet;
mod response_writer;

pub use packet::*;
pub use recv_packet::*;
pub use response_writer::*;
