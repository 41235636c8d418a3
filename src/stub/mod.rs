//! The GDB server proper: packet loop, dispatch, and execution control.

mod core_impl;
mod error;

pub mod matchpoint;
pub mod osdata;
pub mod process;

pub use error::Error;

use log::info;
use log::warn;

use crate::conn::ConnectionExt;
use crate::protocol::commands::Command;
use crate::protocol::PacketBuf;
use crate::protocol::RecvPacketBlocking;
use crate::protocol::RecvdFrame;
use crate::target::TargetControl;

/// Session-wide debug mode, fixed at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugMode {
    /// One thread stopping halts its whole process.
    AllStop,
    /// Stops are per-thread; the rest of the process keeps running.
    NonStop,
}

/// Why the session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// GDB issued a detach command.
    Disconnect,
    /// GDB issued a kill command.
    Kill,
}

/// Knobs handed down from the CLI.
pub struct ServerSettings {
    pub debug_mode: DebugMode,
    pub multiprocess: bool,
}

impl Default for ServerSettings {
    fn default() -> ServerSettings {
        ServerSettings {
            debug_mode: DebugMode::AllStop,
            multiprocess: true,
        }
    }
}

/// A GDB RSP server bound to one connection and one target.
pub struct GdbServer<T: TargetControl, C: ConnectionExt> {
    conn: C,
    packet_buffer: Vec<u8>,
    recv: RecvPacketBlocking,
    imp: core_impl::ServerImpl<T>,
}

impl<T: TargetControl, C: ConnectionExt> GdbServer<T, C> {
    pub fn new(target: T, conn: C, settings: ServerSettings) -> GdbServer<T, C> {
        GdbServer {
            conn,
            packet_buffer: Vec::with_capacity(4096),
            recv: RecvPacketBlocking::new(),
            imp: core_impl::ServerImpl::new(target, &settings),
        }
    }

    /// Serve the connection until the client disconnects (or something
    /// fatal happens).
    pub fn run(&mut self) -> Result<DisconnectReason, Error<C::Error>> {
        self.conn.on_session_start().map_err(Error::Connection)?;
        info!("client connected, serving RSP session");

        loop {
            let GdbServer {
                conn,
                packet_buffer,
                recv,
                ..
            } = self;

            let frame = recv
                .recv(packet_buffer, || conn.read())
                .map_err(Error::Connection)?;

            match frame {
                RecvdFrame::Interrupt => self.imp.handle_interrupt(&mut self.conn)?,
                RecvdFrame::Frame => {
                    let buf = match PacketBuf::new(&mut self.packet_buffer) {
                        Ok(buf) => {
                            self.conn.write(b'+').map_err(Error::Connection)?;
                            buf
                        }
                        Err(e) => {
                            warn!("bad packet, sending NAK: {:?}", e);
                            self.conn.write(b'-').map_err(Error::Connection)?;
                            continue;
                        }
                    };

                    // a frame that doesn't parse as any known command is
                    // answered with the empty packet
                    let cmd = Command::from_packet(buf).unwrap_or(Command::Unknown(&[]));

                    match self.imp.handle_command(&mut self.conn, cmd)? {
                        core_impl::HandlerStatus::Disconnect(reason) => {
                            info!("client disconnected: {:?}", reason);
                            return Ok(reason);
                        }
                        _ => {}
                    }
                }
            }
        }
    }
}
