use super::prelude::*;
use crate::protocol::commands::ext::HostIo;

use log::debug;
use log::info;
use log::warn;

use crate::arch;
use crate::common::Tid;
use crate::protocol::commands::Command;
use crate::protocol::PacketBuf;
use crate::protocol::RecvPacketBlocking;
use crate::protocol::RecvdFrame;
use crate::stub::core_impl::resume::TrapOutcome;
use crate::target::TargetResult;

// Semihosting trap codes, as emitted by the target's C library stubs.
const TRAP_WRITE: u8 = 0;
const TRAP_READ: u8 = 1;
const TRAP_OPEN: u8 = 2;
const TRAP_EXIT: u8 = 3;
const TRAP_PASS: u8 = 4;
const TRAP_FAIL: u8 = 5;
const TRAP_CLOSE: u8 = 6;
const TRAP_SYSCALL: u8 = 7;

// `TRAP_SYSCALL` subcodes, carried in R3.
const SYS_OPEN: u32 = 2;
const SYS_CLOSE: u32 = 3;
const SYS_READ: u32 = 4;
const SYS_WRITE: u32 = 5;
const SYS_LSEEK: u32 = 6;
const SYS_UNLINK: u32 = 7;
const SYS_FSTAT: u32 = 10;
const SYS_STAT: u32 = 15;
const SYS_ISATTY: u32 = 16;
const SYS_SYSTEM: u32 = 17;

/// Longest NUL-terminated string the server will chase through target
/// memory on behalf of a path-taking syscall.
const MAX_CSTR: u32 = 256;

impl<T: TargetControl> ServerImpl<T> {
    /// An `F` packet outside a File-I/O exchange is stale; swallow it.
    pub(crate) fn handle_host_io<C: ConnectionExt>(
        &mut self,
        _res: &mut ResponseWriter<'_, C>,
        command: HostIo,
    ) -> Result<HandlerStatus, Error<C::Error>> {
        match command {
            HostIo::F(cmd) => {
                warn!("stray file-io reply (retcode {})", cmd.retcode);
            }
        }
        Ok(HandlerStatus::Handled)
    }

    /// Service a semihosting trap: translate it into a GDB File-I/O request,
    /// carry out the exchange, and deposit the return value in R0.
    pub(crate) fn service_trap<C: ConnectionExt>(
        &mut self,
        conn: &mut C,
        tid: Tid,
        code: u8,
    ) -> Result<TrapOutcome, Error<C::Error>> {
        let args = match self.trap_args(tid) {
            Ok(args) => args,
            Err(e) => {
                warn!("could not read trap arguments: {}", e);
                return Ok(TrapOutcome::Resume);
            }
        };
        let [r0, r1, r2, r3] = args;

        debug!(
            "thread {} trap {} (r0={:#x} r1={:#x} r2={:#x} r3={:#x})",
            tid, code, r0, r1, r2, r3
        );

        let request = match code {
            TRAP_EXIT => {
                info!("thread {} requested exit({})", tid, r0);
                return Ok(TrapOutcome::Exit(r0));
            }
            TRAP_PASS => return Ok(TrapOutcome::Exit(0)),
            TRAP_FAIL => return Ok(TrapOutcome::Exit(1)),

            TRAP_WRITE => format!("Fwrite,{:x},{:x},{:x}", r0, r1, r2),
            TRAP_READ => format!("Fread,{:x},{:x},{:x}", r0, r1, r2),
            TRAP_OPEN => {
                let len = match self.cstr_len(tid, r0) {
                    Ok(len) => len,
                    Err(e) => {
                        warn!("could not size open() path: {}", e);
                        return Ok(TrapOutcome::Resume);
                    }
                };
                format!("Fopen,{:x}/{:x},{:x},{:x}", r0, len, r1, r2)
            }
            TRAP_CLOSE => format!("Fclose,{:x}", r0),

            TRAP_SYSCALL => match self.syscall_request(tid, r3, r0, r1, r2) {
                Some(request) => request,
                None => {
                    warn!("unhandled syscall {} from thread {}", r3, tid);
                    return Ok(TrapOutcome::Resume);
                }
            },

            _ => {
                warn!("unhandled trap code {} from thread {}", code, tid);
                return Ok(TrapOutcome::Resume);
            }
        };

        let reply = self.file_io_exchange(conn, &request)?;

        if let Some(thread) = self.model.thread_mut(tid) {
            if let Err(e) = thread.set_reg(arch::R0_REGNUM, reply.retcode as u32) {
                warn!("could not deposit syscall return value: {}", e);
            }
        }
        if let Some(errno) = reply.errno {
            debug!("file-io errno: {}", errno);
        }

        if reply.ctrl_c {
            return Ok(TrapOutcome::Break);
        }
        Ok(TrapOutcome::Resume)
    }

    fn trap_args(&mut self, tid: Tid) -> TargetResult<[u32; 4]> {
        let mut args = [0; 4];
        if let Some(thread) = self.model.thread_mut(tid) {
            for (i, arg) in args.iter_mut().enumerate() {
                *arg = thread.read_reg(&mut self.target, arch::R0_REGNUM + i)?;
            }
        }
        Ok(args)
    }

    fn syscall_request(
        &mut self,
        tid: Tid,
        sysno: u32,
        r0: u32,
        r1: u32,
        r2: u32,
    ) -> Option<String> {
        Some(match sysno {
            SYS_OPEN => {
                let len = self.cstr_len(tid, r0).ok()?;
                format!("Fopen,{:x}/{:x},{:x},{:x}", r0, len, r1, r2)
            }
            SYS_CLOSE => format!("Fclose,{:x}", r0),
            SYS_READ => format!("Fread,{:x},{:x},{:x}", r0, r1, r2),
            SYS_WRITE => format!("Fwrite,{:x},{:x},{:x}", r0, r1, r2),
            SYS_LSEEK => format!("Flseek,{:x},{:x},{:x}", r0, r1, r2),
            SYS_UNLINK => {
                let len = self.cstr_len(tid, r0).ok()?;
                format!("Funlink,{:x}/{:x}", r0, len)
            }
            SYS_FSTAT => format!("Ffstat,{:x},{:x}", r0, r1),
            SYS_STAT => {
                let len = self.cstr_len(tid, r0).ok()?;
                format!("Fstat,{:x}/{:x},{:x}", r0, len, r1)
            }
            SYS_ISATTY => format!("Fisatty,{:x}", r0),
            SYS_SYSTEM => {
                let len = self.cstr_len(tid, r0).ok()?;
                format!("Fsystem,{:x}/{:x}", r0, len)
            }
            _ => return None,
        })
    }

    /// Length of the NUL-terminated string at `ptr`, including the
    /// terminator, as the File-I/O string convention wants.
    fn cstr_len(&mut self, tid: Tid, ptr: u32) -> TargetResult<u32> {
        let thread = match self.model.thread(tid) {
            Some(t) => t,
            None => return Ok(0),
        };

        for i in 0..MAX_CSTR {
            let mut byte = [0u8; 1];
            {
                let addr = ptr.wrapping_add(i);
                self.target.set_attached_core(thread.core());
                self.target.read(addr, &mut byte)?;
            }
            if byte[0] == 0 {
                return Ok(i + 1);
            }
        }
        Ok(MAX_CSTR)
    }

    /// Send one `F` request and pump packets until the client's `F` reply
    /// lands. GDB transfers syscall data through ordinary memory packets
    /// mid-exchange, so everything that isn't the reply is dispatched
    /// normally.
    fn file_io_exchange<C: ConnectionExt>(
        &mut self,
        conn: &mut C,
        request: &str,
    ) -> Result<FileIoReply, Error<C::Error>> {
        debug!("file-io request: {}", request);

        let mut res = ResponseWriter::new(conn, true);
        res.write_str(request)?;
        res.flush()?;

        let mut buf = Vec::with_capacity(1024);
        let mut recv = RecvPacketBlocking::new();
        let mut ctrl_c = false;

        loop {
            match recv
                .recv(&mut buf, || conn.read())
                .map_err(Error::Connection)?
            {
                RecvdFrame::Interrupt => {
                    // the user broke in while the syscall was in flight; the
                    // client still owes us the F reply
                    ctrl_c = true;
                }
                RecvdFrame::Frame => {
                    let pkt = match PacketBuf::new(&mut buf) {
                        Ok(pkt) => {
                            conn.write(b'+').map_err(Error::Connection)?;
                            pkt
                        }
                        Err(e) => {
                            warn!("bad packet during file-io exchange: {:?}", e);
                            conn.write(b'-').map_err(Error::Connection)?;
                            continue;
                        }
                    };

                    match Command::from_packet(pkt) {
                        Some(Command::HostIo(HostIo::F(f))) => {
                            debug!("file-io reply: retcode {}", f.retcode);
                            return Ok(FileIoReply {
                                retcode: f.retcode,
                                errno: f.errno,
                                ctrl_c: ctrl_c || f.ctrl_c,
                            });
                        }
                        Some(cmd) => {
                            self.handle_command(conn, cmd)?;
                        }
                        None => {
                            ResponseWriter::new(conn, true)
                                .flush()
                                .map_err(Error::Connection)?;
                        }
                    }
                }
            }
        }
    }
}

struct FileIoReply {
    retcode: i64,
    errno: Option<i64>,
    ctrl_c: bool,
}
