use super::prelude::*;
use crate::protocol::commands::ext::Base;

use log::info;
use log::warn;

use crate::arch;
use crate::common::Signal;
use crate::common::Tid;
use crate::protocol::common::thread_id::IdKind;
use crate::stub::core_impl::CmdError;
use crate::stub::core_impl::ProtocolFeatures;
use crate::stub::DisconnectReason;
use crate::target::TargetResult;

/// Advertised `PacketSize`: enough for all the registers as hex characters
/// plus framing.
const MAX_PACKET_SIZE: usize = 0x1000;

impl<T: TargetControl> ServerImpl<T> {
    pub(crate) fn handle_base<C: ConnectionExt>(
        &mut self,
        res: &mut ResponseWriter<'_, C>,
        command: Base<'_>,
    ) -> Result<HandlerStatus, Error<C::Error>> {
        let handler_status = match command {
            // the client upgrades to extended mode; everything we serve
            // already behaves that way
            Base::ExclamationMark(_) => HandlerStatus::NeedsOk,

            Base::QuestionMark(_) => {
                self.report_last_stop(res)?;
                HandlerStatus::Handled
            }

            Base::qSupported(cmd) => {
                self.features = ProtocolFeatures::empty();
                if self.multiprocess_allowed && cmd.client_supports(b"multiprocess") {
                    self.features |= ProtocolFeatures::MULTIPROCESS;
                }

                res.write_str("PacketSize=")?;
                res.write_num(MAX_PACKET_SIZE)?;
                res.write_str(";vContSupported+")?;
                res.write_str(";qXfer:features:read+")?;
                res.write_str(";qXfer:osdata:read+")?;
                res.write_str(";swbreak+")?;
                if self.features.contains(ProtocolFeatures::MULTIPROCESS) {
                    res.write_str(";multiprocess+")?;
                }
                HandlerStatus::Handled
            }

            Base::H(cmd) => match self.set_current_thread(cmd.kind, cmd.thread) {
                Ok(()) => HandlerStatus::NeedsOk,
                Err(e) => {
                    self.reply_cmd_err(res, e)?;
                    HandlerStatus::Handled
                }
            },

            Base::T(cmd) => match cmd.thread.tid {
                IdKind::WithId(tid) if self.model.thread(tid).is_none() => {
                    self.reply_cmd_err(res, CmdError::THREAD_NOT_FOUND)?;
                    HandlerStatus::Handled
                }
                _ => HandlerStatus::NeedsOk,
            },

            Base::g(_) => {
                match self.read_all_regs() {
                    Ok(regs) => {
                        for val in regs {
                            res.write_hex_buf(&val.to_le_bytes())?;
                        }
                    }
                    Err(e) => self.reply_cmd_err(res, e)?,
                }
                HandlerStatus::Handled
            }

            Base::G(cmd) => self.handle_ok_or_error(res, |this| {
                if cmd.vals.len() != arch::NUM_REGS * arch::REG_BYTES {
                    return Err(CmdError::UNKNOWN_REGISTER);
                }
                this.write_all_regs(cmd.vals)
            })?,

            Base::p(cmd) => {
                match self.read_one_reg(cmd.reg_id) {
                    Ok(val) => res.write_hex_buf(&val.to_le_bytes())?,
                    Err(e) => self.reply_cmd_err(res, e)?,
                }
                HandlerStatus::Handled
            }

            Base::P(cmd) => self.handle_ok_or_error(res, |this| {
                if cmd.val.len() != arch::REG_BYTES {
                    return Err(CmdError::UNKNOWN_REGISTER);
                }
                let val = u32::from_le_bytes([cmd.val[0], cmd.val[1], cmd.val[2], cmd.val[3]]);
                this.write_one_reg(cmd.reg_id, val)
            })?,

            Base::m(cmd) => {
                // reads are bounded by the advertised PacketSize
                if cmd.len > MAX_PACKET_SIZE {
                    self.reply_cmd_err(res, CmdError::UNKNOWN_REGISTER)?;
                    return Ok(HandlerStatus::Handled);
                }
                let mut buf = vec![0; cmd.len];
                match self.read_mem(cmd.addr, &mut buf) {
                    Ok(()) => res.write_hex_buf(&buf)?,
                    Err(e) => self.reply_cmd_err(res, e.into())?,
                }
                HandlerStatus::Handled
            }

            Base::M(cmd) => self.handle_ok_or_error(res, |this| {
                if cmd.val.len() != cmd.len {
                    return Err(CmdError::UNKNOWN_REGISTER);
                }
                this.write_mem(cmd.addr, cmd.val).map_err(CmdError::from)
            })?,

            Base::X(cmd) => self.handle_ok_or_error(res, |this| {
                if cmd.val.len() != cmd.len {
                    return Err(CmdError::UNKNOWN_REGISTER);
                }
                this.write_mem(cmd.addr, cmd.val).map_err(CmdError::from)
            })?,

            Base::qfThreadInfo(_) => {
                res.write_str("m")?;
                let tids: Vec<_> = self.model.threads().map(|thread| thread.tid()).collect();
                for (i, tid) in tids.into_iter().enumerate() {
                    if i != 0 {
                        res.write_str(",")?;
                    }
                    res.write_specific_thread_id(self.specific_thread_id(tid))?;
                }
                HandlerStatus::Handled
            }

            Base::qsThreadInfo(_) => {
                res.write_str("l")?;
                HandlerStatus::Handled
            }

            Base::qThreadExtraInfo(cmd) => {
                match cmd.id.tid {
                    IdKind::WithId(tid) => match self.thread_extra_info(tid) {
                        Some(info) => res.write_hex_buf(info.as_bytes())?,
                        None => self.reply_cmd_err(res, CmdError::THREAD_NOT_FOUND)?,
                    },
                    _ => self.reply_cmd_err(res, CmdError::THREAD_NOT_FOUND)?,
                }
                HandlerStatus::Handled
            }

            Base::qC(_) => {
                res.write_str("QC")?;
                match self.current_gtid_resolved() {
                    Some(tid) => res.write_specific_thread_id(self.specific_thread_id(tid))?,
                    None => res.write_str("-1")?,
                }
                HandlerStatus::Handled
            }

            Base::qAttached(_) => {
                // our processes always exist before the client attaches
                res.write_str("1")?;
                HandlerStatus::Handled
            }

            Base::qOffsets(_) => {
                // cores run at their link addresses
                res.write_str("Text=0;Data=0;Bss=0")?;
                HandlerStatus::Handled
            }

            Base::vAttach(cmd) => {
                if self.model.process(cmd.pid).is_none() {
                    self.reply_cmd_err(res, CmdError::THREAD_NOT_FOUND)?;
                    return Ok(HandlerStatus::Handled);
                }

                info!("attaching to process {}", cmd.pid);
                self.set_current_pid(cmd.pid);
                self.current_gtid = IdKind::Any;
                self.current_ctid = IdKind::All;

                if let Err(e) = self.halt_process(cmd.pid) {
                    self.reply_cmd_err(res, e.into())?;
                    return Ok(HandlerStatus::Handled);
                }

                match self.current_gtid_resolved() {
                    Some(tid) => self.write_stop_reply(res, tid, Signal::SIGTRAP)?,
                    None => self.reply_cmd_err(res, CmdError::THREAD_NOT_FOUND)?,
                }
                HandlerStatus::Handled
            }

            Base::vRun(cmd) => {
                if let Some(filename) = cmd.filename {
                    warn!(
                        "vRun names {:?}, but there is no loader behind the debug channel",
                        core::str::from_utf8(filename).unwrap_or("<non-utf8>")
                    );
                }

                self.restart_platform().map_err(Error::PlatformReset)?;

                if let Err(e) = self.halt_process(self.current_pid()) {
                    self.reply_cmd_err(res, e.into())?;
                    return Ok(HandlerStatus::Handled);
                }
                match self.current_gtid_resolved() {
                    Some(tid) => self.write_stop_reply(res, tid, Signal::SIGTRAP)?,
                    None => self.reply_cmd_err(res, CmdError::THREAD_NOT_FOUND)?,
                }
                HandlerStatus::Handled
            }

            Base::R(_) => {
                self.restart_platform().map_err(Error::PlatformReset)?;
                HandlerStatus::NoResponse
            }

            Base::D(cmd) => {
                let pid = cmd.pid.unwrap_or_else(|| self.current_pid());
                info!("detaching from process {}", pid);

                if let Err(e) = self.resume_process(pid) {
                    warn!("could not resume process {} on detach: {}", pid, e);
                }
                self.model.dissolve_process(pid);
                if self.current_pid() == pid {
                    let idle = self.model.idle_pid();
                    self.set_current_pid(idle);
                }

                res.write_str("OK")?;
                if self.model.processes().count() > 1 {
                    HandlerStatus::Handled
                } else {
                    HandlerStatus::Disconnect(DisconnectReason::Disconnect)
                }
            }

            Base::k(_) => HandlerStatus::Disconnect(DisconnectReason::Kill),
        };

        Ok(handler_status)
    }

    /// Run a fallible command body, answering `OK` on success and `E xx`
    /// otherwise.
    fn handle_ok_or_error<C: ConnectionExt>(
        &mut self,
        res: &mut ResponseWriter<'_, C>,
        body: impl FnOnce(&mut Self) -> Result<(), CmdError>,
    ) -> Result<HandlerStatus, C::Error> {
        Ok(match body(self) {
            Ok(()) => HandlerStatus::NeedsOk,
            Err(e) => {
                self.reply_cmd_err(res, e)?;
                HandlerStatus::Handled
            }
        })
    }

    pub(crate) fn reply_cmd_err<C: ConnectionExt>(
        &self,
        res: &mut ResponseWriter<'_, C>,
        e: CmdError,
    ) -> Result<(), C::Error> {
        if let CmdError::Target(e) = &e {
            warn!("target access failed: {}", e);
        }
        self.write_error(res, e.code())
    }

    fn report_last_stop<C: ConnectionExt>(
        &mut self,
        res: &mut ResponseWriter<'_, C>,
    ) -> Result<(), C::Error> {
        match self.last_stop {
            Some((tid, sig)) if self.model.thread(tid).is_some() => {
                self.write_stop_reply(res, tid, sig)
            }
            _ => match self.current_ctid_resolved() {
                Some(tid) => self.write_stop_reply(res, tid, Signal::SIGTRAP),
                None => res.write_str("S05"),
            },
        }
    }

    fn set_current_thread(
        &mut self,
        kind: char,
        thread: crate::protocol::common::thread_id::ThreadId,
    ) -> Result<(), CmdError> {
        // an explicit pid also selects the process for process-scoped
        // queries
        if let Some(IdKind::WithId(pid)) = thread.pid {
            if self.model.process(pid).is_none() {
                return Err(CmdError::THREAD_NOT_FOUND);
            }
            self.set_current_pid(pid);
        }

        if let IdKind::WithId(tid) = thread.tid {
            if self.model.thread(tid).is_none() {
                return Err(CmdError::THREAD_NOT_FOUND);
            }
        }

        match kind {
            'g' => self.current_gtid = thread.tid,
            'c' => self.current_ctid = thread.tid,
            _ => {}
        }
        Ok(())
    }

    /// Point core-local addresses at the current general thread's core.
    fn attach_gthread(&mut self) {
        if let Some(tid) = self.current_gtid_resolved() {
            if let Some(thread) = self.model.thread(tid) {
                self.target.set_attached_core(thread.core());
            }
        }
    }

    pub(crate) fn read_mem(&mut self, addr: u32, buf: &mut [u8]) -> TargetResult<()> {
        self.attach_gthread();
        self.target.read_burst(addr, buf)
    }

    pub(crate) fn write_mem(&mut self, addr: u32, buf: &[u8]) -> TargetResult<()> {
        self.attach_gthread();
        self.target.write_burst(addr, buf)
    }

    fn gthread(&mut self) -> Result<Tid, CmdError> {
        self.current_gtid_resolved()
            .ok_or(CmdError::THREAD_NOT_FOUND)
    }

    fn read_all_regs(&mut self) -> Result<[u32; arch::NUM_REGS], CmdError> {
        let tid = self.gthread()?;
        let thread = self
            .model
            .thread_mut(tid)
            .ok_or(CmdError::THREAD_NOT_FOUND)?;

        thread.fetch_all_regs(&mut self.target)?;

        let mut regs = [0; arch::NUM_REGS];
        for (regnum, slot) in regs.iter_mut().enumerate() {
            *slot = thread.read_reg(&mut self.target, regnum)?;
        }
        Ok(regs)
    }

    fn write_all_regs(&mut self, vals: &[u8]) -> Result<(), CmdError> {
        let tid = self.gthread()?;
        let thread = self
            .model
            .thread_mut(tid)
            .ok_or(CmdError::THREAD_NOT_FOUND)?;

        for (regnum, chunk) in vals.chunks_exact(arch::REG_BYTES).enumerate() {
            let val = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            thread.set_reg(regnum, val)?;
        }
        thread.flush_regs(&mut self.target)?;
        Ok(())
    }

    fn read_one_reg(&mut self, regnum: usize) -> Result<u32, CmdError> {
        if regnum >= arch::NUM_REGS {
            return Err(CmdError::UNKNOWN_REGISTER);
        }
        let tid = self.gthread()?;
        let thread = self
            .model
            .thread_mut(tid)
            .ok_or(CmdError::THREAD_NOT_FOUND)?;
        Ok(thread.read_reg(&mut self.target, regnum)?)
    }

    fn write_one_reg(&mut self, regnum: usize, val: u32) -> Result<(), CmdError> {
        if regnum >= arch::NUM_REGS {
            return Err(CmdError::UNKNOWN_REGISTER);
        }
        let tid = self.gthread()?;
        let thread = self
            .model
            .thread_mut(tid)
            .ok_or(CmdError::THREAD_NOT_FOUND)?;
        thread.set_reg(regnum, val)?;
        thread.flush_regs(&mut self.target)?;
        Ok(())
    }

    fn thread_extra_info(&mut self, tid: Tid) -> Option<String> {
        let thread = self.model.thread_mut(tid)?;
        let core = thread.core();
        let pid = thread.pid();

        let state = match thread.is_halted(&mut self.target) {
            Ok(true) => match thread.is_idle(&mut self.target) {
                Ok(true) => "idle",
                _ => "halted",
            },
            Ok(false) => "running",
            Err(_) => "unknown",
        };

        Some(format!("Core: {}, process {}, {}", core, pid, state))
    }

    /// Full platform restart: after the hardware comes back, every piece of
    /// cached target state is stale.
    fn restart_platform(&mut self) -> TargetResult<()> {
        info!("restarting platform");
        self.target.platform_reset()?;

        let tids = self.model.all_tids();
        for tid in tids {
            if let Some(thread) = self.model.thread_mut(tid) {
                thread.invalidate_regs();
                thread.running = false;
            }
        }
        self.mp_table = crate::stub::matchpoint::MpTable::new();
        self.pending_stops.clear();
        self.last_stop = None;
        self.is_target_running = false;
        Ok(())
    }
}
