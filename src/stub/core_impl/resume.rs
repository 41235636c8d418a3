use super::prelude::*;
use crate::protocol::commands::ext::Resume;

use std::time::Duration;

use log::debug;
use log::info;
use log::trace;
use log::warn;

use crate::arch;
use crate::arch::insn;
use crate::arch::insn::Jump;
use crate::common::Pid;
use crate::common::Signal;
use crate::common::Tid;
use crate::protocol::commands::_vCont::vCont;
use crate::protocol::commands::_vCont::VContAction;
use crate::protocol::commands::_vCont::VContKind;
use crate::protocol::common::thread_id::ThreadId;
use crate::stub::core_impl::CmdError;
use crate::stub::matchpoint::MpKind;
use crate::stub::process::Thread;
use crate::stub::DebugMode;
use crate::target::TargetResult;

/// Pause between two halt-status probes of the running set.
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// A temporary breakpoint planted for one software single-step.
struct TempBreak {
    tid: Tid,
    core: crate::common::CoreId,
    addr: u32,
    orig: u16,
}

/// How the poll loop ended.
enum StopOutcome {
    /// A thread stopped: `(tid, at_user_breakpoint)`.
    Stopped(Tid, bool),
    /// The target exited via a semihosting `exit` trap.
    Exited(Tid, u32),
    /// The client sent an in-band break.
    Interrupted,
    /// A target access failed while the target was running.
    AccessError,
}

enum StopEvent {
    Breakpoint,
    Trap(u8),
    Other,
}

impl<T: TargetControl> ServerImpl<T> {
    pub(crate) fn handle_resume<C: ConnectionExt>(
        &mut self,
        res: &mut ResponseWriter<'_, C>,
        command: Resume<'_>,
    ) -> Result<HandlerStatus, Error<C::Error>> {
        let handler_status = match command {
            Resume::vCont(vCont::Query) => {
                res.write_str("vCont;c;C;s;S;t")?;
                HandlerStatus::Handled
            }

            Resume::vCont(vCont::Actions(ref actions)) => {
                let actions: Option<Vec<VContAction>> = actions.iter().collect();
                match actions {
                    Some(actions) => self.do_vcont(res, &actions)?,
                    None => {
                        warn!("malformed vCont actions");
                        HandlerStatus::Handled
                    }
                }
            }

            // the legacy resume packets reuse the vCont machinery, scoped to
            // the current continue thread
            Resume::c(cmd) => self.do_legacy_resume(res, VContKind::Continue, cmd.addr)?,
            Resume::C(cmd) => {
                self.do_legacy_resume(res, VContKind::ContinueWithSig(cmd.sig), cmd.addr)?
            }
            Resume::s(cmd) => self.do_legacy_resume(res, VContKind::Step, cmd.addr)?,
            Resume::S(cmd) => self.do_legacy_resume(res, VContKind::StepWithSig(cmd.sig), cmd.addr)?,

            Resume::vStopped(_) => self.handle_vstopped(res)?,
        };

        Ok(handler_status)
    }

    fn do_legacy_resume<C: ConnectionExt>(
        &mut self,
        res: &mut ResponseWriter<'_, C>,
        kind: VContKind,
        addr: Option<u32>,
    ) -> Result<HandlerStatus, Error<C::Error>> {
        let tid = match self.current_ctid_resolved() {
            Some(tid) => tid,
            None => {
                self.reply_cmd_err(res, CmdError::THREAD_NOT_FOUND)?;
                return Ok(HandlerStatus::Handled);
            }
        };

        if let Some(addr) = addr {
            if let Some(thread) = self.model.thread_mut(tid) {
                if let Err(e) = thread.write_pc(addr) {
                    self.reply_cmd_err(res, e.into())?;
                    return Ok(HandlerStatus::Handled);
                }
            }
        }

        self.exec_plan(res, &[(tid, kind)])
    }

    fn do_vcont<C: ConnectionExt>(
        &mut self,
        res: &mut ResponseWriter<'_, C>,
        actions: &[VContAction],
    ) -> Result<HandlerStatus, Error<C::Error>> {
        let process = match self.model.process(self.current_pid()) {
            Some(p) => p,
            None => {
                self.reply_cmd_err(res, CmdError::THREAD_NOT_FOUND)?;
                return Ok(HandlerStatus::Handled);
            }
        };

        // first matching thread-specific segment wins; a bare segment is the
        // default for threads not otherwise matched
        let mut plan = Vec::new();
        for tid in process.threads() {
            let thread = match self.model.thread(tid) {
                Some(t) => t,
                None => continue,
            };

            let explicit = actions.iter().find(|act| match &act.thread {
                Some(sel) => selector_matches(thread, sel),
                None => false,
            });
            let default = actions.iter().find(|act| act.thread.is_none());

            if let Some(act) = explicit.or(default) {
                plan.push((tid, act.kind));
            }
        }

        if plan.is_empty() {
            self.reply_cmd_err(res, CmdError::THREAD_NOT_FOUND)?;
            return Ok(HandlerStatus::Handled);
        }

        self.exec_plan(res, &plan)
    }

    /// Carry out a resolved set of per-thread resume actions, block until a
    /// stop is detected (or the client breaks in), and write the stop reply.
    fn exec_plan<C: ConnectionExt>(
        &mut self,
        res: &mut ResponseWriter<'_, C>,
        plan: &[(Tid, VContKind)],
    ) -> Result<HandlerStatus, Error<C::Error>> {
        let mut temps: Vec<TempBreak> = Vec::new();
        let mut resumed: Vec<Tid> = Vec::new();
        let mut stepping: Vec<Tid> = Vec::new();

        for &(tid, kind) in plan {
            match kind {
                VContKind::Stop => {
                    if let Err(e) = self.halt_thread(tid) {
                        self.reply_cmd_err(res, e.into())?;
                        return Ok(HandlerStatus::Handled);
                    }
                    self.pending_stops.insert(tid);
                }
                VContKind::Continue | VContKind::ContinueWithSig(_) => {
                    resumed.push(tid);
                }
                VContKind::Step | VContKind::StepWithSig(_) => {
                    if let Some(sig) = kind.sig() {
                        trace!("step with signal {} requested; cores take no signals", sig);
                    }
                    match self.plant_step_breakpoints(tid, &mut temps) {
                        Ok(()) => {
                            stepping.push(tid);
                            resumed.push(tid);
                        }
                        Err(e) => {
                            self.remove_temp_breakpoints(&temps);
                            self.reply_cmd_err(res, e.into())?;
                            return Ok(HandlerStatus::Handled);
                        }
                    }
                }
            }
        }

        if resumed.is_empty() {
            // nothing to run: pure 't' plans report their stops immediately
            return self.handle_vstopped(res);
        }

        for &tid in &resumed {
            if let Err(e) = self.resume_thread(tid) {
                self.remove_temp_breakpoints(&temps);
                self.reply_cmd_err(res, e.into())?;
                return Ok(HandlerStatus::Handled);
            }
        }
        self.is_target_running = true;

        let outcome = self.poll_for_stop(res.as_conn(), &resumed, &stepping)?;

        // restore displaced instructions before reporting anything
        self.remove_temp_breakpoints(&temps);

        match outcome {
            StopOutcome::Stopped(tid, user_break) => {
                if self.debug_mode() == DebugMode::AllStop {
                    if let Err(e) = self.halt_process(self.current_pid()) {
                        warn!("could not halt all threads after stop: {}", e);
                    }
                    self.is_target_running = false;
                } else {
                    if let Some(thread) = self.model.thread_mut(tid) {
                        thread.running = false;
                    }
                    self.note_other_running(&resumed, tid);
                }

                self.write_stop_reply_ext(res, tid, Signal::SIGTRAP, user_break)?;
            }
            StopOutcome::Exited(tid, code) => {
                info!("thread {} exited with code {}", tid, code);
                self.is_target_running = false;
                if let Err(e) = self.halt_process(self.current_pid()) {
                    warn!("could not halt all threads after exit: {}", e);
                }
                // semihosted exit reports a TERM stop without resuming
                self.write_stop_reply(res, tid, Signal::SIGTERM)?;
            }
            StopOutcome::Interrupted => {
                if let Err(e) = self.halt_process(self.current_pid()) {
                    warn!("could not halt process on client break: {}", e);
                }
                self.is_target_running = false;

                let tid = self
                    .current_ctid_resolved()
                    .or_else(|| resumed.first().copied());
                match tid {
                    Some(tid) => self.write_stop_reply(res, tid, Signal::SIGINT)?,
                    None => res.write_str("S02")?,
                }
            }
            StopOutcome::AccessError => {
                if let Err(e) = self.halt_process(self.current_pid()) {
                    warn!("could not halt process after access error: {}", e);
                }
                self.is_target_running = false;

                let tid = self
                    .current_ctid_resolved()
                    .or_else(|| resumed.first().copied());
                match tid {
                    Some(tid) => self.write_stop_reply(res, tid, Signal::SIGABRT)?,
                    None => res.write_str("S06")?,
                }
            }
        }

        Ok(HandlerStatus::Handled)
    }

    /// Poll halt status across the running set until something stops.
    /// Services semihosting traps transparently along the way.
    fn poll_for_stop<C: ConnectionExt>(
        &mut self,
        conn: &mut C,
        resumed: &[Tid],
        stepping: &[Tid],
    ) -> Result<StopOutcome, Error<C::Error>> {
        loop {
            // an in-band 0x03 cancels the run
            if let Some(0x03) = conn.peek().map_err(Error::Connection)? {
                conn.read().map_err(Error::Connection)?;
                debug!("client break received while target running");
                return Ok(StopOutcome::Interrupted);
            }

            for &tid in resumed {
                let halted = match self.thread_is_halted(tid) {
                    Ok(halted) => halted,
                    Err(e) => {
                        warn!("halt probe failed for thread {}: {}", tid, e);
                        return Ok(StopOutcome::AccessError);
                    }
                };
                if !halted {
                    continue;
                }

                let stepped = stepping.contains(&tid);
                match self.classify_stop(tid) {
                    Ok(StopEvent::Trap(code)) if !stepped => {
                        match self.service_trap(conn, tid, code)? {
                            TrapOutcome::Resume => {
                                if let Err(e) = self.resume_thread(tid) {
                                    warn!("could not resume after trap: {}", e);
                                    return Ok(StopOutcome::AccessError);
                                }
                            }
                            TrapOutcome::Exit(code) => {
                                return Ok(StopOutcome::Exited(tid, code));
                            }
                            TrapOutcome::Break => {
                                return Ok(StopOutcome::Interrupted);
                            }
                        }
                    }
                    Ok(StopEvent::Breakpoint) => {
                        let user_break = !stepped && self.stopped_at_user_breakpoint(tid);
                        return Ok(StopOutcome::Stopped(tid, user_break));
                    }
                    Ok(StopEvent::Trap(_)) | Ok(StopEvent::Other) => {
                        return Ok(StopOutcome::Stopped(tid, false));
                    }
                    Err(e) => {
                        warn!("could not classify stop of thread {}: {}", tid, e);
                        return Ok(StopOutcome::AccessError);
                    }
                }
            }

            std::thread::sleep(POLL_INTERVAL);
        }
    }

    /// Software single-step: plant a `BKPT` at the fall-through PC and, for
    /// control transfers, at the taken destination. Addresses already covered
    /// by a user matchpoint (or another in-flight temporary) are left alone
    /// so removal can't clobber them.
    fn plant_step_breakpoints(&mut self, tid: Tid, temps: &mut Vec<TempBreak>) -> TargetResult<()> {
        let (pc, instr) = {
            let thread = match self.model.thread_mut(tid) {
                Some(t) => t,
                None => return Ok(()),
            };
            let pc = thread.read_pc(&mut self.target)?;
            let lo = thread.fetch16(&mut self.target, pc)?;
            let instr = if insn::is_32bit(lo) {
                let hi = thread.fetch16(&mut self.target, pc.wrapping_add(2))?;
                (hi as u32) << 16 | lo as u32
            } else {
                lo as u32
            };
            (pc, instr)
        };

        let fall = pc.wrapping_add(insn::instr_len(instr as u16));
        let mut targets = vec![fall];

        if let Some(jump) = insn::get_jump(instr, pc) {
            let dest = match jump {
                Jump::Relative(dest) => dest,
                Jump::Register(rn) => self.read_thread_reg(tid, rn as usize)?,
                Jump::InterruptReturn => self.read_thread_reg(tid, arch::IRET_REGNUM)?,
            };
            if dest != fall {
                targets.push(dest);
            }
        }

        let core = match self.model.thread(tid) {
            Some(thread) => thread.core(),
            None => return Ok(()),
        };

        for addr in targets {
            if self.mp_table.contains(MpKind::SwBreak, addr) {
                continue;
            }
            // another in-flight step may already cover this spot
            if temps.iter().any(|t| t.core == core && t.addr == addr) {
                continue;
            }

            let orig = {
                let thread = match self.model.thread(tid) {
                    Some(t) => t,
                    None => continue,
                };
                let orig = thread.fetch16(&mut self.target, addr)?;
                thread.patch16(&mut self.target, addr, insn::BKPT)?;
                orig
            };
            trace!(
                "temp breakpoint at {:#010x} for thread {} (orig {:#06x})",
                addr,
                tid,
                orig
            );
            temps.push(TempBreak {
                tid,
                core,
                addr,
                orig,
            });
        }

        Ok(())
    }

    /// Restore every instruction displaced by `plant_step_breakpoints`.
    fn remove_temp_breakpoints(&mut self, temps: &[TempBreak]) {
        for temp in temps {
            let thread = match self.model.thread(temp.tid) {
                Some(t) => t,
                None => continue,
            };
            if let Err(e) = thread.patch16(&mut self.target, temp.addr, temp.orig) {
                warn!(
                    "could not restore instruction at {:#010x}: {}",
                    temp.addr, e
                );
            }
        }
    }

    /// Inspect a freshly halted thread: rewind PC over an executed `BKPT`
    /// and recognize semihosting traps.
    fn classify_stop(&mut self, tid: Tid) -> TargetResult<StopEvent> {
        let thread = match self.model.thread_mut(tid) {
            Some(t) => t,
            None => return Ok(StopEvent::Other),
        };

        let pc = thread.read_pc(&mut self.target)?;
        let prev = pc.wrapping_sub(2);
        let instr = thread.fetch16(&mut self.target, prev)?;

        if instr == insn::BKPT {
            // report the matchpoint address, not the halfword after it
            thread.write_pc(prev)?;
            thread.flush_regs(&mut self.target)?;
            return Ok(StopEvent::Breakpoint);
        }

        if let Some(code) = insn::trap_code(instr) {
            return Ok(StopEvent::Trap(code));
        }

        Ok(StopEvent::Other)
    }

    fn stopped_at_user_breakpoint(&mut self, tid: Tid) -> bool {
        let pc = match self.model.thread_mut(tid) {
            Some(thread) => thread.read_pc(&mut self.target),
            None => return false,
        };
        match pc {
            Ok(pc) => self.mp_table.contains(MpKind::SwBreak, pc),
            Err(_) => false,
        }
    }

    fn read_thread_reg(&mut self, tid: Tid, regnum: usize) -> TargetResult<u32> {
        match self.model.thread_mut(tid) {
            Some(thread) => thread.read_reg(&mut self.target, regnum),
            None => Ok(0),
        }
    }

    fn thread_is_halted(&mut self, tid: Tid) -> TargetResult<bool> {
        match self.model.thread_mut(tid) {
            Some(thread) => thread.is_halted(&mut self.target),
            None => Ok(true),
        }
    }

    fn halt_thread(&mut self, tid: Tid) -> TargetResult<()> {
        if let Some(thread) = self.model.thread_mut(tid) {
            thread.halt(&mut self.target)?;
            thread.running = false;
        }
        Ok(())
    }

    fn resume_thread(&mut self, tid: Tid) -> TargetResult<()> {
        if let Some(thread) = self.model.thread_mut(tid) {
            thread.resume(&mut self.target)?;
        }
        Ok(())
    }

    /// Fan a halt out over every thread of a process.
    pub(crate) fn halt_process(&mut self, pid: Pid) -> TargetResult<()> {
        let tids: Vec<Tid> = match self.model.process(pid) {
            Some(p) => p.threads().collect(),
            None => return Ok(()),
        };
        for tid in tids {
            self.halt_thread(tid)?;
        }
        Ok(())
    }

    /// Fan a resume out over every halted thread of a process.
    pub(crate) fn resume_process(&mut self, pid: Pid) -> TargetResult<()> {
        let tids: Vec<Tid> = match self.model.process(pid) {
            Some(p) => p.threads().collect(),
            None => return Ok(()),
        };
        for tid in tids {
            let halted = self.thread_is_halted(tid)?;
            if halted {
                self.resume_thread(tid)?;
            }
        }
        Ok(())
    }

    /// In non-stop mode the rest of the running set keeps going after one
    /// thread's stop is reported.
    fn note_other_running(&mut self, resumed: &[Tid], stopped: Tid) {
        let others_running = resumed.iter().any(|&tid| tid != stopped);
        self.is_target_running = others_running;
    }

    /// Idle-time break: the client wants everything stopped now.
    pub(crate) fn suspend_current_process<C: ConnectionExt>(
        &mut self,
        res: &mut ResponseWriter<'_, C>,
    ) -> Result<(), C::Error> {
        if let Err(e) = self.halt_process(self.current_pid()) {
            warn!("could not halt process on client break: {}", e);
        }
        self.is_target_running = false;

        match self.current_ctid_resolved() {
            Some(tid) => self.write_stop_reply(res, tid, Signal::SIGINT),
            None => res.write_str("S02"),
        }
    }

    /// `vStopped`: drain one pending stop, or probe the still-running set.
    fn handle_vstopped<C: ConnectionExt>(
        &mut self,
        res: &mut ResponseWriter<'_, C>,
    ) -> Result<HandlerStatus, Error<C::Error>> {
        let pending = self.pending_stops.iter().next().copied();
        if let Some(tid) = pending {
            self.write_stop_reply(res, tid, Signal::SIGTRAP)?;
            return Ok(HandlerStatus::Handled);
        }

        // single probe over threads the server still considers running
        let running: Vec<Tid> = self
            .model
            .threads()
            .filter(|t| t.running)
            .map(|t| t.tid())
            .collect();

        for tid in running {
            match self.thread_is_halted(tid) {
                Ok(true) => {
                    if let Err(e) = self.classify_stop(tid) {
                        warn!("could not classify stop of thread {}: {}", tid, e);
                    }
                    if let Some(thread) = self.model.thread_mut(tid) {
                        thread.running = false;
                    }
                    self.pending_stops.insert(tid);
                }
                Ok(false) => {}
                Err(e) => warn!("halt probe failed for thread {}: {}", tid, e),
            }
        }

        let pending = self.pending_stops.iter().next().copied();
        match pending {
            Some(tid) => self.write_stop_reply(res, tid, Signal::SIGTRAP)?,
            None => res.write_str("OK")?,
        }
        Ok(HandlerStatus::Handled)
    }

    /// Stop reply with an optional `swbreak` reason.
    fn write_stop_reply_ext<C: ConnectionExt>(
        &mut self,
        res: &mut ResponseWriter<'_, C>,
        tid: Tid,
        sig: Signal,
        swbreak: bool,
    ) -> Result<(), C::Error> {
        self.write_stop_reply(res, tid, sig)?;
        if swbreak {
            res.write_str("swbreak:;")?;
        }
        Ok(())
    }
}

/// Whether a `vCont` thread selector matches a given thread.
fn selector_matches(thread: &Thread, sel: &ThreadId) -> bool {
    let pid_ok = match sel.pid {
        None => true,
        Some(kind) => kind.matches(thread.pid()),
    };
    pid_ok && sel.tid.matches(thread.tid())
}

/// The result of servicing a semihosting trap.
pub(crate) enum TrapOutcome {
    /// The syscall completed; resume the core transparently.
    Resume,
    /// The program asked to exit with this status.
    Exit(u32),
    /// The user pressed Ctrl-C while the syscall was in flight.
    Break,
}
