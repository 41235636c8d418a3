use super::prelude::*;
use crate::protocol::commands::ext::Breakpoints;

use log::trace;

use crate::arch::insn;
use crate::stub::core_impl::CmdError;
use crate::stub::matchpoint::MpKind;

impl<T: TargetControl> ServerImpl<T> {
    pub(crate) fn handle_breakpoints<C: ConnectionExt>(
        &mut self,
        res: &mut ResponseWriter<'_, C>,
        command: Breakpoints,
    ) -> Result<HandlerStatus, Error<C::Error>> {
        let (type_, addr, insert) = match command {
            Breakpoints::Z(ref cmd) => (cmd.type_, cmd.addr, true),
            Breakpoints::z(ref cmd) => (cmd.type_, cmd.addr, false),
        };

        // only software breakpoints exist on this hardware; every other kind
        // gets the empty "unsupported" reply
        match MpKind::from_rsp(type_) {
            Some(MpKind::SwBreak) => {}
            Some(_) | None => return Ok(HandlerStatus::Handled),
        }

        let outcome = if insert {
            self.insert_sw_breakpoint(addr)
        } else {
            self.remove_sw_breakpoint(addr)
        };

        Ok(match outcome {
            Ok(()) => HandlerStatus::NeedsOk,
            Err(e) => {
                self.reply_cmd_err(res, e)?;
                HandlerStatus::Handled
            }
        })
    }

    /// Substitute a `BKPT` for the halfword at `addr`, recording the
    /// original. The table is only touched once the memory write succeeded.
    fn insert_sw_breakpoint(&mut self, addr: u32) -> Result<(), CmdError> {
        let tid = self
            .current_gtid_resolved()
            .ok_or(CmdError::THREAD_NOT_FOUND)?;
        let thread = self.model.thread(tid).ok_or(CmdError::THREAD_NOT_FOUND)?;

        let orig = thread.fetch16(&mut self.target, addr)?;
        thread.patch16(&mut self.target, addr, insn::BKPT)?;

        trace!("sw breakpoint at {:#010x} (orig {:#06x})", addr, orig);
        self.mp_table.insert(MpKind::SwBreak, addr, orig);
        Ok(())
    }

    /// Restore the displaced instruction. Removing a breakpoint that was
    /// never set is a non-error.
    fn remove_sw_breakpoint(&mut self, addr: u32) -> Result<(), CmdError> {
        let orig = match self.mp_table.remove(MpKind::SwBreak, addr) {
            Some(orig) => orig,
            None => return Ok(()),
        };

        let tid = self
            .current_gtid_resolved()
            .ok_or(CmdError::THREAD_NOT_FOUND)?;
        let thread = self.model.thread(tid).ok_or(CmdError::THREAD_NOT_FOUND)?;

        if let Err(e) = thread.patch16(&mut self.target, addr, orig) {
            // the instruction is still displaced; keep the record
            self.mp_table.insert(MpKind::SwBreak, addr, orig);
            return Err(e.into());
        }

        trace!("sw breakpoint removed from {:#010x}", addr);
        Ok(())
    }
}
