//! Cores, threads and processes.
//!
//! Each physical core is exposed to GDB as one thread, and workgroups of
//! cores as processes. Two registries own the objects (threads by TID,
//! processes by PID) and refer to each other by stable integer ID only, so
//! attach/detach can never leave a dangling back-pointer.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::time::Duration;
use std::time::Instant;

use log::debug;
use log::trace;
use log::warn;

use crate::arch;
use crate::arch::insn;
use crate::common::CoreId;
use crate::common::Pid;
use crate::common::Tid;
use crate::target::TargetControl;
use crate::target::TargetResult;

/// The distinguished process owning every core not attributed to a user
/// workgroup.
pub const IDLE_PID: usize = 1;

/// How long to poll DEBUGSTATUS before giving up on a halt request.
const HALT_DEADLINE: Duration = Duration::from_millis(500);

/// One core, as seen by the debugger.
///
/// General registers are cached between stops: reads fill the cache lazily,
/// writes land in the cache and are flushed back just before the core
/// resumes. Debug-unit registers (DEBUGSTATUS/DEBUGCMD) always go straight
/// to the hardware.
pub struct Thread {
    tid: Tid,
    core: CoreId,
    pid: Pid,
    regs: [Option<u32>; arch::NUM_REGS],
    dirty: [bool; arch::NUM_REGS],
    /// Cached halt state, refreshed by `is_halted`.
    halted: bool,
    /// Set while the server considers this thread running (between a
    /// resume and the stop report).
    pub running: bool,
}

impl Thread {
    fn new(tid: Tid, core: CoreId, pid: Pid) -> Thread {
        Thread {
            tid,
            core,
            pid,
            regs: [None; arch::NUM_REGS],
            dirty: [false; arch::NUM_REGS],
            halted: false,
            running: false,
        }
    }

    pub fn tid(&self) -> Tid {
        self.tid
    }

    pub fn core(&self) -> CoreId {
        self.core
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Point core-local addresses at this thread's core.
    fn attach<T: TargetControl>(&self, tc: &mut T) {
        if !tc.set_attached_core(self.core) {
            warn!("core {} has no window in the memory map", self.core);
        }
    }

    /// Read one general/special register through the cache.
    pub fn read_reg<T: TargetControl>(&mut self, tc: &mut T, regnum: usize) -> TargetResult<u32> {
        if let Some(Some(val)) = self.regs.get(regnum) {
            return Ok(*val);
        }

        let addr = reg_addr(regnum)?;
        self.attach(tc);
        let val = tc.read32(addr)?;
        self.regs[regnum] = Some(val);
        Ok(val)
    }

    /// Write one register into the cache; it reaches the hardware on flush.
    pub fn write_reg(&mut self, regnum: usize) -> TargetResult<&mut u32> {
        reg_addr(regnum)?;
        self.dirty[regnum] = true;
        Ok(self.regs[regnum].get_or_insert(0))
    }

    pub fn set_reg(&mut self, regnum: usize, val: u32) -> TargetResult<()> {
        *self.write_reg(regnum)? = val;
        Ok(())
    }

    /// Fill the whole register cache with two bursts (one per window).
    pub fn fetch_all_regs<T: TargetControl>(&mut self, tc: &mut T) -> TargetResult<()> {
        self.attach(tc);

        let mut gprs = [0u8; arch::NUM_GPRS * arch::REG_BYTES];
        tc.read_burst(arch::GPR_WINDOW_BASE, &mut gprs)?;

        let mut scrs = [0u8; arch::NUM_SCRS * arch::REG_BYTES];
        tc.read_burst(arch::SCR_WINDOW_BASE, &mut scrs)?;

        for (i, chunk) in gprs.chunks_exact(arch::REG_BYTES).enumerate() {
            if !self.dirty[i] {
                self.regs[i] = Some(u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
            }
        }
        for (i, chunk) in scrs.chunks_exact(arch::REG_BYTES).enumerate() {
            let regnum = arch::NUM_GPRS + i;
            if !self.dirty[regnum] {
                self.regs[regnum] =
                    Some(u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
            }
        }

        Ok(())
    }

    /// Write every dirty register back to the hardware.
    pub fn flush_regs<T: TargetControl>(&mut self, tc: &mut T) -> TargetResult<()> {
        self.attach(tc);

        for regnum in 0..arch::NUM_REGS {
            if !self.dirty[regnum] {
                continue;
            }
            if let Some(val) = self.regs[regnum] {
                tc.write32(reg_addr(regnum)?, val)?;
            }
            self.dirty[regnum] = false;
        }

        Ok(())
    }

    /// Drop every cached value. Called whenever the core runs.
    pub fn invalidate_regs(&mut self) {
        self.regs = [None; arch::NUM_REGS];
        self.dirty = [false; arch::NUM_REGS];
    }

    pub fn read_pc<T: TargetControl>(&mut self, tc: &mut T) -> TargetResult<u32> {
        self.read_reg(tc, arch::PC_REGNUM)
    }

    pub fn write_pc(&mut self, pc: u32) -> TargetResult<()> {
        self.set_reg(arch::PC_REGNUM, pc)
    }

    /// Uncached query of the debug unit.
    pub fn is_halted<T: TargetControl>(&mut self, tc: &mut T) -> TargetResult<bool> {
        self.attach(tc);
        let status = tc.read32(reg_addr(arch::DEBUGSTATUS_REGNUM)?)?;
        self.halted = status & arch::DEBUGSTATUS_HALT != 0;
        Ok(self.halted)
    }

    pub fn last_known_halted(&self) -> bool {
        self.halted
    }

    /// Halt the core: issue the debug command, then poll the status until it
    /// takes effect or the deadline passes.
    pub fn halt<T: TargetControl>(&mut self, tc: &mut T) -> TargetResult<bool> {
        self.attach(tc);
        tc.write32(reg_addr(arch::DEBUGCMD_REGNUM)?, arch::DEBUGCMD_HALT)?;

        let deadline = Instant::now() + HALT_DEADLINE;
        loop {
            if self.is_halted(tc)? {
                trace!("thread {} halted", self.tid);
                return Ok(true);
            }
            if Instant::now() > deadline {
                warn!("thread {} did not halt before deadline", self.tid);
                return Ok(false);
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    /// Resume the core: flush dirty registers, clear the cache, and release
    /// the debug unit.
    pub fn resume<T: TargetControl>(&mut self, tc: &mut T) -> TargetResult<()> {
        self.flush_regs(tc)?;
        self.invalidate_regs();

        self.attach(tc);
        tc.write32(reg_addr(arch::DEBUGCMD_REGNUM)?, arch::DEBUGCMD_RESUME)?;
        self.halted = false;
        self.running = true;
        debug!("thread {} resumed", self.tid);
        Ok(())
    }

    /// Whether the core is parked on an `IDLE` instruction.
    pub fn is_idle<T: TargetControl>(&mut self, tc: &mut T) -> TargetResult<bool> {
        let pc = self.read_pc(tc)?;
        self.attach(tc);
        Ok(tc.read16(pc)? == insn::IDLE)
    }

    /// Read one halfword from this thread's view of the address space.
    pub fn fetch16<T: TargetControl>(&self, tc: &mut T, addr: u32) -> TargetResult<u16> {
        self.attach(tc);
        tc.read16(addr)
    }

    /// Overwrite one halfword in this thread's view of the address space
    /// (breakpoint substitution).
    pub fn patch16<T: TargetControl>(&self, tc: &mut T, addr: u32, val: u16) -> TargetResult<()> {
        self.attach(tc);
        tc.write16(addr, val)
    }
}

fn reg_addr(regnum: usize) -> TargetResult<u32> {
    arch::reg_local_addr(regnum).ok_or(crate::target::TargetError::AddressRefused(u32::MAX))
}

/// A workgroup of cores, seen by GDB as one process.
pub struct ProcessInfo {
    pid: Pid,
    threads: BTreeSet<Tid>,
}

impl ProcessInfo {
    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn threads(&self) -> impl Iterator<Item = Tid> + '_ {
        self.threads.iter().copied()
    }

    pub fn num_threads(&self) -> usize {
        self.threads.len()
    }

    pub fn contains(&self, tid: Tid) -> bool {
        self.threads.contains(&tid)
    }
}

/// The two registries, plus the core↔thread mapping.
pub struct ProcessModel {
    processes: BTreeMap<Pid, ProcessInfo>,
    threads: BTreeMap<Tid, Thread>,
    core_to_tid: BTreeMap<CoreId, Tid>,
    next_pid: usize,
    next_tid: usize,
}

impl ProcessModel {
    /// One thread per core, all owned by the idle process.
    pub fn new(cores: &[CoreId]) -> ProcessModel {
        let idle_pid = Pid::new(IDLE_PID).expect("IDLE_PID is nonzero");

        let mut model = ProcessModel {
            processes: BTreeMap::new(),
            threads: BTreeMap::new(),
            core_to_tid: BTreeMap::new(),
            next_pid: IDLE_PID + 1,
            next_tid: 2,
        };

        let mut idle_threads = BTreeSet::new();
        for &core in cores {
            let tid = model.fresh_tid();
            model.threads.insert(tid, Thread::new(tid, core, idle_pid));
            model.core_to_tid.insert(core, tid);
            idle_threads.insert(tid);
        }

        model.processes.insert(
            idle_pid,
            ProcessInfo {
                pid: idle_pid,
                threads: idle_threads,
            },
        );

        model
    }

    fn fresh_tid(&mut self) -> Tid {
        let tid = Tid::new(self.next_tid).expect("tid generator starts at 2");
        self.next_tid += 1;
        tid
    }

    pub fn idle_pid(&self) -> Pid {
        Pid::new(IDLE_PID).expect("IDLE_PID is nonzero")
    }

    pub fn process(&self, pid: Pid) -> Option<&ProcessInfo> {
        let process = self.processes.get(&pid);
        if process.is_none() {
            warn!("unable to find process {}", pid);
        }
        process
    }

    pub fn thread(&self, tid: Tid) -> Option<&Thread> {
        let thread = self.threads.get(&tid);
        if thread.is_none() {
            warn!("unable to find thread {}", tid);
        }
        thread
    }

    pub fn thread_mut(&mut self, tid: Tid) -> Option<&mut Thread> {
        let thread = self.threads.get_mut(&tid);
        if thread.is_none() {
            warn!("unable to find thread {}", tid);
        }
        thread
    }

    pub fn tid_of_core(&self, core: CoreId) -> Option<Tid> {
        self.core_to_tid.get(&core).copied()
    }

    pub fn processes(&self) -> impl Iterator<Item = &ProcessInfo> {
        self.processes.values()
    }

    pub fn threads(&self) -> impl Iterator<Item = &Thread> {
        self.threads.values()
    }

    pub fn all_tids(&self) -> Vec<Tid> {
        self.threads.keys().copied().collect()
    }

    /// Form a new process from the given threads, pulling each out of its
    /// current owner. Fails (with no change) if any thread is already owned
    /// by a non-idle process.
    pub fn create_process(&mut self, tids: &[Tid]) -> Result<Pid, String> {
        for &tid in tids {
            match self.threads.get(&tid) {
                None => return Err(format!("no thread {}", tid)),
                Some(thread) if thread.pid.get() != IDLE_PID => {
                    return Err(format!(
                        "thread {} already belongs to process {}",
                        tid, thread.pid
                    ));
                }
                Some(_) => {}
            }
        }

        let pid = Pid::new(self.next_pid).expect("pid generator starts at 2");
        self.next_pid += 1;

        let mut threads = BTreeSet::new();
        for &tid in tids {
            self.move_thread(tid, pid);
            threads.insert(tid);
        }

        self.processes.insert(pid, ProcessInfo { pid, threads });
        debug!("created process {} with {} threads", pid, tids.len());
        Ok(pid)
    }

    /// Return every thread of `pid` to the idle process and delete it.
    /// The idle process itself cannot be dissolved.
    pub fn dissolve_process(&mut self, pid: Pid) -> bool {
        if pid.get() == IDLE_PID {
            return false;
        }

        let process = match self.processes.remove(&pid) {
            Some(p) => p,
            None => return false,
        };

        let idle_pid = self.idle_pid();
        for tid in process.threads {
            self.move_thread(tid, idle_pid);
        }
        true
    }

    fn move_thread(&mut self, tid: Tid, to: Pid) {
        let from = match self.threads.get_mut(&tid) {
            Some(thread) => {
                let from = thread.pid;
                thread.pid = to;
                from
            }
            None => return,
        };

        if let Some(process) = self.processes.get_mut(&from) {
            process.threads.remove(&tid);
        }
        if let Some(process) = self.processes.get_mut(&to) {
            process.threads.insert(tid);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cores(n: u8) -> Vec<CoreId> {
        (0..n).map(|i| CoreId::new(32, 8 + i)).collect()
    }

    fn model_invariants(model: &ProcessModel) {
        // every thread in exactly one process
        let total: usize = model.processes().map(|p| p.num_threads()).sum();
        assert_eq!(total, model.threads.len());
        for thread in model.threads() {
            let owners = model
                .processes()
                .filter(|p| p.contains(thread.tid()))
                .count();
            assert_eq!(owners, 1);
            assert!(model.process(thread.pid()).unwrap().contains(thread.tid()));
        }

        // core<->tid is a bijection
        assert_eq!(model.core_to_tid.len(), model.threads.len());
        for (&core, &tid) in &model.core_to_tid {
            assert_eq!(model.thread(tid).unwrap().core(), core);
        }
    }

    #[test]
    fn startup_places_all_threads_in_idle() {
        let model = ProcessModel::new(&cores(4));
        model_invariants(&model);

        let idle = model.process(model.idle_pid()).unwrap();
        assert_eq!(idle.num_threads(), 4);

        // tids are dense from 2
        let tids = model.all_tids();
        assert_eq!(
            tids.iter().map(|t| t.get()).collect::<Vec<_>>(),
            vec![2, 3, 4, 5]
        );
    }

    #[test]
    fn create_and_dissolve_round_trips() {
        let mut model = ProcessModel::new(&cores(4));
        let tids = model.all_tids();

        let pid = model.create_process(&tids[..2]).unwrap();
        assert_eq!(pid.get(), 2);
        model_invariants(&model);
        assert_eq!(model.process(pid).unwrap().num_threads(), 2);
        assert_eq!(model.process(model.idle_pid()).unwrap().num_threads(), 2);

        // double-attach is refused
        assert!(model.create_process(&tids[1..3]).is_err());
        model_invariants(&model);

        assert!(model.dissolve_process(pid));
        model_invariants(&model);
        assert_eq!(model.process(model.idle_pid()).unwrap().num_threads(), 4);

        // pids keep counting up
        let pid = model.create_process(&tids[..1]).unwrap();
        assert_eq!(pid.get(), 3);
    }

    #[test]
    fn idle_process_cannot_be_dissolved() {
        let mut model = ProcessModel::new(&cores(2));
        assert!(!model.dissolve_process(model.idle_pid()));
        model_invariants(&model);
    }
}
