//! Shared fixtures: a scripted in-memory connection and a mock mesh target.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::VecDeque;

use eserver::arch;
use eserver::common::CoreId;
use eserver::conn::Connection;
use eserver::conn::ConnectionExt;
use eserver::target::AddressMap;
use eserver::target::TargetControl;
use eserver::target::TargetError;
use eserver::target::TargetResult;

/// A connection whose inbound bytes are scripted up front and whose outbound
/// bytes are captured for inspection.
pub struct ScriptedConnection {
    input: VecDeque<u8>,
    pub output: Vec<u8>,
}

impl ScriptedConnection {
    pub fn new(input: Vec<u8>) -> ScriptedConnection {
        ScriptedConnection {
            input: input.into(),
            output: Vec::new(),
        }
    }
}

impl Connection for ScriptedConnection {
    type Error = std::io::Error;

    fn write(&mut self, byte: u8) -> Result<(), Self::Error> {
        self.output.push(byte);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl ConnectionExt for ScriptedConnection {
    fn read(&mut self) -> Result<u8, Self::Error> {
        self.input
            .pop_front()
            .ok_or_else(|| std::io::ErrorKind::UnexpectedEof.into())
    }

    fn peek(&mut self) -> Result<Option<u8>, Self::Error> {
        Ok(self.input.front().copied())
    }
}

/// Frame a packet body, appending the mod-256 checksum.
pub fn frame(body: &str) -> Vec<u8> {
    let checksum = body.bytes().fold(0u8, |a, x| a.wrapping_add(x));
    format!("${}#{:02x}", body, checksum).into_bytes()
}

/// Pull the response bodies (RLE-expanded, unescaped) out of captured
/// output, discarding acks.
pub fn responses(output: &[u8]) -> Vec<String> {
    let mut out = Vec::new();
    let mut i = 0;

    while i < output.len() {
        match output[i] {
            b'$' => {
                let end = output[i..]
                    .iter()
                    .position(|&b| b == b'#')
                    .map(|p| i + p)
                    .unwrap_or(output.len());
                out.push(expand(&output[i + 1..end]));
                i = end + 3;
            }
            _ => i += 1,
        }
    }

    out
}

/// Undo run-length encoding and `}`-escapes.
fn expand(body: &[u8]) -> String {
    let mut out: Vec<u8> = Vec::new();
    let mut iter = body.iter().copied();

    while let Some(b) = iter.next() {
        match b {
            b'*' => {
                let n = (iter.next().expect("dangling RLE count") - 29) as usize;
                let prev = *out.last().expect("RLE with no previous byte");
                out.extend(std::iter::repeat(prev).take(n));
            }
            b'}' => {
                let escaped = iter.next().expect("dangling escape") ^ 0x20;
                out.push(escaped);
            }
            _ => out.push(b),
        }
    }

    String::from_utf8_lossy(&out).into_owned()
}

/// A mesh of cores backed by a flat byte map.
///
/// The debug unit is modeled just far enough for the server: writing
/// `DEBUGCMD = 1` halts the core immediately; writing `DEBUGCMD = 0` resumes
/// it, which "executes" until the next scheduled stop (if any), teleporting
/// PC there and halting again.
pub struct MeshTarget {
    mem: HashMap<u32, u8>,
    memory_map: AddressMap,
    register_map: AddressMap,
    num_cores: usize,
    attached: CoreId,
    /// Where each core lands (in order) on each resume.
    stop_pcs: BTreeMap<u16, VecDeque<u32>>,
    /// Every `(core, value)` written to a DEBUGCMD register.
    pub debug_cmds: Vec<(u16, u32)>,
}

impl MeshTarget {
    pub fn new(rows: u8, cols: u8) -> MeshTarget {
        let mut memory_map = AddressMap::new();
        let mut register_map = AddressMap::new();
        let mut entry = 0;

        for row in 0..rows {
            for col in 0..cols {
                let base = CoreId::new(32 + row, 8 + col).global_base();
                memory_map.insert(entry, (base, base + 0x8000 - 1));
                register_map.insert(
                    entry,
                    (
                        base + arch::REG_WINDOW_BASE,
                        base + arch::REG_WINDOW_BASE + arch::REG_WINDOW_SIZE - 1,
                    ),
                );
                entry += 1;
            }
        }
        let num_cores = entry;

        memory_map.insert(entry, (0x8e00_0000, 0x8fff_ffff));

        MeshTarget {
            mem: HashMap::new(),
            memory_map,
            register_map,
            num_cores,
            attached: CoreId::new(32, 8),
            stop_pcs: BTreeMap::new(),
            debug_cmds: Vec::new(),
        }
    }

    pub fn core(row: u8, col: u8) -> CoreId {
        CoreId::new(row, col)
    }

    fn reg_global_addr(core: CoreId, regnum: usize) -> u32 {
        core.global_base() + arch::reg_local_addr(regnum).expect("valid regnum")
    }

    pub fn poke(&mut self, addr: u32, bytes: &[u8]) {
        for (i, &b) in bytes.iter().enumerate() {
            self.mem.insert(addr + i as u32, b);
        }
    }

    pub fn peek_mem(&self, addr: u32, len: usize) -> Vec<u8> {
        (0..len)
            .map(|i| *self.mem.get(&(addr + i as u32)).unwrap_or(&0))
            .collect()
    }

    pub fn set_reg(&mut self, core: CoreId, regnum: usize, val: u32) {
        let addr = Self::reg_global_addr(core, regnum);
        self.poke(addr, &val.to_le_bytes());
    }

    pub fn reg(&self, core: CoreId, regnum: usize) -> u32 {
        let addr = Self::reg_global_addr(core, regnum);
        let bytes = self.peek_mem(addr, 4);
        u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    /// Queue the PC the core will report (halted) after its next resume.
    pub fn schedule_stop(&mut self, core: CoreId, pc: u32) {
        self.stop_pcs.entry(core.raw()).or_default().push_back(pc);
    }

    pub fn is_core_halted(&self, core: CoreId) -> bool {
        self.reg(core, arch::DEBUGSTATUS_REGNUM) & arch::DEBUGSTATUS_HALT != 0
    }

    /// If `addr` is some core's DEBUGCMD register, emulate the debug unit.
    fn debug_cmd_core(&self, addr: u32) -> Option<CoreId> {
        let core = CoreId::from_raw((addr >> 20) as u16);
        (Self::reg_global_addr(core, arch::DEBUGCMD_REGNUM) == addr
            && self.register_map.values().any(|&(base, _)| {
                base == core.global_base() + arch::REG_WINDOW_BASE
            }))
        .then_some(core)
    }

    fn raw_write(&mut self, addr: u32, buf: &[u8]) {
        for (i, &b) in buf.iter().enumerate() {
            self.mem.insert(addr + i as u32, b);
        }

        if buf.len() == 4 {
            if let Some(core) = self.debug_cmd_core(addr) {
                let val = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
                self.debug_cmds.push((core.raw(), val));

                if val == arch::DEBUGCMD_HALT {
                    self.set_reg(core, arch::DEBUGSTATUS_REGNUM, arch::DEBUGSTATUS_HALT);
                } else {
                    self.set_reg(core, arch::DEBUGSTATUS_REGNUM, 0);
                    let next = self
                        .stop_pcs
                        .get_mut(&core.raw())
                        .and_then(|q| q.pop_front());
                    if let Some(pc) = next {
                        self.set_reg(core, arch::PC_REGNUM, pc);
                        self.set_reg(core, arch::DEBUGSTATUS_REGNUM, arch::DEBUGSTATUS_HALT);
                    }
                }
            }
        }
    }

    fn resolve(&self, addr: u32) -> TargetResult<u32> {
        self.convert_address(addr)
            .ok_or(TargetError::AddressRefused(addr))
    }
}

impl TargetControl for MeshTarget {
    fn read(&mut self, addr: u32, buf: &mut [u8]) -> TargetResult<()> {
        let full = self.resolve(addr)?;
        for (i, slot) in buf.iter_mut().enumerate() {
            *slot = *self.mem.get(&(full + i as u32)).unwrap_or(&0);
        }
        Ok(())
    }

    fn write(&mut self, addr: u32, buf: &[u8]) -> TargetResult<()> {
        let full = self.resolve(addr)?;
        self.raw_write(full, buf);
        Ok(())
    }

    fn read_burst(&mut self, addr: u32, buf: &mut [u8]) -> TargetResult<()> {
        self.read(addr, buf)
    }

    fn write_burst(&mut self, addr: u32, buf: &[u8]) -> TargetResult<()> {
        let full = self.resolve(addr)?;
        for (i, &b) in buf.iter().enumerate() {
            self.mem.insert(full + i as u32, b);
        }
        Ok(())
    }

    fn platform_reset(&mut self) -> TargetResult<()> {
        Ok(())
    }

    fn describe(&mut self) -> String {
        "mock mesh".to_string()
    }

    fn memory_map(&self) -> &AddressMap {
        &self.memory_map
    }

    fn register_map(&self) -> &AddressMap {
        &self.register_map
    }

    fn attached_core(&self) -> CoreId {
        self.attached
    }

    fn set_attached_core(&mut self, core: CoreId) -> bool {
        let known = self
            .memory_map
            .values()
            .take(self.num_cores)
            .any(|&(base, _)| base == core.global_base());
        if known {
            self.attached = core;
        }
        known
    }
}
