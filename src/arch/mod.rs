//! Architectural constants for the mesh cores.
//!
//! Everything GDB sees is derived from this module: the register file layout
//! (64 GPRs followed by 42 special registers, 4 bytes each, little-endian),
//! the per-core local address map, and the debug-unit register encodings.

pub mod insn;

/// Number of general purpose registers (R0..R63).
pub const NUM_GPRS: usize = 64;

/// Number of special core registers.
pub const NUM_SCRS: usize = 42;

/// Total registers as presented to GDB.
pub const NUM_REGS: usize = NUM_GPRS + NUM_SCRS;

/// Bytes per register on the wire.
pub const REG_BYTES: usize = 4;

// Specific GDB register numbers - GPRs
pub const R0_REGNUM: usize = 0;
pub const FP_REGNUM: usize = 11;
pub const SP_REGNUM: usize = 13;
pub const LR_REGNUM: usize = 14;

// Specific GDB register numbers - SCRs, indexed by their hardware offset
// within the control-register window.
pub const CONFIG_REGNUM: usize = NUM_GPRS;
pub const STATUS_REGNUM: usize = NUM_GPRS + 1;
pub const PC_REGNUM: usize = NUM_GPRS + 2;
pub const DEBUGSTATUS_REGNUM: usize = NUM_GPRS + 3;
pub const IRET_REGNUM: usize = NUM_GPRS + 7;
pub const IMASK_REGNUM: usize = NUM_GPRS + 8;
pub const ILAT_REGNUM: usize = NUM_GPRS + 9;
pub const FSTATUS_REGNUM: usize = NUM_GPRS + 13;
pub const DEBUGCMD_REGNUM: usize = NUM_GPRS + 14;
pub const RESETCORE_REGNUM: usize = NUM_GPRS + 15;
/// Mesh traffic monitor counters (in/out transaction counts).
pub const MESHCOUNT0_REGNUM: usize = NUM_GPRS + 35;
pub const MESHCOUNT1_REGNUM: usize = NUM_GPRS + 36;
pub const COREID_REGNUM: usize = NUM_GPRS + 37;

/// Core-local addresses below this bound belong to the attached core; at or
/// above it they are global mesh addresses.
pub const CORE_SPACE: u32 = 0x0010_0000;

/// Core-local base of the GPR file within the control-register window.
pub const GPR_WINDOW_BASE: u32 = 0x000f_0000;

/// Core-local base of the special registers.
pub const SCR_WINDOW_BASE: u32 = 0x000f_0400;

/// Core-local span of the whole control-register window.
pub const REG_WINDOW_BASE: u32 = 0x000f_0000;
pub const REG_WINDOW_SIZE: u32 = 0x1000;

// DEBUGSTATUS bit 0 is the halt flag; DEBUGCMD takes these commands.
pub const DEBUGSTATUS_HALT: u32 = 0x1;
pub const DEBUGCMD_HALT: u32 = 0x1;
pub const DEBUGCMD_RESUME: u32 = 0x0;

/// Core-local address of a GDB-numbered register, or `None` when the number
/// is out of range.
pub fn reg_local_addr(regnum: usize) -> Option<u32> {
    if regnum < NUM_GPRS {
        Some(GPR_WINDOW_BASE + (regnum * REG_BYTES) as u32)
    } else if regnum < NUM_REGS {
        Some(SCR_WINDOW_BASE + ((regnum - NUM_GPRS) * REG_BYTES) as u32)
    } else {
        None
    }
}

/// Target description served for `qXfer:features:read:target.xml`, enough for
/// `gdb-multiarch` to autodetect the register layout.
pub const TARGET_DESCRIPTION_XML: &str = r#"<?xml version="1.0"?>
<!DOCTYPE target SYSTEM "gdb-target.dtd">
<target version="1.0">
    <architecture>epiphany</architecture>
</target>"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reg_addrs_cover_both_windows() {
        assert_eq!(reg_local_addr(0), Some(0xf0000));
        assert_eq!(reg_local_addr(SP_REGNUM), Some(0xf0034));
        assert_eq!(reg_local_addr(PC_REGNUM), Some(0xf0408));
        assert_eq!(reg_local_addr(DEBUGCMD_REGNUM), Some(0xf0438));
        assert_eq!(reg_local_addr(NUM_REGS), None);
    }

    #[test]
    fn reg_window_contains_every_register() {
        for regnum in 0..NUM_REGS {
            let addr = reg_local_addr(regnum).unwrap();
            assert!(addr >= REG_WINDOW_BASE);
            assert!(addr < REG_WINDOW_BASE + REG_WINDOW_SIZE);
            assert!(addr < CORE_SPACE);
        }
    }
}
