//! The matchpoint table.
//!
//! "Matchpoint" covers breakpoints and watchpoints alike. The table records,
//! per `(kind, address)`, the original halfword a `BKPT` substitution
//! displaced, so removal can restore memory bit-identically. Only software
//! breakpoints ever reach the hardware on this target; the other kinds exist
//! so the bookkeeping API covers the full `Z`/`z` packet space.

use std::collections::HashMap;

/// Matchpoint kinds, numbered as in the `Z`/`z` packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MpKind {
    SwBreak,
    HwBreak,
    WriteWatch,
    ReadWatch,
    AccessWatch,
}

impl MpKind {
    pub fn from_rsp(type_: u8) -> Option<MpKind> {
        Some(match type_ {
            0 => MpKind::SwBreak,
            1 => MpKind::HwBreak,
            2 => MpKind::WriteWatch,
            3 => MpKind::ReadWatch,
            4 => MpKind::AccessWatch,
            _ => return None,
        })
    }
}

/// Matchpoints, keyed by kind and address. At most one entry per key.
#[derive(Default)]
pub struct MpTable {
    entries: HashMap<(MpKind, u32), u16>,
}

impl MpTable {
    pub fn new() -> MpTable {
        MpTable::default()
    }

    /// Record a matchpoint, returning the previously recorded instruction
    /// if the key was already present.
    pub fn insert(&mut self, kind: MpKind, addr: u32, instr: u16) -> Option<u16> {
        self.entries.insert((kind, addr), instr)
    }

    pub fn lookup(&self, kind: MpKind, addr: u32) -> Option<u16> {
        self.entries.get(&(kind, addr)).copied()
    }

    /// Remove a matchpoint, returning the recorded instruction. Removing a
    /// missing key is a non-error.
    pub fn remove(&mut self, kind: MpKind, addr: u32) -> Option<u16> {
        self.entries.remove(&(kind, addr))
    }

    pub fn contains(&self, kind: MpKind, addr: u32) -> bool {
        self.entries.contains_key(&(kind, addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_remove_is_identity() {
        let mut table = MpTable::new();
        assert_eq!(table.insert(MpKind::SwBreak, 0x1000, 0x0422), None);
        assert_eq!(table.remove(MpKind::SwBreak, 0x1000), Some(0x0422));
        assert!(!table.contains(MpKind::SwBreak, 0x1000));
    }

    #[test]
    fn duplicate_insert_replaces() {
        let mut table = MpTable::new();
        table.insert(MpKind::SwBreak, 0x1000, 0x0422);
        assert_eq!(table.insert(MpKind::SwBreak, 0x1000, 0x01a2), Some(0x0422));
        assert_eq!(table.lookup(MpKind::SwBreak, 0x1000), Some(0x01a2));
    }

    #[test]
    fn remove_missing_is_none() {
        let mut table = MpTable::new();
        assert_eq!(table.remove(MpKind::WriteWatch, 0x2000), None);
    }

    #[test]
    fn kinds_do_not_collide() {
        let mut table = MpTable::new();
        table.insert(MpKind::SwBreak, 0x1000, 0x1111);
        table.insert(MpKind::HwBreak, 0x1000, 0x2222);
        assert_eq!(table.lookup(MpKind::SwBreak, 0x1000), Some(0x1111));
        assert_eq!(table.lookup(MpKind::HwBreak, 0x1000), Some(0x2222));
    }
}
