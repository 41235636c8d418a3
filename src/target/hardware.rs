//! `TargetControl` over a real hardware driver plugin.
//!
//! Single-writer discipline: every driver call happens under one
//! process-wide-equivalent mutex owned by this wrapper, and bursts hold it
//! for their whole duration. The mutex is never held across socket I/O.

use std::sync::Mutex;
use std::sync::PoisonError;

use log::debug;
use log::info;
use log::warn;

use crate::common::CoreId;
use crate::target::plugin::DriverPlugin;
use crate::target::plugin::PlatformDefinition;
use crate::target::AddressMap;
use crate::target::TargetControl;
use crate::target::TargetError;
use crate::target::TargetResult;

/// Word size of a single bus transaction.
const E_WORD_BYTES: usize = 4;

/// Alignment the driver wants for streamed writes.
const E_DOUBLE_BYTES: usize = 8;

/// Largest read the driver accepts, in words.
const MAX_NUM_READ_PACKETS: usize = 64;

/// Largest streamed write the driver accepts, in doubles.
const MAX_NUM_WRITE_PACKETS: usize = 256;

/// Fatal platform bring-up failure.
#[derive(Debug)]
pub enum PlatformError {
    Init(i32),
    Reset(i32),
}

impl core::fmt::Display for PlatformError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            PlatformError::Init(code) => {
                write!(f, "can't initialize target device: error code {}", code)
            }
            PlatformError::Reset(code) => {
                write!(f, "can't reset the hardware: error code {}", code)
            }
        }
    }
}

impl std::error::Error for PlatformError {}

pub struct HardwareTarget {
    driver: Mutex<DriverPlugin>,
    memory_map: AddressMap,
    register_map: AddressMap,
    num_cores: usize,
    attached_core: CoreId,
    dont_check_hw_addr: bool,
}

impl HardwareTarget {
    /// Bring up the platform: tell the driver about the topology, optionally
    /// pulse a hardware reset, and derive the memory/register maps.
    pub fn new(
        driver: DriverPlugin,
        platform: &mut PlatformDefinition,
        verbosity: i32,
        skip_platform_reset: bool,
        dont_check_hw_addr: bool,
    ) -> Result<HardwareTarget, PlatformError> {
        driver.set_host_verbosity(verbosity);

        let res = driver.init_platform(platform, verbosity);
        if res < 0 {
            return Err(PlatformError::Init(res));
        }

        if skip_platform_reset {
            warn!("no hardware reset sent to target");
        } else {
            let res = driver.hw_reset();
            if res != 0 {
                return Err(PlatformError::Reset(res));
            }
        }

        let (memory_map, register_map, num_cores) = build_maps(platform);
        info!(
            "platform up: {} cores, {} external banks",
            num_cores,
            memory_map.len() - num_cores
        );

        // core-local addresses resolve to the first core until a thread is
        // selected
        let first_base = memory_map.get(&0).map(|&(base, _)| base).unwrap_or(0);
        let attached_core = CoreId::from_raw((first_base >> 20) as u16);

        Ok(HardwareTarget {
            driver: Mutex::new(driver),
            memory_map,
            register_map,
            num_cores,
            attached_core,
            dont_check_hw_addr,
        })
    }

    /// CoreIds of every core window, in map order.
    pub fn core_ids(&self) -> Vec<CoreId> {
        (0..self.num_cores)
            .filter_map(|i| self.memory_map.get(&i))
            .map(|&(base, _)| CoreId::from_raw((base >> 20) as u16))
            .collect()
    }

    fn full_addr(&self, addr: u32) -> TargetResult<u32> {
        match self.convert_address(addr) {
            Some(full) => Ok(full),
            None if self.dont_check_hw_addr => Ok(addr),
            None => {
                warn!(
                    "access ignored: address {:#010x} is not in the valid range for this target",
                    addr
                );
                Err(TargetError::AddressRefused(addr))
            }
        }
    }
}

/// Derive the memory and register windows from the platform topology: one
/// local-memory window and one control-register window per core, then the
/// external banks.
fn build_maps(platform: &PlatformDefinition) -> (AddressMap, AddressMap, usize) {
    let mut memory_map = AddressMap::new();
    let mut register_map = AddressMap::new();
    let mut entry = 0;

    for chip in platform.chips() {
        for row in 0..chip.num_rows {
            for col in 0..chip.num_cols {
                let base = ((chip.yid + row) << 26) + ((chip.xid + col) << 20);

                memory_map.insert(entry, (base, base + chip.core_memory_size - 1));
                register_map.insert(
                    entry,
                    (
                        base + crate::arch::REG_WINDOW_BASE,
                        base + crate::arch::REG_WINDOW_BASE + crate::arch::REG_WINDOW_SIZE - 1,
                    ),
                );
                entry += 1;
            }
        }
    }
    let num_cores = entry;

    for bank in platform.banks() {
        memory_map.insert(entry, (bank.base, bank.base + bank.size - 1));
        entry += 1;
    }

    (memory_map, register_map, num_cores)
}

fn check(got: isize, addr: u32, wanted: usize) -> TargetResult<()> {
    if got == wanted as isize {
        Ok(())
    } else {
        Err(TargetError::Access { addr, wanted, got })
    }
}

/// Split a bulk write into the transaction sequence the bus wants: single
/// 1-byte writes up to an 8-byte boundary, the aligned middle streamed in
/// driver-sized chunks, then single 1-byte writes for the tail.
fn decompose_write(
    full_addr: u32,
    buf: &[u8],
    mut write: impl FnMut(u32, &[u8]) -> isize,
) -> TargetResult<()> {
    if buf.is_empty() {
        return Ok(());
    }

    let mut addr = full_addr;
    let mut buf = buf;

    // aligned single-word writes (register pokes) go out as-is
    if buf.len() == E_WORD_BYTES && addr as usize % E_WORD_BYTES == 0 {
        return check(write(addr, buf), addr, buf.len());
    }

    // head up to the double boundary
    if addr as usize % E_DOUBLE_BYTES != 0 {
        let head = E_DOUBLE_BYTES - addr as usize % E_DOUBLE_BYTES;
        let head = head.min(buf.len());
        for _ in 0..head {
            check(write(addr, &buf[..1]), addr, 1)?;
            addr += 1;
            buf = &buf[1..];
        }
    }

    // aligned middle in chunks
    let mut middle = buf.len() - buf.len() % E_DOUBLE_BYTES;
    while middle > 0 {
        let chunk = middle.min(MAX_NUM_WRITE_PACKETS * E_DOUBLE_BYTES);
        check(write(addr, &buf[..chunk]), addr, chunk)?;
        addr += chunk as u32;
        buf = &buf[chunk..];
        middle -= chunk;
    }

    // trail
    for i in 0..buf.len() {
        check(write(addr, &buf[i..i + 1]), addr, 1)?;
        addr += 1;
    }

    Ok(())
}

/// Split a bulk read into aligned driver-sized chunks plus a trailing
/// partial read. Unaligned bases degrade to byte reads.
fn decompose_read(
    full_addr: u32,
    buf: &mut [u8],
    mut read: impl FnMut(u32, &mut [u8]) -> isize,
) -> TargetResult<()> {
    if buf.is_empty() {
        return Ok(());
    }

    if full_addr as usize % E_WORD_BYTES != 0 {
        for (i, byte) in buf.iter_mut().enumerate() {
            let addr = full_addr + i as u32;
            check(read(addr, core::slice::from_mut(byte)), addr, 1)?;
        }
        return Ok(());
    }

    let mut addr = full_addr;
    let mut buf = &mut buf[..];
    const CHUNK: usize = MAX_NUM_READ_PACKETS * E_WORD_BYTES;

    while buf.len() >= CHUNK {
        let (head, rest) = buf.split_at_mut(CHUNK);
        check(read(addr, head), addr, CHUNK)?;
        addr += CHUNK as u32;
        buf = rest;
    }

    if !buf.is_empty() {
        let len = buf.len();
        check(read(addr, buf), addr, len)?;
    }

    Ok(())
}

impl TargetControl for HardwareTarget {
    fn read(&mut self, addr: u32, buf: &mut [u8]) -> TargetResult<()> {
        debug_assert!(matches!(buf.len(), 1 | 2 | 4));

        let full = self.full_addr(addr)?;
        buf.fill(0);

        let driver = self.driver.lock().unwrap_or_else(PoisonError::into_inner);
        let got = driver.read_from(full, buf);
        drop(driver);

        debug!("target read ({}) {:#010x} -> {:02x?}", buf.len(), full, buf);
        check(got, full, buf.len())
    }

    fn write(&mut self, addr: u32, buf: &[u8]) -> TargetResult<()> {
        debug_assert!(matches!(buf.len(), 1 | 2 | 4));

        let full = self.full_addr(addr)?;

        let driver = self.driver.lock().unwrap_or_else(PoisonError::into_inner);
        let got = driver.write_to(full, buf);
        drop(driver);

        debug!("target write ({}) {:#010x} <- {:02x?}", buf.len(), full, buf);
        check(got, full, buf.len())
    }

    fn read_burst(&mut self, addr: u32, buf: &mut [u8]) -> TargetResult<()> {
        let full = self.full_addr(addr)?;
        buf.fill(0);

        let driver = self.driver.lock().unwrap_or_else(PoisonError::into_inner);
        decompose_read(full, buf, |addr, chunk| driver.read_from(addr, chunk))
    }

    fn write_burst(&mut self, addr: u32, buf: &[u8]) -> TargetResult<()> {
        let full = self.full_addr(addr)?;

        let driver = self.driver.lock().unwrap_or_else(PoisonError::into_inner);
        decompose_write(full, buf, |addr, chunk| driver.write_to(addr, chunk))
    }

    fn platform_reset(&mut self) -> TargetResult<()> {
        let driver = self.driver.lock().unwrap_or_else(PoisonError::into_inner);
        let res = driver.hw_reset();
        if res != 0 {
            return Err(TargetError::Reset(res));
        }
        Ok(())
    }

    fn describe(&mut self) -> String {
        let driver = self.driver.lock().unwrap_or_else(PoisonError::into_inner);
        driver.description()
    }

    fn memory_map(&self) -> &AddressMap {
        &self.memory_map
    }

    fn register_map(&self) -> &AddressMap {
        &self.register_map
    }

    fn attached_core(&self) -> CoreId {
        self.attached_core
    }

    fn set_attached_core(&mut self, core: CoreId) -> bool {
        let base = core.global_base();
        let known = self
            .memory_map
            .values()
            .take(self.num_cores)
            .any(|&(start, _)| start == base);

        if known {
            self.attached_core = core;
        }
        known
    }
}

impl Drop for HardwareTarget {
    fn drop(&mut self) {
        let driver = self.driver.lock().unwrap_or_else(PoisonError::into_inner);
        let res = driver.close_platform();
        if res != 0 {
            warn!("driver close_platform returned {}", res);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Record each (addr, len) transaction a decomposition emits.
    fn record_writes(addr: u32, len: usize) -> Vec<(u32, usize)> {
        let buf = vec![0xaa; len];
        let mut calls = Vec::new();
        decompose_write(addr, &buf, |addr, chunk| {
            calls.push((addr, chunk.len()));
            chunk.len() as isize
        })
        .unwrap();
        calls
    }

    #[test]
    fn write_burst_decomposition_invariants() {
        for addr in [0x1000u32, 0x1001, 0x1003, 0x1007, 0x8e00_0005] {
            for len in [0usize, 1, 3, 7, 8, 9, 64, 2048, 2048 * 3 + 13] {
                let calls = record_writes(addr, len);

                let mut expect_addr = addr;
                let mut total = 0;
                let mut head_bytes = 0;
                let mut in_head = true;

                for &(call_addr, call_len) in &calls {
                    // monotonically increasing, gap-free
                    assert_eq!(call_addr, expect_addr);
                    expect_addr += call_len as u32;
                    total += call_len;

                    if call_len == 1 && in_head && total <= 7 && call_addr as usize % 8 != 0 {
                        head_bytes += 1;
                    } else if call_len > 1 {
                        in_head = false;
                        if !(len == 4 && addr % 4 == 0) {
                            // aligned middle chunk
                            assert_eq!(call_addr as usize % 8, 0, "unaligned chunk");
                            assert_eq!(call_len % 8, 0, "ragged chunk");
                            assert!(call_len <= MAX_NUM_WRITE_PACKETS * 8);
                        }
                    }
                }

                assert_eq!(total, len, "byte count at addr {:#x} len {}", addr, len);
                assert!(head_bytes <= 7);

                // tail run of 1-byte writes is at most 7 long
                let tail = calls
                    .iter()
                    .rev()
                    .take_while(|&&(_, l)| l == 1)
                    .count();
                if calls.iter().any(|&(_, l)| l > 1) {
                    assert!(tail <= 7);
                }
            }
        }
    }

    #[test]
    fn aligned_word_write_is_single_transaction() {
        assert_eq!(record_writes(0xf0408, 4), vec![(0xf0408, 4)]);
    }

    #[test]
    fn read_decomposition_chunks_and_trails() {
        let mut buf = vec![0u8; MAX_NUM_READ_PACKETS * 4 * 2 + 5];
        let mut calls = Vec::new();
        decompose_read(0x2000, &mut buf, |addr, chunk| {
            calls.push((addr, chunk.len()));
            chunk.len() as isize
        })
        .unwrap();

        assert_eq!(
            calls,
            vec![
                (0x2000, MAX_NUM_READ_PACKETS * 4),
                (0x2000 + MAX_NUM_READ_PACKETS as u32 * 4, MAX_NUM_READ_PACKETS * 4),
                (0x2000 + MAX_NUM_READ_PACKETS as u32 * 8, 5),
            ]
        );
    }

    #[test]
    fn unaligned_read_degrades_to_bytes() {
        let mut buf = [0u8; 3];
        let mut calls = Vec::new();
        decompose_read(0x2001, &mut buf, |addr, chunk| {
            calls.push((addr, chunk.len()));
            chunk.len() as isize
        })
        .unwrap();
        assert_eq!(calls, vec![(0x2001, 1), (0x2002, 1), (0x2003, 1)]);
    }

    #[test]
    fn short_write_aborts_with_access_error() {
        let buf = [0u8; 16];
        let res = decompose_write(0x1000, &buf, |_, chunk| chunk.len() as isize - 1);
        assert!(matches!(res, Err(TargetError::Access { .. })));
    }
}
