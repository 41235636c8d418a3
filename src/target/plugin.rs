//! Runtime loading of the hardware driver.
//!
//! The driver is a shared object with a fixed C ABI (the `esrv_*` entry
//! points below). The symbol names and signatures are a compatibility
//! contract: existing vendor drivers must keep loading unmodified.

use std::ffi::c_void;
use std::ffi::CStr;
use std::ffi::CString;
use std::os::raw::c_char;
use std::os::raw::c_int;
use std::path::Path;

use log::debug;

/// Per-chip geometry, as filled in by the platform description.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ChipDefinition {
    pub num_rows: u32,
    pub num_cols: u32,
    pub core_memory_size: u32,
    /// Column id of the chip's first (leftmost) core.
    pub xid: u32,
    /// Row id of the chip's first (topmost) core.
    pub yid: u32,
}

/// One external memory bank.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct MemBankDefinition {
    pub base: u32,
    pub size: u32,
}

/// The platform description handed to `esrv_init_platform`.
#[repr(C)]
pub struct PlatformDefinition {
    pub num_chips: u32,
    pub chips: *mut ChipDefinition,
    pub num_banks: u32,
    pub ext_mem: *mut MemBankDefinition,
}

impl PlatformDefinition {
    pub fn chips(&self) -> &[ChipDefinition] {
        // chips/num_chips are populated together by the caller
        unsafe { std::slice::from_raw_parts(self.chips, self.num_chips as usize) }
    }

    pub fn banks(&self) -> &[MemBankDefinition] {
        unsafe { std::slice::from_raw_parts(self.ext_mem, self.num_banks as usize) }
    }
}

type InitPlatformFn = unsafe extern "C" fn(*mut PlatformDefinition, c_int) -> c_int;
type ClosePlatformFn = unsafe extern "C" fn() -> c_int;
type WriteToFn = unsafe extern "C" fn(u32, *mut c_void, usize) -> isize;
type ReadFromFn = unsafe extern "C" fn(u32, *mut c_void, usize) -> isize;
type GetDescriptionFn = unsafe extern "C" fn(*mut *mut c_char);
type HwResetFn = unsafe extern "C" fn() -> c_int;
type SetHostVerbosityFn = unsafe extern "C" fn(c_int);

/// Failure to load the driver. Always fatal: the server cannot run without a
/// complete driver ABI.
#[derive(Debug)]
pub enum PluginError {
    Open { path: String, detail: String },
    Symbol { name: &'static str, detail: String },
}

impl core::fmt::Display for PluginError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            PluginError::Open { path, detail } => {
                write!(f, "can't open hardware driver {}: {}", path, detail)
            }
            PluginError::Symbol { name, detail } => {
                write!(f, "driver is missing shared function {}: {}", name, detail)
            }
        }
    }
}

impl std::error::Error for PluginError {}

/// A loaded hardware driver: a `dlopen` handle plus the resolved `esrv_*`
/// entry points.
pub struct DriverPlugin {
    handle: *mut c_void,
    init_platform: InitPlatformFn,
    close_platform: ClosePlatformFn,
    write_to: WriteToFn,
    read_from: ReadFromFn,
    get_description: GetDescriptionFn,
    hw_reset: HwResetFn,
    e_set_host_verbosity: SetHostVerbosityFn,
}

// raw fn pointers + an opaque handle; the access mutex in the hardware layer
// serializes all use
unsafe impl Send for DriverPlugin {}

fn dlerror_string() -> String {
    let err = unsafe { libc::dlerror() };
    if err.is_null() {
        "unknown dlopen error".to_string()
    } else {
        unsafe { CStr::from_ptr(err) }.to_string_lossy().into_owned()
    }
}

/// Find a function in the shared library, by exact (unmangled) name.
fn find_shared_func(
    handle: *mut c_void,
    name: &'static str,
) -> Result<*mut c_void, PluginError> {
    let c_name = CString::new(name).map_err(|_| PluginError::Symbol {
        name,
        detail: "symbol name contains NUL".to_string(),
    })?;

    unsafe { libc::dlerror() }; // clear any old error

    let func = unsafe { libc::dlsym(handle, c_name.as_ptr()) };
    let err = unsafe { libc::dlerror() };
    if !err.is_null() {
        return Err(PluginError::Symbol {
            name,
            detail: unsafe { CStr::from_ptr(err) }.to_string_lossy().into_owned(),
        });
    }

    Ok(func)
}

macro_rules! resolve {
    ($handle:expr, $name:literal) => {
        unsafe { core::mem::transmute(find_shared_func($handle, $name)?) }
    };
}

impl DriverPlugin {
    /// `dlopen` the driver and resolve every entry point of the ABI.
    pub fn open(path: &Path) -> Result<DriverPlugin, PluginError> {
        let c_path =
            CString::new(path.to_string_lossy().as_bytes()).map_err(|_| PluginError::Open {
                path: path.display().to_string(),
                detail: "path contains NUL".to_string(),
            })?;

        let handle = unsafe { libc::dlopen(c_path.as_ptr(), libc::RTLD_LAZY) };
        if handle.is_null() {
            return Err(PluginError::Open {
                path: path.display().to_string(),
                detail: dlerror_string(),
            });
        }

        debug!("loaded hardware driver {}", path.display());

        Ok(DriverPlugin {
            init_platform: resolve!(handle, "esrv_init_platform"),
            close_platform: resolve!(handle, "esrv_close_platform"),
            write_to: resolve!(handle, "esrv_write_to"),
            read_from: resolve!(handle, "esrv_read_from"),
            get_description: resolve!(handle, "esrv_get_description"),
            hw_reset: resolve!(handle, "esrv_hw_reset"),
            e_set_host_verbosity: resolve!(handle, "e_set_host_verbosity"),
            handle,
        })
    }

    pub fn init_platform(&self, platform: &mut PlatformDefinition, verbosity: i32) -> i32 {
        unsafe { (self.init_platform)(platform, verbosity) }
    }

    pub fn close_platform(&self) -> i32 {
        unsafe { (self.close_platform)() }
    }

    /// Returns the number of bytes the driver claims to have written.
    pub fn write_to(&self, addr: u32, buf: &[u8]) -> isize {
        unsafe { (self.write_to)(addr, buf.as_ptr() as *mut c_void, buf.len()) }
    }

    /// Returns the number of bytes the driver claims to have read.
    pub fn read_from(&self, addr: u32, buf: &mut [u8]) -> isize {
        unsafe { (self.read_from)(addr, buf.as_mut_ptr() as *mut c_void, buf.len()) }
    }

    pub fn description(&self) -> String {
        let mut raw: *mut c_char = std::ptr::null_mut();
        unsafe { (self.get_description)(&mut raw) };
        if raw.is_null() {
            return "unknown target".to_string();
        }
        unsafe { CStr::from_ptr(raw) }.to_string_lossy().into_owned()
    }

    pub fn hw_reset(&self) -> i32 {
        unsafe { (self.hw_reset)() }
    }

    pub fn set_host_verbosity(&self, level: i32) {
        unsafe { (self.e_set_host_verbosity)(level) }
    }
}

impl Drop for DriverPlugin {
    fn drop(&mut self) {
        unsafe { libc::dlclose(self.handle) };
    }
}
