use std::net::TcpListener;
use std::net::TcpStream;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use log::error;
use log::info;

use eserver::stub::DebugMode;
use eserver::stub::DisconnectReason;
use eserver::stub::GdbServer;
use eserver::stub::ServerSettings;
use eserver::target::hardware::HardwareTarget;
use eserver::target::hardware::PlatformError;
use eserver::target::plugin::ChipDefinition;
use eserver::target::plugin::DriverPlugin;
use eserver::target::plugin::MemBankDefinition;
use eserver::target::plugin::PlatformDefinition;
use eserver::target::TargetControl;
use eserver::target::TargetError;

/// GDB RSP debug server for mesh manycore targets.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Hardware driver shared object (the `esrv_*` plugin).
    driver: PathBuf,

    /// TCP port to listen on for the GDB client.
    #[arg(long, default_value_t = 51000)]
    port: u16,

    /// Advertise the multiprocess extensions to the client.
    #[arg(long)]
    multi_process: bool,

    /// Run the session in non-stop mode.
    #[arg(long)]
    non_stop: bool,

    /// Pass addresses to the driver even when they fall outside every
    /// known window.
    #[arg(long)]
    dont_check_hw_address: bool,

    /// Skip the hardware reset during platform bring-up.
    #[arg(long)]
    skip_platform_reset: bool,

    /// Driver/server verbosity (0 = quiet, 2+ = packet traces).
    #[arg(long, default_value_t = 0)]
    debug_level: i32,

    /// Dump the derived memory and register maps after bring-up.
    #[arg(long)]
    show_memory_map: bool,

    /// Mesh rows per chip.
    #[arg(long, default_value_t = 4)]
    rows: u32,

    /// Mesh columns per chip.
    #[arg(long, default_value_t = 4)]
    cols: u32,

    /// Row id of the first (topmost) core.
    #[arg(long, default_value_t = 32)]
    first_row: u32,

    /// Column id of the first (leftmost) core.
    #[arg(long, default_value_t = 8)]
    first_col: u32,

    /// Bytes of local memory per core.
    #[arg(long, default_value_t = 0x8000, value_parser = parse_num)]
    core_memory: u32,

    /// Base address of the external memory bank.
    #[arg(long, default_value_t = 0x8e00_0000, value_parser = parse_num)]
    ext_mem_base: u32,

    /// Size of the external memory bank.
    #[arg(long, default_value_t = 0x0200_0000, value_parser = parse_num)]
    ext_mem_size: u32,
}

fn parse_num(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("{}", e))
}

fn main() -> ExitCode {
    let args = Args::parse();

    init_logging(&args);
    install_break_handler();

    match serve(&args) {
        Ok(reason) => {
            info!("session ended: {:?}", reason);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{:#}", e);
            if is_platform_error(&e) {
                ExitCode::from(2)
            } else {
                ExitCode::from(1)
            }
        }
    }
}

fn serve(args: &Args) -> anyhow::Result<DisconnectReason> {
    let mut chips = [ChipDefinition {
        num_rows: args.rows,
        num_cols: args.cols,
        core_memory_size: args.core_memory,
        xid: args.first_col,
        yid: args.first_row,
    }];
    let mut banks = [MemBankDefinition {
        base: args.ext_mem_base,
        size: args.ext_mem_size,
    }];
    let mut platform = PlatformDefinition {
        num_chips: chips.len() as u32,
        chips: chips.as_mut_ptr(),
        num_banks: banks.len() as u32,
        ext_mem: banks.as_mut_ptr(),
    };

    let driver = DriverPlugin::open(&args.driver)
        .with_context(|| format!("can't load driver {}", args.driver.display()))?;

    let mut target = HardwareTarget::new(
        driver,
        &mut platform,
        args.debug_level,
        args.skip_platform_reset,
        args.dont_check_hw_address,
    )
    .context("platform bring-up failed")?;

    info!("target: {}", target.describe());
    if args.show_memory_map {
        dump_maps(&target);
    }

    let stream = wait_for_gdb(args.port).context("can't accept a GDB connection")?;

    let settings = ServerSettings {
        debug_mode: if args.non_stop {
            DebugMode::NonStop
        } else {
            DebugMode::AllStop
        },
        multiprocess: args.multi_process,
    };

    let mut server = GdbServer::new(target, stream, settings);
    match server.run() {
        Ok(reason) => Ok(reason),
        Err(eserver::stub::Error::PlatformReset(e)) => Err(anyhow::Error::new(e)),
        Err(eserver::stub::Error::Connection(e)) => {
            Err(anyhow::Error::new(e).context("connection lost"))
        }
    }
}

fn wait_for_gdb(port: u16) -> anyhow::Result<TcpStream> {
    let sockaddr = format!("0.0.0.0:{}", port);
    let sock = TcpListener::bind(&sockaddr)?;
    info!("waiting for a GDB connection on {}...", sockaddr);

    let (stream, addr) = sock.accept()?;
    info!("debugger connected from {}", addr);

    Ok(stream)
}

fn dump_maps(target: &HardwareTarget) {
    for (index, (base, end)) in target.memory_map() {
        info!("memory   {:3}: {:#010x} - {:#010x}", index, base, end);
    }
    for (index, (base, end)) in target.register_map() {
        info!("register {:3}: {:#010x} - {:#010x}", index, base, end);
    }
}

fn init_logging(args: &Args) {
    let mut builder = pretty_env_logger::formatted_builder();
    match std::env::var("RUST_LOG") {
        Ok(filters) => {
            builder.parse_filters(&filters);
        }
        Err(_) => {
            let level = match args.debug_level {
                i32::MIN..=0 => log::LevelFilter::Info,
                1 => log::LevelFilter::Debug,
                _ => log::LevelFilter::Trace,
            };
            builder.filter_level(level);
        }
    }
    builder.init();
}

/// SIGINT on the controlling terminal tears the whole server down; the
/// in-band RSP break (0x03) is unrelated and handled in the packet loop.
fn install_break_handler() {
    extern "C" fn on_sigint(_sig: libc::c_int) {
        // best-effort flush, then leave
        unsafe {
            let msg = b"terminated by SIGINT\n";
            libc::write(libc::STDERR_FILENO, msg.as_ptr().cast(), msg.len());
            libc::_exit(0);
        }
    }

    unsafe {
        libc::signal(libc::SIGINT, on_sigint as libc::sighandler_t);
    }
}

fn is_platform_error(e: &anyhow::Error) -> bool {
    e.downcast_ref::<PlatformError>().is_some()
        || matches!(e.downcast_ref::<TargetError>(), Some(TargetError::Reset(_)))
}
