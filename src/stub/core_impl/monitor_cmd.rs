use super::prelude::*;
use crate::protocol::commands::ext::MonitorCmd;

use core::fmt::Write as _;

use log::info;
use log::warn;

use crate::common::CoreId;
use crate::common::Pid;
use crate::common::Tid;

const HELP_TEXT: &str = "\
mesh server monitor commands:
  help                          this text
  reset                         reset the whole platform
  halt                          halt every core of the current process
  run                           resume every halted core of the current process
  workgroup ROW COL ROWS COLS   form a process from a rectangle of cores
  process PID                   select the process for core queries
";

impl<T: TargetControl> ServerImpl<T> {
    pub(crate) fn handle_monitor_cmd<C: ConnectionExt>(
        &mut self,
        res: &mut ResponseWriter<'_, C>,
        command: MonitorCmd<'_>,
    ) -> Result<HandlerStatus, Error<C::Error>> {
        let handler_status = match command {
            MonitorCmd::qRcmd(cmd) => {
                let cmd_str = String::from_utf8_lossy(cmd.hex_cmd).into_owned();
                info!("monitor command: {:?}", cmd_str);

                let mut out = String::new();
                self.run_monitor_cmd(&cmd_str, &mut out)?;

                if !out.is_empty() {
                    // console output goes out as its own `O` packet, ahead of
                    // the OK that closes the exchange
                    let mut o = ResponseWriter::new(res.as_conn(), true);
                    o.write_str("O")?;
                    o.write_hex_buf(out.as_bytes())?;
                    o.flush()?;
                }

                HandlerStatus::NeedsOk
            }
        };

        Ok(handler_status)
    }

    fn run_monitor_cmd<E>(&mut self, cmd: &str, out: &mut String) -> Result<(), Error<E>> {
        let mut words = cmd.split_whitespace();

        match words.next() {
            Some("help") | None => {
                out.push_str(HELP_TEXT);
            }

            Some("reset") => {
                self.target
                    .platform_reset()
                    .map_err(Error::PlatformReset)?;
                out.push_str("platform reset\n");
            }

            Some("halt") => {
                let pid = self.current_pid();
                match self.halt_process(pid) {
                    Ok(()) => {
                        let _ = writeln!(out, "halted all cores of process {}", pid);
                    }
                    Err(e) => {
                        let _ = writeln!(out, "halt failed: {}", e);
                    }
                }
            }

            Some("run") => {
                let pid = self.current_pid();
                match self.resume_process(pid) {
                    Ok(()) => {
                        let _ = writeln!(out, "resumed all cores of process {}", pid);
                    }
                    Err(e) => {
                        let _ = writeln!(out, "run failed: {}", e);
                    }
                }
            }

            Some("workgroup") => {
                let args: Vec<u8> = words.filter_map(|w| w.parse().ok()).collect();
                match args.as_slice() {
                    &[row, col, rows, cols] => match self.form_workgroup(row, col, rows, cols) {
                        Ok(pid) => {
                            let _ = writeln!(out, "workgroup created: process {}", pid);
                        }
                        Err(msg) => {
                            let _ = writeln!(out, "workgroup failed: {}", msg);
                        }
                    },
                    _ => out.push_str("usage: workgroup ROW COL ROWS COLS\n"),
                }
            }

            Some("process") => match words.next().and_then(|w| w.parse::<usize>().ok()) {
                Some(raw) => {
                    let pid = Pid::new(raw).filter(|pid| self.model.process(*pid).is_some());
                    match pid {
                        Some(pid) => {
                            self.set_current_pid(pid);
                            let _ = writeln!(out, "current process: {}", pid);
                        }
                        None => {
                            let _ = writeln!(out, "no process {}", raw);
                        }
                    }
                }
                None => out.push_str("usage: process PID\n"),
            },

            Some(other) => {
                warn!("unrecognized monitor command {:?}", other);
                let _ = writeln!(out, "unrecognized command {:?}; try 'monitor help'", other);
            }
        }

        Ok(())
    }

    /// Build a process from the rectangle of cores with top-left `(row, col)`
    /// and the given extent.
    fn form_workgroup(&mut self, row: u8, col: u8, rows: u8, cols: u8) -> Result<Pid, String> {
        if rows == 0 || cols == 0 {
            return Err("workgroup must span at least one core".to_string());
        }

        let mut tids: Vec<Tid> = Vec::new();
        for r in 0..rows {
            for c in 0..cols {
                let core = CoreId::new(row + r, col + c);
                match self.model.tid_of_core(core) {
                    Some(tid) => tids.push(tid),
                    None => return Err(format!("no core at {}", core)),
                }
            }
        }

        self.model.create_process(&tids)
    }
}
