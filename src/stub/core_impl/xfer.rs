use super::prelude::*;
use crate::protocol::commands::ext::Xfer;

use core::fmt::Write as _;

use log::warn;

use crate::arch;
use crate::common::Tid;
use crate::stub::osdata::xml_column;
use crate::stub::osdata::xml_header;

impl<T: TargetControl> ServerImpl<T> {
    pub(crate) fn handle_xfer<C: ConnectionExt>(
        &mut self,
        res: &mut ResponseWriter<'_, C>,
        command: Xfer<'_>,
    ) -> Result<HandlerStatus, Error<C::Error>> {
        let handler_status = match command {
            Xfer::qXferFeaturesRead(cmd) => {
                if cmd.annex != b"target.xml" {
                    warn!(
                        "unknown features annex {:?}",
                        core::str::from_utf8(cmd.annex)
                    );
                    res.write_str("E00")?;
                    return Ok(HandlerStatus::Handled);
                }
                write_xfer_chunk(
                    res,
                    arch::TARGET_DESCRIPTION_XML.as_bytes(),
                    cmd.offset,
                    cmd.length,
                )?;
                HandlerStatus::Handled
            }

            Xfer::qXferOsdataRead(cmd) => {
                match self.osdata_payload(cmd.annex, cmd.offset) {
                    Some(payload) => {
                        write_xfer_chunk(res, payload.as_bytes(), cmd.offset, cmd.length)?
                    }
                    None => {
                        warn!(
                            "unknown osdata annex {:?}",
                            core::str::from_utf8(cmd.annex)
                        );
                        res.write_str("E00")?;
                    }
                }
                HandlerStatus::Handled
            }
        };

        Ok(handler_status)
    }

    /// Fetch (composing and caching if needed) the payload for an osdata
    /// annex. A read starting back at offset 0 recomposes from live state.
    fn osdata_payload(&mut self, annex: &[u8], offset: u64) -> Option<String> {
        match annex {
            b"" => {
                if offset == 0 || self.osdata.directory.is_none() {
                    self.osdata.directory = Some(compose_directory());
                }
                self.osdata.directory.clone()
            }
            b"processes" => {
                if offset == 0 || self.osdata.processes.is_none() {
                    let payload = self.compose_processes();
                    self.osdata.processes = Some(payload);
                }
                self.osdata.processes.clone()
            }
            b"load" => {
                if offset == 0 || self.osdata.load.is_none() {
                    let payload = self.compose_load();
                    self.osdata.load = Some(payload);
                }
                self.osdata.load.clone()
            }
            b"traffic" => {
                if offset == 0 || self.osdata.traffic.is_none() {
                    let payload = self.compose_traffic();
                    self.osdata.traffic = Some(payload);
                }
                self.osdata.traffic.clone()
            }
            _ => None,
        }
    }

    fn compose_processes(&mut self) -> String {
        let mut xml = xml_header("processes");

        for process in self.model.processes() {
            let command = if process.pid() == self.model.idle_pid() {
                "idle"
            } else {
                "workgroup"
            };

            let mut cores = String::new();
            for tid in process.threads() {
                if let Some(thread) = self.model.thread(tid) {
                    if !cores.is_empty() {
                        cores.push(' ');
                    }
                    let _ = write!(cores, "{}", thread.core());
                }
            }

            xml.push_str("<item>\n");
            xml.push_str(&xml_column("pid", &process.pid().to_string()));
            xml.push_str(&xml_column("command", command));
            xml.push_str(&xml_column("cores", &cores));
            xml.push_str("</item>\n");
        }

        xml.push_str("</osdata>\n");
        xml
    }

    fn compose_load(&mut self) -> String {
        let mut xml = xml_header("load");

        let tids: Vec<Tid> = self.model.all_tids();
        for tid in tids {
            let (core, load) = {
                let thread = match self.model.thread_mut(tid) {
                    Some(t) => t,
                    None => continue,
                };
                let core = thread.core();
                // a halted or parked core contributes no load
                let load = match thread.is_halted(&mut self.target) {
                    Ok(true) => "0.00",
                    Ok(false) => match thread.is_idle(&mut self.target) {
                        Ok(true) => "0.00",
                        _ => "100.00",
                    },
                    Err(_) => "?",
                };
                (core, load)
            };

            xml.push_str("<item>\n");
            xml.push_str(&xml_column("coreid", &format!("{:#05x}", core.raw())));
            xml.push_str(&xml_column("load", load));
            xml.push_str("</item>\n");
        }

        xml.push_str("</osdata>\n");
        xml
    }

    fn compose_traffic(&mut self) -> String {
        let mut xml = xml_header("traffic");

        let tids: Vec<Tid> = self.model.all_tids();
        for tid in tids {
            let (core, count_in, count_out) = {
                let thread = match self.model.thread_mut(tid) {
                    Some(t) => t,
                    None => continue,
                };
                let core = thread.core();
                let count_in = thread
                    .read_reg(&mut self.target, arch::MESHCOUNT0_REGNUM)
                    .unwrap_or(0);
                let count_out = thread
                    .read_reg(&mut self.target, arch::MESHCOUNT1_REGNUM)
                    .unwrap_or(0);
                (core, count_in, count_out)
            };

            xml.push_str("<item>\n");
            xml.push_str(&xml_column("coreid", &format!("{:#05x}", core.raw())));
            xml.push_str(&xml_column("in", &count_in.to_string()));
            xml.push_str(&xml_column("out", &count_out.to_string()));
            xml.push_str("</item>\n");
        }

        xml.push_str("</osdata>\n");
        xml
    }
}

fn compose_directory() -> String {
    let mut xml = xml_header("types");
    for (annex, description, title) in [
        ("processes", "Listing of all processes", "Processes"),
        ("load", "Processor load", "Load"),
        ("traffic", "Mesh traffic", "Traffic"),
    ] {
        xml.push_str("<item>\n");
        xml.push_str(&xml_column("Type", annex));
        xml.push_str(&xml_column("Description", description));
        xml.push_str(&xml_column("Title", title));
        xml.push_str("</item>\n");
    }
    xml.push_str("</osdata>\n");
    xml
}

/// Slice a composed payload per the `(offset, length)` window: `m` while
/// more remains, `l` on the final piece.
fn write_xfer_chunk<C: ConnectionExt>(
    res: &mut ResponseWriter<'_, C>,
    payload: &[u8],
    offset: u64,
    length: usize,
) -> Result<(), C::Error> {
    let offset = offset as usize;
    if offset >= payload.len() {
        return res.write_str("l");
    }

    let end = offset.saturating_add(length).min(payload.len());
    res.write_str(if end < payload.len() { "m" } else { "l" })?;
    res.write_binary(&payload[offset..end])
}
