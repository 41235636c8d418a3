use std::collections::BTreeSet;

use bitflags::bitflags;
use log::trace;

use crate::common::Pid;
use crate::common::Signal;
use crate::common::Tid;
use crate::conn::ConnectionExt;
use crate::protocol::commands::Command;
use crate::protocol::common::thread_id::IdKind;
use crate::protocol::common::thread_id::SpecificIdKind;
use crate::protocol::common::thread_id::SpecificThreadId;
use crate::protocol::ResponseWriter;
use crate::stub::error::Error;
use crate::stub::matchpoint::MpTable;
use crate::stub::osdata::OsDataCache;
use crate::stub::process::ProcessModel;
use crate::stub::DebugMode;
use crate::stub::DisconnectReason;
use crate::stub::ServerSettings;
use crate::target::TargetControl;

/// Common imports used by >50% of all handlers.
///
/// Do not clutter this prelude with types only used by a few handlers.
mod prelude {
    pub(super) use crate::conn::ConnectionExt;
    pub(super) use crate::protocol::ResponseWriter;
    pub(super) use crate::stub::core_impl::HandlerStatus;
    pub(super) use crate::stub::core_impl::ServerImpl;
    pub(super) use crate::stub::error::Error;
    pub(super) use crate::target::TargetControl;
}

mod base;
mod breakpoints;
mod host_io;
mod monitor_cmd;
mod resume;
mod xfer;

bitflags! {
    /// Protocol features negotiated via `qSupported`.
    #[derive(Debug, Clone, Copy)]
    pub(crate) struct ProtocolFeatures: u8 {
        const MULTIPROCESS = 1 << 0;
    }
}

pub(crate) enum HandlerStatus {
    Handled,
    NeedsOk,
    /// Some packets (`R`, `k`) must not be answered at all.
    NoResponse,
    Disconnect(DisconnectReason),
}

/// A recoverable, per-exchange failure, reported as `E xx` and forgotten.
pub(crate) enum CmdError {
    /// Bare protocol-level code (unknown register, missing thread, ...).
    Code(u8),
    /// A target access failed underneath the command.
    Target(crate::target::TargetError),
}

impl CmdError {
    pub(crate) const UNKNOWN_REGISTER: CmdError = CmdError::Code(0x01);
    pub(crate) const THREAD_NOT_FOUND: CmdError = CmdError::Code(0x04);

    pub(crate) fn code(&self) -> u8 {
        match self {
            CmdError::Code(code) => *code,
            CmdError::Target(e) => e.code(),
        }
    }
}

impl From<crate::target::TargetError> for CmdError {
    fn from(e: crate::target::TargetError) -> CmdError {
        CmdError::Target(e)
    }
}

pub(crate) struct ServerImpl<T: TargetControl> {
    pub(crate) target: T,
    pub(crate) model: ProcessModel,
    pub(crate) mp_table: MpTable,
    pub(crate) osdata: OsDataCache,

    debug_mode: DebugMode,
    multiprocess_allowed: bool,
    features: ProtocolFeatures,

    /// Process targeted by process-scoped queries.
    current_pid: Pid,
    /// The `Hg` selector.
    current_gtid: IdKind,
    /// The `Hc` selector.
    current_ctid: IdKind,

    /// True between a continue/step command and the stop it produces.
    is_target_running: bool,
    /// Stops observed but not yet reported to the client.
    pending_stops: BTreeSet<Tid>,
    /// The stop most recently reported (replayed by `?`).
    last_stop: Option<(Tid, Signal)>,
}

impl<T: TargetControl> ServerImpl<T> {
    pub(crate) fn new(target: T, settings: &ServerSettings) -> ServerImpl<T> {
        // the register map has exactly one window per core
        let cores: Vec<_> = target
            .register_map()
            .values()
            .map(|&(base, _)| crate::common::CoreId::from_raw((base >> 20) as u16))
            .collect();

        let model = ProcessModel::new(&cores);
        let current_pid = model.idle_pid();

        ServerImpl {
            target,
            model,
            mp_table: MpTable::new(),
            osdata: OsDataCache::new(),
            debug_mode: settings.debug_mode,
            multiprocess_allowed: settings.multiprocess,
            features: ProtocolFeatures::empty(),
            current_pid,
            current_gtid: IdKind::Any,
            current_ctid: IdKind::All,
            is_target_running: false,
            pending_stops: BTreeSet::new(),
            last_stop: None,
        }
    }

    pub(crate) fn handle_command<C: ConnectionExt>(
        &mut self,
        conn: &mut C,
        cmd: Command<'_>,
    ) -> Result<HandlerStatus, Error<C::Error>> {
        let mut res = ResponseWriter::new(conn, true);

        let status = match cmd {
            Command::Base(cmd) => self.handle_base(&mut res, cmd),
            Command::Resume(cmd) => self.handle_resume(&mut res, cmd),
            Command::Breakpoints(cmd) => self.handle_breakpoints(&mut res, cmd),
            Command::MonitorCmd(cmd) => self.handle_monitor_cmd(&mut res, cmd),
            Command::Xfer(cmd) => self.handle_xfer(&mut res, cmd),
            Command::HostIo(cmd) => self.handle_host_io(&mut res, cmd),
            Command::Unknown(cmd) => {
                // cleanly reply with an empty packet
                trace!("unknown command: {:?}", core::str::from_utf8(cmd));
                Ok(HandlerStatus::Handled)
            }
        }?;

        match status {
            HandlerStatus::NeedsOk => {
                res.write_str("OK")?;
                res.flush()?;
            }
            HandlerStatus::Handled | HandlerStatus::Disconnect(DisconnectReason::Disconnect) => {
                res.flush()?;
            }
            HandlerStatus::NoResponse | HandlerStatus::Disconnect(DisconnectReason::Kill) => {}
        }

        Ok(status)
    }

    /// In-band break received while no resume command was in flight.
    pub(crate) fn handle_interrupt<C: ConnectionExt>(
        &mut self,
        conn: &mut C,
    ) -> Result<(), Error<C::Error>> {
        let mut res = ResponseWriter::new(conn, true);
        self.suspend_current_process(&mut res)
            .map_err(Error::Connection)?;
        res.flush().map_err(Error::Connection)
    }

    pub(crate) fn debug_mode(&self) -> DebugMode {
        self.debug_mode
    }

    pub(crate) fn current_pid(&self) -> Pid {
        self.current_pid
    }

    pub(crate) fn set_current_pid(&mut self, pid: Pid) {
        self.current_pid = pid;
    }

    fn multiprocess(&self) -> bool {
        self.features.contains(ProtocolFeatures::MULTIPROCESS)
    }

    /// Resolve a client-side selector against the current process: `Any`
    /// and `All` pick its first thread.
    fn resolve_tid(&self, kind: IdKind) -> Option<Tid> {
        match kind {
            IdKind::WithId(tid) => {
                self.model.thread(tid)?;
                Some(tid)
            }
            IdKind::Any | IdKind::All => self
                .model
                .process(self.current_pid)
                .and_then(|p| p.threads().next()),
        }
    }

    fn current_gtid_resolved(&self) -> Option<Tid> {
        self.resolve_tid(self.current_gtid)
    }

    fn current_ctid_resolved(&self) -> Option<Tid> {
        self.resolve_tid(self.current_ctid)
    }

    fn specific_thread_id(&self, tid: Tid) -> SpecificThreadId {
        let pid = self
            .multiprocess()
            .then(|| self.model.thread(tid).map(|t| t.pid()))
            .flatten()
            .map(|pid| SpecificIdKind::WithId(pid));

        SpecificThreadId {
            pid,
            tid: SpecificIdKind::WithId(tid),
        }
    }

    fn write_error<C: ConnectionExt>(
        &self,
        res: &mut ResponseWriter<'_, C>,
        code: u8,
    ) -> Result<(), C::Error> {
        res.write_str("E")?;
        res.write_hex(code)
    }

    /// `T<sig>thread:<id>;` and the bookkeeping that goes with reporting it.
    fn write_stop_reply<C: ConnectionExt>(
        &mut self,
        res: &mut ResponseWriter<'_, C>,
        tid: Tid,
        sig: Signal,
    ) -> Result<(), C::Error> {
        self.last_stop = Some((tid, sig));
        self.current_gtid = IdKind::WithId(tid);
        self.pending_stops.remove(&tid);

        res.write_str("T")?;
        res.write_hex(sig.into())?;
        res.write_str("thread:")?;
        res.write_specific_thread_id(self.specific_thread_id(tid))?;
        res.write_str(";")
    }
}
