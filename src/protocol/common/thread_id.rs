use core::num::NonZeroUsize;

use super::hex::decode_hex;

/// Tid/Pid selector, as found in packets sent by the client.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum IdKind {
    /// All threads (-1)
    All,
    /// Any thread (0)
    Any,
    /// Thread with specific ID (id > 0)
    WithId(NonZeroUsize),
}

impl IdKind {
    /// Whether `id` is selected by this selector. `Any` matches everything;
    /// resolution of "any of the current process" happens upstream.
    pub fn matches(&self, id: NonZeroUsize) -> bool {
        match self {
            IdKind::All | IdKind::Any => true,
            IdKind::WithId(tid) => *tid == id,
        }
    }
}

/// Unique Thread ID, optionally scoped to a process (`p<pid>.<tid>` syntax).
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub struct ThreadId {
    /// Process ID (present iff the client used multiprocess syntax).
    pub pid: Option<IdKind>,
    /// Thread ID.
    pub tid: IdKind,
}

impl ThreadId {
    pub fn from_slice(s: &[u8]) -> Option<ThreadId> {
        match s {
            [b'p', s @ ..] => {
                // p<pid>.<tid>
                let mut s = s.split(|b| *b == b'.');
                let pid = parse_id_kind(s.next()?)?;
                let tid = match s.next() {
                    Some(s) => parse_id_kind(s)?,
                    None => IdKind::All, // sending only p<pid> is valid
                };

                Some(ThreadId {
                    pid: Some(pid),
                    tid,
                })
            }
            _ => {
                // <tid>
                let tid = parse_id_kind(s)?;

                Some(ThreadId { pid: None, tid })
            }
        }
    }
}

fn parse_id_kind(s: &[u8]) -> Option<IdKind> {
    Some(match s {
        b"-1" => IdKind::All,
        b"0" => IdKind::Any,
        id => IdKind::WithId(NonZeroUsize::new(decode_hex(id).ok()?)?),
    })
}

/// A resolved thread ID suitable for writing into a response: either a
/// concrete id, or `-1`.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum SpecificIdKind {
    All,
    WithId(NonZeroUsize),
}

/// A resolved `ThreadId` for response writing. `pid` is populated iff the
/// session negotiated the multiprocess extension.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub struct SpecificThreadId {
    pub pid: Option<SpecificIdKind>,
    pub tid: SpecificIdKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_tid() {
        let id = ThreadId::from_slice(b"2a").unwrap();
        assert_eq!(id.pid, None);
        assert_eq!(id.tid, IdKind::WithId(NonZeroUsize::new(0x2a).unwrap()));
    }

    #[test]
    fn parses_multiprocess_pair() {
        let id = ThreadId::from_slice(b"p2.1").unwrap();
        assert_eq!(id.pid, Some(IdKind::WithId(NonZeroUsize::new(2).unwrap())));
        assert_eq!(id.tid, IdKind::WithId(NonZeroUsize::new(1).unwrap()));
    }

    #[test]
    fn parses_selectors() {
        let id = ThreadId::from_slice(b"-1").unwrap();
        assert_eq!(id.tid, IdKind::All);
        let id = ThreadId::from_slice(b"p1.0").unwrap();
        assert_eq!(id.tid, IdKind::Any);
    }

    #[test]
    fn pid_only_selects_all_threads() {
        let id = ThreadId::from_slice(b"p5").unwrap();
        assert_eq!(id.pid, Some(IdKind::WithId(NonZeroUsize::new(5).unwrap())));
        assert_eq!(id.tid, IdKind::All);
    }
}
