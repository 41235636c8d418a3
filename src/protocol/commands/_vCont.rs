use super::prelude::*;

use crate::protocol::common::thread_id::ThreadId;

#[derive(Debug)]
pub enum vCont<'a> {
    Query,
    Actions(Actions<'a>),
}

impl<'a> ParseCommand<'a> for vCont<'a> {
    fn from_packet(buf: PacketBuf<'a>) -> Option<Self> {
        let body = buf.into_body_str()?;
        if body.starts_with('?') {
            Some(vCont::Query)
        } else {
            Some(vCont::Actions(Actions(body)))
        }
    }
}

/// A lazily evaluated iterator over the actions specified in a vCont packet.
#[derive(Debug)]
pub struct Actions<'a>(&'a str);

impl<'a> Actions<'a> {
    pub fn iter(&self) -> impl Iterator<Item = Option<VContAction>> + 'a {
        self.0.split(';').skip(1).map(|act| {
            let mut s = act.split(':');
            let kind = s.next()?;
            let thread = match s.next() {
                Some(s) => Some(ThreadId::from_slice(s.as_bytes())?),
                None => None,
            };

            Some(VContAction {
                kind: VContKind::from_str(kind)?,
                thread,
            })
        })
    }
}

#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub struct VContAction {
    pub kind: VContKind,
    pub thread: Option<ThreadId>,
}

#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum VContKind {
    Continue,
    ContinueWithSig(u8),
    Step,
    StepWithSig(u8),
    Stop,
}

impl VContKind {
    fn from_str(s: &str) -> Option<VContKind> {
        use self::VContKind::*;

        // `C05` and `C 05` both appear in the wild
        let sig = |rest: &str| decode_hex(rest.trim_start().as_bytes()).ok();

        let res = match s.split_at(s.len().min(1)) {
            ("c", "") => Continue,
            ("C", rest) => ContinueWithSig(sig(rest)?),
            ("s", "") => Step,
            ("S", rest) => StepWithSig(sig(rest)?),
            ("t", "") => Stop,
            _ => return None,
        };

        Some(res)
    }

    pub fn is_step(&self) -> bool {
        matches!(self, VContKind::Step | VContKind::StepWithSig(_))
    }

    pub fn sig(&self) -> Option<u8> {
        match self {
            VContKind::ContinueWithSig(sig) | VContKind::StepWithSig(sig) => Some(*sig),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::common::thread_id::IdKind;
    use core::num::NonZeroUsize;

    fn parse(body: &str) -> Vec<VContAction> {
        Actions(body).iter().map(|a| a.unwrap()).collect()
    }

    fn id(n: usize) -> IdKind {
        IdKind::WithId(NonZeroUsize::new(n).unwrap())
    }

    #[test]
    fn parses_step_with_thread() {
        let actions = parse(";s:p2.1");
        assert_eq!(actions.len(), 1);
        assert!(actions[0].kind.is_step());
        let thread = actions[0].thread.unwrap();
        assert_eq!(thread.pid, Some(id(2)));
        assert_eq!(thread.tid, id(1));
    }

    #[test]
    fn parses_default_action() {
        let actions = parse(";c");
        assert_eq!(actions[0].thread, None);
        assert_eq!(actions[0].kind, VContKind::Continue);
    }

    #[test]
    fn parses_signal_actions() {
        let actions = parse(";C0f:1;c");
        assert_eq!(actions[0].kind, VContKind::ContinueWithSig(15));
        assert_eq!(actions[1].kind, VContKind::Continue);
    }
}
