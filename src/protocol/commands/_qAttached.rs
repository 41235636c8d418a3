use core::num::NonZeroUsize;

use super::prelude::*;

#[derive(Debug)]
pub struct qAttached {
    pub pid: Option<NonZeroUsize>,
}

impl<'a> ParseCommand<'a> for qAttached {
    fn from_packet(buf: PacketBuf<'a>) -> Option<Self> {
        let body = buf.into_body();
        let pid = match body {
            [] => None,
            [b':', pid @ ..] => Some(NonZeroUsize::new(decode_hex(pid).ok()?)?),
            _ => return None,
        };
        Some(qAttached { pid })
    }
}
