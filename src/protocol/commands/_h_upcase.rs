use super::prelude::*;

use crate::protocol::common::thread_id::ThreadId;

#[derive(Debug)]
pub struct H {
    pub kind: char,
    pub thread: ThreadId,
}

impl<'a> ParseCommand<'a> for H {
    fn from_packet(buf: PacketBuf<'a>) -> Option<Self> {
        let body = buf.into_body();
        let (kind, thread) = match body {
            [kind @ (b'c' | b'g'), thread @ ..] => (*kind as char, ThreadId::from_slice(thread)?),
            _ => return None,
        };
        Some(H { kind, thread })
    }
}
