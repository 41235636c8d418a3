use super::prelude::*;

use crate::protocol::common::thread_id::ThreadId;

#[derive(Debug)]
pub struct T {
    pub thread: ThreadId,
}

impl<'a> ParseCommand<'a> for T {
    fn from_packet(buf: PacketBuf<'a>) -> Option<Self> {
        let thread = ThreadId::from_slice(buf.into_body())?;
        Some(T { thread })
    }
}
