use super::prelude::*;

use crate::protocol::common::thread_id::ThreadId;

#[derive(Debug)]
pub struct qThreadExtraInfo {
    pub id: ThreadId,
}

impl<'a> ParseCommand<'a> for qThreadExtraInfo {
    fn from_packet(buf: PacketBuf<'a>) -> Option<Self> {
        let body = buf.into_body();
        let id = match body {
            [b',', thread @ ..] => ThreadId::from_slice(thread)?,
            _ => return None,
        };
        Some(qThreadExtraInfo { id })
    }
}
