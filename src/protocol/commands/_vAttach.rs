use core::num::NonZeroUsize;

use super::prelude::*;

#[derive(Debug)]
pub struct vAttach {
    pub pid: NonZeroUsize,
}

impl<'a> ParseCommand<'a> for vAttach {
    fn from_packet(buf: PacketBuf<'a>) -> Option<Self> {
        let body = buf.into_body();
        let pid = match body {
            [b';', pid @ ..] => NonZeroUsize::new(decode_hex(pid).ok()?)?,
            _ => return None,
        };
        Some(vAttach { pid })
    }
}
