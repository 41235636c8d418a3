use super::prelude::*;

#[derive(Debug)]
pub struct s {
    pub addr: Option<u32>,
}

impl<'a> ParseCommand<'a> for s {
    fn from_packet(buf: PacketBuf<'a>) -> Option<Self> {
        let body = buf.into_body();
        let addr = match body {
            [] => None,
            _ => Some(decode_hex(body).ok()?),
        };
        Some(s { addr })
    }
}
