use super::prelude::*;

#[derive(Debug)]
pub struct G<'a> {
    pub vals: &'a [u8],
}

impl<'a> ParseCommand<'a> for G<'a> {
    fn from_packet(buf: PacketBuf<'a>) -> Option<Self> {
        let body = buf.into_body();
        let vals = decode_hex_buf(body).ok()?;
        Some(G { vals })
    }
}
