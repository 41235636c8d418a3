use super::prelude::*;

#[derive(Debug)]
pub struct S {
    pub sig: u8,
    pub addr: Option<u32>,
}

impl<'a> ParseCommand<'a> for S {
    fn from_packet(buf: PacketBuf<'a>) -> Option<Self> {
        let body = buf.into_body();
        let mut body = body.split(|b| *b == b';');
        let sig = decode_hex(body.next()?).ok()?;
        let addr = match body.next() {
            Some(addr) => Some(decode_hex(addr).ok()?),
            None => None,
        };
        Some(S { sig, addr })
    }
}
