use super::prelude::*;

use crate::protocol::common::hex::decode_bin_buf;

#[derive(Debug)]
pub struct X<'a> {
    pub addr: u32,
    pub len: usize,
    pub val: &'a [u8],
}

impl<'a> ParseCommand<'a> for X<'a> {
    fn from_packet(buf: PacketBuf<'a>) -> Option<Self> {
        let body = buf.into_body();
        let mut body = body.splitn_mut(2, |b| *b == b':');

        let mut header = body.next()?.split(|b| *b == b',');
        let addr = decode_hex(header.next()?).ok()?;
        let len = decode_hex(header.next()?).ok()?;

        let val = decode_bin_buf(body.next()?)?;

        Some(X {
            addr,
            len,
            val: val as &[u8],
        })
    }
}
