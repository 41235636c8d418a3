use super::prelude::*;

#[derive(Debug)]
pub struct qXferOsdataRead<'a> {
    pub annex: &'a [u8],
    pub offset: u64,
    pub length: usize,
}

impl<'a> ParseCommand<'a> for qXferOsdataRead<'a> {
    fn from_packet(buf: PacketBuf<'a>) -> Option<Self> {
        let body = buf.into_body();

        // ":annex:offset,length" (the annex may be empty)
        let mut body = body.split(|b| *b == b':').skip(1);
        let annex = body.next()?;

        let mut args = body.next()?.split(|b| *b == b',');
        let offset = decode_hex(args.next()?).ok()?;
        let length = decode_hex(args.next()?).ok()?;

        Some(qXferOsdataRead {
            annex,
            offset,
            length,
        })
    }
}
