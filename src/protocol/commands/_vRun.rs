use super::prelude::*;

/// `vRun;filename[;argument]...` - restart the program.
///
/// The mesh has no program loader behind the debug channel, so the filename
/// and arguments are noted but only the restart side-effect is honored.
#[derive(Debug)]
pub struct vRun<'a> {
    pub filename: Option<&'a [u8]>,
}

impl<'a> ParseCommand<'a> for vRun<'a> {
    fn from_packet(buf: PacketBuf<'a>) -> Option<Self> {
        let body = buf.into_body();
        let mut parts = body.split_mut(|b| *b == b';').skip(1);

        let filename = match parts.next() {
            Some([]) | None => None,
            Some(filename) => Some(decode_hex_buf(filename).ok()? as &[u8]),
        };

        Some(vRun { filename })
    }
}
