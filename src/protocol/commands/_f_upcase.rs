use super::prelude::*;

/// `F` is the client's reply to a File-I/O request the server made. The
/// return code (and errno, if any) are signed hex; a trailing `C` flags that
/// the user pressed Ctrl-C while the syscall was in flight.
#[derive(Debug)]
pub struct F {
    pub retcode: i64,
    pub errno: Option<i64>,
    pub ctrl_c: bool,
}

fn decode_signed_hex(s: &[u8]) -> Option<i64> {
    match s {
        [b'-', rest @ ..] => Some(-(decode_hex::<i64>(rest).ok()?)),
        _ => decode_hex(s).ok(),
    }
}

impl<'a> ParseCommand<'a> for F {
    fn from_packet(buf: PacketBuf<'a>) -> Option<Self> {
        let body = buf.into_body();
        let mut parts = body.split(|b| *b == b',');

        let retcode = decode_signed_hex(parts.next()?)?;

        let mut errno = None;
        let mut ctrl_c = false;
        for part in parts {
            match part {
                b"C" => ctrl_c = true,
                _ => errno = Some(decode_signed_hex(part)?),
            }
        }

        Some(F {
            retcode,
            errno,
            ctrl_c,
        })
    }
}
