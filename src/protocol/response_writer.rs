use log::trace;
use log::warn;

use crate::conn::ConnectionExt;
use crate::protocol::common::thread_id::SpecificIdKind;
use crate::protocol::common::thread_id::SpecificThreadId;

/// A response accumulator: buffers one reply body, then frames it
/// (`$body#cc`) and transmits it, resending until the client acks.
///
/// Buffering (rather than streaming straight to the connection) is what makes
/// the resend-on-NAK half of the ack protocol possible.
pub struct ResponseWriter<'a, C: ConnectionExt> {
    inner: &'a mut C,
    body: Vec<u8>,
    rle_enabled: bool,
}

impl<'a, C: ConnectionExt> ResponseWriter<'a, C> {
    pub fn new(inner: &'a mut C, rle_enabled: bool) -> Self {
        Self {
            inner,
            body: Vec::new(),
            rle_enabled,
        }
    }

    /// Mutable reference to the underlying connection (used to nest `O`
    /// console-output packets inside a monitor-command exchange).
    pub fn as_conn(&mut self) -> &mut C {
        self.inner
    }

    /// Consumes self, framing the body and transmitting it. Blocks until the
    /// client acks; a NAK triggers a retransmit.
    pub fn flush(mut self) -> Result<(), C::Error> {
        let body = if self.rle_enabled {
            rle_compress(&self.body)
        } else {
            core::mem::take(&mut self.body)
        };

        let checksum = body.iter().fold(0u8, |a, x| a.wrapping_add(*x));

        let mut frame = Vec::with_capacity(body.len() + 4);
        frame.push(b'$');
        frame.extend_from_slice(&body);
        frame.push(b'#');
        frame.extend_from_slice(format!("{:02x}", checksum).as_bytes());

        trace!(
            "--> {}",
            core::str::from_utf8(&frame).unwrap_or("<non-ascii response>")
        );

        loop {
            self.inner.write_all(&frame)?;
            self.inner.flush()?;

            loop {
                match self.inner.read()? {
                    b'+' => return Ok(()),
                    b'-' => {
                        warn!("client NAK'd response, retransmitting");
                        break;
                    }
                    other => trace!("skipping byte while awaiting ack: {:#04x?}", other),
                }
            }
        }
    }

    /// Write a single byte.
    pub fn write(&mut self, byte: u8) -> Result<(), C::Error> {
        self.body.push(byte);
        Ok(())
    }

    /// Write an entire buffer.
    pub fn write_all(&mut self, data: &[u8]) -> Result<(), C::Error> {
        data.iter().try_for_each(|b| self.write(*b))
    }

    /// Write an entire string.
    pub fn write_str(&mut self, s: &str) -> Result<(), C::Error> {
        self.write_all(s.as_bytes())
    }

    /// Write a single byte as a hex string (two ascii chars).
    pub fn write_hex(&mut self, byte: u8) -> Result<(), C::Error> {
        self.write_str(&format!("{:02x}", byte))
    }

    /// Write an entire buffer as a hex string (two ascii chars / byte).
    pub fn write_hex_buf(&mut self, data: &[u8]) -> Result<(), C::Error> {
        data.iter().try_for_each(|b| self.write_hex(*b))
    }

    /// Write a number as a hex string, most significant digit first, without
    /// leading zeroes.
    pub fn write_num<D: core::fmt::LowerHex>(&mut self, digit: D) -> Result<(), C::Error> {
        self.write_str(&format!("{:x}", digit))
    }

    /// Write raw binary data, escaping `#`, `$`, `*` and `}`.
    pub fn write_binary(&mut self, data: &[u8]) -> Result<(), C::Error> {
        for &b in data {
            match b {
                b'#' | b'$' | b'*' | b'}' => {
                    self.body.push(b'}');
                    self.body.push(b ^ 0x20);
                }
                _ => self.body.push(b),
            }
        }
        Ok(())
    }

    fn write_specific_id_kind(&mut self, id: SpecificIdKind) -> Result<(), C::Error> {
        match id {
            SpecificIdKind::All => self.write_str("-1"),
            SpecificIdKind::WithId(id) => self.write_num(id.get()),
        }
    }

    pub fn write_specific_thread_id(&mut self, id: SpecificThreadId) -> Result<(), C::Error> {
        if let Some(pid) = id.pid {
            self.write_str("p")?;
            self.write_specific_id_kind(pid)?;
            self.write_str(".")?;
        }
        self.write_specific_id_kind(id.tid)
    }
}

/// Run-length encode a response body.
///
/// The count char is `n + 29` for "repeat the previous byte n more times",
/// restricted to printable values that are not protocol metacharacters.
fn rle_compress(src: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(src.len());
    let mut i = 0;

    while i < src.len() {
        let b = src[i];
        let mut run = 1;
        while i + run < src.len() && src[i + run] == b {
            run += 1;
        }
        i += run;

        out.push(b);
        let mut rest = run - 1;
        while rest >= 3 {
            let mut n = rest.min(97);
            // '#', '$', '*', '+' and '-' cannot serve as count chars
            while matches!(n + 29, 35 | 36 | 42 | 43 | 45) {
                n -= 1;
            }
            out.push(b'*');
            out.push((n + 29) as u8);
            rest -= n;
        }
        for _ in 0..rest {
            out.push(b);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rle_expand(src: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut iter = src.iter().copied().peekable();
        while let Some(b) = iter.next() {
            if b == b'*' {
                let n = (iter.next().unwrap() - 29) as usize;
                let prev = *out.last().unwrap();
                out.extend(std::iter::repeat(prev).take(n));
            } else {
                out.push(b);
            }
        }
        out
    }

    #[test]
    fn rle_round_trips() {
        for src in [
            b"0000000000000000".as_slice(),
            b"deadbeef".as_slice(),
            b"aaab".as_slice(),
            &[b'x'; 200],
            b"".as_slice(),
        ] {
            let compressed = rle_compress(src);
            assert_eq!(rle_expand(&compressed), src, "src: {:?}", src);
        }
    }

    #[test]
    fn rle_never_emits_metachars_as_count() {
        for len in 1..=150usize {
            let src = vec![b'7'; len];
            let compressed = rle_compress(&src);
            let mut iter = compressed.iter().copied().peekable();
            while let Some(b) = iter.next() {
                if b == b'*' {
                    let count = iter.next().unwrap();
                    assert!((32..=126).contains(&count));
                    assert!(!matches!(count, b'#' | b'$' | b'*' | b'+' | b'-'));
                }
            }
            assert_eq!(rle_expand(&compressed), src);
        }
    }

    #[test]
    fn short_runs_stay_literal() {
        assert_eq!(rle_compress(b"aaab"), b"aaab");
    }
}
