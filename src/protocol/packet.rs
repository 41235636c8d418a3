use crate::protocol::common::hex::decode_hex;

/// Packet parse error.
#[derive(Debug)]
pub enum PacketParseError {
    ChecksumMismatched { checksum: u8, calculated: u8 },
    EmptyBuf,
    MissingChecksum,
    MalformedChecksum,
    UnexpectedHeader(u8),
}

/// A `$body#cc` frame, validated and trimmed down to its body.
pub struct PacketBuf<'a> {
    buf: &'a mut [u8],
    body_range: core::ops::Range<usize>,
}

impl<'a> PacketBuf<'a> {
    /// Validate the contents of the raw packet buffer, checking for checksum
    /// consistency, structural correctness, and ASCII validation.
    pub fn new(pkt_buf: &'a mut [u8]) -> Result<PacketBuf<'a>, PacketParseError> {
        if pkt_buf.is_empty() {
            return Err(PacketParseError::EmptyBuf);
        }

        if pkt_buf[0] != b'$' {
            return Err(PacketParseError::UnexpectedHeader(pkt_buf[0]));
        }

        // split buffer into body and checksum components. `X` packet bodies
        // are binary, so no ASCII validation here; text-level accessors
        // re-validate on demand.
        let mut parts = pkt_buf[1..].splitn(2, |b| *b == b'#');

        let body = parts.next().unwrap(); // split iter always returns at least one elem
        let checksum = parts
            .next()
            .ok_or(PacketParseError::MissingChecksum)?
            .get(..2)
            .ok_or(PacketParseError::MalformedChecksum)?;

        // validate the checksum
        let checksum = decode_hex(checksum).map_err(|_| PacketParseError::MalformedChecksum)?;
        let calculated = body.iter().fold(0u8, |a, x| a.wrapping_add(*x));
        if calculated != checksum {
            return Err(PacketParseError::ChecksumMismatched {
                checksum,
                calculated,
            });
        }

        let end_of_body = 1 + body.len();

        Ok(PacketBuf {
            buf: pkt_buf,
            body_range: 1..end_of_body,
        })
    }

    /// (used for tests) Create a packet buffer from a raw body, skipping the
    /// header/checksum trimming stage.
    #[cfg(test)]
    pub fn new_with_raw_body(body: &'a mut [u8]) -> Result<PacketBuf<'a>, PacketParseError> {
        let len = body.len();
        Ok(PacketBuf {
            buf: body,
            body_range: 0..len,
        })
    }

    /// If the current body starts with `prefix`, consume it and return true.
    pub fn strip_prefix(&mut self, prefix: &[u8]) -> bool {
        if self.buf[self.body_range.clone()].starts_with(prefix) {
            self.body_range = (self.body_range.start + prefix.len())..self.body_range.end;
            true
        } else {
            false
        }
    }

    pub fn as_body(&self) -> &[u8] {
        &self.buf[self.body_range.clone()]
    }

    /// Return a mut reference to the slice of the packet buffer corresponding
    /// to the current body.
    pub fn into_body(self) -> &'a mut [u8] {
        &mut self.buf[self.body_range]
    }

    /// Return the current body as a `&str`, or `None` for binary bodies.
    pub fn into_body_str(self) -> Option<&'a str> {
        core::str::from_utf8(&self.buf[self.body_range]).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_checksum_accepted() {
        let mut buf = *b"$m1000,4#8e";
        let pkt = PacketBuf::new(&mut buf).unwrap();
        assert_eq!(pkt.as_body(), b"m1000,4");
    }

    #[test]
    fn bad_checksum_rejected() {
        let mut buf = *b"$m1000,4#8f";
        assert!(matches!(
            PacketBuf::new(&mut buf),
            Err(PacketParseError::ChecksumMismatched { .. })
        ));
    }

    #[test]
    fn truncated_checksum_rejected() {
        let mut buf = *b"$m1000,4#2";
        assert!(matches!(
            PacketBuf::new(&mut buf),
            Err(PacketParseError::MalformedChecksum)
        ));
    }

    #[test]
    fn missing_terminator_rejected() {
        let mut buf = *b"$m1000,4";
        assert!(matches!(
            PacketBuf::new(&mut buf),
            Err(PacketParseError::MissingChecksum)
        ));
    }

    #[test]
    fn strip_prefix_narrows_body() {
        let mut buf = *b"$qXfer:osdata:read::0,1000#00";
        let mut pkt = PacketBuf::new_with_raw_body(&mut buf[1..26]).unwrap();
        assert!(pkt.strip_prefix(b"qXfer:osdata:read"));
        assert!(pkt.as_body().starts_with(b":"));
    }
}
