use log::trace;

/// What the wire produced: either a full `$body#cc` frame, or an in-band
/// break (`0x03`).
pub enum RecvdFrame {
    Frame,
    Interrupt,
}

/// Receives a packet by pulling data from a callback (typically backed by a
/// blocking `Connection::read`).
///
/// Bytes before the `$` header are discarded, with two exceptions: `0x03` is
/// surfaced as [`RecvdFrame::Interrupt`], and stray acks (`+`/`-`) for an
/// already-completed exchange are skipped silently.
pub struct RecvPacketBlocking {}

impl RecvPacketBlocking {
    pub fn new() -> Self {
        RecvPacketBlocking {}
    }

    pub fn recv<C>(
        &mut self,
        packet_buffer: &mut Vec<u8>,
        mut get_byte: impl FnMut() -> Result<u8, C>,
    ) -> Result<RecvdFrame, C> {
        packet_buffer.clear();

        // skip to the header byte
        loop {
            match get_byte()? {
                b'$' => break,
                0x03 => return Ok(RecvdFrame::Interrupt),
                b'+' | b'-' => {} // late ack/nak
                other => trace!("skipping junk byte before '$': {:#04x?}", other),
            }
        }

        packet_buffer.push(b'$');

        // read the packet body
        loop {
            let c = get_byte()?;
            packet_buffer.push(c);
            if c == b'#' {
                break;
            }
        }

        // read the checksum as well
        packet_buffer.push(get_byte()?);
        packet_buffer.push(get_byte()?);

        trace!(
            "<-- {}",
            core::str::from_utf8(packet_buffer).unwrap_or("<invalid packet>")
        );

        Ok(RecvdFrame::Frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(bytes: &[u8]) -> (Result<RecvdFrame, ()>, Vec<u8>) {
        let mut iter = bytes.iter().copied();
        let mut buf = Vec::new();
        let res = RecvPacketBlocking::new().recv(&mut buf, || iter.next().ok_or(()));
        (res, buf)
    }

    #[test]
    fn collects_full_frame() {
        let (res, buf) = feed(b"$g#67");
        assert!(matches!(res, Ok(RecvdFrame::Frame)));
        assert_eq!(buf, b"$g#67");
    }

    #[test]
    fn skips_leading_ack() {
        let (res, buf) = feed(b"+$g#67");
        assert!(matches!(res, Ok(RecvdFrame::Frame)));
        assert_eq!(buf, b"$g#67");
    }

    #[test]
    fn interrupt_reported_before_header() {
        let (res, _) = feed(b"\x03");
        assert!(matches!(res, Ok(RecvdFrame::Interrupt)));
    }
}
