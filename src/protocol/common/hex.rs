use btoi::btou_radix;
use btoi::ParseIntegerError;
use num_traits::CheckedAdd;
use num_traits::CheckedMul;
use num_traits::FromPrimitive;
use num_traits::Zero;

#[inline]
pub fn decode_hex<I>(buf: &[u8]) -> Result<I, ParseIntegerError>
where
    I: FromPrimitive + Zero + CheckedAdd + CheckedMul,
{
    btou_radix(buf, 16)
}

#[derive(Debug)]
pub enum DecodeHexBufError {
    NotAscii,
    NotEvenLen,
}

fn ascii2byte(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        b'x' | b'X' => Some(0),
        _ => None,
    }
}

/// Decode a GDB hex string into a byte slice _in place_.
///
/// GDB hex strings may include "xx", which represent "missing" data. This
/// method simply treats "xx" as 0x00.
pub fn decode_hex_buf(buf: &mut [u8]) -> Result<&mut [u8], DecodeHexBufError> {
    use DecodeHexBufError::*;

    if buf.len() % 2 != 0 {
        return Err(NotEvenLen);
    }

    let decoded_len = buf.len() / 2;
    for i in 0..decoded_len {
        let b = ascii2byte(buf[i * 2]).ok_or(NotAscii)? << 4
            | ascii2byte(buf[i * 2 + 1]).ok_or(NotAscii)?;
        buf[i] = b;
    }

    Ok(&mut buf[..decoded_len])
}

/// Decode a binary (`X` packet style) buffer _in place_, undoing the `}`
/// escape (`}x` stands for `x ^ 0x20`).
pub fn decode_bin_buf(buf: &mut [u8]) -> Option<&mut [u8]> {
    let mut i = 0;
    let mut decoded_len = 0;

    while i < buf.len() {
        if buf[i] == b'}' {
            buf[decoded_len] = buf.get(i + 1)? ^ 0x20;
            i += 2;
        } else {
            buf[decoded_len] = buf[i];
            i += 1;
        }
        decoded_len += 1;
    }

    Some(&mut buf[..decoded_len])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_hex_buf_even() {
        let mut buf = *b"deadbeef";
        let decoded = decode_hex_buf(&mut buf).unwrap();
        assert_eq!(decoded, [0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn decode_hex_buf_odd_rejected() {
        let mut buf = *b"dea";
        assert!(decode_hex_buf(&mut buf).is_err());
    }

    #[test]
    fn decode_bin_buf_unescapes() {
        let mut buf = *b"ab}\x03cd";
        let decoded = decode_bin_buf(&mut buf).unwrap();
        assert_eq!(decoded, [b'a', b'b', 0x23, b'c', b'd']);
    }

    #[test]
    fn decode_bin_buf_dangling_escape() {
        let mut buf = *b"ab}";
        assert!(decode_bin_buf(&mut buf).is_none());
    }
}
