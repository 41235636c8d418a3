use super::prelude::*;

#[derive(Debug)]
pub struct ExclamationMark;

impl<'a> ParseCommand<'a> for ExclamationMark {
    fn from_packet(buf: PacketBuf<'a>) -> Option<Self> {
        if !buf.as_body().is_empty() {
            return None;
        }
        Some(ExclamationMark)
    }
}
