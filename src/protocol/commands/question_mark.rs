use super::prelude::*;

#[derive(Debug)]
pub struct QuestionMark;

impl<'a> ParseCommand<'a> for QuestionMark {
    fn from_packet(buf: PacketBuf<'a>) -> Option<Self> {
        if !buf.as_body().is_empty() {
            return None;
        }
        Some(QuestionMark)
    }
}
