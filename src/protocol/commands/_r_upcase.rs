use super::prelude::*;

/// `R XX` restarts the whole platform. The argument byte is ignored, as
/// specified by the remote protocol.
#[derive(Debug)]
pub struct R;

impl<'a> ParseCommand<'a> for R {
    fn from_packet(_buf: PacketBuf<'a>) -> Option<Self> {
        Some(R)
    }
}
