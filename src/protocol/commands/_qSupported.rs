use super::prelude::*;

#[derive(Debug)]
pub struct qSupported<'a> {
    pub features: &'a [u8],
}

impl<'a> ParseCommand<'a> for qSupported<'a> {
    fn from_packet(buf: PacketBuf<'a>) -> Option<Self> {
        let body = buf.into_body();

        let features = match body {
            [] => &[] as &[u8],
            [b':', features @ ..] => features,
            _ => return None,
        };

        Some(qSupported { features })
    }
}

impl qSupported<'_> {
    /// Whether the client advertised a given `name+` feature.
    pub fn client_supports(&self, name: &[u8]) -> bool {
        self.features
            .split(|b| *b == b';')
            .any(|f| f.strip_suffix(b"+").map_or(false, |f| f == name))
    }
}
