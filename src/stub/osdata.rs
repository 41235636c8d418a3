//! `qXfer:osdata:read` providers.
//!
//! Each annex composes its full XML payload once (on the first read at
//! offset 0), caches it, and serves subsequent reads as slices. The cache is
//! rebuilt whenever the client starts over at offset 0, so a fresh `info os`
//! shows fresh hardware state.

#[derive(Default)]
pub struct OsDataCache {
    pub(crate) directory: Option<String>,
    pub(crate) processes: Option<String>,
    pub(crate) load: Option<String>,
    pub(crate) traffic: Option<String>,
}

impl OsDataCache {
    pub fn new() -> OsDataCache {
        OsDataCache::default()
    }
}

pub(crate) fn xml_header(type_: &str) -> String {
    format!(
        "<?xml version=\"1.0\"?>\n\
         <!DOCTYPE target SYSTEM \"osdata.dtd\">\n\
         <osdata type=\"{}\">\n",
        type_
    )
}

pub(crate) fn xml_column(name: &str, value: &str) -> String {
    format!("  <column name=\"{}\">{}</column>\n", name, xml_escape(value))
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn columns_are_escaped() {
        let col = xml_column("Command", "a<b>&c");
        assert_eq!(col, "  <column name=\"Command\">a&lt;b&gt;&amp;c</column>\n");
    }
}
