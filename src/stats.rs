//! Per-session statistics (SPEC_FULL.md §3's "Session statistics"
//! supplement), read-only to the host application.

/// Compression scheme used for the image data of the current/last page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionScheme {
    ModifiedHuffman,
    ModifiedRead,
    ModifiedModifiedRead,
}

/// Accumulated counters for one [`crate::Session`]. Never read by the
/// session's own logic; it is purely an observability surface for the
/// host.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionStats {
    /// Pages successfully transferred (incremented on MCF, not on PPS/MPS
    /// send — see SPEC_FULL.md §4.5's `count_page_on_mcf` resolution).
    pub pages_transferred: u32,
    /// Total pages in the document processed so far, successful or not.
    pub pages_seen: u32,
    /// Image bytes transferred for the current/last page.
    pub image_bytes: u64,
    /// Bad rows detected by the page sink while decoding.
    pub bad_rows: u32,
    /// Final negotiated bit rate in bps (0 until negotiation completes).
    pub negotiated_bps: u32,
    /// Whether the page just transferred used ECM.
    pub ecm_used: bool,
    pub compression: Option<CompressionScheme>,
}

impl SessionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_page_transferred(&mut self, rate_bps: u32, ecm: bool, scheme: CompressionScheme) {
        self.pages_transferred += 1;
        self.negotiated_bps = rate_bps;
        self.ecm_used = ecm;
        self.compression = Some(scheme);
    }

    pub(crate) fn record_page_seen(&mut self) {
        self.pages_seen += 1;
    }

    pub(crate) fn record_bad_row(&mut self) {
        self.bad_rows += 1;
    }

    pub(crate) fn add_image_bytes(&mut self, n: u64) {
        self.image_bytes += n;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_transferred_updates_rate_and_scheme() {
        let mut stats = SessionStats::new();
        stats.record_page_seen();
        stats.record_page_transferred(9600, false, CompressionScheme::ModifiedRead);
        assert_eq!(stats.pages_transferred, 1);
        assert_eq!(stats.pages_seen, 1);
        assert_eq!(stats.negotiated_bps, 9600);
        assert_eq!(stats.compression, Some(CompressionScheme::ModifiedRead));
    }
}
