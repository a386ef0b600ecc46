//! Page source/sink boundary (spec.md §3, §6, SPEC_FULL.md §1). `faxline`
//! owns no TIFF codec — "TIFF image I/O (T.4 compression/decompression,
//! page serialisation)" is explicitly a Non-goal, treated as a page
//! source/sink the host supplies. What lives here is that boundary's
//! trait contract, plus a small in-memory double for tests.

use crate::error::ImageError;
use crate::stats::CompressionScheme;

/// Geometry of one page, echoed by the source/sink so the session can
/// check it against what was jointly negotiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageGeometry {
    pub columns: u32,
    /// 0 means unknown/unlimited, matching T.4's "infinite length" page.
    pub rows: u32,
    pub compression: CompressionScheme,
}

/// Supplies successive coded rows of the document being transmitted.
/// `faxline` calls these from phase C; it never interprets the bytes
/// themselves beyond locating HDLC/non-ECM frame boundaries.
pub trait PageSource {
    /// Geometry of the next page, or `None` once the document is
    /// exhausted.
    fn next_page(&mut self) -> Result<Option<PageGeometry>, ImageError>;

    /// Pulls up to `buf.len()` bytes of T.4-coded data for the current
    /// page. Returns the number of bytes written; 0 means end-of-page.
    fn read_row_data(&mut self, buf: &mut [u8]) -> Result<usize, ImageError>;
}

/// Accepts successive coded rows of the document being received.
pub trait PageSink {
    fn start_page(&mut self, geometry: PageGeometry) -> Result<(), ImageError>;

    /// Writes T.4-coded bytes for the current page as they arrive.
    fn write_row_data(&mut self, data: &[u8]) -> Result<(), ImageError>;

    /// Called once the page's RTC/RCP has passed. `bad_rows` is the
    /// count of uncorrectable rows the sink's own T.4 decoder flagged;
    /// `faxline` forwards the coded stream without decoding it, so this
    /// number always originates with the sink.
    fn finish_page(&mut self, bad_rows: u32) -> Result<(), ImageError>;
}

/// An in-memory [`PageSource`]/[`PageSink`] pair for tests, standing in
/// for a real TIFF/F-backed implementation.
#[derive(Debug, Default)]
pub struct MemoryDocument {
    pages: Vec<(PageGeometry, Vec<u8>)>,
}

impl MemoryDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_page(&mut self, geometry: PageGeometry, data: Vec<u8>) {
        self.pages.push((geometry, data));
    }

    pub fn into_reader(self) -> MemoryPageSource {
        MemoryPageSource {
            pages: self.pages.into_iter(),
            current: None,
            cursor: 0,
        }
    }
}

/// Reads pages out of a [`MemoryDocument`] in order.
#[derive(Debug)]
pub struct MemoryPageSource {
    pages: std::vec::IntoIter<(PageGeometry, Vec<u8>)>,
    current: Option<Vec<u8>>,
    cursor: usize,
}

impl PageSource for MemoryPageSource {
    fn next_page(&mut self) -> Result<Option<PageGeometry>, ImageError> {
        match self.pages.next() {
            Some((geometry, data)) => {
                self.current = Some(data);
                self.cursor = 0;
                Ok(Some(geometry))
            }
            None => {
                self.current = None;
                Ok(None)
            }
        }
    }

    fn read_row_data(&mut self, buf: &mut [u8]) -> Result<usize, ImageError> {
        let Some(data) = &self.current else {
            return Ok(0);
        };
        let remaining = &data[self.cursor..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.cursor += n;
        Ok(n)
    }
}

/// Collects received pages into memory for inspection by a test.
#[derive(Debug, Default)]
pub struct MemoryPageSink {
    pub pages: Vec<(PageGeometry, Vec<u8>, u32)>,
    current: Option<(PageGeometry, Vec<u8>)>,
}

impl MemoryPageSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }
}

impl PageSink for MemoryPageSink {
    fn start_page(&mut self, geometry: PageGeometry) -> Result<(), ImageError> {
        self.current = Some((geometry, Vec::new()));
        Ok(())
    }

    fn write_row_data(&mut self, data: &[u8]) -> Result<(), ImageError> {
        let Some((_, buf)) = &mut self.current else {
            return Err(ImageError::PageNotFound(0));
        };
        buf.extend_from_slice(data);
        Ok(())
    }

    fn finish_page(&mut self, bad_rows: u32) -> Result<(), ImageError> {
        let Some((geometry, buf)) = self.current.take() else {
            return Err(ImageError::PageNotFound(0));
        };
        self.pages.push((geometry, buf, bad_rows));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry() -> PageGeometry {
        PageGeometry {
            columns: 1728,
            rows: 1145,
            compression: CompressionScheme::ModifiedHuffman,
        }
    }

    #[test]
    fn round_trips_one_page_through_memory_source_and_sink() {
        let mut doc = MemoryDocument::new();
        doc.push_page(geometry(), vec![1, 2, 3, 4, 5]);
        let mut source = doc.into_reader();

        let mut sink = MemoryPageSink::new();
        let g = source.next_page().unwrap().expect("page present");
        sink.start_page(g).unwrap();

        let mut buf = [0u8; 2];
        loop {
            let n = source.read_row_data(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            sink.write_row_data(&buf[..n]).unwrap();
        }
        sink.finish_page(0).unwrap();

        assert!(source.next_page().unwrap().is_none());
        assert_eq!(sink.page_count(), 1);
        assert_eq!(sink.pages[0].1, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn writing_without_start_page_is_an_error() {
        let mut sink = MemoryPageSink::new();
        assert!(sink.write_row_data(&[1]).is_err());
    }
}
