use super::RecordId;
use super::error::RecordResult;
use super::heap_file::{HeapFile, read_u16};
use crate::file::{BufMgr, FileHandle, PageId};

/// Data pages start with a u16 slot count (kept in sync with heap_file)
const PAGE_HEADER_SIZE: usize = 2;

/// Sequential scan over every record of a heap file
///
/// Yields records in (page, slot) order; `Ok(None)` signals the end of the
/// file. The scan pins each page only while copying a record out of it.
pub struct FileScan {
    file: FileHandle,
    record_size: usize,
    data_page_count: u32,
    next_page: PageId,
    next_slot: u16,
}

impl FileScan {
    pub fn new(heap: &HeapFile) -> Self {
        Self {
            file: heap.file(),
            record_size: heap.record_size(),
            data_page_count: heap.data_page_count(),
            next_page: 1,
            next_slot: 0,
        }
    }

    /// Fetch the next record, or `None` once the file is exhausted
    pub fn scan_next(&mut self, bm: &mut BufMgr) -> RecordResult<Option<(Vec<u8>, RecordId)>> {
        while self.next_page <= self.data_page_count {
            let guard = bm.read_page(self.file, self.next_page)?;
            let page = guard.read();
            let count = read_u16(&page[..], 0);

            if self.next_slot < count {
                let offset = PAGE_HEADER_SIZE + self.next_slot as usize * self.record_size;
                let bytes = page[offset..offset + self.record_size].to_vec();
                let rid = RecordId::new(self.next_page, self.next_slot);
                self.next_slot += 1;
                return Ok(Some((bytes, rid)));
            }

            drop(page);
            self.next_page += 1;
            self.next_slot = 0;
        }
        Ok(None)
    }
}
