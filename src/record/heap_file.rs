use tracing::warn;

use super::RecordId;
use super::error::{RecordError, RecordResult};
use crate::file::{BufMgr, FileHandle, PAGE_SIZE, PageId};

/// Magic stored in the header page: "HEAP"
const HEAP_MAGIC: u32 = 0x48454150;

/// Data pages start with a u16 slot count
const PAGE_HEADER_SIZE: usize = 2;

/// Heap file of fixed-length records
///
/// The header page (page 0) stores `magic(4) | record_size(4) |
/// data_page_count(4)`. Data pages hold records packed at a fixed stride
/// after the slot count. The file never deletes pages, so its data pages
/// are exactly `1..=data_page_count` in insertion order.
pub struct HeapFile {
    file: FileHandle,
    record_size: usize,
    data_page_count: u32,
}

impl HeapFile {
    /// Create a new heap file for records of `record_size` bytes
    pub fn create(bm: &mut BufMgr, path: &str, record_size: usize) -> RecordResult<Self> {
        if record_size == 0 || record_size > PAGE_SIZE - PAGE_HEADER_SIZE {
            return Err(RecordError::WrongRecordSize {
                expected: PAGE_SIZE - PAGE_HEADER_SIZE,
                actual: record_size,
            });
        }

        bm.file_manager_mut().create_file(path)?;
        let file = bm.file_manager_mut().open_file(path)?;

        let heap = Self {
            file,
            record_size,
            data_page_count: 0,
        };
        heap.write_header(bm)?;
        Ok(heap)
    }

    /// Open an existing heap file, validating its header
    pub fn open(bm: &mut BufMgr, path: &str) -> RecordResult<Self> {
        let file = bm.file_manager_mut().open_file(path)?;

        let guard = bm.read_page(file, 0)?;
        let page = guard.read();
        if read_u32(&page[..], 0) != HEAP_MAGIC {
            return Err(RecordError::NotAHeapFile(path.to_string()));
        }
        let record_size = read_u32(&page[..], 4) as usize;
        let data_page_count = read_u32(&page[..], 8);
        drop(page);

        Ok(Self {
            file,
            record_size,
            data_page_count,
        })
    }

    pub fn file(&self) -> FileHandle {
        self.file
    }

    pub fn record_size(&self) -> usize {
        self.record_size
    }

    pub fn data_page_count(&self) -> u32 {
        self.data_page_count
    }

    fn slots_per_page(&self) -> usize {
        (PAGE_SIZE - PAGE_HEADER_SIZE) / self.record_size
    }

    /// Append a record, returning its id
    pub fn insert_record(&mut self, bm: &mut BufMgr, record: &[u8]) -> RecordResult<RecordId> {
        if record.len() != self.record_size {
            return Err(RecordError::WrongRecordSize {
                expected: self.record_size,
                actual: record.len(),
            });
        }

        // try the last data page first
        if self.data_page_count > 0 {
            let page_no = self.data_page_count as PageId;
            let guard = bm.read_page(self.file, page_no)?;
            let count = {
                let page = guard.read();
                read_u16(&page[..], 0)
            };
            if (count as usize) < self.slots_per_page() {
                let mut page = guard.write();
                let offset = PAGE_HEADER_SIZE + count as usize * self.record_size;
                page[offset..offset + self.record_size].copy_from_slice(record);
                write_u16(&mut page[..], 0, count + 1);
                return Ok(RecordId::new(page_no, count));
            }
        }

        // last page full (or no data page yet): start a new one
        let (page_no, guard) = bm.alloc_page(self.file)?;
        {
            let mut page = guard.write();
            page[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + self.record_size].copy_from_slice(record);
            write_u16(&mut page[..], 0, 1);
        }
        drop(guard);

        self.data_page_count += 1;
        debug_assert_eq!(page_no, self.data_page_count);
        self.write_header(bm)?;
        Ok(RecordId::new(page_no, 0))
    }

    /// Total number of records stored
    pub fn record_count(&self, bm: &mut BufMgr) -> RecordResult<usize> {
        if self.data_page_count == 0 {
            return Ok(0);
        }
        let guard = bm.read_page(self.file, self.data_page_count as PageId)?;
        let last_count = read_u16(&guard.read()[..], 0) as usize;
        Ok((self.data_page_count as usize - 1) * self.slots_per_page() + last_count)
    }

    /// Flush the file's pages and release the handle
    ///
    /// Close errors are logged, not propagated.
    pub fn close(self, bm: &mut BufMgr) {
        if let Err(e) = bm.flush_file(self.file) {
            warn!(error = %e, "failed to flush heap file on close");
        }
        if let Err(e) = bm.file_manager_mut().close_file(self.file) {
            warn!(error = %e, "failed to close heap file");
        }
    }

    fn write_header(&self, bm: &mut BufMgr) -> RecordResult<()> {
        let guard = bm.read_page(self.file, 0)?;
        let mut page = guard.write();
        page[0..4].copy_from_slice(&HEAP_MAGIC.to_le_bytes());
        page[4..8].copy_from_slice(&(self.record_size as u32).to_le_bytes());
        page[8..12].copy_from_slice(&self.data_page_count.to_le_bytes());
        Ok(())
    }
}

pub(super) fn read_u16(page: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([page[offset], page[offset + 1]])
}

pub(super) fn write_u16(page: &mut [u8], offset: usize, value: u16) {
    page[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn read_u32(page: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        page[offset],
        page[offset + 1],
        page[offset + 2],
        page[offset + 3],
    ])
}
