use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::error::{FileError, FileResult};
use super::{PAGE_SIZE, PageId};

/// Handle to an open paged file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileHandle(usize);

impl FileHandle {
    pub fn as_usize(&self) -> usize {
        self.0
    }
}

/// Manages paged file operations
///
/// Every file starts with a reserved header page (page 0), so
/// `allocate_page` hands out page numbers from 1 upward and 0 can be used
/// as a null page id by the layers above.
pub struct PagedFileManager {
    /// Map from file handles to open files
    open_files: HashMap<FileHandle, FileEntry>,
    /// Canonical path of every open file, so reopening returns its handle
    path_to_handle: HashMap<PathBuf, FileHandle>,
    /// Next available file handle
    next_handle: usize,
    /// Maximum number of open files
    max_open_files: usize,
}

struct FileEntry {
    file: File,
    path: PathBuf,
    /// Pages released by `delete_page`, reused before the file is extended
    free_pages: Vec<PageId>,
}

fn canonical(path: &Path) -> FileResult<PathBuf> {
    path.canonicalize()
        .map_err(|_| FileError::FileNotFound(path.display().to_string()))
}

fn page_offset(page_no: PageId) -> u64 {
    page_no as u64 * PAGE_SIZE as u64
}

fn check_buffer(len: usize) -> FileResult<()> {
    if len != PAGE_SIZE {
        return Err(FileError::InvalidPageSize {
            expected: PAGE_SIZE,
            actual: len,
        });
    }
    Ok(())
}

impl PagedFileManager {
    /// Create a new paged file manager
    pub fn new() -> Self {
        Self::with_max_files(128)
    }

    /// Create a new paged file manager with specified max open files
    pub fn with_max_files(max_open_files: usize) -> Self {
        Self {
            open_files: HashMap::new(),
            path_to_handle: HashMap::new(),
            next_handle: 0,
            max_open_files,
        }
    }

    /// Create a new file with a zeroed header page
    pub fn create_file<P: AsRef<Path>>(&mut self, path: P) -> FileResult<()> {
        let path = path.as_ref();
        if path.exists() {
            return Err(FileError::FileAlreadyExists(path.display().to_string()));
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // the header page makes page 1 the first data page
        File::create(path)?.write_all(&[0u8; PAGE_SIZE])?;
        Ok(())
    }

    /// Open a file, or return the existing handle if it is already open
    pub fn open_file<P: AsRef<Path>>(&mut self, path: P) -> FileResult<FileHandle> {
        let path = canonical(path.as_ref())?;
        if let Some(handle) = self.path_to_handle.get(&path).copied() {
            return Ok(handle);
        }
        if self.open_file_count() >= self.max_open_files {
            return Err(FileError::TooManyOpenFiles);
        }

        let file = OpenOptions::new().write(true).read(true).open(&path)?;
        let handle = self.fresh_handle();
        self.path_to_handle.insert(path.clone(), handle);
        let entry = FileEntry {
            file,
            path,
            free_pages: Vec::new(),
        };
        self.open_files.insert(handle, entry);
        Ok(handle)
    }

    /// Close a file, invalidating its handle
    pub fn close_file(&mut self, handle: FileHandle) -> FileResult<()> {
        match self.open_files.remove(&handle) {
            Some(entry) => {
                self.path_to_handle.remove(&entry.path);
                Ok(())
            }
            None => Err(FileError::InvalidHandle(handle.0)),
        }
    }

    /// Remove (delete) a file, closing it first if it is open
    pub fn remove_file<P: AsRef<Path>>(&mut self, path: P) -> FileResult<()> {
        let path = path.as_ref();
        let open_handle = path
            .canonicalize()
            .ok()
            .and_then(|canonical| self.path_to_handle.get(&canonical).copied());
        if let Some(handle) = open_handle {
            self.close_file(handle)?;
        }
        std::fs::remove_file(path)?;
        Ok(())
    }

    /// Allocate a fresh page, reusing a deleted one when possible
    ///
    /// The returned page is zeroed on disk and its number is never 0.
    pub fn allocate_page(&mut self, handle: FileHandle) -> FileResult<PageId> {
        let entry = self.entry_mut(handle)?;
        if let Some(page_no) = entry.free_pages.pop() {
            return Ok(page_no);
        }

        let pages_on_disk = (entry.file.metadata()?.len() as usize).div_ceil(PAGE_SIZE);
        let page_no = pages_on_disk.max(1) as PageId;
        entry.file.set_len(page_offset(page_no) + PAGE_SIZE as u64)?;
        Ok(page_no)
    }

    /// Delete a page: zero it on disk and make it available for reuse
    pub fn delete_page(&mut self, handle: FileHandle, page_no: PageId) -> FileResult<()> {
        if page_no == 0 {
            return Err(FileError::PageZeroReserved);
        }

        self.write_page(handle, page_no, &[0u8; PAGE_SIZE])?;

        let entry = self.entry_mut(handle)?;
        if !entry.free_pages.contains(&page_no) {
            entry.free_pages.push(page_no);
        }
        Ok(())
    }

    /// Read a page from a file
    ///
    /// Reads past the current end of file yield zeroed bytes.
    pub fn read_page(
        &mut self,
        handle: FileHandle,
        page_no: PageId,
        buffer: &mut [u8],
    ) -> FileResult<()> {
        check_buffer(buffer.len())?;
        let entry = self.entry_mut(handle)?;

        entry.file.seek(SeekFrom::Start(page_offset(page_no)))?;
        let got = entry.file.read(buffer)?;
        // a short read means the page lies partly or wholly past the end
        // of the file; the missing bytes read as zero
        buffer[got..].fill(0);
        Ok(())
    }

    /// Write a page to a file, extending it if needed
    pub fn write_page(
        &mut self,
        handle: FileHandle,
        page_no: PageId,
        buffer: &[u8],
    ) -> FileResult<()> {
        check_buffer(buffer.len())?;
        let entry = self.entry_mut(handle)?;

        let offset = page_offset(page_no);
        if entry.file.metadata()?.len() < offset + PAGE_SIZE as u64 {
            entry.file.set_len(offset + PAGE_SIZE as u64)?;
        }
        entry.file.seek(SeekFrom::Start(offset))?;
        entry.file.write_all(buffer)?;
        // no sync here: the OS batches writes, sync_file/sync_all make
        // them durable on demand
        Ok(())
    }

    /// Get the number of pages in a file, the header page included
    pub fn page_count(&mut self, handle: FileHandle) -> FileResult<usize> {
        let len = self.entry_mut(handle)?.file.metadata()?.len();
        Ok((len as usize).div_ceil(PAGE_SIZE))
    }

    /// Sync a file to disk (flush all OS buffers)
    pub fn sync_file(&mut self, handle: FileHandle) -> FileResult<()> {
        self.entry_mut(handle)?.file.sync_data()?;
        Ok(())
    }

    /// Sync all open files to disk
    pub fn sync_all(&mut self) -> FileResult<()> {
        self.open_files
            .values_mut()
            .try_for_each(|entry| entry.file.sync_data().map_err(FileError::from))
    }

    /// Check if a file is open
    pub fn is_file_open(&self, handle: FileHandle) -> bool {
        self.open_files.get(&handle).is_some()
    }

    /// Get the number of currently open files
    pub fn open_file_count(&self) -> usize {
        self.path_to_handle.len()
    }

    fn fresh_handle(&mut self) -> FileHandle {
        let handle = FileHandle(self.next_handle);
        self.next_handle += 1;
        handle
    }

    fn entry_mut(&mut self, handle: FileHandle) -> FileResult<&mut FileEntry> {
        match self.open_files.get_mut(&handle) {
            Some(entry) => Ok(entry),
            None => Err(FileError::InvalidHandle(handle.0)),
        }
    }
}

impl Default for PagedFileManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_fresh(manager: &mut PagedFileManager, dir: &TempDir, name: &str) -> FileHandle {
        let path = dir.path().join(name);
        manager.create_file(&path).unwrap();
        manager.open_file(&path).unwrap()
    }

    #[test]
    fn test_create_file_writes_header_page() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = PagedFileManager::new();

        let handle = open_fresh(&mut manager, &dir, "test.db");
        assert!(dir.path().join("test.db").exists());
        assert_eq!(manager.page_count(handle).unwrap(), 1);
    }

    #[test]
    fn test_create_twice_and_open_missing_fail() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = PagedFileManager::new();

        open_fresh(&mut manager, &dir, "test.db");
        assert!(matches!(
            manager.create_file(dir.path().join("test.db")),
            Err(FileError::FileAlreadyExists(_))
        ));
        assert!(matches!(
            manager.open_file(dir.path().join("missing.db")),
            Err(FileError::FileNotFound(_))
        ));
    }

    #[test]
    fn test_handles_are_deduplicated_and_closeable() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = PagedFileManager::new();

        let handle = open_fresh(&mut manager, &dir, "test.db");
        // a second open of the same path is the same handle, not a new one
        assert_eq!(manager.open_file(dir.path().join("test.db")).unwrap(), handle);
        assert_eq!(manager.open_file_count(), 1);
        assert!(manager.is_file_open(handle));

        manager.close_file(handle).unwrap();
        assert!(!manager.is_file_open(handle));
        assert_eq!(manager.open_file_count(), 0);
        assert!(matches!(
            manager.close_file(handle),
            Err(FileError::InvalidHandle(_))
        ));
    }

    #[test]
    fn test_page_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = PagedFileManager::new();
        let handle = open_fresh(&mut manager, &dir, "test.db");

        let mut page = vec![0u8; PAGE_SIZE];
        page[0] = 42;
        page[PAGE_SIZE - 1] = 255;
        manager.write_page(handle, 1, &page).unwrap();

        let mut readback = vec![0u8; PAGE_SIZE];
        manager.read_page(handle, 1, &mut readback).unwrap();
        assert_eq!(readback, page);
    }

    #[test]
    fn test_read_past_end_zero_fills() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = PagedFileManager::new();
        let handle = open_fresh(&mut manager, &dir, "test.db");

        let mut buffer = vec![0xffu8; PAGE_SIZE];
        manager.read_page(handle, 100, &mut buffer).unwrap();
        assert!(buffer.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_allocate_pages_sequentially() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = PagedFileManager::new();
        let handle = open_fresh(&mut manager, &dir, "test.db");

        assert_eq!(manager.allocate_page(handle).unwrap(), 1);
        assert_eq!(manager.allocate_page(handle).unwrap(), 2);
        assert_eq!(manager.allocate_page(handle).unwrap(), 3);
        assert_eq!(manager.page_count(handle).unwrap(), 4);
    }

    #[test]
    fn test_delete_page_reused_by_allocate() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = PagedFileManager::new();
        let handle = open_fresh(&mut manager, &dir, "test.db");

        let p1 = manager.allocate_page(handle).unwrap();
        let p2 = manager.allocate_page(handle).unwrap();

        let mut buffer = vec![7u8; PAGE_SIZE];
        manager.write_page(handle, p1, &buffer).unwrap();

        manager.delete_page(handle, p1).unwrap();

        // the deleted page is zeroed and handed out again
        manager.read_page(handle, p1, &mut buffer).unwrap();
        assert!(buffer.iter().all(|&b| b == 0));
        assert_eq!(manager.allocate_page(handle).unwrap(), p1);
        assert_ne!(p1, p2);
    }

    #[test]
    fn test_delete_header_page_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = PagedFileManager::new();
        let handle = open_fresh(&mut manager, &dir, "test.db");

        assert!(matches!(
            manager.delete_page(handle, 0),
            Err(FileError::PageZeroReserved)
        ));
    }

    #[test]
    fn test_page_transfers_must_be_page_sized() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = PagedFileManager::new();
        let handle = open_fresh(&mut manager, &dir, "test.db");

        for bad_len in [0, PAGE_SIZE - 1, PAGE_SIZE + 1] {
            let mut buffer = vec![0u8; bad_len];
            assert!(matches!(
                manager.read_page(handle, 0, &mut buffer),
                Err(FileError::InvalidPageSize { .. })
            ));
            assert!(matches!(
                manager.write_page(handle, 0, &buffer),
                Err(FileError::InvalidPageSize { .. })
            ));
        }
    }

    #[test]
    fn test_max_open_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = PagedFileManager::with_max_files(2);

        open_fresh(&mut manager, &dir, "a.db");
        open_fresh(&mut manager, &dir, "b.db");

        let third = dir.path().join("c.db");
        manager.create_file(&third).unwrap();
        assert!(matches!(
            manager.open_file(&third),
            Err(FileError::TooManyOpenFiles)
        ));
    }

    #[test]
    fn test_remove_open_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = PagedFileManager::new();
        let handle = open_fresh(&mut manager, &dir, "test.db");

        manager.remove_file(dir.path().join("test.db")).unwrap();
        assert!(!dir.path().join("test.db").exists());
        assert!(!manager.is_file_open(handle));
    }
}
