use std::collections::HashMap;

use super::file_manager::FileHandle;
use super::{FrameId, PageId};

/// Lookup table from (file, page) to the frame currently caching that page
///
/// A missed lookup is the table's only failure and it never escapes the
/// buffer manager: a miss means "not resident" in `read_page` and is a
/// no-op in `unpin_page`/`dispose_page`.
#[derive(Debug)]
pub struct FrameTable {
    entries: HashMap<(FileHandle, PageId), FrameId>,
}

impl FrameTable {
    /// Create a table sized for a pool of `num_bufs` frames
    pub fn new(num_bufs: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(num_bufs * 6 / 5 + 1),
        }
    }

    pub fn insert(&mut self, file: FileHandle, page_no: PageId, frame_id: FrameId) {
        self.entries.insert((file, page_no), frame_id);
    }

    pub fn lookup(&self, file: FileHandle, page_no: PageId) -> Option<FrameId> {
        self.entries.get(&(file, page_no)).copied()
    }

    pub fn remove(&mut self, file: FileHandle, page_no: PageId) -> Option<FrameId> {
        self.entries.remove(&(file, page_no))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::PagedFileManager;

    fn handles(temp_dir: &tempfile::TempDir, names: &[&str]) -> Vec<FileHandle> {
        let mut manager = PagedFileManager::new();
        names
            .iter()
            .map(|name| {
                let path = temp_dir.path().join(name);
                manager.create_file(&path).unwrap();
                manager.open_file(&path).unwrap()
            })
            .collect()
    }

    #[test]
    fn test_insert_lookup_remove() {
        let temp_dir = tempfile::tempdir().unwrap();
        let files = handles(&temp_dir, &["a.db", "b.db"]);
        let mut table = FrameTable::new(8);

        table.insert(files[0], 3, 0);
        table.insert(files[1], 3, 1);

        assert_eq!(table.lookup(files[0], 3), Some(0));
        assert_eq!(table.lookup(files[1], 3), Some(1));
        assert_eq!(table.lookup(files[0], 4), None);

        assert_eq!(table.remove(files[0], 3), Some(0));
        assert_eq!(table.lookup(files[0], 3), None);
        assert_eq!(table.remove(files[0], 3), None);
        assert_eq!(table.lookup(files[1], 3), Some(1));
    }

    #[test]
    fn test_insert_overwrites() {
        let temp_dir = tempfile::tempdir().unwrap();
        let files = handles(&temp_dir, &["a.db"]);
        let mut table = FrameTable::new(8);

        table.insert(files[0], 1, 0);
        table.insert(files[0], 1, 5);
        assert_eq!(table.lookup(files[0], 1), Some(5));
    }
}
