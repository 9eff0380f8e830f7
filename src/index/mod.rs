//! Disk-resident B+ tree index over 32-bit integer keys
//!
//! Every node of the tree is one page of the index file, obtained through
//! the buffer manager; the tree never touches the disk directly. The index
//! supports duplicate keys, single-entry insertion and half-open range
//! scans. Deletion is not supported: node pages live in the file forever.

mod error;
mod meta;
mod node;

pub use error::{IndexError, IndexResult};

use tracing::warn;

use crate::file::{BufMgr, FileHandle, PageGuard, PageId};
use crate::record::{FileScan, HeapFile, RecordId};

use meta::{IndexMeta, KEY_TYPE_INTEGER};
use node::{InternalMut, InternalRef, LeafMut, LeafRef};

/// Comparison operators accepted by `start_scan`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    LT,
    LTE,
    GTE,
    GT,
}

/// Build the index file name for a relation/attribute pair
pub fn index_file_name(relation_name: &str, attr_byte_offset: usize) -> String {
    format!("{},{}", relation_name, attr_byte_offset)
}

/// A B+ tree index on one integer attribute of a relation
///
/// At most one scan executes at a time; the scan keeps exactly one leaf
/// pinned between `scan_next` calls and nothing else stays pinned across
/// operation boundaries. Operations pin one page per tree level plus a
/// couple of split pages, so the buffer pool should be a handful of frames
/// deeper than the tree height.
pub struct BTreeIndex {
    file: FileHandle,
    relation_name: String,
    attr_byte_offset: usize,
    root_page_no: PageId,
    scan: Option<ScanState>,
}

struct ScanState {
    high: i32,
    high_op: Operator,
    /// The leaf being walked; `None` once the sibling chain is exhausted
    current: Option<LeafCursor>,
}

struct LeafCursor {
    guard: PageGuard,
    next_entry: usize,
}

impl BTreeIndex {
    /// Create a new index file and bulk-load it from the base relation
    ///
    /// Writes the meta page, allocates an empty leaf as the initial root,
    /// then scans `relation` and inserts one entry per record, reading the
    /// key as a little-endian i32 at `attr_byte_offset`. The index file is
    /// named `<relation_name>,<attr_byte_offset>` inside `dir`.
    pub fn create(
        bm: &mut BufMgr,
        dir: &str,
        relation_name: &str,
        attr_byte_offset: usize,
        relation: &HeapFile,
    ) -> IndexResult<Self> {
        if attr_byte_offset + 4 > relation.record_size() {
            return Err(IndexError::BadIndexInfo(format!(
                "attribute offset {} does not fit a {}-byte record",
                attr_byte_offset,
                relation.record_size()
            )));
        }

        let path = format!("{}/{}", dir, index_file_name(relation_name, attr_byte_offset));
        bm.file_manager_mut().create_file(&path)?;
        let file = bm.file_manager_mut().open_file(&path)?;

        // the initial root is a single empty leaf
        let (root_page_no, root) = bm.alloc_page(file)?;
        LeafMut::init(&mut root.write()[..]);
        drop(root);

        let meta = IndexMeta {
            relation_name: IndexMeta::fit_name(relation_name),
            attr_byte_offset: attr_byte_offset as u32,
            key_type: KEY_TYPE_INTEGER,
            root_page_no,
        };
        {
            let guard = bm.read_page(file, 0)?;
            meta.write_to(&mut guard.write()[..]);
        }

        let mut index = Self {
            file,
            relation_name: relation_name.to_string(),
            attr_byte_offset,
            root_page_no,
            scan: None,
        };

        let mut scan = FileScan::new(relation);
        while let Some((record, rid)) = scan.scan_next(bm)? {
            let key = key_at(&record, attr_byte_offset);
            index.insert_entry(bm, key, rid)?;
        }

        Ok(index)
    }

    /// Open an existing index file, validating its meta page
    pub fn open(
        bm: &mut BufMgr,
        dir: &str,
        relation_name: &str,
        attr_byte_offset: usize,
    ) -> IndexResult<Self> {
        let path = format!("{}/{}", dir, index_file_name(relation_name, attr_byte_offset));
        let file = bm.file_manager_mut().open_file(&path)?;

        let meta = {
            let guard = bm.read_page(file, 0)?;
            let page = guard.read();
            IndexMeta::read_from(&page[..])
        };

        if meta.relation_name != IndexMeta::fit_name(relation_name)
            || meta.attr_byte_offset != attr_byte_offset as u32
            || meta.key_type != KEY_TYPE_INTEGER
            || meta.root_page_no == 0
        {
            return Err(IndexError::BadIndexInfo(path));
        }

        Ok(Self {
            file,
            relation_name: relation_name.to_string(),
            attr_byte_offset,
            root_page_no: meta.root_page_no,
            scan: None,
        })
    }

    pub fn file(&self) -> FileHandle {
        self.file
    }

    pub fn relation_name(&self) -> &str {
        &self.relation_name
    }

    pub fn attr_byte_offset(&self) -> usize {
        self.attr_byte_offset
    }

    pub fn root_page_no(&self) -> PageId {
        self.root_page_no
    }

    pub fn is_scan_executing(&self) -> bool {
        self.scan.is_some()
    }

    /// Insert one `(key, rid)` entry
    ///
    /// Descends to the proper leaf and splits on the way back up; if the
    /// root itself splits, a new root is allocated and the meta page
    /// updated.
    pub fn insert_entry(&mut self, bm: &mut BufMgr, key: i32, rid: RecordId) -> IndexResult<()> {
        debug_assert!(!rid.is_empty(), "record ids with page 0 are reserved");

        if let Some((new_page_no, mid_val)) = self.insert(bm, self.root_page_no, key, rid)? {
            let new_root = self.grow_root(bm, mid_val, self.root_page_no, new_page_no)?;
            self.set_root(bm, new_root)?;
        }
        Ok(())
    }

    /// Recursive insert into the subtree rooted at `page_no`
    ///
    /// Returns the new sibling's page number and the separator to promote
    /// when the node split, `None` otherwise. The node stays pinned while
    /// its child is descended into, mirroring the descent stack.
    fn insert(
        &self,
        bm: &mut BufMgr,
        page_no: PageId,
        key: i32,
        rid: RecordId,
    ) -> IndexResult<Option<(PageId, i32)>> {
        let guard = bm.read_page(self.file, page_no)?;

        let is_leaf = node::is_leaf(&guard.read()[..]);
        if is_leaf {
            return self.insert_into_leaf(bm, guard, key, rid);
        }

        let child_page = {
            let page = guard.read();
            let internal = InternalRef::new(&page[..]);
            internal.child(internal.routing_index(key))
        };

        match self.insert(bm, child_page, key, rid)? {
            None => Ok(None),
            Some((split_page, split_key)) => {
                self.insert_into_internal(bm, guard, split_key, split_page)
            }
        }
    }

    fn insert_into_leaf(
        &self,
        bm: &mut BufMgr,
        guard: PageGuard,
        key: i32,
        rid: RecordId,
    ) -> IndexResult<Option<(PageId, i32)>> {
        // duplicates go after their equals
        let (index, full) = {
            let page = guard.read();
            let leaf = LeafRef::new(&page[..]);
            (leaf.upper_bound(key), leaf.is_full())
        };

        if !full {
            let mut page = guard.write();
            LeafMut::new(&mut page[..]).insert_at(index, key, rid);
            return Ok(None);
        }

        let mid = node::LEAF_CAPACITY / 2;
        let insert_left = index < mid;
        let split = mid + insert_left as usize;

        let (new_page_no, new_guard) = bm.alloc_page(self.file)?;
        let mid_val;
        {
            let mut old_page = guard.write();
            let mut new_page = new_guard.write();
            LeafMut::init(&mut new_page[..]);

            let mut old_leaf = LeafMut::new(&mut old_page[..]);
            let mut new_leaf = LeafMut::new(&mut new_page[..]);
            old_leaf.split_into(&mut new_leaf, split);

            if insert_left {
                old_leaf.insert_at(index, key, rid);
            } else {
                new_leaf.insert_at(index - mid, key, rid);
            }

            // link the new leaf into the sibling chain
            new_leaf.set_right_sibling(old_leaf.as_ref().right_sibling());
            old_leaf.set_right_sibling(new_page_no);

            mid_val = new_leaf.as_ref().key(0);
        }
        Ok(Some((new_page_no, mid_val)))
    }

    fn insert_into_internal(
        &self,
        bm: &mut BufMgr,
        guard: PageGuard,
        key: i32,
        child: PageId,
    ) -> IndexResult<Option<(PageId, i32)>> {
        let (index, full) = {
            let page = guard.read();
            let internal = InternalRef::new(&page[..]);
            (internal.routing_index(key), internal.is_full())
        };

        if !full {
            let mut page = guard.write();
            InternalMut::new(&mut page[..]).insert_at(index, key, child);
            return Ok(None);
        }

        let mid = (node::INTERNAL_CAPACITY - 1) / 2;
        let insert_left = index < mid;
        let split = mid + insert_left as usize;
        // inserting exactly at the promotion slot: the incoming key itself
        // moves up and is stored in neither half
        let move_key_up = index == mid;

        let (new_page_no, new_guard) = bm.alloc_page(self.file)?;
        let mid_val;
        {
            let mut old_page = guard.write();
            let mut new_page = new_guard.write();

            let mut old_node = InternalMut::new(&mut old_page[..]);
            let mut new_node = InternalMut::new(&mut new_page[..]);

            if move_key_up {
                mid_val = key;
                old_node.split_promoting_incoming(&mut new_node, split, child);
            } else {
                mid_val = old_node.as_ref().key(split);
                old_node.split_promoting_slot(&mut new_node, split);
                if insert_left {
                    old_node.insert_at(index, key, child);
                } else {
                    new_node.insert_at(index - mid - 1, key, child);
                }
            }
        }
        Ok(Some((new_page_no, mid_val)))
    }

    /// Allocate a new root pointing at the two halves of the old one
    fn grow_root(
        &self,
        bm: &mut BufMgr,
        mid_val: i32,
        left: PageId,
        right: PageId,
    ) -> IndexResult<PageId> {
        let (new_root_no, guard) = bm.alloc_page(self.file)?;
        let mut page = guard.write();
        let mut root = InternalMut::new(&mut page[..]);
        root.set_key(0, mid_val);
        root.set_child(0, left);
        root.set_child(1, right);
        Ok(new_root_no)
    }

    /// Point the cached root and the meta page at `new_root`
    fn set_root(&mut self, bm: &mut BufMgr, new_root: PageId) -> IndexResult<()> {
        self.root_page_no = new_root;

        let guard = bm.read_page(self.file, 0)?;
        let mut page = guard.write();
        let mut meta = IndexMeta::read_from(&page[..]);
        meta.root_page_no = new_root;
        meta.write_to(&mut page[..]);
        Ok(())
    }

    /// Begin a range scan over `[low, high]` with the given inclusivity
    ///
    /// `low_op` must be GT or GTE and `high_op` LT or LTE. Fails with
    /// `NoSuchKeyFound` when the range is provably empty, releasing every
    /// page first. A scan that is still executing is ended before the new
    /// one starts.
    pub fn start_scan(
        &mut self,
        bm: &mut BufMgr,
        low: i32,
        low_op: Operator,
        high: i32,
        high_op: Operator,
    ) -> IndexResult<()> {
        if !matches!(low_op, Operator::GT | Operator::GTE)
            || !matches!(high_op, Operator::LT | Operator::LTE)
        {
            return Err(IndexError::BadOpcodes);
        }
        if low > high {
            return Err(IndexError::BadScanrange { low, high });
        }

        self.scan = None;

        // descend to the leftmost leaf that could hold a qualifying key
        let mut guard = bm.read_page(self.file, self.root_page_no)?;
        loop {
            let next = {
                let page = guard.read();
                if node::is_leaf(&page[..]) {
                    break;
                }
                let internal = InternalRef::new(&page[..]);
                internal.child(internal.routing_index(low))
            };
            // reassignment unpins the parent before moving down
            guard = bm.read_page(self.file, next)?;
        }

        // locate the first entry past the low bound, hopping right as long
        // as the current leaf holds nothing at or above it
        let next_entry;
        loop {
            let (position, occupancy, sibling) = {
                let page = guard.read();
                let leaf = LeafRef::new(&page[..]);
                let position = match low_op {
                    Operator::GTE => leaf.lower_bound(low),
                    _ => leaf.upper_bound(low),
                };
                (position, leaf.occupancy(), leaf.right_sibling())
            };
            if position < occupancy {
                next_entry = position;
                break;
            }
            if sibling == 0 {
                return Err(IndexError::NoSuchKeyFound);
            }
            guard = bm.read_page(self.file, sibling)?;
        }

        // the range is empty if the first candidate already violates the
        // high bound
        {
            let page = guard.read();
            let leaf = LeafRef::new(&page[..]);
            let key = leaf.key(next_entry);
            let rid = leaf.rid(next_entry);
            if rid.is_empty() || key > high || (key == high && high_op == Operator::LT) {
                return Err(IndexError::NoSuchKeyFound);
            }
        }

        self.scan = Some(ScanState {
            high,
            high_op,
            current: Some(LeafCursor { guard, next_entry }),
        });
        Ok(())
    }

    /// Fetch the record id of the next entry matching the scan
    ///
    /// Fails with `IndexScanCompleted` once the range is exhausted; the
    /// scan stays initialized until `end_scan`.
    pub fn scan_next(&mut self, bm: &mut BufMgr) -> IndexResult<RecordId> {
        let scan = self.scan.as_mut().ok_or(IndexError::ScanNotInitialized)?;
        let Some(cursor) = scan.current.as_mut() else {
            return Err(IndexError::IndexScanCompleted);
        };

        let (key, rid) = {
            let page = cursor.guard.read();
            let leaf = LeafRef::new(&page[..]);
            (leaf.key(cursor.next_entry), leaf.rid(cursor.next_entry))
        };

        if rid.is_empty()
            || key > scan.high
            || (key == scan.high && scan.high_op == Operator::LT)
        {
            // dropping the cursor unpins the leaf
            scan.current = None;
            return Err(IndexError::IndexScanCompleted);
        }

        // advance, crossing to the right sibling when this leaf is done
        cursor.next_entry += 1;
        let (exhausted, sibling) = {
            let page = cursor.guard.read();
            let leaf = LeafRef::new(&page[..]);
            if cursor.next_entry >= node::LEAF_CAPACITY
                || leaf.rid(cursor.next_entry).page_number == 0
            {
                (true, leaf.right_sibling())
            } else {
                (false, 0)
            }
        };
        if exhausted {
            if sibling == 0 {
                // a 0 sibling ends the chain; never follow it to page 0
                scan.current = None;
            } else {
                let guard = bm.read_page(self.file, sibling)?;
                *cursor = LeafCursor {
                    guard,
                    next_entry: 0,
                };
            }
        }

        Ok(rid)
    }

    /// Terminate the current scan, unpinning its leaf
    pub fn end_scan(&mut self) -> IndexResult<()> {
        self.scan
            .take()
            .map(|_| ())
            .ok_or(IndexError::ScanNotInitialized)
    }

    /// End any live scan and flush the index file, releasing the handle
    ///
    /// Close errors are logged rather than propagated.
    pub fn close(mut self, bm: &mut BufMgr) {
        self.scan = None;
        if let Err(e) = bm.flush_file(self.file) {
            warn!(error = %e, "failed to flush index file on close");
        }
        if let Err(e) = bm.file_manager_mut().close_file(self.file) {
            warn!(error = %e, "failed to close index file");
        }
    }
}

/// Read the little-endian i32 key at `offset` inside a record
fn key_at(record: &[u8], offset: usize) -> i32 {
    i32::from_le_bytes([
        record[offset],
        record[offset + 1],
        record[offset + 2],
        record[offset + 3],
    ])
}
