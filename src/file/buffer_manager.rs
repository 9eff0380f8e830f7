use std::cell::{Cell, Ref, RefCell, RefMut};
use std::rc::Rc;

use tracing::{debug, warn};

use super::error::{FileError, FileResult};
use super::file_manager::{FileHandle, PagedFileManager};
use super::frame_table::FrameTable;
use super::{FrameId, PAGE_SIZE, PageId};

/// One buffer pool slot: the cached page bytes plus its descriptor
///
/// Descriptor fields sit in `Cell`s and the bytes in a `RefCell` so that a
/// `PageGuard` can release its pin on drop without going back through the
/// manager. The descriptor fields are only meaningful while `valid` is set.
#[derive(Debug)]
struct Frame {
    data: RefCell<Box<[u8; PAGE_SIZE]>>,
    file: Cell<Option<FileHandle>>,
    page_no: Cell<PageId>,
    valid: Cell<bool>,
    dirty: Cell<bool>,
    refbit: Cell<bool>,
    pin_cnt: Cell<u32>,
}

impl Frame {
    fn new() -> Self {
        Self {
            data: RefCell::new(Box::new([0u8; PAGE_SIZE])),
            file: Cell::new(None),
            page_no: Cell::new(0),
            valid: Cell::new(false),
            dirty: Cell::new(false),
            refbit: Cell::new(false),
            pin_cnt: Cell::new(0),
        }
    }

    /// Reset the descriptor to the invalid state
    fn clear(&self) {
        self.file.set(None);
        self.page_no.set(0);
        self.valid.set(false);
        self.dirty.set(false);
        self.refbit.set(false);
        self.pin_cnt.set(0);
    }

    /// Initialize the descriptor for a freshly loaded page, pinned once
    fn set(&self, file: FileHandle, page_no: PageId) {
        self.file.set(Some(file));
        self.page_no.set(page_no);
        self.valid.set(true);
        self.dirty.set(false);
        self.refbit.set(true);
        self.pin_cnt.set(1);
    }
}

/// RAII pin on a buffer frame
///
/// `read` and `write` borrow the cached page bytes; `write` also marks the
/// frame dirty, so the page is written back before its frame is reused.
/// Dropping the guard releases the pin, which makes every early return and
/// error path unpin exactly once.
pub struct PageGuard {
    frame: Rc<Frame>,
    page_no: PageId,
}

impl PageGuard {
    pub fn page_no(&self) -> PageId {
        self.page_no
    }

    pub fn read(&self) -> Ref<'_, [u8; PAGE_SIZE]> {
        Ref::map(self.frame.data.borrow(), |data| &**data)
    }

    pub fn write(&self) -> RefMut<'_, [u8; PAGE_SIZE]> {
        self.frame.dirty.set(true);
        RefMut::map(self.frame.data.borrow_mut(), |data| &mut **data)
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        let pins = self.frame.pin_cnt.get();
        if pins > 0 {
            self.frame.pin_cnt.set(pins - 1);
        } else {
            // only reachable if the caller manually unpinned behind our back
            warn!(page_no = self.page_no, "page guard dropped on an unpinned frame");
        }
    }
}

/// Buffer manager: a fixed pool of page frames with clock replacement
///
/// At most one frame caches any given (file, page) pair. Frames with a
/// nonzero pin count are never evicted; dirty frames are written back
/// before their slot is reused.
pub struct BufMgr {
    file_manager: PagedFileManager,
    frames: Vec<Rc<Frame>>,
    frame_table: FrameTable,
    clock_hand: usize,
    num_bufs: usize,
}

impl BufMgr {
    /// Create a buffer manager with `num_bufs` frames over `file_manager`
    pub fn new(file_manager: PagedFileManager, num_bufs: usize) -> Self {
        assert!(num_bufs > 0, "buffer pool needs at least one frame");

        let frames = (0..num_bufs).map(|_| Rc::new(Frame::new())).collect();

        Self {
            file_manager,
            frames,
            frame_table: FrameTable::new(num_bufs),
            // start just before frame 0 so the first advance lands on 0
            clock_hand: num_bufs - 1,
            num_bufs,
        }
    }

    /// Get a reference to the file manager
    pub fn file_manager(&self) -> &PagedFileManager {
        &self.file_manager
    }

    /// Get a mutable reference to the file manager
    pub fn file_manager_mut(&mut self) -> &mut PagedFileManager {
        &mut self.file_manager
    }

    /// Pin a page, loading it from disk on a cache miss
    pub fn read_page(&mut self, file: FileHandle, page_no: PageId) -> FileResult<PageGuard> {
        if let Some(frame_id) = self.frame_table.lookup(file, page_no) {
            let frame = &self.frames[frame_id];
            frame.refbit.set(true);
            frame.pin_cnt.set(frame.pin_cnt.get() + 1);
            return Ok(PageGuard {
                frame: Rc::clone(frame),
                page_no,
            });
        }

        let frame_id = self.alloc_buf()?;
        {
            let frame = &self.frames[frame_id];
            let mut data = frame.data.borrow_mut();
            self.file_manager.read_page(file, page_no, &mut data[..])?;
        }

        let frame = &self.frames[frame_id];
        frame.set(file, page_no);
        self.frame_table.insert(file, page_no, frame_id);
        Ok(PageGuard {
            frame: Rc::clone(frame),
            page_no,
        })
    }

    /// Allocate a fresh page in `file` and pin it
    pub fn alloc_page(&mut self, file: FileHandle) -> FileResult<(PageId, PageGuard)> {
        let page_no = self.file_manager.allocate_page(file)?;
        let frame_id = self.alloc_buf()?;

        let frame = &self.frames[frame_id];
        frame.data.borrow_mut().fill(0);
        frame.set(file, page_no);
        self.frame_table.insert(file, page_no, frame_id);
        Ok((
            page_no,
            PageGuard {
                frame: Rc::clone(frame),
                page_no,
            },
        ))
    }

    /// Release one pin on a page, optionally marking it dirty
    ///
    /// Unpinning a page that is no longer resident silently succeeds, which
    /// tolerates double-unpins from callers' error paths.
    pub fn unpin_page(&mut self, file: FileHandle, page_no: PageId, dirty: bool) -> FileResult<()> {
        let Some(frame_id) = self.frame_table.lookup(file, page_no) else {
            return Ok(());
        };

        let frame = &self.frames[frame_id];
        if frame.pin_cnt.get() == 0 {
            return Err(FileError::PageNotPinned(page_no));
        }
        frame.pin_cnt.set(frame.pin_cnt.get() - 1);
        if dirty {
            frame.dirty.set(true);
        }
        Ok(())
    }

    /// Drop a page from the pool (if cached) and delete it from the file
    ///
    /// Callers must not dispose a pinned page.
    pub fn dispose_page(&mut self, file: FileHandle, page_no: PageId) -> FileResult<()> {
        if let Some(frame_id) = self.frame_table.remove(file, page_no) {
            let frame = &self.frames[frame_id];
            debug_assert_eq!(frame.pin_cnt.get(), 0, "disposing a pinned page");
            frame.clear();
        }
        self.file_manager.delete_page(file, page_no)
    }

    /// Write back and evict every frame belonging to `file`
    ///
    /// Fails with `PagePinned` before touching the disk if any page of the
    /// file still holds a pin.
    pub fn flush_file(&mut self, file: FileHandle) -> FileResult<()> {
        for frame in &self.frames {
            if frame.valid.get() && frame.file.get() == Some(file) && frame.pin_cnt.get() > 0 {
                return Err(FileError::PagePinned(frame.page_no.get()));
            }
        }

        for frame in &self.frames {
            if !frame.valid.get() || frame.file.get() != Some(file) {
                continue;
            }
            let page_no = frame.page_no.get();
            if frame.dirty.get() {
                let data = frame.data.borrow();
                self.file_manager.write_page(file, page_no, &data[..])?;
                frame.dirty.set(false);
            }
            self.frame_table.remove(file, page_no);
            frame.clear();
        }
        Ok(())
    }

    /// Dump the state of every frame to stdout (diagnostic only)
    pub fn print_self(&self) {
        let mut valid_frames = 0;
        for (i, frame) in self.frames.iter().enumerate() {
            println!(
                "frame {}: file={:?} page={} valid={} pin={} dirty={} refbit={}",
                i,
                frame.file.get().map(|f| f.as_usize()),
                frame.page_no.get(),
                frame.valid.get(),
                frame.pin_cnt.get(),
                frame.dirty.get(),
                frame.refbit.get(),
            );
            if frame.valid.get() {
                valid_frames += 1;
            }
        }
        println!("total number of valid frames: {}", valid_frames);
    }

    /// Check whether a page is currently held in some frame
    pub fn is_cached(&self, file: FileHandle, page_no: PageId) -> bool {
        self.frame_table.lookup(file, page_no).is_some()
    }

    /// Pin count of a cached page, or `None` if not resident
    pub fn pin_count(&self, file: FileHandle, page_no: PageId) -> Option<u32> {
        self.frame_table
            .lookup(file, page_no)
            .map(|frame_id| self.frames[frame_id].pin_cnt.get())
    }

    /// Number of frames currently holding a page
    pub fn valid_frame_count(&self) -> usize {
        self.frames.iter().filter(|f| f.valid.get()).count()
    }

    /// Number of frames whose page diverges from disk
    pub fn dirty_frame_count(&self) -> usize {
        self.frames
            .iter()
            .filter(|f| f.valid.get() && f.dirty.get())
            .count()
    }

    fn advance_clock(&mut self) {
        self.clock_hand = (self.clock_hand + 1) % self.num_bufs;
    }

    /// Pick a victim frame with the clock algorithm
    ///
    /// Invalid frames are taken immediately. A valid frame gets a second
    /// chance while its refbit is set; pinned frames are skipped. A full
    /// revolution in which every frame was observed pinned means no victim
    /// can ever be found, so the sweep fails rather than spin. Any unpinned
    /// frame is found within two revolutions, since the first one clears
    /// its refbit.
    fn alloc_buf(&mut self) -> FileResult<FrameId> {
        let mut pinned_in_sweep = 0;
        let mut steps_in_sweep = 0;

        loop {
            self.advance_clock();
            steps_in_sweep += 1;

            let frame = &self.frames[self.clock_hand];
            if !frame.valid.get() {
                frame.clear();
                return Ok(self.clock_hand);
            }

            if frame.refbit.get() {
                frame.refbit.set(false);
            } else if frame.pin_cnt.get() > 0 {
                pinned_in_sweep += 1;
            } else {
                let page_no = frame.page_no.get();
                if let Some(file) = frame.file.get() {
                    if frame.dirty.get() {
                        let data = frame.data.borrow();
                        self.file_manager.write_page(file, page_no, &data[..])?;
                        debug!(
                            file = file.as_usize(),
                            page_no, "wrote back dirty page at eviction"
                        );
                    }
                    self.frame_table.remove(file, page_no);
                }
                frame.clear();
                return Ok(self.clock_hand);
            }

            if steps_in_sweep == self.num_bufs {
                if pinned_in_sweep == self.num_bufs {
                    return Err(FileError::BufferExceeded);
                }
                steps_in_sweep = 0;
                pinned_in_sweep = 0;
            }
        }
    }
}
