use std::collections::HashMap;

use crate::consts::PAGE_SIZE;
use crate::error::StoreResult;
use crate::pager::Pager;

/// A single cached page plus its bookkeeping bits. `pin_count` tracks how
/// many outstanding `FIX`es hold the frame in memory; `dirty` is set by
/// `USE` and cleared by `FORCE`; `transactional` marks a frame that was
/// first touched under the active transaction, gating the before-image
/// snapshot protocol in the transaction manager.
pub struct Frame {
    pub bytes: [u8; PAGE_SIZE],
    pub pin_count: u32,
    pub dirty: bool,
    pub transactional: bool,
}

/// The pinning buffer pool. Holds at most one cached `Frame` per page
/// index. `FIX` loads a page from disk on a cache miss and bumps its pin
/// count; `UNFIX` releases a pin. `FIX` never implies mutation -- callers
/// that intend to write must call `USE` explicitly once they have the
/// frame.
pub struct BufferPool {
    frames: HashMap<u64, Frame>,
}

impl BufferPool {
    pub fn new() -> Self {
        Self {
            frames: HashMap::new(),
        }
    }

    /// Pin `page`, loading it from `pager` on a cache miss. Returns a
    /// reference to the cached frame.
    pub fn fix(&mut self, pager: &mut Pager, page: u64) -> StoreResult<&mut Frame> {
        if !self.frames.contains_key(&page) {
            let bytes = pager.read_page(page)?;
            self.frames.insert(
                page,
                Frame {
                    bytes,
                    pin_count: 0,
                    dirty: false,
                    transactional: false,
                },
            );
        }
        let frame = self.frames.get_mut(&page).expect("just inserted");
        frame.pin_count += 1;
        Ok(frame)
    }

    /// Release a pin taken by `fix`. A frame with a pin count of zero may
    /// still remain cached; eviction is out of scope for this store since
    /// the whole working set is expected to fit in memory.
    pub fn unfix(&mut self, page: u64) {
        if let Some(frame) = self.frames.get_mut(&page) {
            if frame.pin_count > 0 {
                frame.pin_count -= 1;
            }
        }
    }

    /// Mark a pinned page dirty. Must be called explicitly before mutating
    /// a frame's bytes; `fix` alone never marks a page dirty.
    pub fn use_page(&mut self, page: u64) {
        if let Some(frame) = self.frames.get_mut(&page) {
            frame.dirty = true;
        }
    }

    pub fn get(&self, page: u64) -> Option<&Frame> {
        self.frames.get(&page)
    }

    pub fn get_mut(&mut self, page: u64) -> Option<&mut Frame> {
        self.frames.get_mut(&page)
    }

    /// Flush a single dirty frame to disk and clear its dirty bit.
    pub fn force(&mut self, pager: &mut Pager, page: u64) -> StoreResult {
        if let Some(frame) = self.frames.get_mut(&page) {
            if frame.dirty {
                pager.write_page(page, &frame.bytes)?;
                frame.dirty = false;
            }
        }
        Ok(())
    }

    /// Flush every dirty frame to disk.
    pub fn force_all(&mut self, pager: &mut Pager) -> StoreResult {
        let pages: Vec<u64> = self
            .frames
            .iter()
            .filter(|(_, f)| f.dirty)
            .map(|(&p, _)| p)
            .collect();
        for page in pages {
            self.force(pager, page)?;
        }
        Ok(())
    }

    /// Drop every cached frame without flushing. Used by recovery, which
    /// always re-reads pages straight off the pager.
    pub fn clear(&mut self) {
        self.frames.clear();
    }

    pub fn pool_iter(&self) -> impl Iterator<Item = (&u64, &Frame)> {
        self.frames.iter()
    }

    /// Clear the `transactional` flag on every cached frame. Called by
    /// commit, which ends a transaction's claim on the frames it touched
    /// without forcing them.
    pub fn clear_transactional_flags(&mut self) {
        for frame in self.frames.values_mut() {
            frame.transactional = false;
        }
    }
}

/// RAII guard releasing a page pin on every exit path, including early
/// returns via `?`. `fix_scoped` is the preferred entry point whenever a
/// page only needs to live for the duration of one call.
pub struct PinGuard<'a> {
    pool: &'a mut BufferPool,
    page: u64,
}

impl<'a> PinGuard<'a> {
    pub fn new(pool: &'a mut BufferPool, pager: &mut Pager, page: u64) -> StoreResult<Self> {
        pool.fix(pager, page)?;
        Ok(Self { pool, page })
    }

    pub fn frame(&self) -> &Frame {
        self.pool.get(self.page).expect("pinned frame present")
    }

    pub fn frame_mut(&mut self) -> &mut Frame {
        self.pool.get_mut(self.page).expect("pinned frame present")
    }
}

impl<'a> Drop for PinGuard<'a> {
    fn drop(&mut self) {
        self.pool.unfix(self.page);
    }
}


#[cfg(test)]
impl BufferPool {
    fn frame_mut_for_test(&mut self, page: u64) -> &mut Frame {
        self.frames.get_mut(&page).unwrap()
    }
}
