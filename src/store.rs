use std::collections::{HashMap, HashSet};
use std::path::Path;

use log::{debug, info};

use crate::buffer_pool::{BufferPool, PinGuard};
use crate::consts::{PAGE_SIZE, RECORDS_PER_PAGE, RECORD_SIZE};
use crate::error::{StoreError, StoreResult};
use crate::journal::{LogManager, LogRecord};
use crate::pager::Pager;
use crate::record::{decode_record, encode_record, is_empty_slot, locate, read_slot, record_id, write_slot};
use crate::util;

/// Bookkeeping for the single active transaction: its id, a logical
/// end-of-file watermark used in place of the real file length while the
/// transaction is open, the set of record-level locks it holds, and the
/// before-image (UNDO) cache keyed by page.
struct ActiveTx {
    id: u64,
    logical_length: u64,
    locks: HashSet<(u64, usize)>,
    before_images: HashMap<u64, [u8; PAGE_SIZE]>,
}

enum TxState {
    Idle,
    Active(ActiveTx),
}

/// A single-file fixed-width record store: paged storage plus a pinning
/// buffer pool plus a transaction manager plus a journal, all owned by
/// one value so that Rust's borrow checker is the mutual-exclusion
/// mechanism -- there is no API for running two operations at once.
pub struct RecordStore {
    pager: Pager,
    buffer_pool: BufferPool,
    log: LogManager,
    txn: TxState,
    next_txn_id: u64,
    /// The logical end of file outside a transaction. Tracked separately
    /// from `pager.length()` because commit is write-ahead-logging-correct
    /// -- it durably logs a transaction's growth without forcing the data
    /// pages that realise it, so the on-disk byte count can legitimately
    /// lag behind what has actually been committed.
    length: u64,
}

impl RecordStore {
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        util::init_logging();
        let path = path.as_ref();
        let pager = Pager::open(path)?;
        let length = pager.length()?;

        let mut log_path = path.as_os_str().to_owned();
        log_path.push(".log");
        let log = LogManager::open(&log_path)?;

        info!("opened record store at {}", path.display());
        Ok(Self {
            pager,
            buffer_pool: BufferPool::new(),
            log,
            txn: TxState::Idle,
            next_txn_id: 1,
            length,
        })
    }

    /// Graceful shutdown: persist every dirty frame. Unlike `crash`, this
    /// never discards unflushed state.
    pub fn close(&mut self) -> StoreResult {
        self.buffer_pool.force_all(&mut self.pager)?;
        Ok(())
    }

    fn effective_length(&self) -> u64 {
        match &self.txn {
            TxState::Active(tx) => tx.logical_length,
            TxState::Idle => self.length,
        }
    }

    fn record_count_from_length(length: u64) -> u64 {
        (length / PAGE_SIZE as u64) * RECORDS_PER_PAGE as u64
            + (length % PAGE_SIZE as u64) / RECORD_SIZE as u64
    }

    pub fn record_count(&self) -> StoreResult<u64> {
        Ok(Self::record_count_from_length(self.effective_length()))
    }

    pub fn page_count(&self) -> StoreResult<u64> {
        let length = self.effective_length();
        Ok((length + PAGE_SIZE as u64 - 1) / PAGE_SIZE as u64)
    }

    fn read_slot_from_frame(&mut self, page: u64, slot: usize) -> StoreResult<[u8; RECORD_SIZE]> {
        let guard = PinGuard::new(&mut self.buffer_pool, &mut self.pager, page)?;
        Ok(read_slot(&guard.frame().bytes, slot))
    }

    /// FIX, write the slot, USE, FORCE. Used by the non-transactional
    /// write paths, which are durable the instant the call returns. The
    /// pin itself is released by the guard going out of scope.
    fn write_and_force_slot(&mut self, page: u64, slot: usize, bytes: &[u8; RECORD_SIZE]) -> StoreResult {
        {
            let mut guard = PinGuard::new(&mut self.buffer_pool, &mut self.pager, page)?;
            write_slot(&mut guard.frame_mut().bytes, slot, bytes);
        }
        self.buffer_pool.use_page(page);
        self.buffer_pool.force(&mut self.pager, page)?;
        Ok(())
    }

    /// The first-touch snapshot protocol: lock the slot, snapshot the page
    /// into the before-image cache on first touch, log the before/after
    /// images, then overwrite the slot and mark the frame dirty and
    /// transactional. Requires an active transaction.
    fn transactional_write(&mut self, page: u64, slot: usize, value: &str, is_insert: bool) -> StoreResult {
        if !matches!(self.txn, TxState::Active(_)) {
            return Err(StoreError::InvalidArgument(
                "no active transaction".to_string(),
            ));
        }

        let mut guard = PinGuard::new(&mut self.buffer_pool, &mut self.pager, page)?;
        let frame_bytes = guard.frame().bytes;
        let before_slot = read_slot(&frame_bytes, slot);
        let after = encode_record(value);

        let txn_id = {
            let tx = match &mut self.txn {
                TxState::Active(tx) => tx,
                TxState::Idle => unreachable!(),
            };
            tx.locks.insert((page, slot));
            tx.before_images.entry(page).or_insert(frame_bytes);
            let end_of_slot = page * PAGE_SIZE as u64 + (slot as u64 + 1) * RECORD_SIZE as u64;
            tx.logical_length = tx.logical_length.max(end_of_slot);
            tx.id
        };

        let record = if is_insert {
            LogRecord::Insert {
                txn: txn_id,
                page,
                slot,
                before: before_slot,
                after,
            }
        } else {
            LogRecord::Update {
                txn: txn_id,
                page,
                slot,
                before: before_slot,
                after,
            }
        };
        self.log.buffer(record);

        let frame = guard.frame_mut();
        write_slot(&mut frame.bytes, slot, &after);
        frame.dirty = true;
        frame.transactional = true;
        Ok(())
    }

    fn append_position_non_transactional(&self) -> (u64, usize, u64) {
        let mut length = self.length;
        let mut off = length % PAGE_SIZE as u64;
        if off + RECORD_SIZE as u64 > PAGE_SIZE as u64 {
            length += PAGE_SIZE as u64 - off;
            off = 0;
        }
        let page = length / PAGE_SIZE as u64;
        let slot = (off / RECORD_SIZE as u64) as usize;
        (page, slot, length)
    }

    fn append_position_transactional(&self, logical_length: u64) -> (u64, usize) {
        let mut length = logical_length;
        let mut off = length % PAGE_SIZE as u64;
        if off + RECORD_SIZE as u64 > PAGE_SIZE as u64 {
            length += PAGE_SIZE as u64 - off;
            off = 0;
        }
        let page = length / PAGE_SIZE as u64;
        let slot = (off / RECORD_SIZE as u64) as usize;
        (page, slot)
    }

    /// Append a record at the current end. Outside a transaction, writes
    /// through to disk immediately; inside one, writes only to the buffer
    /// and defers persistence to commit.
    pub fn insert_record(&mut self, value: &str) -> StoreResult<u64> {
        match &self.txn {
            TxState::Idle => {
                let (page, slot, length) = self.append_position_non_transactional();
                let bytes = encode_record(value);
                self.write_and_force_slot(page, slot, &bytes)?;
                let new_len = length + RECORD_SIZE as u64;
                self.pager.set_length(new_len)?;
                self.length = new_len;
                Ok(record_id(page, slot))
            }
            TxState::Active(tx) => {
                let (page, slot) = self.append_position_transactional(tx.logical_length);
                self.transactional_write(page, slot, value, true)?;
                Ok(record_id(page, slot))
            }
        }
    }

    /// Linear scan from page 0 for the first empty slot. Outside a
    /// transaction, forces the page after placement, guarding any length
    /// change with an "only if extending" check rather than reproducing
    /// the historical truncate-after-write bug.
    pub fn insert_record_sync(&mut self, value: &str) -> StoreResult<u64> {
        let mut page = 0u64;
        loop {
            for slot in 0..RECORDS_PER_PAGE {
                let current = self.read_slot_from_frame(page, slot)?;
                if !is_empty_slot(&current) {
                    continue;
                }
                return match &self.txn {
                    TxState::Idle => {
                        let bytes = encode_record(value);
                        self.write_and_force_slot(page, slot, &bytes)?;
                        // Only ever raise the logical length here, never
                        // lower it -- guards against the historical bug
                        // where a sync insert truncated the file to the
                        // end of the slot it just wrote, discarding any
                        // later data already present in the same page.
                        let end_of_slot =
                            page * PAGE_SIZE as u64 + (slot as u64 + 1) * RECORD_SIZE as u64;
                        if end_of_slot > self.length {
                            self.length = end_of_slot;
                        }
                        Ok(record_id(page, slot))
                    }
                    TxState::Active(_) => {
                        self.transactional_write(page, slot, value, true)?;
                        Ok(record_id(page, slot))
                    }
                };
            }
            page += 1;
        }
    }

    /// Overwrite the slot at `id`. Only meaningful transactionally.
    pub fn update_record(&mut self, id: u64, value: &str) -> StoreResult {
        if !matches!(self.txn, TxState::Active(_)) {
            return Err(StoreError::InvalidArgument(
                "update_record requires an active transaction".to_string(),
            ));
        }
        let (page, slot) = locate(id);
        self.transactional_write(page, slot, value, false)
    }

    /// Read the string at `id`, with transactional read isolation: a
    /// record the active transaction has itself written still reads back
    /// as its pre-transaction value (repeatable read via the before-image
    /// cache), not the in-flight write.
    pub fn read_record(&mut self, id: u64) -> StoreResult<String> {
        let total = self.record_count()?;
        if id >= total {
            return Err(StoreError::OutOfBounds(id));
        }
        let (page, slot) = locate(id);

        let snapshot_slot = match &self.txn {
            TxState::Active(tx) if tx.locks.contains(&(page, slot)) => {
                tx.before_images.get(&page).map(|img| read_slot(img, slot))
            }
            _ => None,
        };

        let mut result = match snapshot_slot {
            Some(bytes) => bytes,
            None => self.read_slot_from_frame(page, slot)?,
        };

        if is_empty_slot(&result) {
            let offset = page * PAGE_SIZE as u64 + slot as u64 * RECORD_SIZE as u64;
            let physical_length = self.pager.length()?;
            if offset < physical_length {
                let page_bytes = self.pager.read_page(page)?;
                result = read_slot(&page_bytes, slot);
            }
        }

        Ok(decode_record(&result))
    }

    /// The records stored in page `p`, truncated to the total record
    /// count -- at most `RECORDS_PER_PAGE` strings, never more than
    /// `record_count() - p * RECORDS_PER_PAGE`.
    pub fn get_page(&mut self, p: u64) -> StoreResult<Vec<String>> {
        let total = self.record_count()?;
        let mut out = Vec::new();
        for slot in 0..RECORDS_PER_PAGE {
            let id = record_id(p, slot);
            if id >= total {
                break;
            }
            out.push(self.read_record(id)?);
        }
        Ok(out)
    }

    /// If already in a transaction, commit it first (an implicit commit).
    /// Allocates a new monotonically increasing transaction id.
    pub fn begin(&mut self) -> StoreResult<u64> {
        if matches!(self.txn, TxState::Active(_)) {
            debug!("begin while active: committing the prior transaction implicitly");
            self.commit()?;
        }
        let id = self.next_txn_id;
        self.next_txn_id += 1;
        let logical_length = self.length;
        self.txn = TxState::Active(ActiveTx {
            id,
            logical_length,
            locks: HashSet::new(),
            before_images: HashMap::new(),
        });
        self.log.buffer(LogRecord::Begin { txn: id });
        Ok(id)
    }

    /// Flushes the journal only -- data pages may lag and are persisted by
    /// a later checkpoint or recovery. This is the write-ahead-logging-
    /// correct behaviour; forcing data pages here would not be.
    pub fn commit(&mut self) -> StoreResult {
        let (txn_id, logical_length) = match &self.txn {
            TxState::Active(tx) => (tx.id, tx.logical_length),
            TxState::Idle => return Ok(()),
        };
        self.log.buffer(LogRecord::Commit { txn: txn_id });
        self.log.flush()?;
        self.buffer_pool.clear_transactional_flags();
        self.length = logical_length;
        self.txn = TxState::Idle;
        info!("committed transaction {}", txn_id);
        Ok(())
    }

    pub fn rollback(&mut self) -> StoreResult {
        let (txn_id, before_images) = match &self.txn {
            TxState::Active(tx) => (tx.id, tx.before_images.clone()),
            TxState::Idle => return Ok(()),
        };

        for (&page, image) in before_images.iter() {
            let mut guard = PinGuard::new(&mut self.buffer_pool, &mut self.pager, page)?;
            let frame = guard.frame_mut();
            frame.bytes = *image;
            frame.dirty = false;
            frame.transactional = false;
        }

        self.log.buffer(LogRecord::Rollback { txn: txn_id });
        self.log.flush()?;
        self.txn = TxState::Idle;
        info!("rolled back transaction {}", txn_id);
        Ok(())
    }

    /// Force every dirty frame, trim trailing all-zero slots off the end
    /// of the file, and log a CHECKPOINT marker. Does not end an active
    /// transaction.
    pub fn checkpoint(&mut self) -> StoreResult {
        self.buffer_pool.force_all(&mut self.pager)?;
        self.trim_trailing_empty_slots()?;

        let active_txn_or_zero = match &self.txn {
            TxState::Active(tx) => tx.id,
            TxState::Idle => 0,
        };
        self.log.buffer(LogRecord::Checkpoint {
            txn: active_txn_or_zero,
        });
        self.log.flush()?;
        Ok(())
    }

    fn trim_trailing_empty_slots(&mut self) -> StoreResult {
        let length = self.pager.length()?;
        if length == 0 {
            self.length = 0;
            return Ok(());
        }
        let page_count = (length + PAGE_SIZE as u64 - 1) / PAGE_SIZE as u64;
        for page in (0..page_count).rev() {
            let bytes = self.pager.read_page(page)?;
            if let Some(slot) = (0..RECORDS_PER_PAGE)
                .rev()
                .find(|&s| !is_empty_slot(&read_slot(&bytes, s)))
            {
                let trimmed = page * PAGE_SIZE as u64 + (slot as u64 + 1) * RECORD_SIZE as u64;
                if trimmed < length {
                    self.pager.set_length(trimmed)?;
                }
                self.length = trimmed;
                return Ok(());
            }
        }
        self.pager.set_length(0)?;
        self.length = 0;
        Ok(())
    }

    /// Simulate a non-graceful termination: discard all buffer frames and
    /// any unflushed journal buffer, and clear the transaction state.
    /// Nothing is written to the data file or the log. Any committed
    /// growth the buffer pool never forced to disk is forgotten along
    /// with it, exactly as it would be if the process had really died and
    /// come back up reading only what physically made it to the file --
    /// `recover` is what restores it.
    pub fn crash(&mut self) -> StoreResult {
        self.buffer_pool.clear();
        self.log.discard_buffer();
        self.txn = TxState::Idle;
        // Can't just read `pager.length()`: a full-page force can leave the
        // physical file longer than the true logical end (e.g. after
        // `insert_record_sync`, which deliberately never calls
        // `set_length`). Find the real last written slot instead.
        self.trim_trailing_empty_slots()?;
        Ok(())
    }

    fn apply_image(&mut self, page: u64, slot: usize, image: &[u8; RECORD_SIZE]) -> StoreResult {
        {
            let mut guard = PinGuard::new(&mut self.buffer_pool, &mut self.pager, page)?;
            let frame = guard.frame_mut();
            write_slot(&mut frame.bytes, slot, image);
            frame.dirty = true;
        }
        self.buffer_pool.force(&mut self.pager, page)?;
        Ok(())
    }

    /// Replay the log: REDO committed transactions, UNDO transactions
    /// that began but never committed, both scoped to records after the
    /// last checkpoint.
    pub fn recover(&mut self) -> StoreResult {
        let records = self.log.read_all()?;

        let mut committed = HashSet::new();
        let mut begun = HashSet::new();
        let mut last_checkpoint_index: Option<usize> = None;
        for (i, record) in records.iter().enumerate() {
            match record {
                LogRecord::Begin { txn } => {
                    begun.insert(*txn);
                }
                LogRecord::Commit { txn } => {
                    committed.insert(*txn);
                }
                LogRecord::Checkpoint { .. } => {
                    last_checkpoint_index = Some(i);
                }
                _ => {}
            }
        }
        let active_after_crash: HashSet<u64> = begun.difference(&committed).cloned().collect();
        let start = last_checkpoint_index.map_or(0, |i| i + 1);

        for record in &records[start..] {
            match record {
                LogRecord::Insert { txn, page, slot, after, .. }
                | LogRecord::Update { txn, page, slot, after, .. }
                    if committed.contains(txn) =>
                {
                    self.apply_image(*page, *slot, after)?;
                }
                _ => {}
            }
        }

        for record in records[start..].iter().rev() {
            match record {
                LogRecord::Insert { txn, page, slot, before, .. }
                | LogRecord::Update { txn, page, slot, before, .. }
                    if active_after_crash.contains(txn) =>
                {
                    self.apply_image(*page, *slot, before)?;
                }
                _ => {}
            }
        }

        self.buffer_pool.clear();
        // `apply_image` forces whole pages, which can extend the physical
        // file to a page boundary past the true logical end (e.g. REDOing
        // the first write into a page nothing had touched before). Trim
        // back to the last non-empty slot rather than trusting the raw
        // physical length.
        self.trim_trailing_empty_slots()?;
        info!(
            "recovery complete: {} committed, {} rolled back as incomplete",
            committed.len(),
            active_after_crash.len()
        );
        Ok(())
    }

    /// Number of well-formed records currently durable in the journal.
    /// Purely a diagnostic; not used by recovery.
    pub fn records_count_in_log(&mut self) -> StoreResult<usize> {
        self.log.records_count()
    }

    /// A human-readable dump of the on-disk journal contents.
    pub fn show_log_contents(&mut self) -> StoreResult<String> {
        self.log.show_log_contents()
    }
}
