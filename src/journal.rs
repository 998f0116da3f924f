use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::Path;

use log::warn;

use crate::consts::RECORD_SIZE;
use crate::error::{StoreError, StoreResult};

/// One line of the append-only journal. `Insert` and `Update` carry both
/// the before- and after-images of the slot they touch, hex-encoded in the
/// on-disk format, so that recovery can REDO committed work and UNDO
/// whatever an interrupted transaction left behind.
#[derive(Debug, Clone, PartialEq)]
pub enum LogRecord {
    Begin {
        txn: u64,
    },
    Insert {
        txn: u64,
        page: u64,
        slot: usize,
        before: [u8; RECORD_SIZE],
        after: [u8; RECORD_SIZE],
    },
    Update {
        txn: u64,
        page: u64,
        slot: usize,
        before: [u8; RECORD_SIZE],
        after: [u8; RECORD_SIZE],
    },
    Commit {
        txn: u64,
    },
    Rollback {
        txn: u64,
    },
    Checkpoint {
        txn: u64,
    },
}

impl LogRecord {
    fn type_tag(&self) -> &'static str {
        match self {
            LogRecord::Begin { .. } => "BEGIN",
            LogRecord::Insert { .. } => "INSERT",
            LogRecord::Update { .. } => "UPDATE",
            LogRecord::Commit { .. } => "COMMIT",
            LogRecord::Rollback { .. } => "ROLLBACK",
            LogRecord::Checkpoint { .. } => "CHECKPOINT",
        }
    }

    fn encode_line(&self) -> String {
        match self {
            LogRecord::Begin { txn }
            | LogRecord::Commit { txn }
            | LogRecord::Rollback { txn }
            | LogRecord::Checkpoint { txn } => {
                format!("{}|{}|-1|-1", txn, self.type_tag())
            }
            LogRecord::Insert {
                txn,
                page,
                slot,
                before,
                after,
            }
            | LogRecord::Update {
                txn,
                page,
                slot,
                before,
                after,
            } => format!(
                "{}|{}|{}|{}|{}|{}",
                txn,
                self.type_tag(),
                page,
                slot,
                hex::encode(before),
                hex::encode(after)
            ),
        }
    }

    /// Parse a single log line. Returns `StoreError::LogParse` on any
    /// malformed field; the journal's reader treats that as the end of a
    /// usable log, per the store's best-effort recovery policy.
    fn parse_line(line: &str) -> StoreResult<LogRecord> {
        let fields: Vec<&str> = line.split('|').collect();
        let bad = || StoreError::LogParse(line.to_string());

        let txn: u64 = fields.get(0).ok_or_else(bad)?.parse().map_err(|_| bad())?;
        let tag = *fields.get(1).ok_or_else(bad)?;
        // page/slot fields must be present even when unused (-1 sentinel).
        fields.get(2).ok_or_else(bad)?;
        fields.get(3).ok_or_else(bad)?;

        match tag {
            "BEGIN" => Ok(LogRecord::Begin { txn }),
            "COMMIT" => Ok(LogRecord::Commit { txn }),
            "ROLLBACK" => Ok(LogRecord::Rollback { txn }),
            "CHECKPOINT" => Ok(LogRecord::Checkpoint { txn }),
            "INSERT" | "UPDATE" => {
                let page: u64 = fields.get(2).ok_or_else(bad)?.parse().map_err(|_| bad())?;
                let slot: usize = fields.get(3).ok_or_else(bad)?.parse().map_err(|_| bad())?;
                let before = decode_image(fields.get(4).ok_or_else(bad)?).map_err(|_| bad())?;
                let after = decode_image(fields.get(5).ok_or_else(bad)?).map_err(|_| bad())?;
                if tag == "INSERT" {
                    Ok(LogRecord::Insert {
                        txn,
                        page,
                        slot,
                        before,
                        after,
                    })
                } else {
                    Ok(LogRecord::Update {
                        txn,
                        page,
                        slot,
                        before,
                        after,
                    })
                }
            }
            _ => Err(bad()),
        }
    }
}

fn decode_image(field: &str) -> Result<[u8; RECORD_SIZE], ()> {
    let bytes = hex::decode(field).map_err(|_| ())?;
    if bytes.len() != RECORD_SIZE {
        return Err(());
    }
    let mut buf = [0u8; RECORD_SIZE];
    buf.copy_from_slice(&bytes);
    Ok(buf)
}

/// The append-only log file, plus the in-memory journal buffer that
/// accumulates records for the span of a single transaction. The buffer
/// is only written to disk as a batch by `flush`, called from commit,
/// rollback and checkpoint; `discard_buffer` drops it unwritten, which is
/// what `crash` relies on to make an uncommitted transaction vanish as if
/// it had never begun.
pub struct LogManager {
    file: File,
    buffer: Vec<LogRecord>,
}

impl LogManager {
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;
        Ok(Self {
            file,
            buffer: Vec::new(),
        })
    }

    /// Append a record to the in-memory buffer. Not yet durable.
    pub fn buffer(&mut self, record: LogRecord) {
        self.buffer.push(record);
    }

    /// Write every buffered record to the log file, in order, then clear
    /// the buffer. On a write failure partway through, the records from
    /// the failing one onward are put back into the buffer rather than
    /// dropped -- `drain` would discard them unconditionally on an early
    /// return, which a later retry has no way to recover.
    pub fn flush(&mut self) -> StoreResult {
        let pending = std::mem::take(&mut self.buffer);
        for (i, record) in pending.iter().enumerate() {
            if let Err(e) = writeln!(self.file, "{}", record.encode_line()) {
                self.buffer = pending[i..].to_vec();
                return Err(e.into());
            }
        }
        if let Err(e) = self.file.flush() {
            return Err(e.into());
        }
        Ok(())
    }

    /// Drop the in-memory buffer without writing it anywhere.
    pub fn discard_buffer(&mut self) {
        self.buffer.clear();
    }

    /// Read and parse every record currently on disk, in order. Stops at
    /// the first malformed line -- that line and everything after it is
    /// ignored, per the store's best-effort recovery policy.
    pub fn read_all(&mut self) -> StoreResult<Vec<LogRecord>> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut records = Vec::new();
        {
            let reader = BufReader::new(&self.file);
            for line in reader.lines() {
                let line = line?;
                if line.is_empty() {
                    continue;
                }
                match LogRecord::parse_line(&line) {
                    Ok(record) => records.push(record),
                    Err(_) => {
                        warn!("malformed log line, ignoring it and everything after: {}", line);
                        break;
                    }
                }
            }
        }
        self.file.seek(SeekFrom::End(0))?;
        Ok(records)
    }

    /// Number of well-formed records currently durable on disk.
    pub fn records_count(&mut self) -> StoreResult<usize> {
        Ok(self.read_all()?.len())
    }

    /// A human-readable dump of the on-disk log, one line per record.
    /// Purely a diagnostic aid; not used by recovery itself.
    pub fn show_log_contents(&mut self) -> StoreResult<String> {
        let records = self.read_all()?;
        let mut out = String::new();
        for record in &records {
            out.push_str(&record.encode_line());
            out.push('\n');
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_record_round_trips_through_text() {
        let record = LogRecord::Insert {
            txn: 1,
            page: 2,
            slot: 3,
            before: [0u8; RECORD_SIZE],
            after: {
                let mut a = [0u8; RECORD_SIZE];
                a[0] = b'x';
                a
            },
        };
        let line = record.encode_line();
        let parsed = LogRecord::parse_line(&line).unwrap();
        assert_eq!(record, parsed);
    }

    #[test]
    fn buffered_records_are_invisible_until_flush() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = LogManager::open(dir.path().join("data.db.log")).unwrap();
        log.buffer(LogRecord::Begin { txn: 1 });
        assert_eq!(log.records_count().unwrap(), 0);
        log.flush().unwrap();
        assert_eq!(log.records_count().unwrap(), 1);
    }

    #[test]
    fn discard_buffer_drops_pending_records() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = LogManager::open(dir.path().join("data.db.log")).unwrap();
        log.buffer(LogRecord::Begin { txn: 1 });
        log.buffer(LogRecord::Insert {
            txn: 1,
            page: 0,
            slot: 0,
            before: [0u8; RECORD_SIZE],
            after: [0u8; RECORD_SIZE],
        });
        log.discard_buffer();
        log.flush().unwrap();
        assert_eq!(log.records_count().unwrap(), 0);
    }

    #[test]
    fn malformed_line_and_everything_after_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = LogManager::open(dir.path().join("data.db.log")).unwrap();
        log.buffer(LogRecord::Begin { txn: 1 });
        log.flush().unwrap();
        writeln!(log.file, "not a valid line").unwrap();
        log.file.flush().unwrap();
        log.buffer(LogRecord::Commit { txn: 1 });
        log.flush().unwrap();

        let records = log.read_all().unwrap();
        assert_eq!(records, vec![LogRecord::Begin { txn: 1 }]);
    }
}
