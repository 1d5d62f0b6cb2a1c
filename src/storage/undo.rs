//! Undo log.
//!
//! Before a page is changed for the first time after a checkpoint, its prior
//! image is appended here, and so is the store state before it first
//! changes. The log is flushed before any dirty page reaches the database
//! file. If the process dies before the next checkpoint commits, replaying
//! the log restores the database to the last checkpoint.
//!
//! File format: an 8-byte magic and the epoch (u64, big-endian), then records
//! framed as a u32 length followed by the bincode encoding of the record. A
//! torn record at the tail is ignored.

use crate::storage::error::StorageResult;
use crate::storage::meta::StoreState;
use crate::storage::page::PageId;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const UNDO_MAGIC: &[u8; 8] = b"PBTUNDO1";

const HEADER_SIZE: usize = 16;

/// How a page enters the undo log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndoImage {
    /// The page is new in this epoch; undoing it means clearing it.
    Fresh,
    /// Record whatever the store currently holds for the page.
    Prior,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UndoRecord {
    /// Image of a page as of the last checkpoint, `None` if it was empty.
    Page {
        page_id: PageId,
        image: Option<Vec<u8>>,
    },
    /// Store state as of the last checkpoint.
    State(StoreState),
}

pub struct UndoLog {
    path: PathBuf,
    file: BufWriter<File>,
    epoch: u64,
    logged: HashSet<PageId>,
    state_logged: bool,
    record_count: usize,
}

impl UndoLog {
    /// Create an empty log for `epoch`, replacing any existing file.
    pub fn create(path: &Path, epoch: u64) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        let mut log = Self {
            path: path.to_path_buf(),
            file: BufWriter::new(file),
            epoch,
            logged: HashSet::new(),
            state_logged: false,
            record_count: 0,
        };
        log.write_header()?;
        Ok(log)
    }

    /// Read the epoch and records of an existing log.
    ///
    /// Returns `None` if there is no log or it has no valid header.
    pub fn read(path: &Path) -> StorageResult<Option<(u64, Vec<UndoRecord>)>> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if bytes.len() < HEADER_SIZE || &bytes[..8] != UNDO_MAGIC {
            warn!("ignoring undo log {} without a valid header", path.display());
            return Ok(None);
        }
        let mut buf = Bytes::from(bytes);
        buf.advance(8);
        let epoch = buf.get_u64();

        let mut records = Vec::new();
        while buf.remaining() >= 4 {
            let len = buf.get_u32() as usize;
            if buf.remaining() < len {
                debug!("undo log ends with a torn record");
                break;
            }
            let payload = buf.split_to(len);
            match bincode::deserialize::<UndoRecord>(&payload) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!("undo log record {} is unreadable: {}", records.len(), e);
                    break;
                }
            }
        }
        Ok(Some((epoch, records)))
    }

    fn write_header(&mut self) -> StorageResult<()> {
        let mut header = BytesMut::with_capacity(HEADER_SIZE);
        header.put_slice(UNDO_MAGIC);
        header.put_u64(self.epoch);
        self.file.write_all(&header)?;
        self.file.flush()?;
        self.file.get_mut().sync_data()?;
        Ok(())
    }

    fn append(&mut self, record: &UndoRecord) -> StorageResult<()> {
        let payload = bincode::serialize(record)?;
        let mut frame = BytesMut::with_capacity(4 + payload.len());
        frame.put_u32(payload.len() as u32);
        frame.put_slice(&payload);
        self.file.write_all(&frame)?;
        self.record_count += 1;
        Ok(())
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record_count(&self) -> usize {
        self.record_count
    }

    pub fn is_logged(&self, page_id: PageId) -> bool {
        self.logged.contains(&page_id)
    }

    /// Record the checkpoint image of a page. Later calls for the same page
    /// in this epoch are ignored.
    pub fn log_page(&mut self, page_id: PageId, image: Option<Vec<u8>>) -> StorageResult<()> {
        if !self.logged.insert(page_id) {
            return Ok(());
        }
        self.append(&UndoRecord::Page { page_id, image })
    }

    /// Record the checkpoint store state, once per epoch.
    pub fn log_state(&mut self, state: &StoreState) -> StorageResult<()> {
        if self.state_logged {
            return Ok(());
        }
        self.state_logged = true;
        self.append(&UndoRecord::State(state.clone()))
    }

    /// Push buffered records to the file, and to the device if `sync` is set.
    pub fn flush(&mut self, sync: bool) -> StorageResult<()> {
        self.file.flush()?;
        if sync {
            self.file.get_mut().sync_data()?;
        }
        Ok(())
    }

    /// Discard all records and start `epoch`.
    pub fn reset(&mut self, epoch: u64) -> StorageResult<()> {
        self.file.flush()?;
        let file = self.file.get_mut();
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        self.epoch = epoch;
        self.logged.clear();
        self.state_logged = false;
        self.record_count = 0;
        self.write_header()
    }
}
