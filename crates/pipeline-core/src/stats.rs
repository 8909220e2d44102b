//! Fixed-size shared-memory stats table: each filter input gets one row
//! at construction, so an external process can monitor throughput
//! read-only, without talking to the pipeline at all.
//!
//! Grounded on `original_source/src/lib_pipeline/stats.hpp` /
//! `filter_input.hpp`'s `statsEntry->name`/`statsEntry->value` and
//! spec.md §4.I/§6: 256 rows of `{ name: [u8; 255], value: i32 }`,
//! terminated by the first empty-name row. The original memory-maps a
//! POSIX shared memory segment; here `memmap2` plays the same role over
//! a plain file (named, for a real deployment to share across processes,
//! or an anonymous temp file for a single-process run/test).

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Arc;

use memmap2::MmapMut;
use parking_lot::Mutex;
use thiserror::Error;

pub const ROW_COUNT: usize = 256;
pub const NAME_LEN: usize = 255;
const ROW_SIZE: usize = NAME_LEN + 4;
const TABLE_SIZE: usize = ROW_COUNT * ROW_SIZE;

#[derive(Debug, Error)]
pub enum StatsError {
    #[error("stats table is full ({0} rows already allocated)")]
    TableFull(usize),
    #[error("stats row name {0:?} exceeds {max} bytes", max = NAME_LEN - 1)]
    NameTooLong(String),
    #[error("io error backing the stats table: {0}")]
    Io(#[from] std::io::Error),
}

/// The shared-memory-backed stats table. One per pipeline.
pub struct StatsRegistry {
    mmap: Mutex<MmapMut>,
}

impl StatsRegistry {
    /// Backs the table with a private, unnamed temp file — sufficient
    /// for a single-process pipeline that only wants the uniform
    /// row-allocation API, not actual cross-process sharing.
    pub fn anonymous() -> Result<Arc<Self>, StatsError> {
        let file = tempfile::tempfile()?;
        file.set_len(TABLE_SIZE as u64)?;
        let mmap = unsafe { MmapMut::map_mut(&file)? };
        Ok(Arc::new(Self { mmap: Mutex::new(mmap) }))
    }

    /// Backs the table with a named file at `path`, creating it if
    /// necessary, so an external reader can `mmap` the same path
    /// read-only (spec.md §6 "external interfaces").
    pub fn at_path(path: impl AsRef<Path>) -> Result<Arc<Self>, StatsError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        file.set_len(TABLE_SIZE as u64)?;
        let mmap = unsafe { MmapMut::map_mut(&file)? };
        Ok(Arc::new(Self { mmap: Mutex::new(mmap) }))
    }

    /// Claims the first empty-name row and writes `name` into it.
    /// Returns `StatsError::TableFull` once all 256 rows are taken.
    pub fn allocate_row(self: &Arc<Self>, name: &str) -> Result<StatsRow, StatsError> {
        if name.len() > NAME_LEN - 1 {
            return Err(StatsError::NameTooLong(name.to_string()));
        }
        let mut mmap = self.mmap.lock();
        for row in 0..ROW_COUNT {
            let offset = row * ROW_SIZE;
            if mmap[offset] == 0 {
                let bytes = name.as_bytes();
                mmap[offset..offset + bytes.len()].copy_from_slice(bytes);
                for b in &mut mmap[offset + bytes.len()..offset + NAME_LEN] {
                    *b = 0;
                }
                let val_off = offset + NAME_LEN;
                mmap[val_off..val_off + 4].copy_from_slice(&0i32.to_ne_bytes());
                drop(mmap);
                return Ok(StatsRow {
                    registry: Arc::clone(self),
                    row,
                });
            }
        }
        Err(StatsError::TableFull(ROW_COUNT))
    }

    fn read_value(&self, row: usize) -> i32 {
        let mmap = self.mmap.lock();
        let val_off = row * ROW_SIZE + NAME_LEN;
        i32::from_ne_bytes(mmap[val_off..val_off + 4].try_into().unwrap())
    }

    fn write_value(&self, row: usize, value: i32) {
        let mut mmap = self.mmap.lock();
        let val_off = row * ROW_SIZE + NAME_LEN;
        mmap[val_off..val_off + 4].copy_from_slice(&value.to_ne_bytes());
    }

    fn read_name(&self, row: usize) -> String {
        let mmap = self.mmap.lock();
        let offset = row * ROW_SIZE;
        let raw = &mmap[offset..offset + NAME_LEN];
        let len = raw.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
        String::from_utf8_lossy(&raw[..len]).into_owned()
    }
}

/// A handle to one row, owned by whichever filter input allocated it.
pub struct StatsRow {
    registry: Arc<StatsRegistry>,
    row: usize,
}

impl StatsRow {
    pub fn increment(&self) {
        let value = self.registry.read_value(self.row);
        self.registry.write_value(self.row, value + 1);
    }

    pub fn set(&self, value: i32) {
        self.registry.write_value(self.row, value);
    }

    pub fn get(&self) -> i32 {
        self.registry.read_value(self.row)
    }

    pub fn name(&self) -> String {
        self.registry.read_name(self.row)
    }
}
