//! Append-only event log with CRC-framed records and truncation-tolerant
//! replay. Record layout: `[u32 len][bincode event][u32 crc32]`, all fields
//! little-endian, crc over the serialized event bytes.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

fn encode_event(event: &Event) -> io::Result<Vec<u8>> {
    let payload = bincode::serialize(event)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let mut record = Vec::with_capacity(payload.len() + 8);
    record.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    record.extend_from_slice(&payload);
    record.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    Ok(record)
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Buffer one record. Durability comes from the next `flush_sync`.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        let record = encode_event(event)?;
        self.writer.write_all(&record)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    /// Flush buffered records and fsync. Group commit amortizes this over a
    /// whole batch.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()
    }

    /// Read every intact record. A short or corrupt tail record is dropped
    /// silently: it was never acknowledged, so losing it is correct.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        let mut data = Vec::new();
        match File::open(path) {
            Ok(mut f) => {
                f.read_to_end(&mut data)?;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        }

        let mut events = Vec::new();
        let mut pos = 0usize;
        while pos + 4 <= data.len() {
            let len = u32::from_le_bytes(
                data[pos..pos + 4].try_into().expect("4-byte slice"),
            ) as usize;
            let payload_start = pos + 4;
            let crc_start = payload_start + len;
            let record_end = crc_start + 4;
            if record_end > data.len() {
                tracing::warn!(offset = pos, "truncated WAL record, dropping tail");
                break;
            }
            let payload = &data[payload_start..crc_start];
            let stored_crc = u32::from_le_bytes(
                data[crc_start..record_end].try_into().expect("4-byte slice"),
            );
            if crc32fast::hash(payload) != stored_crc {
                tracing::warn!(offset = pos, "WAL record failed CRC, dropping tail");
                break;
            }
            match bincode::deserialize::<Event>(payload) {
                Ok(event) => events.push(event),
                Err(e) => {
                    tracing::warn!(offset = pos, error = %e, "undecodable WAL record, dropping tail");
                    break;
                }
            }
            pos = record_end;
        }
        Ok(events)
    }

    /// Write a snapshot of `events` to a sibling temp file and fsync it.
    /// Split from `swap_compact_file` so the writer task can keep the live
    /// WAL handle untouched until the new file is durable.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let tmp = compact_tmp_path(path);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)?;
        let mut writer = BufWriter::new(file);
        for event in events {
            writer.write_all(&encode_event(event)?)?;
        }
        writer.flush()?;
        writer.get_ref().sync_data()?;
        Ok(())
    }

    /// Atomically replace the live WAL with the compacted temp file and
    /// reopen the handle on it.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        let tmp = compact_tmp_path(&self.path);
        std::fs::rename(&tmp, &self.path)?;
        let file = OpenOptions::new().append(true).open(&self.path)?;
        // fsync the directory so the rename itself survives a crash
        if let Some(parent) = self.path.parent() {
            File::open(parent)?.sync_all()?;
        }
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }
}

fn compact_tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".compact");
    PathBuf::from(tmp)
}
