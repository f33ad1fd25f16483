//! ---
//! upkeep_section: "03-history-logging"
//! upkeep_subsection: "module"
//! upkeep_type: "source"
//! upkeep_scope: "code"
//! upkeep_description: "Task classification and update history."
//! upkeep_version: "v0.1.0-prealpha"
//! upkeep_owner: "tbd"
//! ---
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::Digest;
use tracing::debug;

use crate::event::EventRecord;
use crate::{HistoryError, Result};

/// Format version written to the journal header.
pub const JOURNAL_VERSION: u16 = 1;

/// Journal header stored as the first line of the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct JournalHeader {
    version: u16,
    created_at: DateTime<Utc>,
    hash: String,
}

impl JournalHeader {
    fn new() -> Self {
        let created_at = Utc::now();
        let hash = format!(
            "{:x}",
            sha2::Sha256::digest(created_at.to_rfc3339().as_bytes())
        );
        Self {
            version: JOURNAL_VERSION,
            created_at,
            hash,
        }
    }
}

/// Sequenced journal line wrapping a drained history record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Sequential identifier assigned when appending.
    pub sequence: u64,
    /// Time the record was written to the journal.
    pub recorded_at: DateTime<Utc>,
    /// The history record.
    pub event: EventRecord,
}

/// Destination for drained history records.
pub trait HistorySink {
    /// Durably store one record.
    fn store(&mut self, event: &EventRecord) -> Result<()>;
}

/// Append-only JSON-lines journal of drained update history.
pub struct HistoryJournal {
    path: PathBuf,
    writer: BufWriter<File>,
    next_sequence: u64,
}

impl HistoryJournal {
    /// Open a journal for appending, writing a header if the file is new.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let fresh = !path.exists() || fs::metadata(path)?.len() == 0;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = BufWriter::new(file);

        let next_sequence = if fresh {
            let line = serde_json::to_string(&JournalHeader::new())?;
            writer.write_all(line.as_bytes())?;
            writer.write_all(b"\n")?;
            writer.flush()?;
            0
        } else {
            last_sequence(path)?
        };

        debug!(journal = %path.display(), next_sequence, "history journal opened");
        Ok(Self {
            path: path.to_path_buf(),
            writer,
            next_sequence,
        })
    }

    /// Append a record, returning the assigned sequence number and byte count.
    pub fn append(&mut self, event: EventRecord) -> Result<(u64, usize)> {
        self.next_sequence += 1;
        let entry = JournalEntry {
            sequence: self.next_sequence,
            recorded_at: Utc::now(),
            event,
        };
        let line = serde_json::to_string(&entry)?;
        let bytes = line.len() + 1;
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok((entry.sequence, bytes))
    }

    /// Append a drained batch in order, returning how many entries were written.
    pub fn append_all<I>(&mut self, events: I) -> Result<usize>
    where
        I: IntoIterator<Item = EventRecord>,
    {
        let mut written = 0usize;
        for event in events {
            self.append(event)?;
            written += 1;
        }
        Ok(written)
    }

    /// Path of the journal on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl HistorySink for HistoryJournal {
    fn store(&mut self, event: &EventRecord) -> Result<()> {
        self.append(event.clone()).map(|_| ())
    }
}

fn last_sequence(path: &Path) -> Result<u64> {
    let reader = BufReader::new(File::open(path)?);
    let mut last = 0u64;
    for line in reader.lines().skip(1) {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        if let Ok(entry) = serde_json::from_str::<JournalEntry>(&line) {
            last = entry.sequence;
        }
    }
    Ok(last)
}

/// Replay the journal in order, invoking the callback for each entry.
pub fn replay<F>(path: &Path, mut handler: F) -> Result<usize>
where
    F: FnMut(JournalEntry) -> Result<()>,
{
    let mut count = 0usize;
    for entry in JournalReader::open(path)? {
        handler(entry?)?;
        count += 1;
    }
    Ok(count)
}

/// Streaming iterator over journal entries.
pub struct JournalReader {
    lines: std::io::Lines<BufReader<File>>,
}

impl JournalReader {
    /// Open the journal for sequential reading, skipping the header.
    pub fn open(path: &Path) -> Result<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        let mut header = String::new();
        reader.read_line(&mut header)?;
        Ok(Self {
            lines: reader.lines(),
        })
    }
}

impl Iterator for JournalReader {
    type Item = Result<JournalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.lines.next()? {
                Ok(line) if line.trim().is_empty() => continue,
                Ok(line) => return Some(serde_json::from_str(&line).map_err(HistoryError::from)),
                Err(err) => return Some(Err(err.into())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn installed(name: &str) -> EventRecord {
        EventRecord::InstalledModule {
            name: name.into(),
            timestamp: Utc::now(),
            new_version: Some(2),
            succeeded: true,
            delta: true,
        }
    }

    #[test]
    fn append_and_replay() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.jsonl");
        let mut journal = HistoryJournal::open(&path).unwrap();
        journal
            .append_all(vec![installed("voice"), installed("rpc")])
            .unwrap();

        let mut names = Vec::new();
        let count = replay(&path, |entry| {
            names.push(entry.event.name().to_owned());
            Ok(())
        })
        .unwrap();
        assert_eq!(count, 2);
        assert_eq!(names, vec!["voice", "rpc"]);
    }

    #[test]
    fn reopen_continues_sequence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("history.jsonl");
        {
            let mut journal = HistoryJournal::open(&path).unwrap();
            journal.append(installed("voice")).unwrap();
        }
        let mut journal = HistoryJournal::open(&path).unwrap();
        let (sequence, bytes) = journal.append(installed("rpc")).unwrap();
        assert_eq!(sequence, 2);
        assert!(bytes > 0);

        let sequences: Vec<_> = JournalReader::open(&path)
            .unwrap()
            .map(|entry| entry.unwrap().sequence)
            .collect();
        assert_eq!(sequences, vec![1, 2]);
    }
}
