//! Change log read from newline-delimited JSON files.
//!
//! Device `dev` lives at `<dir>/dev.jsonl`, one [`ChangelogRecord`] per line.
//! Consumer `c` records its cleared position in `<dir>/dev.c.cleared`. A new
//! session skips every record already cleared by all consumers of the device,
//! and every record cleared through this source, so reopening after the end
//! of the log does not hand out the same records again.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, ErrorKind, Seek, SeekFrom, Write};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use log::debug;

use crate::changelog::{
    classify_receive_error, ChangelogRecord, ChangelogSession, ChangelogSource, Received,
    StreamFlags,
};
use crate::error::{Error, Result};
use crate::layout::validate_component;

const LOG_SUFFIX: &str = ".jsonl";
const CLEARED_SUFFIX: &str = ".cleared";

/// Clones share the record of what was cleared through them.
#[derive(Debug, Clone)]
pub struct JsonlChangelog {
    dir: PathBuf,
    cleared_here: Arc<Mutex<HashMap<String, u64>>>,
}

impl JsonlChangelog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cleared_here: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn log_path(&self, device: &str) -> PathBuf {
        self.dir.join(format!("{device}{LOG_SUFFIX}"))
    }

    pub fn cleared_path(&self, device: &str, consumer: &str) -> PathBuf {
        self.dir.join(format!("{device}.{consumer}{CLEARED_SUFFIX}"))
    }

    /// Highest index cleared by `consumer`, zero if it never cleared.
    pub fn cleared_index(&self, device: &str, consumer: &str) -> Result<u64> {
        read_cleared(&self.cleared_path(device, consumer))
    }

    fn cleared_here(&self, device: &str) -> Result<u64> {
        let cleared = self
            .cleared_here
            .lock()
            .map_err(|_| Error::Poisoned("change log cleared map poisoned"))?;
        Ok(cleared.get(device).copied().unwrap_or(0))
    }

    fn note_cleared(&self, device: &str, index: u64) -> Result<()> {
        let mut cleared = self
            .cleared_here
            .lock()
            .map_err(|_| Error::Poisoned("change log cleared map poisoned"))?;
        let entry = cleared.entry(device.to_string()).or_insert(0);
        *entry = (*entry).max(index);
        Ok(())
    }

    /// Lowest cleared index over every consumer of `device`.
    fn purge_floor(&self, device: &str) -> Result<u64> {
        let prefix = format!("{device}.");
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(Error::Io(err)),
        };
        let mut floor: Option<u64> = None;
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let name = match name.to_str() {
                Some(name) => name,
                None => continue,
            };
            if !name.starts_with(&prefix) || !name.ends_with(CLEARED_SUFFIX) {
                continue;
            }
            let cleared = read_cleared(&entry.path())?;
            floor = Some(floor.map_or(cleared, |current| current.min(cleared)));
        }
        Ok(floor.unwrap_or(0))
    }
}

fn read_cleared(path: &Path) -> Result<u64> {
    match fs::read_to_string(path) {
        Ok(text) => text
            .trim()
            .parse::<u64>()
            .map_err(|_| Error::Stream(format!("corrupt cleared index in {}", path.display()))),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(0),
        Err(err) => Err(Error::Io(err)),
    }
}

impl ChangelogSource for JsonlChangelog {
    type Session = JsonlSession;

    fn open(&self, device: &str) -> Result<JsonlSession> {
        validate_component("device", device)?;
        let path = self.log_path(device);
        let file = File::open(&path).map_err(|err| {
            Error::Stream(format!("failed to open change log {}: {err}", path.display()))
        })?;
        let ino = file.metadata()?.ino();
        let skip_through = self.purge_floor(device)?.max(self.cleared_here(device)?);
        debug!(
            "opened change log {} (skipping through record {})",
            path.display(),
            skip_through
        );
        Ok(JsonlSession {
            path,
            reader: BufReader::new(file),
            ino,
            offset: 0,
            skip_through,
            flags: StreamFlags::default(),
            line: String::new(),
        })
    }

    fn acknowledge(&self, device: &str, consumer: &str, index: u64) -> Result<()> {
        validate_component("device", device)?;
        validate_component("consumer", consumer)?;
        let path = self.cleared_path(device, consumer);
        if read_cleared(&path)? >= index {
            return self.note_cleared(device, index);
        }
        let tmp_path = path.with_extension("cleared.tmp");
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;
        writeln!(file, "{index}")?;
        file.sync_all()?;
        fs::rename(&tmp_path, &path)?;
        self.note_cleared(device, index)
    }
}

/// Read position in one device's log file.
#[derive(Debug)]
pub struct JsonlSession {
    path: PathBuf,
    reader: BufReader<File>,
    ino: u64,
    offset: u64,
    skip_through: u64,
    flags: StreamFlags,
    line: String,
}

impl JsonlSession {
    pub fn flags(&self) -> StreamFlags {
        self.flags
    }

    /// Decides what running out of complete lines means: the file was
    /// replaced or truncated under us, or there simply is nothing new yet.
    fn at_end(&mut self) -> Received {
        match fs::metadata(&self.path) {
            Ok(meta) if meta.ino() != self.ino => Received::NeedsRestart(io::Error::new(
                ErrorKind::InvalidInput,
                format!("{} was replaced", self.path.display()),
            )),
            Ok(meta) if meta.len() < self.offset => Received::NeedsRestart(io::Error::new(
                ErrorKind::InvalidInput,
                format!("{} was truncated", self.path.display()),
            )),
            Ok(_) => Received::EndOfStream,
            Err(err) if err.kind() == ErrorKind::NotFound => Received::NeedsRestart(err),
            Err(err) => classify_receive_error(err),
        }
    }
}

impl ChangelogSession for JsonlSession {
    fn set_options(&mut self, flags: StreamFlags) -> Result<()> {
        self.flags = flags;
        Ok(())
    }

    fn receive(&mut self) -> Received {
        loop {
            self.line.clear();
            let read = match self.reader.read_line(&mut self.line) {
                Ok(read) => read,
                Err(err) => return classify_receive_error(err),
            };
            if read == 0 {
                return self.at_end();
            }
            if !self.line.ends_with('\n') {
                // Partial line from a writer still appending; re-read it later.
                if let Err(err) = self.reader.seek(SeekFrom::Start(self.offset)) {
                    return classify_receive_error(err);
                }
                return self.at_end();
            }
            self.offset += read as u64;

            let text = self.line.trim();
            if text.is_empty() {
                continue;
            }
            let record: ChangelogRecord = match serde_json::from_str(text) {
                Ok(record) => record,
                Err(err) => {
                    return Received::Fatal(Error::Stream(format!(
                        "malformed record at byte {} of {}: {err}",
                        self.offset - read as u64,
                        self.path.display()
                    )))
                }
            };
            if record.index <= self.skip_through {
                continue;
            }
            return Received::Record(record);
        }
    }
}
