//! Per-destination document store with content-hash deduplication.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

/// Ledger file kept in every destination directory.
pub const LEDGER_FILE: &str = "_digests.txt";

/// SHA-256 of `content`, hex encoded.
pub fn compute_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// Append-only set of content hashes, one hex digest per line.
#[derive(Debug)]
pub struct ContentLedger {
    path: PathBuf,
    hashes: HashSet<String>,
}

impl ContentLedger {
    pub fn open(dir: &Path) -> io::Result<Self> {
        let path = dir.join(LEDGER_FILE);
        let hashes = match std::fs::read_to_string(&path) {
            Ok(text) => text
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => HashSet::new(),
            Err(e) => return Err(e),
        };
        Ok(Self { path, hashes })
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.hashes.contains(hash)
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    /// Append a hash. Already-known hashes are not written twice.
    pub fn record(&mut self, hash: &str) -> io::Result<()> {
        if self.hashes.contains(hash) {
            return Ok(());
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", hash)?;
        self.hashes.insert(hash.to_string());
        Ok(())
    }
}

/// What happened to a set of bytes handed to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved(PathBuf),
    Duplicate,
}

/// A destination directory plus its ledger.
#[derive(Debug)]
pub struct DocumentStore {
    dir: PathBuf,
    ledger: ContentLedger,
}

impl DocumentStore {
    pub fn open(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let ledger = ContentLedger::open(&dir)?;
        Ok(Self { dir, ledger })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ledger(&self) -> &ContentLedger {
        &self.ledger
    }

    /// Persist `content` under `filename` unless its hash is already known.
    /// Never overwrites: collisions get ` (2)`, ` (3)`, ... before the
    /// extension.
    pub fn save(&mut self, content: &[u8], filename: &str) -> io::Result<SaveOutcome> {
        let hash = compute_hash(content);
        if self.ledger.contains(&hash) {
            debug!("Duplicate content {} for {}", &hash[..12], filename);
            return Ok(SaveOutcome::Duplicate);
        }

        let (path, file) = self.create_unique(filename)?;
        let file = write_or_discard(&path, file, content)?;
        if let Err(e) = file.sync_all() {
            discard(&path);
            return Err(e);
        }
        self.ledger.record(&hash)?;
        Ok(SaveOutcome::Saved(path))
    }

    fn create_unique(&self, filename: &str) -> io::Result<(PathBuf, File)> {
        let mut n = 1;
        loop {
            let candidate = if n == 1 {
                filename.to_string()
            } else {
                numbered_filename(filename, n)
            };
            let path = self.dir.join(&candidate);
            if candidate == LEDGER_FILE {
                n += 1;
                continue;
            }
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => return Ok((path, file)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => n += 1,
                Err(e) => return Err(e),
            }
        }
    }
}

/// Write `content` into a freshly created file. On failure the file is
/// removed so a truncated copy never holds the name.
fn write_or_discard<W: Write>(path: &Path, mut writer: W, content: &[u8]) -> io::Result<W> {
    match writer.write_all(content).and_then(|()| writer.flush()) {
        Ok(()) => Ok(writer),
        Err(e) => {
            drop(writer);
            discard(path);
            Err(e)
        }
    }
}

fn discard(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        warn!("Could not remove partial file {}: {}", path.display(), e);
    }
}

/// `report.pdf` → `report (n).pdf`.
pub fn numbered_filename(filename: &str, n: u32) -> String {
    match filename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{} ({}).{}", stem, n, ext),
        _ => format!("{} ({})", filename, n),
    }
}
