//! timpal-storage — crash-safe file persistence for the chain.
//!
//! Layout under the data directory:
//!
//!   ledger/blocks/block_<height>.json   blocks by height
//!   ledger/hashes/<hash>.json           blocks by hash (reverse lookup)
//!   ledger/state.json                   ledger state snapshot
//!   ledger/metadata.json                chain height, timestamps
//!   snapshots/<name>/                   full copies of ledger/
//!
//! Every write is atomic: a temp file in the destination directory, fsync,
//! then rename. A crash can lose the newest write but never corrupt an
//! existing file.

pub mod recovery;

pub use recovery::CrashRecovery;

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use timpal_core::block::Block;
use timpal_core::error::TimpalError;
use tracing::{info, warn};

/// Result of [`ChainStore::verify_integrity`].
#[derive(Debug, Clone)]
pub struct IntegrityReport {
    pub healthy: bool,
    pub checks_performed: Vec<&'static str>,
    pub issues_found: Vec<String>,
}

/// File-backed block and state store.
pub struct ChainStore {
    data_dir: PathBuf,
    blocks_dir: PathBuf,
    hashes_dir: PathBuf,
    state_file: PathBuf,
    metadata_file: PathBuf,
    snapshots_dir: PathBuf,
}

impl ChainStore {
    /// Open (creating as needed) a store rooted at `data_dir`.
    pub fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self, TimpalError> {
        let data_dir = data_dir.as_ref().to_path_buf();
        let ledger_dir = data_dir.join("ledger");
        let store = Self {
            blocks_dir: ledger_dir.join("blocks"),
            hashes_dir: ledger_dir.join("hashes"),
            state_file: ledger_dir.join("state.json"),
            metadata_file: ledger_dir.join("metadata.json"),
            snapshots_dir: data_dir.join("snapshots"),
            data_dir,
        };
        for dir in [&store.blocks_dir, &store.hashes_dir, &store.snapshots_dir] {
            fs::create_dir_all(dir).map_err(|e| TimpalError::Storage(e.to_string()))?;
        }
        if !store.metadata_file.exists() {
            store.atomic_write_json(&store.metadata_file, &serde_json::json!({}))?;
        }
        info!(dir = %store.blocks_dir.display(), "chain store opened");
        Ok(store)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    // ── Atomic writes ────────────────────────────────────────────────────────

    /// Temp file in the target directory + fsync + rename. POSIX rename is
    /// atomic, so readers observe either the old or the new content.
    fn atomic_write(&self, path: &Path, contents: &str) -> Result<(), TimpalError> {
        let dir = path
            .parent()
            .ok_or_else(|| TimpalError::Storage(format!("no parent dir for {}", path.display())))?;
        let tmp = dir.join(format!(
            ".tmp_{}_{}",
            std::process::id(),
            path.file_name().and_then(|n| n.to_str()).unwrap_or("file")
        ));
        let result = (|| {
            let mut f = File::create(&tmp).map_err(|e| TimpalError::Storage(e.to_string()))?;
            f.write_all(contents.as_bytes())
                .map_err(|e| TimpalError::Storage(e.to_string()))?;
            f.sync_all().map_err(|e| TimpalError::Storage(e.to_string()))?;
            fs::rename(&tmp, path).map_err(|e| TimpalError::Storage(e.to_string()))
        })();
        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        result
    }

    fn atomic_write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), TimpalError> {
        let json = serde_json::to_string_pretty(value)
            .map_err(|e| TimpalError::Serialization(e.to_string()))?;
        self.atomic_write(path, &json)
    }

    fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>, TimpalError> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(path).map_err(|e| TimpalError::Storage(e.to_string()))?;
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| TimpalError::Serialization(e.to_string()))
    }

    // ── Blocks ───────────────────────────────────────────────────────────────

    fn block_path(&self, height: u64) -> PathBuf {
        self.blocks_dir.join(format!("block_{height}.json"))
    }

    pub fn put_block(&self, height: u64, block: &Block) -> Result<(), TimpalError> {
        self.atomic_write_json(&self.block_path(height), block)
    }

    pub fn get_block(&self, height: u64) -> Result<Option<Block>, TimpalError> {
        self.read_json(&self.block_path(height))
    }

    pub fn put_block_by_hash(&self, block_hash: &str, block: &Block) -> Result<(), TimpalError> {
        self.atomic_write_json(&self.hashes_dir.join(format!("{block_hash}.json")), block)
    }

    pub fn get_block_by_hash(&self, block_hash: &str) -> Result<Option<Block>, TimpalError> {
        self.read_json(&self.hashes_dir.join(format!("{block_hash}.json")))
    }

    /// Persist a freshly applied block under both indices and advance the
    /// chain-height metadata.
    pub fn save_new_block(&self, block: &Block) -> Result<(), TimpalError> {
        self.put_block(block.height, block)?;
        self.put_block_by_hash(&block.block_hash, block)?;

        let current = self.chain_height()?;
        if current.map(|h| block.height > h).unwrap_or(true) {
            self.put_metadata("chain_height", serde_json::json!(block.height))?;
        }
        self.put_metadata(
            "last_saved",
            serde_json::json!(chrono::Utc::now().to_rfc3339()),
        )?;
        Ok(())
    }

    /// Load blocks 0..=chain_height. A gap below the tip is a consistency
    /// error, surfaced as `MissingBlock`.
    pub fn load_blocks(&self) -> Result<Vec<Block>, TimpalError> {
        let height = match self.chain_height()? {
            Some(h) => h,
            None => return Ok(Vec::new()),
        };
        let mut blocks = Vec::with_capacity(height as usize + 1);
        for h in 0..=height {
            match self.get_block(h)? {
                Some(b) => blocks.push(b),
                None => return Err(TimpalError::MissingBlock(h)),
            }
        }
        Ok(blocks)
    }

    // ── State & metadata ─────────────────────────────────────────────────────

    pub fn save_state<T: Serialize>(&self, state: &T) -> Result<(), TimpalError> {
        self.atomic_write_json(&self.state_file, state)
    }

    pub fn load_state<T: DeserializeOwned>(&self) -> Result<Option<T>, TimpalError> {
        self.read_json(&self.state_file)
    }

    pub fn put_metadata(&self, key: &str, value: serde_json::Value) -> Result<(), TimpalError> {
        let mut metadata: serde_json::Map<String, serde_json::Value> = self
            .read_json(&self.metadata_file)?
            .unwrap_or_default();
        metadata.insert(key.to_string(), value);
        self.atomic_write_json(&self.metadata_file, &metadata)
    }

    pub fn get_metadata(&self, key: &str) -> Result<Option<serde_json::Value>, TimpalError> {
        let metadata: Option<serde_json::Map<String, serde_json::Value>> =
            self.read_json(&self.metadata_file)?;
        Ok(metadata.and_then(|m| m.get(key).cloned()))
    }

    pub fn chain_height(&self) -> Result<Option<u64>, TimpalError> {
        Ok(self.get_metadata("chain_height")?.and_then(|v| v.as_u64()))
    }

    // ── Snapshots ────────────────────────────────────────────────────────────

    /// Copy the entire ledger directory into `snapshots/<name>/`.
    pub fn create_snapshot(&self, name: &str) -> Result<(), TimpalError> {
        let target = self.snapshots_dir.join(name);
        if target.exists() {
            fs::remove_dir_all(&target).map_err(|e| TimpalError::Storage(e.to_string()))?;
        }
        copy_dir(&self.data_dir.join("ledger"), &target)?;
        info!(snapshot = name, "snapshot created");
        Ok(())
    }

    /// Replace the ledger directory with the snapshot's contents.
    pub fn restore_snapshot(&self, name: &str) -> Result<(), TimpalError> {
        let source = self.snapshots_dir.join(name);
        if !source.exists() {
            return Err(TimpalError::Storage(format!("snapshot not found: {name}")));
        }
        let ledger_dir = self.data_dir.join("ledger");
        if ledger_dir.exists() {
            fs::remove_dir_all(&ledger_dir).map_err(|e| TimpalError::Storage(e.to_string()))?;
        }
        copy_dir(&source, &ledger_dir)?;
        warn!(snapshot = name, "ledger restored from snapshot");
        Ok(())
    }

    /// Snapshot names, newest first by modification time.
    pub fn list_snapshots(&self) -> Result<Vec<String>, TimpalError> {
        let mut entries: Vec<(std::time::SystemTime, String)> = Vec::new();
        for entry in
            fs::read_dir(&self.snapshots_dir).map_err(|e| TimpalError::Storage(e.to_string()))?
        {
            let entry = entry.map_err(|e| TimpalError::Storage(e.to_string()))?;
            if entry.path().is_dir() {
                let modified = entry
                    .metadata()
                    .and_then(|m| m.modified())
                    .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
                entries.push((modified, entry.file_name().to_string_lossy().into_owned()));
            }
        }
        entries.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(entries.into_iter().map(|(_, name)| name).collect())
    }

    // ── Integrity ────────────────────────────────────────────────────────────

    /// Presence and continuity checks over the on-disk layout.
    pub fn verify_integrity(&self) -> IntegrityReport {
        let mut issues = Vec::new();

        if !self.metadata_file.exists() {
            issues.push("missing metadata.json".to_string());
        }
        if !self.blocks_dir.exists() {
            issues.push("missing blocks directory".to_string());
        }

        match self.chain_height() {
            Ok(Some(height)) => {
                if !self.state_file.exists() {
                    issues.push("missing state.json".to_string());
                }
                let missing: Vec<u64> =
                    (0..=height).filter(|h| !self.block_path(*h).exists()).collect();
                if !missing.is_empty() {
                    issues.push(format!(
                        "missing blocks below tip {height}: {:?}",
                        &missing[..missing.len().min(10)]
                    ));
                }
            }
            Ok(None) => {} // Fresh store: nothing to check yet.
            Err(e) => issues.push(format!("unreadable metadata: {e}")),
        }

        IntegrityReport {
            healthy: issues.is_empty(),
            checks_performed: vec!["metadata", "state", "blocks", "continuity"],
            issues_found: issues,
        }
    }
}

fn copy_dir(source: &Path, target: &Path) -> Result<(), TimpalError> {
    fs::create_dir_all(target).map_err(|e| TimpalError::Storage(e.to_string()))?;
    for entry in fs::read_dir(source).map_err(|e| TimpalError::Storage(e.to_string()))? {
        let entry = entry.map_err(|e| TimpalError::Storage(e.to_string()))?;
        let dest = target.join(entry.file_name());
        if entry.path().is_dir() {
            copy_dir(&entry.path(), &dest)?;
        } else {
            fs::copy(entry.path(), &dest).map_err(|e| TimpalError::Storage(e.to_string()))?;
        }
    }
    Ok(())
}
