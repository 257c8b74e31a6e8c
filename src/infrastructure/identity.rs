//! Client-identity reputation store
//!
//! Tracks which client identity strings (User-Agent values) have recently
//! succeeded or failed against the origin. The store is backed by two plain-text
//! log files, one line per identity, loaded at startup and rewritten on change.
//!
//! An identity is valid once it has a recorded success and no recorded failure.
//! A failure invalidates the identity immediately and permanently, even if it
//! succeeded before.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tracing::{debug, warn};

const SUCCESS_LOG: &str = "successful_identities.log";
const FAILED_LOG: &str = "failed_identities.log";

/// Stock identities used when the store has no history yet.
const SEED_IDENTITIES: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/125.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:127.0) Gecko/20100101 Firefox/127.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
];

#[derive(Debug, Default)]
struct ReputationSets {
    succeeded: HashSet<String>,
    failed: HashSet<String>,
}

/// File-backed reputation store for outbound client identities.
#[derive(Debug)]
pub struct IdentityStore {
    dir: PathBuf,
    sets: Mutex<ReputationSets>,
}

impl IdentityStore {
    /// Load reputation history from `dir`, creating it if needed. Missing log
    /// files are treated as empty history.
    pub fn load(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create identity dir {}", dir.display()))?;
        let succeeded = read_identity_set(&dir.join(SUCCESS_LOG))?;
        let failed = read_identity_set(&dir.join(FAILED_LOG))?;
        debug!(
            succeeded = succeeded.len(),
            failed = failed.len(),
            "identity store loaded"
        );
        Ok(Self {
            dir: dir.to_path_buf(),
            sets: Mutex::new(ReputationSets { succeeded, failed }),
        })
    }

    /// Identities with a success and no recorded failure, in arbitrary order.
    /// Falls back to the stock seed list when the store has no usable history.
    pub fn valid_identities(&self) -> Vec<String> {
        let sets = self.sets.lock();
        let valid: Vec<String> = sets
            .succeeded
            .difference(&sets.failed)
            .cloned()
            .collect();
        if valid.is_empty() {
            SEED_IDENTITIES
                .iter()
                .map(|s| s.to_string())
                .filter(|s| !sets.failed.contains(s))
                .collect()
        } else {
            valid
        }
    }

    /// Whether this identity has a recorded failure.
    pub fn is_failed(&self, identity: &str) -> bool {
        self.sets.lock().failed.contains(identity)
    }

    /// Record the outcome of one request made with `identity`.
    pub fn record_outcome(&self, identity: &str, success: bool) {
        let identity = identity.trim();
        if identity.is_empty() {
            return;
        }
        let changed = {
            let mut sets = self.sets.lock();
            if success {
                sets.succeeded.insert(identity.to_string())
            } else {
                sets.failed.insert(identity.to_string())
            }
        };
        if changed {
            if let Err(e) = self.persist() {
                warn!("failed to persist identity reputation: {e:#}");
            }
        }
    }

    /// Force both log files onto disk, e.g. at shutdown.
    pub fn flush(&self) -> Result<()> {
        self.persist()
    }

    /// Rewrite both log files from the in-memory sets.
    fn persist(&self) -> Result<()> {
        let (succeeded, failed) = {
            let sets = self.sets.lock();
            (
                sorted_lines(&sets.succeeded),
                sorted_lines(&sets.failed),
            )
        };
        fs::write(self.dir.join(SUCCESS_LOG), succeeded)
            .context("failed to write success log")?;
        fs::write(self.dir.join(FAILED_LOG), failed).context("failed to write failure log")?;
        Ok(())
    }
}

fn read_identity_set(path: &Path) -> Result<HashSet<String>> {
    if !path.exists() {
        return Ok(HashSet::new());
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect())
}

fn sorted_lines(set: &HashSet<String>) -> String {
    let mut lines: Vec<&str> = set.iter().map(String::as_str).collect();
    lines.sort_unstable();
    let mut out = lines.join("\n");
    if !out.is_empty() {
        out.push('\n');
    }
    out
}
