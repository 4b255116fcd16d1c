//! dsr-audit
//!
//! File journal for device status transitions. Committed audit entries are
//! mirrored here as JSON Lines (one record per line) for consumers that do
//! not read the database.
//!
//! Optional hash chain: each record carries `hash_prev` + `hash_self`, so any
//! edit, reorder or deletion inside the file is detectable.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use dsr_schemas::AuditEntry;

mod query;

pub use query::{entries_for_run, entries_with_new_status};

/// Append-only journal writer.
pub struct AuditJournal {
    path: PathBuf,
    hash_chain: bool,
    last_hash: Option<String>,
    /// Sequence number of the next record.
    seq: u64,
}

impl AuditJournal {
    /// Fresh journal state. Creates parent dirs; does not touch the file.
    pub fn new(path: impl AsRef<Path>, hash_chain: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create_dir_all {:?}", parent))?;
            }
        }

        Ok(Self {
            path,
            hash_chain,
            last_hash: None,
            seq: 0,
        })
    }

    /// Open an existing journal and continue its chain. A missing file is an
    /// empty journal. A broken chain refuses to resume.
    pub fn resume(path: impl AsRef<Path>, hash_chain: bool) -> Result<Self> {
        let mut journal = Self::new(path, hash_chain)?;
        if !journal.path.exists() {
            return Ok(journal);
        }

        let content = fs::read_to_string(&journal.path)
            .with_context(|| format!("read audit journal {:?}", journal.path))?;
        if let VerifyResult::Broken { line, reason } = verify_hash_chain_str(&content)? {
            bail!(
                "AUDIT_CHAIN_BROKEN path={:?} line={} reason={}",
                journal.path,
                line,
                reason
            );
        }
        let records = parse_records(&content)?;
        if let Some(last) = records.last() {
            journal.seq = last.seq + 1;
            journal.last_hash = last.hash_self.clone();
        }
        Ok(journal)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn last_hash(&self) -> Option<&str> {
        self.last_hash.as_deref()
    }

    /// Number of records written so far (equals the next record's seq).
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Append `entries` in order with a single write. Writer state only
    /// advances once the write succeeded.
    pub fn record(&mut self, entries: &[AuditEntry]) -> Result<Vec<JournalRecord>> {
        let mut seq = self.seq;
        let mut last_hash = self.last_hash.clone();
        let mut records = Vec::with_capacity(entries.len());
        let mut buf = String::new();

        for entry in entries {
            let mut rec = JournalRecord {
                seq,
                entry: entry.clone(),
                hash_prev: None,
                hash_self: None,
            };
            if self.hash_chain {
                rec.hash_prev = last_hash.clone();
                let h = compute_record_hash(&rec)?;
                rec.hash_self = Some(h.clone());
                last_hash = Some(h);
            }
            buf.push_str(&canonical_json_line(&rec)?);
            buf.push('\n');
            records.push(rec);
            seq += 1;
        }

        if !buf.is_empty() {
            append_lines(&self.path, &buf)?;
        }

        self.seq = seq;
        self.last_hash = last_hash;
        Ok(records)
    }
}

/// One journal line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalRecord {
    pub seq: u64,
    pub entry: AuditEntry,
    pub hash_prev: Option<String>,
    pub hash_self: Option<String>,
}

fn append_lines(path: &Path, lines: &str) -> Result<()> {
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open audit journal {:?}", path))?;
    f.write_all(lines.as_bytes())
        .context("write audit journal failed")?;
    f.flush().context("flush audit journal failed")?;
    Ok(())
}

/// Compact JSON with keys in sorted order. Going through `Value` sorts
/// struct fields too, since serde_json's default map is key-ordered.
fn canonical_json_line<T: Serialize>(v: &T) -> Result<String> {
    let value: Value = serde_json::to_value(v).context("serialize journal record failed")?;
    serde_json::to_string(&value).context("journal record to json failed")
}

/// Hash of the canonical record WITHOUT `hash_self`.
pub fn compute_record_hash(rec: &JournalRecord) -> Result<String> {
    let unsealed = JournalRecord {
        hash_self: None,
        ..rec.clone()
    };
    let canonical = canonical_json_line(&unsealed)?;
    Ok(hex::encode(Sha256::digest(canonical.as_bytes())))
}

/// Non-blank lines parsed as records, with their 1-based line numbers.
fn numbered_records(content: &str) -> impl Iterator<Item = Result<(usize, JournalRecord)>> + '_ {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str::<JournalRecord>(line.trim())
                .map(|rec| (i + 1, rec))
                .with_context(|| format!("parse journal record at line {}", i + 1))
        })
}

fn parse_records(content: &str) -> Result<Vec<JournalRecord>> {
    numbered_records(content)
        .map(|r| r.map(|(_, rec)| rec))
        .collect()
}

fn read_content(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("read audit journal {:?}", path))
}

/// Read every record of a journal file.
pub fn read_journal(path: impl AsRef<Path>) -> Result<Vec<JournalRecord>> {
    parse_records(&read_content(path.as_ref())?)
}

/// Verify chain integrity of a journal file.
pub fn verify_hash_chain(path: impl AsRef<Path>) -> Result<VerifyResult> {
    verify_hash_chain_str(&read_content(path.as_ref())?)
}

/// Same as [`verify_hash_chain`] over in-memory JSONL.
///
/// Checks, per line: contiguous `seq`, `hash_prev` equal to the previous
/// line's `hash_self`, and `hash_self` equal to the recomputed hash. A journal
/// written without chaining passes as long as `seq` is contiguous.
pub fn verify_hash_chain_str(content: &str) -> Result<VerifyResult> {
    let mut prev: Option<JournalRecord> = None;
    let mut lines = 0usize;

    for item in numbered_records(content) {
        let (line, rec) = item?;
        lines += 1;

        if let Some(reason) = chain_break(prev.as_ref(), &rec)? {
            return Ok(VerifyResult::Broken { line, reason });
        }
        prev = Some(rec);
    }

    Ok(VerifyResult::Valid { lines })
}

/// Why `rec` does not follow `prev`, if it doesn't.
fn chain_break(prev: Option<&JournalRecord>, rec: &JournalRecord) -> Result<Option<String>> {
    if let Some(p) = prev {
        if rec.seq != p.seq + 1 {
            return Ok(Some(format!("seq gap after {}: got {}", p.seq, rec.seq)));
        }
    }

    let linked = prev.and_then(|p| p.hash_self.as_deref());
    if rec.hash_prev.as_deref() != linked {
        return Ok(Some(format!(
            "hash_prev does not link: previous hash_self {:?}, hash_prev {:?}",
            linked, rec.hash_prev
        )));
    }

    if let Some(claimed) = &rec.hash_self {
        let recomputed = compute_record_hash(rec)?;
        if *claimed != recomputed {
            return Ok(Some(format!(
                "hash_self does not match content: stored {claimed}, computed {recomputed}"
            )));
        }
    }
    Ok(None)
}

/// Result of chain verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyResult {
    Valid { lines: usize },
    /// 1-based line of the first break.
    Broken { line: usize, reason: String },
}
