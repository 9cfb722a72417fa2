//! Partition keys and the per-job partition ledger.
//!
//! A partition is identified by its ordered tuple of values. On disk each
//! key is one line: values are percent-escaped for `%`, `,`, CR and LF and
//! joined with `,`, so a single plain value is stored as itself.

use crate::error::{MetaError, Result};
use crate::status::MigrationStatus;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

const SEPARATOR: char = ',';

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionKey(Vec<String>);

impl PartitionKey {
    pub fn new<I, S>(values: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values: Vec<String> = values.into_iter().map(Into::into).collect();
        if values.is_empty() {
            return Err(MetaError::InvalidPartition {
                reason: "partition value tuple is empty".to_string(),
            });
        }
        Ok(Self(values))
    }

    #[must_use]
    pub fn values(&self) -> &[String] {
        &self.0
    }

    #[must_use]
    pub fn into_values(self) -> Vec<String> {
        self.0
    }

    #[must_use]
    pub fn encode(&self) -> String {
        let escaped: Vec<String> = self.0.iter().map(|v| escape(v)).collect();
        escaped.join(",")
    }

    pub fn decode(line: &str) -> std::result::Result<Self, String> {
        let values = line
            .split(SEPARATOR)
            .map(unescape)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self(values))
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.join(", "))
    }
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '%' => out.push_str("%25"),
            ',' => out.push_str("%2C"),
            '\n' => out.push_str("%0A"),
            '\r' => out.push_str("%0D"),
            c => out.push(c),
        }
    }
    out
}

fn unescape(value: &str) -> std::result::Result<String, String> {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let code = rest.get(pos + 1..pos + 3);
        let c = match code {
            Some("25") => '%',
            Some("2C") | Some("2c") => ',',
            Some("0A") | Some("0a") => '\n',
            Some("0D") | Some("0d") => '\r',
            _ => return Err(format!("bad escape sequence in {:?}", value)),
        };
        out.push(c);
        rest = &rest[pos + 3..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Newline-terminated list of encoded keys.
#[must_use]
pub fn encode_list(keys: &[PartitionKey]) -> String {
    let mut out = String::new();
    for key in keys {
        out.push_str(&key.encode());
        out.push('\n');
    }
    out
}

pub fn decode_list(text: &str) -> std::result::Result<Vec<PartitionKey>, String> {
    text.lines().map(PartitionKey::decode).collect()
}

/// What a partition event may record. Retry accounting is table-level only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PartitionOutcome {
    Succeeded,
    Failed,
}

impl TryFrom<MigrationStatus> for PartitionOutcome {
    type Error = MetaError;

    fn try_from(status: MigrationStatus) -> Result<Self> {
        match status {
            MigrationStatus::Succeeded => Ok(PartitionOutcome::Succeeded),
            MigrationStatus::Failed => Ok(PartitionOutcome::Failed),
            other => Err(MetaError::InvalidPartition {
                reason: format!("{} is not a partition outcome", other),
            }),
        }
    }
}

/// Ordered set with insertion-order iteration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeySet {
    order: Vec<PartitionKey>,
    index: HashSet<PartitionKey>,
}

impl KeySet {
    pub fn from_keys<I: IntoIterator<Item = PartitionKey>>(keys: I) -> Self {
        let mut set = Self::default();
        let _ = set.extend(keys);
        set
    }

    /// Insert keys not already present. Returns how many were new.
    pub fn extend<I: IntoIterator<Item = PartitionKey>>(&mut self, keys: I) -> usize {
        let mut added = 0;
        for key in keys {
            if self.index.insert(key.clone()) {
                self.order.push(key);
                added += 1;
            }
        }
        added
    }

    #[must_use]
    pub fn contains(&self, key: &PartitionKey) -> bool {
        self.index.contains(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PartitionKey> {
        self.order.iter()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[PartitionKey] {
        &self.order
    }
}

/// Partition progress of one job, independent of its table-level status.
///
/// `succeeded` and `failed` may overlap (a partition that failed and later
/// succeeded, or the reverse). `succeeded` decides what is done.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionLedger {
    pub all: KeySet,
    pub succeeded: KeySet,
    pub failed: KeySet,
}

impl PartitionLedger {
    /// Merge newly discovered partitions into the known set. Never shrinks it.
    pub fn extend_all<I: IntoIterator<Item = PartitionKey>>(&mut self, keys: I) -> usize {
        self.all.extend(keys)
    }

    /// Record an outcome for known partitions.
    ///
    /// Fails without changing anything if any key is outside the known set.
    pub fn record(
        &mut self,
        outcome: PartitionOutcome,
        keys: &[PartitionKey],
    ) -> std::result::Result<usize, PartitionKey> {
        if let Some(unknown) = keys.iter().find(|k| !self.all.contains(k)) {
            return Err(unknown.clone());
        }
        let target = match outcome {
            PartitionOutcome::Succeeded => &mut self.succeeded,
            PartitionOutcome::Failed => &mut self.failed,
        };
        Ok(target.extend(keys.iter().cloned()))
    }

    /// Partitions that still need work: known but not succeeded, in known order.
    #[must_use]
    pub fn pending(&self) -> Vec<PartitionKey> {
        self.all
            .iter()
            .filter(|k| !self.succeeded.contains(k))
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn outcome_of(&self, key: &PartitionKey) -> Option<PartitionOutcome> {
        if self.succeeded.contains(key) {
            Some(PartitionOutcome::Succeeded)
        } else if self.failed.contains(key) {
            Some(PartitionOutcome::Failed)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(values: &[&str]) -> PartitionKey {
        PartitionKey::new(values.iter().copied()).expect("non-empty")
    }

    #[test]
    fn test_single_value_encodes_plainly() {
        assert_eq!(key(&["hello_world"]).encode(), "hello_world");
        assert_eq!(key(&["2021", "01"]).encode(), "2021,01");
    }

    #[test]
    fn test_awkward_values_survive_encoding() {
        let k = key(&["a,b", "100%", "line\nbreak", "cr\r", ""]);
        let line = k.encode();
        assert!(!line.contains('\n'));
        assert_eq!(PartitionKey::decode(&line), Ok(k));
    }

    #[test]
    fn test_decode_rejects_bad_escape() {
        assert!(PartitionKey::decode("50%").is_err());
        assert!(PartitionKey::decode("%zz").is_err());
    }

    #[test]
    fn test_empty_tuple_rejected() {
        assert!(PartitionKey::new(Vec::<String>::new()).is_err());
    }

    #[test]
    fn test_list_format() {
        let keys = vec![key(&["hello_world"]), key(&["foo"])];
        let text = encode_list(&keys);
        assert_eq!(text, "hello_world\nfoo\n");
        assert_eq!(decode_list(&text), Ok(keys));
        assert_eq!(decode_list(""), Ok(vec![]));
    }

    #[test]
    fn test_ledger_pending_excludes_succeeded_only() {
        let mut ledger = PartitionLedger::default();
        ledger.extend_all([key(&["a"]), key(&["b"]), key(&["c"])]);
        assert_eq!(ledger.record(PartitionOutcome::Succeeded, &[key(&["b"])]), Ok(1));
        assert_eq!(ledger.record(PartitionOutcome::Failed, &[key(&["c"])]), Ok(1));
        assert_eq!(ledger.pending(), vec![key(&["a"]), key(&["c"])]);
        assert_eq!(ledger.outcome_of(&key(&["c"])), Some(PartitionOutcome::Failed));
        assert_eq!(ledger.outcome_of(&key(&["a"])), None);
    }

    #[test]
    fn test_failed_then_succeeded_counts_as_done() {
        let mut ledger = PartitionLedger::default();
        ledger.extend_all([key(&["a"])]);
        let _ = ledger.record(PartitionOutcome::Failed, &[key(&["a"])]);
        let _ = ledger.record(PartitionOutcome::Succeeded, &[key(&["a"])]);
        assert!(ledger.pending().is_empty());
        assert_eq!(ledger.outcome_of(&key(&["a"])), Some(PartitionOutcome::Succeeded));
    }

    #[test]
    fn test_record_unknown_partition_changes_nothing() {
        let mut ledger = PartitionLedger::default();
        ledger.extend_all([key(&["a"])]);
        let result = ledger.record(PartitionOutcome::Succeeded, &[key(&["a"]), key(&["zz"])]);
        assert_eq!(result, Err(key(&["zz"])));
        assert!(ledger.succeeded.is_empty());
    }

    #[test]
    fn test_extend_all_keeps_order_and_dedups() {
        let mut ledger = PartitionLedger::default();
        assert_eq!(ledger.extend_all([key(&["x"]), key(&["y"])]), 2);
        assert_eq!(ledger.extend_all([key(&["y"]), key(&["z"]), key(&["x"])]), 1);
        assert_eq!(ledger.all.as_slice(), &[key(&["x"]), key(&["y"]), key(&["z"])]);
    }

    #[test]
    fn test_outcome_from_status() {
        assert!(PartitionOutcome::try_from(MigrationStatus::Running).is_err());
        assert!(matches!(
            PartitionOutcome::try_from(MigrationStatus::Failed),
            Ok(PartitionOutcome::Failed)
        ));
    }
}
