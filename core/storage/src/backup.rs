//! Backup identifiers and retention.
//!
//! A backup is an immutable copy of a previous vault envelope named
//! `<vault-basename>-<timestamp>.encrypted`, where the timestamp is the
//! ISO 8601 basic-format UTC capture time. Names sort chronologically.

use chrono::{DateTime, Duration, NaiveDateTime, SubsecRound, Utc};
use std::cmp::Ordering;
use std::fmt;

use keepvault_common::{Error, Result};

/// Extension shared by the vault file and its backups.
pub const BACKUP_EXTENSION: &str = "encrypted";

/// Capture timestamp layout; colon-free so it is a valid file name everywhere.
const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%.6fZ";

/// Identifier of a single backup file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BackupId {
    name: String,
    captured_at: DateTime<Utc>,
}

impl BackupId {
    /// Build the identifier for a backup captured at `captured_at`.
    ///
    /// The timestamp is truncated to microseconds, the precision kept in
    /// the file name.
    pub fn new(basename: &str, captured_at: DateTime<Utc>) -> Self {
        let captured_at = captured_at.trunc_subsecs(6);
        let name = format!(
            "{}-{}.{}",
            basename,
            captured_at.format(TIMESTAMP_FORMAT),
            BACKUP_EXTENSION
        );
        Self { name, captured_at }
    }

    /// Parse a backup file name.
    ///
    /// # Errors
    /// - `InvalidInput` if the name contains path components or does not
    ///   follow the backup naming scheme for `basename`
    pub fn parse(basename: &str, name: &str) -> Result<Self> {
        if name.is_empty() || name.contains('/') || name.contains('\\') || name.contains("..") {
            return Err(Error::InvalidInput(format!("Invalid backup name: {}", name)));
        }

        let timestamp = name
            .strip_prefix(basename)
            .and_then(|rest| rest.strip_prefix('-'))
            .and_then(|rest| rest.strip_suffix(BACKUP_EXTENSION))
            .and_then(|rest| rest.strip_suffix('.'))
            .ok_or_else(|| Error::InvalidInput(format!("Invalid backup name format: {}", name)))?;

        let captured_at = NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT)
            .map_err(|_| Error::InvalidInput(format!("Invalid backup timestamp: {}", name)))?
            .and_utc();

        Ok(Self {
            name: name.to_string(),
            captured_at,
        })
    }

    /// File name of the backup.
    pub fn as_str(&self) -> &str {
        &self.name
    }

    /// When the backup was captured.
    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }
}

impl Ord for BackupId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.captured_at
            .cmp(&other.captured_at)
            .then_with(|| self.name.cmp(&other.name))
    }
}

impl PartialOrd for BackupId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for BackupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Backups outside the retention window, given newest-first input.
///
/// The newest backup is never selected, even when it is older than the
/// window, so at least one backup always survives.
pub fn expired(newest_first: &[BackupId], now: DateTime<Utc>, retention_days: u32) -> Vec<BackupId> {
    let cutoff = now - Duration::days(i64::from(retention_days));
    newest_first
        .iter()
        .skip(1)
        .filter(|id| id.captured_at < cutoff)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_name_format() {
        let id = BackupId::new("vault", at(2026, 10, 16));
        assert_eq!(id.as_str(), "vault-20261016T120000.000000Z.encrypted");
    }

    #[test]
    fn test_parse_inverts_new() {
        let id = BackupId::new("vault", Utc::now());
        let parsed = BackupId::parse("vault", id.as_str()).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_parse_rejects_traversal_and_foreign_names() {
        for name in [
            "",
            "../vault-20261016T120000.000000Z.encrypted",
            "backups/vault-20261016T120000.000000Z.encrypted",
            "..\\vault.encrypted",
            "other-20261016T120000.000000Z.encrypted",
            "vault-20261016T120000.000000Z.json",
            "vault-yesterday.encrypted",
        ] {
            assert!(
                matches!(BackupId::parse("vault", name), Err(Error::InvalidInput(_))),
                "accepted {:?}",
                name
            );
        }
    }

    #[test]
    fn test_ordering_is_chronological() {
        let mut ids = vec![
            BackupId::new("vault", at(2026, 3, 1)),
            BackupId::new("vault", at(2025, 12, 31)),
            BackupId::new("vault", at(2026, 1, 15)),
        ];
        ids.sort();
        assert_eq!(ids[0].captured_at(), at(2025, 12, 31));
        assert_eq!(ids[2].captured_at(), at(2026, 3, 1));
    }

    #[test]
    fn test_expired_respects_window() {
        let now = at(2026, 10, 16);
        let newest_first = vec![
            BackupId::new("vault", at(2026, 10, 15)),
            BackupId::new("vault", at(2026, 10, 1)),
            BackupId::new("vault", at(2026, 9, 1)),
            BackupId::new("vault", at(2026, 8, 1)),
        ];

        let gone = expired(&newest_first, now, 30);
        assert_eq!(gone.len(), 2);
        assert!(gone.iter().all(|id| id.captured_at() < at(2026, 9, 16)));
    }

    #[test]
    fn test_expired_keeps_newest_even_when_old() {
        let now = at(2026, 10, 16);
        let newest_first = vec![
            BackupId::new("vault", at(2025, 1, 2)),
            BackupId::new("vault", at(2025, 1, 1)),
        ];

        let gone = expired(&newest_first, now, 30);
        assert_eq!(gone, vec![newest_first[1].clone()]);
    }
}
