//! Offline maintenance: dumping records and rotating out old ones.

use chrono::{DateTime, Duration, Utc};
use gemrelay_core::StoreError;
use serde::Serialize;
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::store::{ConversationStore, decode, storage_error};

/// One record as printed by `gemrelay dump`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DumpRecord {
    pub key: String,
    /// Decoded JSON, or the raw bytes as (lossy) text when they are not JSON.
    pub value: serde_json::Value,
}

/// How long records are kept by [`ConversationStore::rotate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retention {
    /// Delete every record.
    All,
    /// Delete records last touched longer ago than this.
    Keep(Duration),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("Invalid retention '{0}': use Nd, Nh, or all")]
pub struct RetentionParseError(String);

impl FromStr for Retention {
    type Err = RetentionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "all" {
            return Ok(Retention::All);
        }

        let invalid = || RetentionParseError(s.to_string());
        let Some(unit) = s.chars().last() else {
            return Err(invalid());
        };
        let amount: i64 = s[..s.len() - unit.len_utf8()]
            .parse()
            .map_err(|_| invalid())?;
        if amount < 0 {
            return Err(invalid());
        }
        match unit {
            'd' => Duration::try_days(amount).map(Retention::Keep).ok_or_else(invalid),
            'h' => Duration::try_hours(amount).map(Retention::Keep).ok_or_else(invalid),
            _ => Err(invalid()),
        }
    }
}

/// Outcome of a rotation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RotateReport {
    pub examined: usize,
    pub deleted: usize,
    /// Records that could not be decoded or carry no timestamp.
    pub skipped: usize,
    /// Reverse-index entries whose record no longer exists.
    pub orphans_removed: usize,
}

fn decode_value(bytes: &[u8]) -> serde_json::Value {
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

impl ConversationStore {
    /// Dump the given keys, or every record when `keys` is empty.
    ///
    /// Missing keys are skipped.
    pub fn dump(&self, keys: &[String]) -> Result<Vec<DumpRecord>, StoreError> {
        if !keys.is_empty() {
            let mut records = Vec::with_capacity(keys.len());
            for key in keys {
                if let Some(bytes) = self.records.get(key).map_err(storage_error)? {
                    records.push(DumpRecord {
                        key: key.clone(),
                        value: decode_value(&bytes),
                    });
                }
            }
            return Ok(records);
        }

        self.records
            .iter()
            .map(|entry| {
                let (key, bytes) = entry.map_err(storage_error)?;
                Ok(DumpRecord {
                    key: String::from_utf8_lossy(&key).into_owned(),
                    value: decode_value(&bytes),
                })
            })
            .collect()
    }

    /// Delete records older than `retention` relative to `now`.
    ///
    /// Age is measured from `updated_at`, falling back to `created_at`.
    /// Each deletion removes the record's reverse-index entry in the same
    /// transaction; index entries left pointing at nothing are swept after.
    pub fn rotate(
        &self,
        retention: Retention,
        now: DateTime<Utc>,
    ) -> Result<RotateReport, StoreError> {
        let mut report = RotateReport::default();
        let mut expired = Vec::new();

        for entry in self.records.iter() {
            let (key, bytes) = entry.map_err(storage_error)?;
            let key = String::from_utf8_lossy(&key).into_owned();
            report.examined += 1;

            let threshold = match retention {
                Retention::All => {
                    expired.push(key);
                    continue;
                }
                Retention::Keep(keep) => now - keep,
            };

            match decode(&bytes).ok().and_then(|c| c.last_touched()) {
                Some(touched) if touched < threshold => expired.push(key),
                Some(_) => {}
                None => {
                    debug!(key, "Skipping record without readable timestamp");
                    report.skipped += 1;
                }
            }
        }

        for key in &expired {
            match self.remove_entry(key) {
                Ok(Some(_)) => report.deleted += 1,
                Ok(None) => {}
                Err(StoreError::Serialization(_)) => {
                    self.records.remove(key.as_str()).map_err(storage_error)?;
                    report.deleted += 1;
                }
                Err(e) => return Err(e),
            }
        }

        for entry in self.index.iter() {
            let (fingerprint, key) = entry.map_err(storage_error)?;
            if !self.records.contains_key(&key).map_err(storage_error)? {
                match self
                    .index
                    .compare_and_swap(&fingerprint, Some(&key), None as Option<&[u8]>)
                    .map_err(storage_error)?
                {
                    Ok(()) => report.orphans_removed += 1,
                    Err(_) => warn!("Index entry changed during rotation"),
                }
            }
        }

        self.flush()?;
        info!(
            examined = report.examined,
            deleted = report.deleted,
            skipped = report.skipped,
            orphans = report.orphans_removed,
            "Rotation finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreOptions;
    use gemrelay_core::{Message, StoredConversation};
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> ConversationStore {
        ConversationStore::open(
            StoreOptions {
                path: dir.path().join("db"),
                max_size: 64 * 1024 * 1024,
            },
            vec!["c1".into()],
        )
        .unwrap()
    }

    fn conversation(text: &str) -> StoredConversation {
        StoredConversation::new(
            "m",
            "c1",
            vec![Some("meta".into())],
            vec![Message::user(text), Message::assistant("ok")],
        )
    }

    #[test]
    fn retention_parses_days_hours_and_all() {
        assert_eq!("all".parse::<Retention>(), Ok(Retention::All));
        assert_eq!("14d".parse::<Retention>(), Ok(Retention::Keep(Duration::days(14))));
        assert_eq!("24h".parse::<Retention>(), Ok(Retention::Keep(Duration::hours(24))));
        assert!("10m".parse::<Retention>().is_err());
        assert!("d".parse::<Retention>().is_err());
        assert!("-1d".parse::<Retention>().is_err());
        assert!("".parse::<Retention>().is_err());
    }

    #[test]
    fn dump_lists_records_but_not_index() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        store.put(conversation("a"), Some("k1")).unwrap();
        store.put(conversation("b"), Some("k2")).unwrap();

        let all = store.dump(&[]).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].key, "k1");
        assert_eq!(all[0].value["client_id"], "c1");

        let selected = store.dump(&["k2".into(), "missing".into()]).unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].key, "k2");
    }

    #[test]
    fn rotate_deletes_only_old_records() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        let old = conversation("old");
        let recent = conversation("recent");
        store.put(old.clone(), Some("old")).unwrap();
        store.put(recent.clone(), Some("recent")).unwrap();

        // Pretend three days have passed and then refresh "recent".
        let later = Utc::now() + Duration::days(3);
        let mut refreshed = store.get("recent").unwrap();
        refreshed.created_at = Some(later);
        let bytes = serde_json::to_vec(&StoredConversation {
            updated_at: Some(later),
            ..refreshed
        })
        .unwrap();
        store.records.insert("recent", bytes).unwrap();

        let report = store.rotate(Retention::Keep(Duration::days(1)), later).unwrap();
        assert_eq!(report.deleted, 1);
        assert!(store.get("old").is_none());
        assert!(store.get("recent").is_some());
        assert!(store.find("m", &old.messages).is_none());
        assert!(store.find("m", &recent.messages).is_some());
    }

    #[test]
    fn rotate_all_empties_both_trees() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        store.put(conversation("a"), None).unwrap();
        store.put(conversation("b"), None).unwrap();

        let report = store.rotate(Retention::All, Utc::now()).unwrap();
        assert_eq!(report.deleted, 2);
        let stats = store.stats().unwrap();
        assert_eq!(stats.records, 0);
        assert_eq!(stats.fingerprints, 0);
    }

    #[test]
    fn rotate_skips_undecodable_records() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        store.records.insert("junk", "not json").unwrap();

        let report = store
            .rotate(Retention::Keep(Duration::hours(1)), Utc::now())
            .unwrap();
        assert_eq!(report.skipped, 1);
        assert!(store.exists("junk"));

        let dumped = store.dump(&["junk".into()]).unwrap();
        assert_eq!(dumped[0].value, serde_json::Value::String("not json".into()));
    }
}
