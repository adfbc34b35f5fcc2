//! Decrypted vault document.
//!
//! The storage and crypto layers treat the document as an opaque JSON
//! payload. The types here only describe what the host application keeps
//! inside it: managed sites with their business metadata, checklists and
//! contacts, plus application settings.
//!
//! Every type implements [`Zeroize`] so a locked session can wipe the
//! decrypted content in place before releasing it.
//!
//! Fields this crate does not model are kept in an [`Extra`] map on each
//! record and written back unchanged, so a save never loses data written
//! by a newer or older host.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use zeroize::Zeroize;

use crate::{Result, SensitiveBytes};

/// Full decrypted payload of a vault.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Zeroize)]
pub struct Document {
    /// Managed sites.
    #[serde(default)]
    pub sites: Vec<Site>,
    /// Application settings.
    #[serde(default)]
    pub settings: Settings,
    #[serde(flatten)]
    pub extra: Extra,
}

impl Document {
    /// Create an empty document with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize to JSON bytes held in a zeroizing buffer.
    pub fn to_plaintext(&self) -> Result<SensitiveBytes> {
        Ok(SensitiveBytes::new(serde_json::to_vec(self)?))
    }

    /// Deserialize from decrypted JSON bytes.
    pub fn from_plaintext(plaintext: &SensitiveBytes) -> Result<Self> {
        Ok(serde_json::from_slice(plaintext.as_bytes())?)
    }

    /// Find a site by its identifier.
    pub fn site(&self, id: &str) -> Option<&Site> {
        self.sites.iter().find(|s| s.id == id)
    }
}

/// A managed site record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Zeroize)]
pub struct Site {
    /// Stable identifier (e.g. "acme-logistics").
    pub id: String,
    /// Display name.
    pub name: String,
    /// Active or archived.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Free-form business metadata (URLs, hosting, versions...).
    #[serde(default)]
    pub metadata: Vec<MetadataField>,
    #[serde(default)]
    pub checklist: Vec<ChecklistItem>,
    /// Intervention log.
    #[serde(default)]
    pub interventions: Vec<Intervention>,
    #[serde(default)]
    pub contacts: Vec<Contact>,
    #[serde(default)]
    pub notes: String,
    /// RFC 3339 timestamp of the last edit.
    #[serde(default)]
    pub last_update: String,
    #[serde(flatten)]
    pub extra: Extra,
}

impl Site {
    /// Create a site with the given identifier and display name.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            enabled: true,
            ..Self::default()
        }
    }

    /// Look up a metadata value by key.
    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata
            .iter()
            .find(|f| f.key == key)
            .map(|f| f.value.as_str())
    }
}

/// Key/value pair of site metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Zeroize)]
pub struct MetadataField {
    pub key: String,
    pub value: String,
    #[serde(flatten)]
    pub extra: Extra,
}

impl MetadataField {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            extra: Extra::default(),
        }
    }
}

/// Checklist entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Zeroize)]
pub struct ChecklistItem {
    pub task: String,
    pub done: bool,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// Logged intervention on a site.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Zeroize)]
pub struct Intervention {
    #[serde(default)]
    pub date: String,
    /// Stored under the host's `type_intervention` key.
    #[serde(default, rename = "type_intervention", alias = "kind")]
    pub kind: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub duration: String,
    #[serde(default)]
    pub result: String,
    #[serde(flatten)]
    pub extra: Extra,
}

/// Contact person for a site.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Zeroize)]
pub struct Contact {
    pub name: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// Application settings stored inside the encrypted document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize)]
pub struct Settings {
    /// Lock the vault after this many idle minutes.
    #[serde(default = "default_auto_lock_minutes")]
    pub auto_lock_minutes: u32,
    /// Prune old backups after each save.
    #[serde(default = "default_true")]
    pub auto_backup: bool,
    /// Retention window for backups, in days.
    #[serde(default = "default_backup_keep_days")]
    pub backup_keep_days: u32,
    #[serde(flatten)]
    pub extra: Extra,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            auto_lock_minutes: default_auto_lock_minutes(),
            auto_backup: true,
            backup_keep_days: default_backup_keep_days(),
            extra: Extra::default(),
        }
    }
}

/// Unmodelled JSON fields of a record, carried through a load/save cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Extra(pub Map<String, Value>);

impl Extra {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Zeroize for Extra {
    fn zeroize(&mut self) {
        // Map keys are immutable; only the values can be wiped in place.
        self.0.values_mut().for_each(wipe_value);
        self.0.clear();
    }
}

fn wipe_value(value: &mut Value) {
    match value {
        Value::String(s) => s.zeroize(),
        Value::Array(items) => {
            items.iter_mut().for_each(wipe_value);
            items.clear();
        }
        Value::Object(map) => {
            map.values_mut().for_each(wipe_value);
            map.clear();
        }
        _ => {}
    }
    *value = Value::Null;
}

fn default_true() -> bool {
    true
}

fn default_auto_lock_minutes() -> u32 {
    5
}

fn default_backup_keep_days() -> u32 {
    30
}
