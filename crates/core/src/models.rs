//! Domain model types used throughout space-sync.
//!
//! Entities mirror the JSON shapes of the content APIs closely enough to be
//! deserialized from both the delivery sync feed and the management API.
//! Unknown sys fields (space, environment, createdBy, ...) are dropped on
//! deserialization.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Field name -> locale code -> value.
pub type LocalizedFields = BTreeMap<String, BTreeMap<String, Value>>;

// ---------------------------------------------------------------------------
// System metadata
// ---------------------------------------------------------------------------

/// System metadata block carried by every entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sys {
    pub id: String,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_version: Option<u64>,

    /// Delivery API counterpart of `publishedVersion`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<Link>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl Sys {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn is_published(&self) -> bool {
        self.published_version.is_some()
    }

    /// A published entity with edits made after publishing.
    pub fn has_pending_changes(&self) -> bool {
        match (self.version, self.published_version) {
            (Some(version), Some(published)) => version > published + 1,
            _ => false,
        }
    }
}

/// A reference to another entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub sys: LinkSys,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkSys {
    #[serde(rename = "type")]
    pub kind: String,
    pub link_type: String,
    pub id: String,
}

impl Link {
    pub fn new(link_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            sys: LinkSys {
                kind: "Link".into(),
                link_type: link_type.into(),
                id: id.into(),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

/// A schema definition for entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentType {
    pub sys: Sys,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_field: Option<String>,
    #[serde(default)]
    pub fields: Vec<ContentTypeField>,
}

/// A single field definition inside a [`ContentType`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentTypeField {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Value>,
    #[serde(default)]
    pub localized: bool,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub omitted: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validations: Vec<Value>,
}

/// A locale of a space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Locale {
    /// Absent on locales that have not been created on the destination yet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sys: Option<Sys>,
    pub code: String,
    pub name: String,
    /// Server-managed; never sent on writes.
    #[serde(default, skip_serializing)]
    pub default: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_code: Option<String>,
    #[serde(default)]
    pub optional: bool,
    #[serde(default = "default_true")]
    pub content_delivery_api: bool,
    #[serde(default = "default_true")]
    pub content_management_api: bool,
}

fn default_true() -> bool {
    true
}

impl Locale {
    pub fn sys_id(&self) -> Option<&str> {
        self.sys.as_ref().map(|s| s.id.as_str())
    }
}

/// A structured content record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub sys: Sys,
    #[serde(default)]
    pub fields: LocalizedFields,
}

impl Entry {
    pub fn content_type_id(&self) -> Option<&str> {
        self.sys.content_type.as_ref().map(|l| l.sys.id.as_str())
    }
}

/// A binary plus metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub sys: Sys,
    #[serde(default)]
    pub fields: AssetFields,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetFields {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub title: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub description: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub file: BTreeMap<String, AssetFile>,
}

/// The per-locale file of an [`Asset`].
///
/// A processed file has a `url`; an unprocessed one an `upload` source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetFile {
    pub file_name: String,
    pub content_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl AssetFile {
    pub fn is_processed(&self) -> bool {
        self.url.is_some()
    }
}

impl Asset {
    /// True when every locale's file has been processed.
    pub fn is_processed(&self) -> bool {
        self.fields.file.values().all(AssetFile::is_processed)
    }
}

/// Basic information about a space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Space {
    pub sys: Sys,
    #[serde(default)]
    pub name: String,
}

// ---------------------------------------------------------------------------
// Entity kinds
// ---------------------------------------------------------------------------

/// The four synchronized entity kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Locale,
    ContentType,
    Entry,
    Asset,
}

impl EntityKind {
    /// Path segment of the collection endpoint.
    pub fn collection(&self) -> &'static str {
        match self {
            Self::Locale => "locales",
            Self::ContentType => "content_types",
            Self::Entry => "entries",
            Self::Asset => "assets",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Locale => write!(f, "locale"),
            Self::ContentType => write!(f, "content_type"),
            Self::Entry => write!(f, "entry"),
            Self::Asset => write!(f, "asset"),
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

/// The content of one space as read at the start of a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpaceSnapshot {
    pub content_types: Vec<ContentType>,
    pub locales: Vec<Locale>,
    pub entries: Vec<Entry>,
    pub assets: Vec<Asset>,
    /// Reported by the incremental sync feed only.
    pub deleted_entries: Vec<Sys>,
    /// Reported by the incremental sync feed only.
    pub deleted_assets: Vec<Sys>,
    pub next_sync_token: Option<String>,
    pub is_initial_sync: bool,
}

impl SpaceSnapshot {
    pub fn default_locale(&self) -> Option<&Locale> {
        self.locales.iter().find(|l| l.default)
    }
}

/// How a transformed entity relates to its destination counterpart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// No destination entity with the same key.
    Create,
    /// The destination entity differs from the payload.
    Update,
    /// The destination entity already matches.
    Unchanged,
}

impl ChangeKind {
    pub fn needs_write(&self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

/// A source entity together with its destination-ready payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Transformed<T> {
    pub original: T,
    pub transformed: T,
    pub change: ChangeKind,
}

/// Destination entities to remove.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeletionSet {
    pub content_types: Vec<ContentType>,
    pub locales: Vec<Locale>,
    pub entries: Vec<Sys>,
    pub assets: Vec<Sys>,
}

impl DeletionSet {
    pub fn is_empty(&self) -> bool {
        self.content_types.is_empty()
            && self.locales.is_empty()
            && self.entries.is_empty()
            && self.assets.is_empty()
    }
}

/// The source space after transformation, ready to be pushed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformedSpace {
    pub content_types: Vec<Transformed<ContentType>>,
    pub locales: Vec<Transformed<Locale>>,
    pub entries: Vec<Transformed<Entry>>,
    pub assets: Vec<Transformed<Asset>>,
    pub deletions: DeletionSet,
    pub next_sync_token: Option<String>,
    pub is_initial_sync: bool,
}
