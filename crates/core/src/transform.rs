//! Conversion of source entities into destination-ready payloads.
//!
//! Everything here is a pure function of the two snapshots. IDs are kept
//! as-is (an entity has the same ID in both spaces), so link rewriting only
//! reduces links to their minimal form.

use std::collections::{BTreeMap, HashMap};

use serde_json::{Map, Value};
use tracing::debug;

use crate::models::{
    Asset, AssetFields, AssetFile, ChangeKind, ContentType, DeletionSet, Entry, Link,
    LocalizedFields, Locale, SpaceSnapshot, Sys, Transformed, TransformedSpace,
};

/// Transform the source snapshot against the (guarded) destination snapshot.
pub fn transform(source: &SpaceSnapshot, destination: &SpaceSnapshot) -> TransformedSpace {
    let remap = LocaleRemap::between(source, destination);
    if let Some(remap) = &remap {
        debug!(from = %remap.from, to = %remap.to, "remapping default locale");
    }

    let dest_types: HashMap<&str, &ContentType> = destination
        .content_types
        .iter()
        .map(|ct| (ct.sys.id.as_str(), ct))
        .collect();
    let dest_locales: HashMap<&str, &Locale> = destination
        .locales
        .iter()
        .map(|l| (l.code.as_str(), l))
        .collect();
    let dest_entries: HashMap<&str, &Entry> = destination
        .entries
        .iter()
        .map(|e| (e.sys.id.as_str(), e))
        .collect();
    let dest_assets: HashMap<&str, &Asset> = destination
        .assets
        .iter()
        .map(|a| (a.sys.id.as_str(), a))
        .collect();

    TransformedSpace {
        content_types: source
            .content_types
            .iter()
            .map(|ct| transform_content_type(ct, dest_types.get(ct.sys.id.as_str()).copied()))
            .collect(),
        locales: source
            .locales
            .iter()
            .map(|l| transform_locale(l, dest_locales.get(l.code.as_str()).copied()))
            .collect(),
        entries: source
            .entries
            .iter()
            .map(|e| {
                transform_entry(e, dest_entries.get(e.sys.id.as_str()).copied(), remap.as_ref())
            })
            .collect(),
        assets: source
            .assets
            .iter()
            .map(|a| {
                transform_asset(a, dest_assets.get(a.sys.id.as_str()).copied(), remap.as_ref())
            })
            .collect(),
        deletions: DeletionSet {
            entries: source.deleted_entries.clone(),
            assets: source.deleted_assets.clone(),
            ..Default::default()
        },
        next_sync_token: source.next_sync_token.clone(),
        is_initial_sync: source.is_initial_sync,
    }
}

fn change_kind<T>(existing: Option<T>, same: impl FnOnce(T) -> bool) -> ChangeKind {
    match existing {
        None => ChangeKind::Create,
        Some(d) => {
            if same(d) {
                ChangeKind::Unchanged
            } else {
                ChangeKind::Update
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Content model
// ---------------------------------------------------------------------------

fn transform_content_type(
    source: &ContentType,
    destination: Option<&ContentType>,
) -> Transformed<ContentType> {
    let transformed = ContentType {
        sys: Sys::new(source.sys.id.clone()),
        name: source.name.clone(),
        description: source.description.clone(),
        display_field: source.display_field.clone(),
        fields: source.fields.clone(),
    };
    let change = change_kind(destination, |d| {
        d.name == transformed.name
            && d.description == transformed.description
            && d.display_field == transformed.display_field
            && d.fields == transformed.fields
    });
    Transformed {
        original: source.clone(),
        transformed,
        change,
    }
}

fn transform_locale(source: &Locale, destination: Option<&Locale>) -> Transformed<Locale> {
    let transformed = Locale {
        sys: destination
            .and_then(|d| d.sys_id())
            .map(|id| Sys::new(id.to_string())),
        code: source.code.clone(),
        name: source.name.clone(),
        default: source.default,
        fallback_code: source.fallback_code.clone(),
        optional: source.optional,
        content_delivery_api: source.content_delivery_api,
        content_management_api: source.content_management_api,
    };
    let change = change_kind(destination, |d| {
        d.name == transformed.name
            && d.fallback_code == transformed.fallback_code
            && d.optional == transformed.optional
            && d.content_delivery_api == transformed.content_delivery_api
            && d.content_management_api == transformed.content_management_api
    });
    Transformed {
        original: source.clone(),
        transformed,
        change,
    }
}

// ---------------------------------------------------------------------------
// Content
// ---------------------------------------------------------------------------

/// Re-keys values stored under the source default locale to the destination
/// default locale.
#[derive(Debug, Clone, PartialEq, Eq)]
struct LocaleRemap {
    from: String,
    to: String,
}

impl LocaleRemap {
    /// Needed only when the defaults differ and the destination default is
    /// not itself a source locale (its values would otherwise be lost).
    fn between(source: &SpaceSnapshot, destination: &SpaceSnapshot) -> Option<Self> {
        let from = source.default_locale()?;
        let to = destination.default_locale()?;
        if from.code == to.code || source.locales.iter().any(|l| l.code == to.code) {
            return None;
        }
        Some(Self {
            from: from.code.clone(),
            to: to.code.clone(),
        })
    }

    fn apply<V>(&self, values: &mut BTreeMap<String, V>) {
        if values.contains_key(&self.to) {
            return;
        }
        if let Some(value) = values.remove(&self.from) {
            values.insert(self.to.clone(), value);
        }
    }
}

fn transform_entry(
    source: &Entry,
    destination: Option<&Entry>,
    remap: Option<&LocaleRemap>,
) -> Transformed<Entry> {
    let mut fields = normalize_fields(&source.fields);
    if let Some(remap) = remap {
        fields.values_mut().for_each(|values| remap.apply(values));
    }
    let mut sys = Sys::new(source.sys.id.clone());
    sys.content_type = source
        .content_type_id()
        .map(|id| Link::new("ContentType", id));

    let transformed = Entry { sys, fields };
    let change = change_kind(destination, |d| normalize_fields(&d.fields) == transformed.fields);
    Transformed {
        original: source.clone(),
        transformed,
        change,
    }
}

fn transform_asset(
    source: &Asset,
    destination: Option<&Asset>,
    remap: Option<&LocaleRemap>,
) -> Transformed<Asset> {
    let mut fields = AssetFields {
        title: source.fields.title.clone(),
        description: source.fields.description.clone(),
        file: source
            .fields
            .file
            .iter()
            .map(|(locale, file)| (locale.clone(), upload_file(file)))
            .collect(),
    };
    if let Some(remap) = remap {
        remap.apply(&mut fields.title);
        remap.apply(&mut fields.description);
        remap.apply(&mut fields.file);
    }

    let transformed = Asset {
        sys: Sys::new(source.sys.id.clone()),
        fields,
    };
    let change = change_kind(destination, |d| {
        d.fields.title == transformed.fields.title
            && d.fields.description == transformed.fields.description
            && file_identity(&d.fields) == file_identity(&transformed.fields)
    });
    Transformed {
        original: source.clone(),
        transformed,
        change,
    }
}

/// A file as an upload: the processed `url` becomes the upload source, and
/// the server-computed parts are dropped.
fn upload_file(file: &AssetFile) -> AssetFile {
    let upload = match &file.url {
        Some(url) if url.starts_with("//") => Some(format!("https:{}", url)),
        Some(url) => Some(url.clone()),
        None => file.upload.clone(),
    };
    AssetFile {
        file_name: file.file_name.clone(),
        content_type: file.content_type.clone(),
        url: None,
        upload,
        details: None,
    }
}

/// Binary content is not compared; name and media type per locale stand in
/// for it.
fn file_identity(fields: &AssetFields) -> BTreeMap<&str, (&str, &str)> {
    fields
        .file
        .iter()
        .map(|(locale, f)| {
            (
                locale.as_str(),
                (f.file_name.as_str(), f.content_type.as_str()),
            )
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Links
// ---------------------------------------------------------------------------

fn normalize_fields(fields: &LocalizedFields) -> LocalizedFields {
    fields
        .iter()
        .map(|(name, values)| {
            let values = values
                .iter()
                .map(|(locale, value)| (locale.clone(), normalize_links(value)))
                .collect();
            (name.clone(), values)
        })
        .collect()
}

/// Reduce every link object inside `value` to `{sys: {type, linkType, id}}`.
pub fn normalize_links(value: &Value) -> Value {
    match value {
        Value::Object(map) => match as_link(map) {
            Some(link) => serde_json::to_value(link).unwrap_or_else(|_| value.clone()),
            None => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), normalize_links(v)))
                    .collect::<Map<String, Value>>(),
            ),
        },
        Value::Array(items) => Value::Array(items.iter().map(normalize_links).collect()),
        other => other.clone(),
    }
}

fn as_link(map: &Map<String, Value>) -> Option<Link> {
    let sys = map.get("sys")?.as_object()?;
    if sys.get("type")?.as_str()? != "Link" {
        return None;
    }
    let link_type = sys.get("linkType")?.as_str()?;
    let id = sys.get("id")?.as_str()?;
    Some(Link::new(link_type, id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ContentTypeField;
    use serde_json::json;

    fn locale(code: &str, default: bool) -> Locale {
        Locale {
            sys: Some(Sys::new(format!("{}-id", code))),
            code: code.into(),
            name: code.into(),
            default,
            fallback_code: None,
            optional: false,
            content_delivery_api: true,
            content_management_api: true,
        }
    }

    fn content_type(id: &str, field: &str) -> ContentType {
        let mut sys = Sys::new(id);
        sys.version = Some(5);
        sys.published_version = Some(4);
        ContentType {
            sys,
            name: id.into(),
            description: None,
            display_field: Some(field.into()),
            fields: vec![ContentTypeField {
                id: field.into(),
                name: field.into(),
                field_type: "Symbol".into(),
                link_type: None,
                items: None,
                localized: true,
                required: false,
                disabled: false,
                omitted: false,
                validations: vec![],
            }],
        }
    }

    fn entry(id: &str, fields: Value) -> Entry {
        let mut sys = Sys::new(id);
        sys.revision = Some(2);
        sys.content_type = Some(Link::new("ContentType", "post"));
        Entry {
            sys,
            fields: serde_json::from_value(fields).unwrap(),
        }
    }

    fn asset(id: &str, url: &str) -> Asset {
        serde_json::from_value(json!({
            "sys": {"id": id, "revision": 1},
            "fields": {
                "title": {"en-US": "Cat"},
                "file": {"en-US": {
                    "fileName": "cat.png",
                    "contentType": "image/png",
                    "url": url,
                    "details": {"size": 10}
                }}
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_content_type_change_marking() {
        let source = SpaceSnapshot {
            content_types: vec![content_type("post", "title"), content_type("page", "slug")],
            ..Default::default()
        };
        let destination = SpaceSnapshot {
            content_types: vec![content_type("post", "title"), content_type("page", "heading")],
            ..Default::default()
        };
        let out = transform(&source, &destination);
        assert_eq!(out.content_types[0].change, ChangeKind::Unchanged);
        assert_eq!(out.content_types[1].change, ChangeKind::Update);
        assert_eq!(out.content_types[0].transformed.sys, Sys::new("post"));
        assert_eq!(out.content_types[0].original.sys.version, Some(5));
    }

    #[test]
    fn test_new_content_type_is_create() {
        let source = SpaceSnapshot {
            content_types: vec![content_type("post", "title")],
            ..Default::default()
        };
        let out = transform(&source, &SpaceSnapshot::default());
        assert_eq!(out.content_types[0].change, ChangeKind::Create);
    }

    #[test]
    fn test_locale_takes_destination_id() {
        let source = SpaceSnapshot {
            locales: vec![locale("en-US", true), locale("de-DE", false)],
            ..Default::default()
        };
        let mut dest_locale = locale("en-US", true);
        dest_locale.sys = Some(Sys::new("dest-en"));
        let destination = SpaceSnapshot {
            locales: vec![dest_locale],
            ..Default::default()
        };
        let out = transform(&source, &destination);
        assert_eq!(out.locales[0].transformed.sys_id(), Some("dest-en"));
        assert_eq!(out.locales[0].change, ChangeKind::Unchanged);
        assert_eq!(out.locales[1].transformed.sys, None);
        assert_eq!(out.locales[1].change, ChangeKind::Create);
    }

    #[test]
    fn test_entry_sys_is_stripped_and_links_normalized() {
        let source = SpaceSnapshot {
            entries: vec![entry(
                "e1",
                json!({
                    "author": {"en-US": {"sys": {
                        "type": "Link", "linkType": "Entry", "id": "p1",
                        "space": {"sys": {"id": "src"}}
                    }}},
                    "gallery": {"en-US": [{"sys": {"type": "Link", "linkType": "Asset", "id": "a1", "revision": 3}}]}
                }),
            )],
            ..Default::default()
        };
        let out = transform(&source, &SpaceSnapshot::default());
        let e = &out.entries[0].transformed;
        assert_eq!(e.sys.revision, None);
        assert_eq!(e.content_type_id(), Some("post"));
        assert_eq!(
            e.fields["author"]["en-US"],
            json!({"sys": {"type": "Link", "linkType": "Entry", "id": "p1"}})
        );
        assert_eq!(
            e.fields["gallery"]["en-US"][0],
            json!({"sys": {"type": "Link", "linkType": "Asset", "id": "a1"}})
        );
        assert_eq!(out.entries[0].change, ChangeKind::Create);
    }

    #[test]
    fn test_matching_entry_is_unchanged() {
        let fields = json!({"title": {"en-US": "Hello"}});
        let source = SpaceSnapshot {
            entries: vec![entry("e1", fields.clone())],
            ..Default::default()
        };
        let destination = SpaceSnapshot {
            entries: vec![entry("e1", fields)],
            ..Default::default()
        };
        let out = transform(&source, &destination);
        assert_eq!(out.entries[0].change, ChangeKind::Unchanged);
    }

    #[test]
    fn test_default_locale_remap() {
        let source = SpaceSnapshot {
            locales: vec![locale("en-US", true)],
            entries: vec![entry("e1", json!({"title": {"en-US": "Hello"}}))],
            assets: vec![asset("a1", "//images.example.com/cat.png")],
            ..Default::default()
        };
        let destination = SpaceSnapshot {
            locales: vec![locale("en-GB", true)],
            ..Default::default()
        };
        let out = transform(&source, &destination);
        let fields = &out.entries[0].transformed.fields["title"];
        assert_eq!(fields.get("en-GB"), Some(&json!("Hello")));
        assert!(fields.get("en-US").is_none());
        assert!(out.assets[0].transformed.fields.file.contains_key("en-GB"));
    }

    #[test]
    fn test_no_remap_when_destination_default_is_source_locale() {
        let source = SpaceSnapshot {
            locales: vec![locale("en-US", true), locale("en-GB", false)],
            entries: vec![entry("e1", json!({"title": {"en-US": "Hello"}}))],
            ..Default::default()
        };
        let destination = SpaceSnapshot {
            locales: vec![locale("en-GB", true)],
            ..Default::default()
        };
        let out = transform(&source, &destination);
        assert!(out.entries[0].transformed.fields["title"].contains_key("en-US"));
    }

    #[test]
    fn test_asset_url_becomes_upload() {
        let source = SpaceSnapshot {
            assets: vec![asset("a1", "//images.example.com/cat.png")],
            ..Default::default()
        };
        let out = transform(&source, &SpaceSnapshot::default());
        let file = &out.assets[0].transformed.fields.file["en-US"];
        assert_eq!(file.upload.as_deref(), Some("https://images.example.com/cat.png"));
        assert_eq!(file.url, None);
        assert_eq!(file.details, None);
    }

    #[test]
    fn test_processed_destination_asset_is_unchanged() {
        let source = SpaceSnapshot {
            assets: vec![asset("a1", "//images.example.com/cat.png")],
            ..Default::default()
        };
        let destination = SpaceSnapshot {
            assets: vec![asset("a1", "//other-cdn.example.com/cat.png")],
            ..Default::default()
        };
        let out = transform(&source, &destination);
        assert_eq!(out.assets[0].change, ChangeKind::Unchanged);
    }

    #[test]
    fn test_deletions_and_token_carried_over() {
        let source = SpaceSnapshot {
            deleted_entries: vec![Sys::new("gone")],
            deleted_assets: vec![Sys::new("gone-asset")],
            next_sync_token: Some("token".into()),
            is_initial_sync: false,
            ..Default::default()
        };
        let out = transform(&source, &SpaceSnapshot::default());
        assert_eq!(out.deletions.entries, vec![Sys::new("gone")]);
        assert_eq!(out.deletions.assets, vec![Sys::new("gone-asset")]);
        assert_eq!(out.next_sync_token.as_deref(), Some("token"));
        assert!(!out.is_initial_sync);
    }

    #[test]
    fn test_change_kind_uses_comparison_result() {
        let existing = String::from("same");
        assert_eq!(change_kind(None::<&String>, |_| true), ChangeKind::Create);
        assert_eq!(
            change_kind(Some(&existing), |d| d == "same"),
            ChangeKind::Unchanged
        );
        assert_eq!(
            change_kind(Some(&existing), |d| d == "other"),
            ChangeKind::Update
        );
    }
}
