//! Destination-only items: what the push has to delete.

use std::collections::HashSet;

use crate::models::{DeletionSet, SpaceSnapshot, TransformedSpace};

/// Compute the deletion set.
///
/// A destination content type is deleted when no source content type shares
/// its ID, a destination locale when no source locale shares its code.
/// Entries and assets come from the source deletion feed. Destination order
/// is preserved.
pub fn compute_deletions(source: &TransformedSpace, destination: &SpaceSnapshot) -> DeletionSet {
    let type_ids: HashSet<&str> = source
        .content_types
        .iter()
        .map(|ct| ct.original.sys.id.as_str())
        .collect();
    let locale_codes: HashSet<&str> = source
        .locales
        .iter()
        .map(|l| l.original.code.as_str())
        .collect();

    DeletionSet {
        content_types: destination
            .content_types
            .iter()
            .filter(|ct| !type_ids.contains(ct.sys.id.as_str()))
            .cloned()
            .collect(),
        locales: destination
            .locales
            .iter()
            .filter(|l| !locale_codes.contains(l.code.as_str()))
            .cloned()
            .collect(),
        entries: source.deletions.entries.clone(),
        assets: source.deletions.assets.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChangeKind, ContentType, Locale, Sys, Transformed};

    fn content_type(id: &str) -> ContentType {
        ContentType {
            sys: Sys::new(id),
            name: id.into(),
            description: None,
            display_field: None,
            fields: vec![],
        }
    }

    fn locale(code: &str) -> Locale {
        Locale {
            sys: Some(Sys::new(code)),
            code: code.into(),
            name: code.into(),
            default: false,
            fallback_code: None,
            optional: false,
            content_delivery_api: true,
            content_management_api: true,
        }
    }

    fn unchanged<T: Clone>(item: T) -> Transformed<T> {
        Transformed {
            original: item.clone(),
            transformed: item,
            change: ChangeKind::Unchanged,
        }
    }

    #[test]
    fn test_destination_only_content_types() {
        let source = TransformedSpace {
            content_types: vec![unchanged(content_type("A"))],
            ..Default::default()
        };
        let destination = SpaceSnapshot {
            content_types: vec![content_type("B"), content_type("A"), content_type("C")],
            ..Default::default()
        };
        let deletions = compute_deletions(&source, &destination);
        let ids: Vec<&str> = deletions
            .content_types
            .iter()
            .map(|ct| ct.sys.id.as_str())
            .collect();
        assert_eq!(ids, vec!["B", "C"]);
    }

    #[test]
    fn test_destination_only_locales() {
        let source = TransformedSpace {
            locales: vec![unchanged(locale("en-US"))],
            ..Default::default()
        };
        let destination = SpaceSnapshot {
            locales: vec![locale("en-US"), locale("en-GB")],
            ..Default::default()
        };
        let deletions = compute_deletions(&source, &destination);
        assert_eq!(deletions.locales.len(), 1);
        assert_eq!(deletions.locales[0].code, "en-GB");
    }

    #[test]
    fn test_identical_model_deletes_nothing() {
        let source = TransformedSpace {
            content_types: vec![unchanged(content_type("A"))],
            locales: vec![unchanged(locale("en-US"))],
            ..Default::default()
        };
        let destination = SpaceSnapshot {
            content_types: vec![content_type("A")],
            locales: vec![locale("en-US")],
            ..Default::default()
        };
        assert!(compute_deletions(&source, &destination).is_empty());
    }

    #[test]
    fn test_empty_destination_model_deletes_nothing() {
        let source = TransformedSpace {
            deletions: DeletionSet {
                entries: vec![Sys::new("e1")],
                ..Default::default()
            },
            ..Default::default()
        };
        let deletions = compute_deletions(&source, &SpaceSnapshot::default());
        assert!(deletions.content_types.is_empty());
        assert!(deletions.locales.is_empty());
        assert_eq!(deletions.entries, vec![Sys::new("e1")]);
    }
}
