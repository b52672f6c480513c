use std::collections::HashMap;

use crate::document::{Document, RemovalRecord};
use crate::error::ReconcileError;
use crate::keys::hash_document;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DuplicateGroups {
    pub keep: Vec<Document>,
    pub remove: Vec<RemovalRecord>,
}

/// Groups `documents` by their composite key. The first document of every
/// group, in input order, survives; the other members are returned as
/// removal records pointing at it. Groups are emitted in order of first
/// appearance. A survivor with duplicates must carry an `_id`.
pub fn group_duplicates(
    documents: &[Document],
    key_fields: &[&str],
) -> Result<DuplicateGroups, ReconcileError> {
    if key_fields.is_empty() {
        return Err(ReconcileError::InvalidConfiguration(
            "duplicate detection requires at least one key field".to_string(),
        ));
    }

    let mut slots: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<Vec<&Document>> = Vec::new();
    for document in documents {
        let key = hash_document(document, key_fields)?;
        match slots.get(&key).copied() {
            Some(slot) => groups[slot].push(document),
            None => {
                slots.insert(key, groups.len());
                groups.push(vec![document]);
            }
        }
    }

    let mut output = DuplicateGroups::default();
    for group in groups {
        let Some((survivor, rest)) = group.split_first() else {
            continue;
        };
        if !rest.is_empty() {
            let original = survivor
                .id()
                .ok_or_else(|| ReconcileError::MissingIdentifier {
                    fields: key_fields.join(", "),
                })?;
            for duplicate in rest {
                output
                    .remove
                    .push(RemovalRecord::duplicate_of((*duplicate).clone(), original));
            }
        }
        output.keep.push((*survivor).clone());
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::group_duplicates;
    use crate::document::{Document, doc};
    use crate::error::ReconcileError;

    const KEYS: &[&str] = &["date", "amount", "vendor"];

    fn bill(id: &str, date: &str, amount: i64) -> Document {
        doc(json!({ "_id": id, "date": date, "amount": amount, "vendor": "X" }))
    }

    fn ids(documents: &[Document]) -> Vec<&str> {
        documents.iter().filter_map(Document::id).collect()
    }

    #[test]
    fn first_document_survives_and_others_point_at_it() {
        let input = vec![
            bill("1", "2020-01-01", 10),
            bill("2", "2020-01-01", 10),
            bill("3", "2020-01-01T00:00:00Z", 10),
        ];
        let groups = group_duplicates(&input, KEYS).expect("group");

        assert_eq!(ids(&groups.keep), vec!["1"]);
        assert_eq!(groups.remove.len(), 2);
        assert_eq!(groups.remove[0].id(), Some("2"));
        assert_eq!(groups.remove[1].id(), Some("3"));
        assert!(
            groups
                .remove
                .iter()
                .all(|record| record.original.as_deref() == Some("1"))
        );
    }

    #[test]
    fn survivor_follows_input_order() {
        let input = vec![bill("b", "2020-01-01", 10), bill("a", "2020-01-01", 10)];
        let groups = group_duplicates(&input, KEYS).expect("group");
        assert_eq!(ids(&groups.keep), vec!["b"]);
        assert_eq!(groups.remove[0].original.as_deref(), Some("b"));
    }

    #[test]
    fn groups_keep_first_appearance_order_and_partition_input() {
        let input = vec![
            bill("1", "2020-01-01", 10),
            bill("2", "2020-02-01", 20),
            bill("3", "2020-01-01", 10),
            bill("4", "2020-03-01", 30),
            bill("5", "2020-02-01", 20),
        ];
        let groups = group_duplicates(&input, KEYS).expect("group");

        assert_eq!(ids(&groups.keep), vec!["1", "2", "4"]);
        assert_eq!(groups.keep.len() + groups.remove.len(), input.len());
        let removed = groups
            .remove
            .iter()
            .map(|record| (record.id().expect("id"), record.original.as_deref().expect("original")))
            .collect::<Vec<_>>();
        assert_eq!(removed, vec![("3", "1"), ("5", "2")]);
    }

    #[test]
    fn singletons_only_contribute_to_keep() {
        let input = vec![bill("1", "2020-01-01", 10), bill("2", "2020-01-02", 10)];
        let groups = group_duplicates(&input, KEYS).expect("group");
        assert_eq!(groups.keep.len(), 2);
        assert!(groups.remove.is_empty());
    }

    #[test]
    fn empty_input_yields_empty_groups() {
        let groups = group_duplicates(&[], KEYS).expect("group");
        assert!(groups.keep.is_empty());
        assert!(groups.remove.is_empty());
    }

    #[test]
    fn survivor_without_id_is_rejected() {
        let input = vec![
            doc(json!({ "date": "2020-01-01", "amount": 10, "vendor": "X" })),
            bill("2", "2020-01-01", 10),
        ];
        let error = group_duplicates(&input, KEYS).expect_err("must fail");
        assert!(matches!(error, ReconcileError::MissingIdentifier { .. }));
    }

    #[test]
    fn singleton_without_id_is_kept() {
        let input = vec![doc(json!({ "date": "2020-01-01", "amount": 10, "vendor": "X" }))];
        let groups = group_duplicates(&input, KEYS).expect("group");
        assert_eq!(groups.keep.len(), 1);
        assert!(groups.remove.is_empty());
    }

    #[test]
    fn empty_key_fields_fail_instead_of_grouping_everything() {
        let input = vec![bill("1", "2020-01-01", 10), bill("2", "2020-01-01", 10)];
        let error = group_duplicates(&input, &[]).expect_err("must fail");
        assert!(matches!(error, ReconcileError::InvalidConfiguration(_)));
    }
}
