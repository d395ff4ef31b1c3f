//! Structural diff between two revisions.
//!
//! Blocks are compared by position, not identity: inserting a block in the
//! middle reports every later block as modified. Metadata is compared key by
//! key with deep equality.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::content::model::{ContentBlock, Revision};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Removed,
    Modified,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockChange {
    pub index: usize,
    pub status: ChangeKind,
    /// Block kind on the target side, or the base side for removals.
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaChange {
    pub key: String,
    pub status: ChangeKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionDiff {
    pub base_revision_id: Option<Uuid>,
    pub target_revision_id: Uuid,
    pub blocks: Vec<BlockChange>,
    pub metadata: Vec<MetaChange>,
}

impl RevisionDiff {
    pub fn has_changes(&self) -> bool {
        self.blocks
            .iter()
            .map(|b| b.status)
            .chain(self.metadata.iter().map(|m| m.status))
            .any(|s| s != ChangeKind::Unchanged)
    }
}

/// Diff `target` against `base`. With no base every block and key is added.
pub fn diff_revisions(base: Option<&Revision>, target: &Revision) -> RevisionDiff {
    let base_blocks = base.map(|b| b.blocks.as_slice()).unwrap_or_default();
    let empty = Value::Null;
    let base_meta = base.map(|b| &b.meta).unwrap_or(&empty);

    RevisionDiff {
        base_revision_id: base.map(|b| b.id),
        target_revision_id: target.id,
        blocks: diff_blocks(base_blocks, &target.blocks),
        metadata: diff_meta(base_meta, &target.meta),
    }
}

fn same_block(a: &ContentBlock, b: &ContentBlock) -> bool {
    a.kind == b.kind && a.data == b.data && a.settings == b.settings
}

/// Positional comparison up to the longer of the two lists.
pub fn diff_blocks(base: &[ContentBlock], target: &[ContentBlock]) -> Vec<BlockChange> {
    (0..base.len().max(target.len()))
        .map(|index| {
            let (status, kind) = match (base.get(index), target.get(index)) {
                (Some(b), Some(t)) if same_block(b, t) => (ChangeKind::Unchanged, &t.kind),
                (Some(_), Some(t)) => (ChangeKind::Modified, &t.kind),
                (None, Some(t)) => (ChangeKind::Added, &t.kind),
                (Some(b), None) => (ChangeKind::Removed, &b.kind),
                (None, None) => unreachable!("index is below the longer length"),
            };
            BlockChange {
                index,
                status,
                kind: kind.clone(),
            }
        })
        .collect()
}

/// Union of keys, sorted, each classified by deep equality.
pub fn diff_meta(base: &Value, target: &Value) -> Vec<MetaChange> {
    let empty = Map::new();
    let base = base.as_object().unwrap_or(&empty);
    let target = target.as_object().unwrap_or(&empty);

    let keys: BTreeSet<&String> = base.keys().chain(target.keys()).collect();
    keys.into_iter()
        .map(|key| {
            let status = match (base.get(key), target.get(key)) {
                (Some(b), Some(t)) if b == t => ChangeKind::Unchanged,
                (Some(_), Some(_)) => ChangeKind::Modified,
                (None, _) => ChangeKind::Added,
                (Some(_), None) => ChangeKind::Removed,
            };
            MetaChange {
                key: key.clone(),
                status,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use super::*;
    use crate::content::model::RevisionWorkflow;

    fn block(kind: &str, text: &str) -> ContentBlock {
        ContentBlock {
            kind: kind.to_string(),
            sort_order: 0,
            data: json!({ "text": text }),
            settings: json!({}),
        }
    }

    fn revision(blocks: Vec<ContentBlock>, meta: Value) -> Revision {
        Revision {
            id: Uuid::new_v4(),
            page_id: Uuid::nil(),
            site_id: Uuid::nil(),
            author_id: None,
            summary: None,
            meta,
            created_at: Utc::now(),
            workflow: RevisionWorkflow::draft(),
            blocks,
        }
    }

    fn statuses(changes: &[BlockChange]) -> Vec<(usize, ChangeKind)> {
        changes.iter().map(|c| (c.index, c.status)).collect()
    }

    #[test]
    fn self_diff_is_all_unchanged() {
        let rev = revision(
            vec![block("hero", "Hi"), block("text", "Body")],
            json!({ "title": "Home", "seo": { "noindex": false } }),
        );
        let diff = diff_revisions(Some(&rev), &rev);
        assert!(diff.blocks.iter().all(|b| b.status == ChangeKind::Unchanged));
        assert!(diff.metadata.iter().all(|m| m.status == ChangeKind::Unchanged));
        assert_eq!(diff.metadata.len(), 2);
        assert!(!diff.has_changes());
    }

    #[test]
    fn appended_block_is_added() {
        let a = revision(vec![block("hero", "X"), block("text", "Y")], json!({}));
        let b = revision(
            vec![block("hero", "X"), block("text", "Y"), block("cta", "Z")],
            json!({}),
        );
        let diff = diff_revisions(Some(&a), &b);
        assert_eq!(
            statuses(&diff.blocks),
            vec![
                (0, ChangeKind::Unchanged),
                (1, ChangeKind::Unchanged),
                (2, ChangeKind::Added)
            ]
        );
        assert_eq!(diff.base_revision_id, Some(a.id));
        assert_eq!(diff.target_revision_id, b.id);
    }

    #[test]
    fn dropped_block_is_removed() {
        let a = revision(vec![block("hero", "X"), block("text", "Y")], json!({}));
        let b = revision(vec![block("hero", "X")], json!({}));
        let diff = diff_revisions(Some(&a), &b);
        assert_eq!(
            statuses(&diff.blocks),
            vec![(0, ChangeKind::Unchanged), (1, ChangeKind::Removed)]
        );
        assert_eq!(diff.blocks[1].kind, "text");
    }

    #[test]
    fn insertion_cascades_as_modified() {
        let a = revision(vec![block("hero", "X"), block("text", "Y")], json!({}));
        let b = revision(
            vec![block("hero", "X"), block("media", "New"), block("text", "Y")],
            json!({}),
        );
        let diff = diff_revisions(Some(&a), &b);
        assert_eq!(
            statuses(&diff.blocks),
            vec![
                (0, ChangeKind::Unchanged),
                (1, ChangeKind::Modified),
                (2, ChangeKind::Added)
            ]
        );
    }

    #[test]
    fn settings_change_is_modified() {
        let mut changed = block("hero", "X");
        changed.settings = json!({ "theme": "dark" });
        let a = revision(vec![block("hero", "X")], json!({}));
        let b = revision(vec![changed], json!({}));
        assert_eq!(diff_revisions(Some(&a), &b).blocks[0].status, ChangeKind::Modified);
    }

    #[test]
    fn metadata_keys_are_classified() {
        let a = revision(
            vec![],
            json!({ "title": "Old", "description": "Same", "canonical": "/a" }),
        );
        let b = revision(
            vec![],
            json!({ "title": "New", "description": "Same", "ogImage": "x.png" }),
        );
        let diff = diff_revisions(Some(&a), &b);
        let got: Vec<_> = diff
            .metadata
            .iter()
            .map(|m| (m.key.as_str(), m.status))
            .collect();
        assert_eq!(
            got,
            vec![
                ("canonical", ChangeKind::Removed),
                ("description", ChangeKind::Unchanged),
                ("ogImage", ChangeKind::Added),
                ("title", ChangeKind::Modified),
            ]
        );
    }

    #[test]
    fn missing_base_marks_everything_added() {
        let b = revision(vec![block("hero", "X")], json!({ "title": "T" }));
        let diff = diff_revisions(None, &b);
        assert_eq!(diff.base_revision_id, None);
        assert_eq!(diff.blocks[0].status, ChangeKind::Added);
        assert_eq!(diff.metadata[0].status, ChangeKind::Added);
    }
}
