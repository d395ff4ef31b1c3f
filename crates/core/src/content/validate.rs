//! Validation of revision input before it is stored.
use serde_json::{Map, Value};
use thiserror::Error;

use super::model::NewRevision;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("revision meta must be a JSON object")]
    MetaNotObject,
    #[error("block {index} has an empty kind")]
    EmptyBlockKind { index: usize },
    #[error("blocks {first} and {second} share sort order {sort_order}")]
    DuplicateSortOrder {
        first: usize,
        second: usize,
        sort_order: i32,
    },
}

impl ValidationError {
    /// Field path the error refers to, for inline form feedback.
    pub fn field(&self) -> String {
        match self {
            Self::MetaNotObject => "meta".to_string(),
            Self::EmptyBlockKind { index } => format!("blocks[{index}].kind"),
            Self::DuplicateSortOrder { second, .. } => format!("blocks[{second}].sortOrder"),
        }
    }
}

/// Validate a new revision and normalize it in place.
///
/// A null `meta` becomes an empty object and blocks are ordered by `sortOrder`.
pub fn validate_new_revision(input: &mut NewRevision) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if input.meta.is_null() {
        input.meta = Value::Object(Map::new());
    } else if !input.meta.is_object() {
        errors.push(ValidationError::MetaNotObject);
    }

    for (index, block) in input.blocks.iter().enumerate() {
        if block.kind.trim().is_empty() {
            errors.push(ValidationError::EmptyBlockKind { index });
        }
        if let Some(first) = input.blocks[..index]
            .iter()
            .position(|b| b.sort_order == block.sort_order)
        {
            errors.push(ValidationError::DuplicateSortOrder {
                first,
                second: index,
                sort_order: block.sort_order,
            });
        }
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    input.blocks.sort_by_key(|b| b.sort_order);
    Ok(())
}
