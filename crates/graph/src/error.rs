use extract::EntityType;
use thiserror::Error;

use crate::model::EntityId;

pub type Result<T> = std::result::Result<T, GraphError>;

#[derive(Debug, Error)]
pub enum GraphError {
    /// A relationship named an endpoint the graph does not hold.
    #[error("relationship '{relationship}' references unknown entity '{missing}'")]
    DanglingReference { relationship: String, missing: String },

    #[error("unknown entity '{0}'")]
    UnknownEntity(String),

    #[error("confidence {0} outside [0, 1]")]
    InvalidConfidence(f64),

    #[error("cannot merge {absorbed} ({absorbed_type}) into {kept} ({kept_type}): types differ")]
    TypeMismatch {
        kept: EntityId,
        kept_type: EntityType,
        absorbed: EntityId,
        absorbed_type: EntityType,
    },

    #[error("cannot merge entity {0} into itself")]
    SelfMerge(EntityId),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl GraphError {
    pub fn is_dangling_reference(&self) -> bool {
        matches!(self, GraphError::DanglingReference { .. })
    }
}
