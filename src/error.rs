//! Domain errors surfaced by roster, chat and reconciliation commands.

use thiserror::Error;
use uuid::Uuid;

/// Reasons a student write is rejected at the boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{0} cannot be empty")]
    Empty(&'static str),

    #[error("email {email} must belong to the @{domain} domain")]
    EmailDomain { email: String, domain: String },

    #[error("invalid score for {field}: {value}")]
    InvalidScore { field: &'static str, value: String },
}

#[derive(Debug, Error)]
pub enum PortalError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The record was deleted or never existed; the caller holds a stale id.
    #[error("student not found: {0}")]
    StudentNotFound(String),

    #[error("email {0} is already registered to another account")]
    EmailTaken(String),

    #[error("conversation not found: {0}")]
    ConversationNotFound(Uuid),

    #[error("unknown teacher: {0}")]
    UnknownTeacher(String),

    #[error("uid {uid} is already bound to {email}")]
    UidConflict { uid: String, email: String },
}
