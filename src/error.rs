//! Failure taxonomy shared by the element tree, the ER7 parser, the validator and the
//! schema loader.

use crate::schema::ElementKind;

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, Hl7Error>;

#[derive(Debug, thiserror::Error)]
pub enum Hl7Error {
    /// The name does not exist in the schema nor among the existing children.
    #[error("Child not found: {0}")]
    ChildNotFound(String),
    /// Kind, name prefix or membership violation when attaching a child.
    #[error("Child not valid: {child} cannot be a child of {parent}")]
    ChildNotValid { child: String, parent: String },
    /// Schema lookup failed for this kind/version.
    #[error("Invalid name for {kind}: {name}")]
    InvalidName { kind: ElementKind, name: String },
    #[error("Maximum number of {child} children ({limit}) reached for {parent}")]
    MaxChildLimitReached {
        child: String,
        parent: String,
        limit: u32,
    },
    #[error("Operation not allowed: {0}")]
    OperationNotAllowed(String),
    #[error("Invalid encoding chars: {0}")]
    InvalidEncodingChars(String),
    #[error("Parser: {0}")]
    Parser(String),
    #[error("Message profile not found for structure {0}")]
    MessageProfileNotFound(String),
    #[error("Unsupported HL7 version: {0}")]
    UnsupportedVersion(String),
    #[error("Validation: {0}")]
    Validation(crate::validation::ValidationIssue),
    /// A scalar could not be converted to the declared base datatype.
    #[error("Invalid value {value:?} for datatype {datatype}")]
    InvalidValue { datatype: String, value: String },
    /// Reference-schema DSL could not be parsed or resolved.
    #[error("Schema: {0}")]
    Schema(String),
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
}

impl Hl7Error {
    pub(crate) fn not_valid(child: impl Into<String>, parent: impl Into<String>) -> Self {
        Hl7Error::ChildNotValid {
            child: child.into(),
            parent: parent.into(),
        }
    }

    pub(crate) fn invalid_name(kind: ElementKind, name: impl Into<String>) -> Self {
        Hl7Error::InvalidName {
            kind,
            name: name.into(),
        }
    }

    pub fn is_invalid_name(&self) -> bool {
        matches!(self, Hl7Error::InvalidName { .. })
    }
}
