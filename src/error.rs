use thiserror::Error;

/// Domain rule violations raised by the storage layer.
///
/// These travel inside an `anyhow::Error` and are recognised by the HTTP
/// layer, which exposes their message to the client as a 400.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("A feed type with slug '{0}' already exists")]
    DuplicateSlug(String),

    #[error("A feed with URL '{0}' already exists")]
    DuplicateFeedUrl(String),

    #[error("Feed type '{0}' does not accept self-added feeds")]
    SelfAddNotAllowed(String),

    #[error("Feed type not found: {0}")]
    FeedTypeNotFound(String),

    #[error("'{0}' is not a valid email address")]
    InvalidEmail(String),

    #[error("Username '{0}' is already taken")]
    UsernameTaken(String),

    #[error("Users cannot follow themselves")]
    CannotFollowSelf,

    #[error("A project with slug '{0}' already exists")]
    DuplicateProjectSlug(String),

    #[error("Slug '{0}' may only contain lowercase letters, digits and hyphens")]
    InvalidSlug(String),

    #[error("Unknown approval status: {0}")]
    UnknownApprovalStatus(String),

    #[error("{0} must not be empty")]
    Blank(&'static str),
}
