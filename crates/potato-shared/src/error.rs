use thiserror::Error;

/// Rejections of user-supplied input, raised before any request is issued.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Message body is empty")]
    EmptyBody,

    #[error("Message body too long: {len} characters (max {max})")]
    BodyTooLong { len: usize, max: usize },

    #[error("Email address is required")]
    EmptyEmail,

    #[error("Invalid email address: {0}")]
    InvalidEmail(String),

    #[error("Page size must be between 1 and {max}, got {got}")]
    PageSize { got: u32, max: u32 },
}
