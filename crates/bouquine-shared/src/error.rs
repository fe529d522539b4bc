use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("Id is empty")]
    Empty,

    #[error("Id contains the reserved separator ':'")]
    ReservedSeparator,

    #[error("Malformed conversation id: {0}")]
    MalformedConversation(String),
}
