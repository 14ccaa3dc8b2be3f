pub type ParseResult<T> = core::result::Result<T, ProtocolError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("frame is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("frame is not a JSON object")]
    NotAnObject,
    #[error("frame has an invalid field: {0}")]
    InvalidFrame(String),
    #[error("payload has an invalid field: {0}")]
    InvalidPayload(String),
    #[error("payload has an unexpected shape, expected {expected}")]
    UnexpectedShape { expected: &'static str },
    #[error("payload is missing field `{0}`")]
    MissingField(&'static str),
    #[error("unknown parameter type {0}")]
    InvalidParameterType(i64),
    #[error("failed to encode message: {0}")]
    Encode(String),
}
