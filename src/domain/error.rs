use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("unknown resource `{name}`")]
    UnknownResource { name: String },
    #[error("document validation failed: {message}")]
    Validation { message: String },
}

impl DomainError {
    pub fn unknown_resource(name: impl Into<String>) -> Self {
        Self::UnknownResource { name: name.into() }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}
