use crate::orders::form::ValidationError;
use thiserror::Error;

const CONNECTIVITY_MESSAGE: &str = "Could not connect to the server.";

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Transport failure: the gateway never produced a response.
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// Non-2xx response. `message` is whatever could be salvaged from the body.
    #[error("HTTP {status}: {message}")]
    HttpStatus { status: u16, message: String },

    /// 2xx response carrying `status: false`.
    #[error("Gateway error: {0}")]
    Api(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid token: {0:?}")]
    InvalidToken(String),

    #[error("Order validation failed: {0:?}")]
    Validation(Vec<ValidationError>),
}

impl AppError {
    /// The single string shown to the user for any failure.
    pub fn user_message(&self) -> String {
        match self {
            AppError::Http(_) => CONNECTIVITY_MESSAGE.to_string(),
            AppError::HttpStatus { message, .. } => message.clone(),
            AppError::Api(message) => message.clone(),
            AppError::Json(_) => "Unexpected response from server.".to_string(),
            AppError::InvalidToken(_) => "Please enter a valid numeric token.".to_string(),
            AppError::Validation(errors) => errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join(" "),
            other => other.to_string(),
        }
    }
}
