pub mod config;
pub mod error;
pub mod state;

pub use config::{AppConfig, LtpBatching};
pub use error::AppError;
pub use state::AppState;
