use actix_web::{HttpResponse, ResponseError, http::StatusCode as HttpStatus};
use serde_json::json;
use thiserror::Error;

use crate::daemon::StatusCode;

#[derive(Debug, Error)]
pub enum GpioError {
    #[error("Daemon rejected pin {pin}: {code}")]
    HardwareRejected { pin: u32, code: StatusCode },
    #[error("Pin {pin} already has an active interrupt subscription")]
    AlreadySubscribed { pin: u32 },
    #[error("Pin {pin} has no active interrupt subscription")]
    NotSubscribed { pin: u32 },
    #[error("Pin not found: {0}")]
    NotFoundPin(String),
    #[error("Invalid value: {0}")]
    InvalidValue(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Backend error: {0}")]
    Backend(String),
}

impl GpioError {
    pub(crate) fn rejected(pin: u32, code: StatusCode) -> Self {
        GpioError::HardwareRejected { pin, code }
    }
}

impl ResponseError for GpioError {
    fn status_code(&self) -> HttpStatus {
        match self {
            GpioError::NotFoundPin(_) => HttpStatus::NOT_FOUND,
            GpioError::AlreadySubscribed { .. } | GpioError::NotSubscribed { .. } => {
                HttpStatus::CONFLICT
            }
            GpioError::InvalidValue(_) => HttpStatus::BAD_REQUEST,
            GpioError::HardwareRejected { .. } => HttpStatus::BAD_GATEWAY,
            GpioError::Config(_) | GpioError::Backend(_) => HttpStatus::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({ "error": self.to_string() }))
    }
}
