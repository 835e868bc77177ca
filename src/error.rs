use axum::extract::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use std::env;
use std::fmt::{self, Debug, Display};

pub const VALIDATION: i32 = 100;
pub const ILLEGAL_TRANSITION: i32 = 101;
pub const NO_DRIVER_AVAILABLE: i32 = 102;
pub const POLICY_VIOLATION: i32 = 103;
pub const PAYMENT_FAILURE: i32 = 104;
pub const CONCURRENCY_CONFLICT: i32 = 105;
pub const NOT_FOUND: i32 = 106;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Error {
    pub code: i32,
    pub message: String,
}

impl Error {
    fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::new(VALIDATION, message)
    }

    pub fn illegal_transition_error(from: impl Debug, to: impl Debug) -> Self {
        Self::new(
            ILLEGAL_TRANSITION,
            format!("illegal transition from {:?} to {:?}", from, to),
        )
    }

    pub fn no_driver_available_error(ride_id: impl Display) -> Self {
        Self::new(
            NO_DRIVER_AVAILABLE,
            format!("no driver available for ride {}", ride_id),
        )
    }

    pub fn policy_violation_error(message: impl Into<String>) -> Self {
        Self::new(POLICY_VIOLATION, message)
    }

    pub fn payment_failure_error(message: impl Into<String>) -> Self {
        Self::new(PAYMENT_FAILURE, message)
    }

    pub fn concurrency_conflict_error(entity: impl Display, expected_version: u64) -> Self {
        Self::new(
            CONCURRENCY_CONFLICT,
            format!(
                "concurrent modification of {}: expected version {}",
                entity, expected_version
            ),
        )
    }

    pub fn not_found_error(entity: impl Display) -> Self {
        Self::new(NOT_FOUND, format!("{} not found", entity))
    }

    pub fn env_var_error(name: &str) -> Self {
        Self::new(1, format!("environment variable error: {}", name))
    }

    pub fn database_error<T: Debug>(err: T) -> Self {
        Self::new(2, format!("database error: {:?}", err))
    }

    pub fn upstream_error(message: impl Into<String>) -> Self {
        Self::new(4, message)
    }

    pub fn unexpected_error(message: impl Into<String>) -> Self {
        Self::new(5, message)
    }

    pub fn is_validation_error(&self) -> bool {
        self.code == VALIDATION
    }

    pub fn is_illegal_transition_error(&self) -> bool {
        self.code == ILLEGAL_TRANSITION
    }

    pub fn is_no_driver_available_error(&self) -> bool {
        self.code == NO_DRIVER_AVAILABLE
    }

    pub fn is_policy_violation_error(&self) -> bool {
        self.code == POLICY_VIOLATION
    }

    pub fn is_payment_failure_error(&self) -> bool {
        self.code == PAYMENT_FAILURE
    }

    pub fn is_concurrency_conflict_error(&self) -> bool {
        self.code == CONCURRENCY_CONFLICT
    }

    pub fn is_not_found_error(&self) -> bool {
        self.code == NOT_FOUND
    }

    pub fn is_internal(&self) -> bool {
        (1..=99).contains(&self.code)
    }

    fn status_code(&self) -> StatusCode {
        match self.code {
            VALIDATION => StatusCode::BAD_REQUEST,
            NOT_FOUND => StatusCode::NOT_FOUND,
            ILLEGAL_TRANSITION | CONCURRENCY_CONFLICT => StatusCode::CONFLICT,
            POLICY_VIOLATION => StatusCode::UNPROCESSABLE_ENTITY,
            NO_DRIVER_AVAILABLE => StatusCode::SERVICE_UNAVAILABLE,
            PAYMENT_FAILURE => StatusCode::PAYMENT_REQUIRED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for Error {}

impl From<env::VarError> for Error {
    fn from(err: env::VarError) -> Self {
        Self::new(1, format!("environment variable error: {}", err))
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Self::database_error(err)
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::new(3, format!("reqwest error: {}", err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::unexpected_error(format!("serialization error: {}", err))
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_message = if self.is_internal() {
            "Internal Server Error".to_string()
        } else {
            self.message.clone()
        };

        let body = Json(json!({
            "code": self.code,
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

#[test]
fn internal_errors_are_distinguished_from_caller_errors() {
    assert!(Error::database_error("boom").is_internal());
    assert!(!Error::validation_error("missing pickup").is_internal());
    assert!(Error::no_driver_available_error("abc").is_no_driver_available_error());
    assert_eq!(
        Error::policy_violation_error("x").status_code(),
        StatusCode::UNPROCESSABLE_ENTITY
    );
}
