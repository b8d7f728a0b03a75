use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Malformed input: bad natural key, non-positive grams, unparsable concentration.
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    /// A uniqueness constraint rejected a write racing another writer.
    #[error("conflicting write: {0}")]
    Conflict(String),

    /// The database chose this transaction as a deadlock victim and already
    /// rolled it back. Nothing inside the transaction can be retried.
    #[error("transaction deadlocked: {0}")]
    Deadlock(String),

    #[error("storage failure: {0}")]
    Storage(String),

    #[error("ingestion aborted before commit")]
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Storage,
    Aborted,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Conflict(_) | Error::Deadlock(_) => ErrorKind::Conflict,
            Error::Storage(_) => ErrorKind::Storage,
            Error::Aborted => ErrorKind::Aborted,
        }
    }

    /// Errors confined to a single input row; everything else is fatal to a batch.
    pub fn is_row_level(&self) -> bool {
        matches!(self, Error::Validation(_))
    }

    pub fn is_storage(&self) -> bool {
        matches!(self, Error::Storage(_))
    }
}

/// Message prefix of MySQL error 1213 (ER_LOCK_DEADLOCK), which diesel does
/// not classify.
const MYSQL_DEADLOCK: &str = "Deadlock found";

impl From<DieselError> for Error {
    fn from(err: DieselError) -> Self {
        match err {
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                Error::Conflict(info.message().to_string())
            }
            DieselError::DatabaseError(_, info) if info.message().starts_with(MYSQL_DEADLOCK) => {
                Error::Deadlock(info.message().to_string())
            }
            DieselError::NotFound => Error::NotFound("record".to_string()),
            other => Error::Storage(other.to_string()),
        }
    }
}

impl From<diesel::r2d2::PoolError> for Error {
    fn from(err: diesel::r2d2::PoolError) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<actix_web::error::BlockingError> for Error {
    fn from(err: actix_web::error::BlockingError) -> Self {
        Error::Storage(err.to_string())
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    kind: ErrorKind,
    message: &'a str,
}

impl ResponseError for Error {
    fn status_code(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Storage => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Aborted => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let message = self.to_string();
        HttpResponse::build(self.status_code()).json(ErrorBody {
            kind: self.kind(),
            message: &message,
        })
    }
}
