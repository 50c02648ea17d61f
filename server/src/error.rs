use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::account::IssueError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Malformed payload")]
    MalformedPayload,

    #[error("User already exists. Please login.")]
    AlreadyVerified,

    #[error("Old password cannot be used. Please choose a new password.")]
    SameCredential,

    #[error("Invalid email or password.")]
    InvalidCredentials,

    #[error("Internal error: {0}")]
    InternalError(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::MalformedPayload
            | AppError::AlreadyVerified
            | AppError::SameCredential
            | AppError::InvalidCredentials => StatusCode::BAD_REQUEST,
            AppError::InternalError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, self.to_string()).into_response()
    }
}

impl From<IssueError> for AppError {
    fn from(err: IssueError) -> Self {
        match err {
            IssueError::AlreadyVerified => AppError::AlreadyVerified,
            IssueError::SameCredential => AppError::SameCredential,
            IssueError::Hash(_) | IssueError::Store(_) | IssueError::Dispatch(_) => {
                AppError::InternalError(Box::new(err))
            }
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::InternalError(Box::new(err))
    }
}
