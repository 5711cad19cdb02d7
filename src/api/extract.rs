use axum::{extract::rejection::JsonRejection, extract::FromRequest};

use crate::error::AppError;

/// `axum::Json` whose rejections render as `AppError` JSON bodies instead
/// of axum's plain-text 4xx responses.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct ApiJson<T>(pub T);

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}
