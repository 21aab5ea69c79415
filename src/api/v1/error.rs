use crate::api::v1::handler::ApiResponse;
use crate::application_port::*;
use serde::Serialize;
use std::convert::Infallible;
use tracing::warn;
use warp::http::StatusCode as HttpStatus;
use warp::{Rejection, reject};

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: StatusCode,
    pub message: String,
}

/// Carries a [`Status`] through warp's rejection machinery.
#[derive(Debug)]
pub struct StatusRejection(pub Status);

impl reject::Reject for StatusRejection {}

pub fn reject_status(status: impl Into<Status>) -> Rejection {
    reject::custom(StatusRejection(status.into()))
}

pub fn http_status(code: StatusCode) -> HttpStatus {
    match code {
        StatusCode::InvalidArgument => HttpStatus::BAD_REQUEST,
        StatusCode::Unauthenticated => HttpStatus::UNAUTHORIZED,
        StatusCode::PermissionDenied => HttpStatus::FORBIDDEN,
        StatusCode::NotFound => HttpStatus::NOT_FOUND,
        StatusCode::AlreadyExists => HttpStatus::CONFLICT,
        StatusCode::Internal => HttpStatus::INTERNAL_SERVER_ERROR,
    }
}

fn reply(status: Status) -> warp::reply::WithStatus<warp::reply::Json> {
    let http = http_status(status.code);
    let json = warp::reply::json(&ApiResponse::<()>::err(status.code, status.message));
    warp::reply::with_status(json, http)
}

pub async fn recover_error(err: Rejection) -> Result<impl warp::Reply, Infallible> {
    let status = if let Some(StatusRejection(status)) = err.find::<StatusRejection>() {
        status.clone()
    } else if err.is_not_found() {
        Status::not_found("no such route")
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        Status::invalid_argument(format!("malformed request body: {}", e))
    } else if err.find::<warp::reject::InvalidQuery>().is_some() {
        Status::invalid_argument("malformed query string")
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        Status::not_found("no such route")
    } else if err.find::<warp::reject::UnsupportedMediaType>().is_some()
        || err.find::<warp::reject::PayloadTooLarge>().is_some()
        || err.find::<warp::reject::MissingHeader>().is_some()
    {
        Status::invalid_argument("unsupported request")
    } else {
        warn!("unhandled rejection: {:?}", err);
        Status::new(StatusCode::Internal, "internal error")
    };

    Ok(reply(status))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_code_has_an_http_status() {
        assert_eq!(http_status(StatusCode::InvalidArgument), HttpStatus::BAD_REQUEST);
        assert_eq!(http_status(StatusCode::Unauthenticated), HttpStatus::UNAUTHORIZED);
        assert_eq!(http_status(StatusCode::PermissionDenied), HttpStatus::FORBIDDEN);
        assert_eq!(http_status(StatusCode::NotFound), HttpStatus::NOT_FOUND);
        assert_eq!(http_status(StatusCode::AlreadyExists), HttpStatus::CONFLICT);
        assert_eq!(http_status(StatusCode::Internal), HttpStatus::INTERNAL_SERVER_ERROR);
    }
}
