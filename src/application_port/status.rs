use super::{AuthError, RbacError, TokenError};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StatusCode {
    InvalidArgument,
    Unauthenticated,
    PermissionDenied,
    NotFound,
    AlreadyExists,
    Internal,
}

/// Transport-independent outcome of a failed call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code:?}: {message}")]
pub struct Status {
    pub code: StatusCode,
    pub message: String,
}

impl Status {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(StatusCode::InvalidArgument, message)
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Unauthenticated, message)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(StatusCode::PermissionDenied, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NotFound, message)
    }

    /// Logs the cause and hides it from the caller.
    pub fn internal<E: std::fmt::Display>(cause: E) -> Self {
        error!("internal error: {}", cause);
        Self::new(StatusCode::Internal, "internal error")
    }
}

impl From<TokenError> for Status {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Signing(e) => Status::internal(e),
            _ => Status::unauthenticated("invalid token"),
        }
    }
}

impl From<AuthError> for Status {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidArgument(msg) => Status::invalid_argument(msg),
            AuthError::InvalidCredentials => {
                Status::unauthenticated(AuthError::InvalidCredentials.to_string())
            }
            AuthError::EmailTaken => {
                Status::new(StatusCode::AlreadyExists, AuthError::EmailTaken.to_string())
            }
            AuthError::UserNotFound => Status::not_found(AuthError::UserNotFound.to_string()),
            AuthError::InvalidRefreshToken => {
                Status::unauthenticated(AuthError::InvalidRefreshToken.to_string())
            }
            AuthError::Token(e) => e.into(),
            AuthError::Rbac(e) => Status::internal(format!("rbac query: {}", e)),
            AuthError::Store(e) => Status::internal(format!("store: {}", e)),
            AuthError::InternalError(e) => Status::internal(e),
        }
    }
}

impl From<RbacError> for Status {
    fn from(err: RbacError) -> Self {
        match err {
            RbacError::InvalidArgument(msg) => Status::invalid_argument(msg),
            RbacError::NotFound(what) => Status::not_found(format!("{} not found", what)),
            RbacError::AlreadyExists(what) => {
                Status::new(StatusCode::AlreadyExists, format!("{} already exists", what))
            }
            RbacError::Store(e) => Status::internal(format!("store: {}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_causes_are_not_exposed() {
        let status: Status = AuthError::Store("connection refused".into()).into();
        assert_eq!(status.code, StatusCode::Internal);
        assert_eq!(status.message, "internal error");
    }

    #[test]
    fn login_failures_share_one_message() {
        let status: Status = AuthError::InvalidCredentials.into();
        assert_eq!(status.code, StatusCode::Unauthenticated);
        assert_eq!(status.message, "invalid email or password");
    }

    #[test]
    fn rbac_errors_map_to_codes() {
        let s: Status = RbacError::NotFound("role".into()).into();
        assert_eq!(s.code, StatusCode::NotFound);
        let s: Status = RbacError::AlreadyExists("permission".into()).into();
        assert_eq!(s.code, StatusCode::AlreadyExists);
        let s: Status = RbacError::InvalidArgument("bad name".into()).into();
        assert_eq!(s.code, StatusCode::InvalidArgument);
    }

    #[test]
    fn token_errors_are_unauthenticated() {
        let s: Status = TokenError::WrongType.into();
        assert_eq!(s.code, StatusCode::Unauthenticated);
        let s: Status = AuthError::Token(TokenError::Expired).into();
        assert_eq!(s.code, StatusCode::Unauthenticated);
    }
}
