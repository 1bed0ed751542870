use http::StatusCode;
use std::fmt;

/// Closed set of gateway-level failures. Each kind carries the HTTP status
/// the connection protocol machine writes when the kind escapes a dispatch
/// task unhandled (see `proto::connection`).
#[derive(Debug)]
pub enum GatewayError {
    /// The inbound URL did not decompose into `/service/...`.
    NotFound(String),
    /// Reserved for future client-side request validation.
    BadRequest(String),
    /// Unknown service, or the upstream was unreachable.
    BadGateway(String),
    /// Any other unhandled failure in the dispatch task.
    Internal(String),
}

impl GatewayError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        GatewayError::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        GatewayError::BadRequest(msg.into())
    }

    pub fn bad_gateway(msg: impl Into<String>) -> Self {
        GatewayError::BadGateway(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        GatewayError::Internal(msg.into())
    }

    /// The HTTP status the protocol machine's error-response writer uses.
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::NotFound(msg) => write!(f, "{msg}"),
            GatewayError::BadRequest(msg) => write!(f, "{msg}"),
            GatewayError::BadGateway(msg) => write!(f, "{msg}"),
            GatewayError::Internal(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for GatewayError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_taxonomy() {
        assert_eq!(GatewayError::not_found("x").status(), StatusCode::NOT_FOUND);
        assert_eq!(
            GatewayError::BadRequest("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GatewayError::bad_gateway("x").status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            GatewayError::internal("x").status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn display_is_the_client_visible_message() {
        let err = GatewayError::bad_gateway("Unable to reach destination, service unreachable.");
        assert_eq!(
            err.to_string(),
            "Unable to reach destination, service unreachable."
        );
    }
}
