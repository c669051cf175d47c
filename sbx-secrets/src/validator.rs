//! Secret validation framework.
//!
//! This crate supplies only the template every HTTP-based validator in the
//! wider system follows, not concrete per-service validators — those carry
//! service-specific endpoints and request shaping that belong closer to
//! each detector's own knowledge of its target API.

use crate::Secret;

/// Outcome of validating a secret against its issuing service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The service accepted the secret as live.
    Valid,
    /// The service rejected the secret (expired, revoked, never issued).
    Invalid,
    /// Validation could not be completed (network error, unexpected
    /// status, rate limiting) — callers should not treat this as a
    /// negative result.
    Failed,
}

/// Implemented by each concrete per-service validator.
pub trait Validator {
    /// Checks whether `secret` is still live against its issuing service.
    fn validate(&self, secret: &Secret) -> crate::error::Result<Verdict>;
}

/// Maps an HTTP response status to a [`Verdict`]: 2xx is valid, 401/403/404
/// are invalid, everything else (including a transport failure) is failed.
pub fn status_bucket(response: Result<ureq::http::Response<ureq::Body>, ureq::Error>) -> Verdict {
    match response {
        Ok(resp) if resp.status().is_success() => Verdict::Valid,
        Ok(resp) => {
            let code = resp.status().as_u16();
            if code == 401 || code == 403 || code == 404 {
                Verdict::Invalid
            } else {
                Verdict::Failed
            }
        }
        Err(ureq::Error::StatusCode(code)) if code == 401 || code == 403 || code == 404 => {
            Verdict::Invalid
        }
        Err(_) => Verdict::Failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_code_error_maps_to_invalid() {
        assert_eq!(status_bucket(Err(ureq::Error::StatusCode(401))), Verdict::Invalid);
        assert_eq!(status_bucket(Err(ureq::Error::StatusCode(404))), Verdict::Invalid);
    }

    #[test]
    fn other_status_code_error_maps_to_failed() {
        assert_eq!(status_bucket(Err(ureq::Error::StatusCode(500))), Verdict::Failed);
    }
}
