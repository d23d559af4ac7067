//! Shared-password gate.
//!
//! The `Authorization` header may carry the password verbatim, or a basic-auth
//! pair whose password half is compared (the user name is ignored).

use crate::{config::Secret, errors::AppError};
use axum::http::{HeaderMap, header};
use base64::{Engine as _, engine::general_purpose};

/// True when no password is configured or the request supplies it.
pub fn check_password(headers: &HeaderMap, expected: Option<&Secret>) -> bool {
    let Some(Secret(expected)) = expected else {
        return true;
    };

    let Some(auth) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
    else {
        return false;
    };

    if let Some(encoded) = auth.strip_prefix("Basic ") {
        let Some(decoded) = general_purpose::STANDARD
            .decode(encoded.trim())
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
        else {
            return false;
        };
        if let Some((_, password)) = decoded.split_once(':') {
            return password == expected;
        }
    }

    auth == expected
}

pub fn require_password(headers: &HeaderMap, expected: Option<&Secret>) -> Result<(), AppError> {
    if check_password(headers, expected) {
        Ok(())
    } else {
        Err(AppError::unauthorized())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn with_auth(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn open_when_no_password_configured() {
        assert!(check_password(&HeaderMap::new(), None));
    }

    #[test]
    fn raw_header_value_matches() {
        let secret = Secret("s3cret".into());
        assert!(check_password(&with_auth("s3cret"), Some(&secret)));
        assert!(!check_password(&with_auth("wrong"), Some(&secret)));
        assert!(!check_password(&HeaderMap::new(), Some(&secret)));
    }

    #[test]
    fn basic_auth_password_half_matches() {
        let secret = Secret("s3cret".into());
        let good = general_purpose::STANDARD.encode("anyone:s3cret");
        let bad = general_purpose::STANDARD.encode("s3cret:nope");
        assert!(check_password(&with_auth(&format!("Basic {good}")), Some(&secret)));
        assert!(!check_password(&with_auth(&format!("Basic {bad}")), Some(&secret)));
        assert!(!check_password(&with_auth("Basic !!!not-base64"), Some(&secret)));
    }

    #[test]
    fn password_may_contain_colons() {
        let secret = Secret("a:b".into());
        let encoded = general_purpose::STANDARD.encode("user:a:b");
        assert!(check_password(&with_auth(&format!("Basic {encoded}")), Some(&secret)));
    }
}
