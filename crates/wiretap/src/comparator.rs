//! Pluggable validation of replayed requests against their fixture entries.

use crate::error::BoxError;
use crate::snapshot::SerializedRequest;
use std::sync::Arc;

/// Compares an intercepted request with the fixture entry at the same position.
///
/// Returning `Err` signals a mismatch; the engine rewraps whatever is raised
/// as a `ComparatorMismatch` and routes it to the failing call only.
pub trait RequestComparator: Send + Sync {
    fn compare(
        &self,
        actual: &SerializedRequest,
        expected: &SerializedRequest,
        identity: u64,
    ) -> Result<(), BoxError>;
}

/// Default strategy: normalized method and URL only.
///
/// Headers and bodies are ignored so fixtures tolerate incidental variance
/// (timestamps, auth tokens). Opt into stricter matching with a custom
/// comparator.
#[derive(Debug, Clone, Copy, Default)]
pub struct MethodUrlComparator;

impl RequestComparator for MethodUrlComparator {
    fn compare(
        &self,
        actual: &SerializedRequest,
        expected: &SerializedRequest,
        _identity: u64,
    ) -> Result<(), BoxError> {
        let actual_method = actual.method.to_uppercase();
        let expected_method = expected.method.to_uppercase();
        if actual_method != expected_method {
            return Err(format!("expected method {expected_method}, got {actual_method}").into());
        }

        let actual_url = actual.normalized_url();
        let expected_url = expected.normalized_url();
        if actual_url != expected_url {
            return Err(format!("expected URL {expected_url}, got {actual_url}").into());
        }
        Ok(())
    }
}

/// Adapt a closure as a comparator.
pub fn comparator_fn<F>(compare: F) -> Arc<dyn RequestComparator>
where
    F: Fn(&SerializedRequest, &SerializedRequest, u64) -> Result<(), BoxError>
        + Send
        + Sync
        + 'static,
{
    struct FnComparator<F>(F);

    impl<F> RequestComparator for FnComparator<F>
    where
        F: Fn(&SerializedRequest, &SerializedRequest, u64) -> Result<(), BoxError> + Send + Sync,
    {
        fn compare(
            &self,
            actual: &SerializedRequest,
            expected: &SerializedRequest,
            identity: u64,
        ) -> Result<(), BoxError> {
            (self.0)(actual, expected, identity)
        }
    }

    Arc::new(FnComparator(compare))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::Body;
    use std::collections::HashMap;

    fn request(method: &str, host: &str, path: &str) -> SerializedRequest {
        SerializedRequest {
            method: method.to_string(),
            scheme: "http".to_string(),
            host: host.to_string(),
            path: path.to_string(),
            query: None,
            headers: HashMap::new(),
            body: Body::Empty,
        }
    }

    #[test]
    fn test_default_matches_method_and_url() {
        let comparator = MethodUrlComparator;
        let actual = request("get", "Example.com", "/users/1");
        let expected = request("GET", "example.com", "/users/1");
        assert!(comparator.compare(&actual, &expected, 0).is_ok());
    }

    #[test]
    fn test_default_ignores_headers_and_body() {
        let comparator = MethodUrlComparator;
        let mut actual = request("GET", "example.com", "/users/1");
        actual
            .headers
            .insert("authorization".to_string(), "Bearer xyz".to_string());
        actual.body = Body::Text("payload".to_string());
        let expected = request("GET", "example.com", "/users/1");
        assert!(comparator.compare(&actual, &expected, 0).is_ok());
    }

    #[test]
    fn test_default_rejects_url_mismatch() {
        let comparator = MethodUrlComparator;
        let actual = request("GET", "example.com", "/users/2");
        let expected = request("GET", "example.com", "/users/1");
        let error = comparator.compare(&actual, &expected, 0).unwrap_err();
        assert!(error.to_string().contains("/users/1"));
    }

    #[test]
    fn test_default_rejects_method_mismatch() {
        let comparator = MethodUrlComparator;
        let actual = request("POST", "example.com", "/users/1");
        let expected = request("GET", "example.com", "/users/1");
        assert!(comparator.compare(&actual, &expected, 0).is_err());
    }

    #[test]
    fn test_closure_comparator() {
        let comparator = comparator_fn(|actual, expected, _identity| {
            if actual.body == expected.body {
                Ok(())
            } else {
                Err("body mismatch".into())
            }
        });

        let mut actual = request("GET", "example.com", "/a");
        let expected = request("GET", "example.com", "/a");
        assert!(comparator.compare(&actual, &expected, 0).is_ok());

        actual.body = Body::Text("different".to_string());
        assert!(comparator.compare(&actual, &expected, 0).is_err());
    }
}
