//! Network utilities shared by upstream API clients.

mod retry;

pub use retry::{retry_async, RetryConfig, RetryDecision, RetryStats};

/// Extract the host from a URL, for error messages and rate-limit labels.
pub fn extract_domain(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(String::from))
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_domain() {
        assert_eq!(
            extract_domain("https://generativelanguage.googleapis.com/v1beta/models"),
            "generativelanguage.googleapis.com"
        );
        assert_eq!(extract_domain("not a url"), "unknown");
    }
}
