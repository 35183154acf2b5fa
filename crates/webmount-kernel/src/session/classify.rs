//! Deciding whether a response was served to a logged-in user.
//!
//! The session never looks at markup itself; whoever knows the site supplies
//! the predicate.

use super::transport::HttpResponse;

/// Classifies a response as authenticated or not.
pub trait AuthClassifier: Send + Sync {
    fn is_authenticated(&self, response: &HttpResponse) -> bool;
}

impl<F> AuthClassifier for F
where
    F: Fn(&HttpResponse) -> bool + Send + Sync,
{
    fn is_authenticated(&self, response: &HttpResponse) -> bool {
        self(response)
    }
}

/// Substring test on the response body.
#[derive(Debug, Clone)]
pub struct MarkerClassifier {
    marker: String,
    present_means_authenticated: bool,
}

impl MarkerClassifier {
    /// Authenticated when `marker` appears in the body (e.g. a logout link).
    pub fn present(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
            present_means_authenticated: true,
        }
    }

    /// Authenticated when `marker` is absent from the body (e.g. a login form).
    pub fn absent(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
            present_means_authenticated: false,
        }
    }
}

impl AuthClassifier for MarkerClassifier {
    fn is_authenticated(&self, response: &HttpResponse) -> bool {
        let found = contains(&response.body, self.marker.as_bytes());
        found == self.present_means_authenticated
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    needle.is_empty() || haystack.windows(needle.len()).any(|w| w == needle)
}
