use serde::{Deserialize, Serialize};

/// An external calendar feed whose events are merged into the display read-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: i64,
    pub name: String,
    /// Either a feed slug on the backend (`china-holidays`) or an absolute URL.
    pub source: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeedLocation {
    Slug(String),
    Url(String),
}

impl Subscription {
    pub fn feed_location(&self) -> FeedLocation {
        let source = self.source.trim();
        if source.starts_with("http://") || source.starts_with("https://") {
            FeedLocation::Url(source.to_string())
        } else if let Some(rest) = source.strip_prefix("webcal://") {
            FeedLocation::Url(format!("https://{}", rest))
        } else {
            FeedLocation::Slug(source.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subscription(source: &str) -> Subscription {
        Subscription {
            id: 1,
            name: "Holidays".to_string(),
            source: source.to_string(),
            enabled: true,
        }
    }

    #[test]
    fn bare_source_is_a_backend_slug() {
        assert_eq!(
            subscription("china-holidays").feed_location(),
            FeedLocation::Slug("china-holidays".to_string())
        );
    }

    #[test]
    fn https_source_is_a_url() {
        assert_eq!(
            subscription("https://example.com/cal.ics").feed_location(),
            FeedLocation::Url("https://example.com/cal.ics".to_string())
        );
    }

    #[test]
    fn webcal_source_is_fetched_over_https() {
        assert_eq!(
            subscription("webcal://example.com/cal.ics").feed_location(),
            FeedLocation::Url("https://example.com/cal.ics".to_string())
        );
    }
}
