//! Backend configuration.

use std::time::Duration;
use url::Url;

use crate::subscription::decode_application_server_key;
use crate::ApiError;

/// Connection settings for the hosted backend.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Project URL, e.g. `https://xyz.supabase.co/`.
    pub base_url: Url,
    /// Anonymous (publishable) key sent as `apikey`.
    pub anon_key: String,
    /// VAPID public key for push subscriptions, URL-safe base64.
    pub vapid_public_key: Option<String>,
    /// Entries fetched for the feed.
    pub page_size: usize,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl ApiConfig {
    pub const DEFAULT_PAGE_SIZE: usize = 14;

    pub fn new(base_url: &str, anon_key: impl Into<String>) -> Result<Self, ApiError> {
        Ok(Self {
            base_url: normalize_base(base_url)?,
            anon_key: anon_key.into(),
            vapid_public_key: None,
            page_size: Self::DEFAULT_PAGE_SIZE,
            timeout: Duration::from_secs(10),
        })
    }

    /// Read `SUPABASE_URL`, `SUPABASE_ANON_KEY` and optionally `VAPID_PUBLIC_KEY`.
    pub fn from_env() -> Result<Self, ApiError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ApiError> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let base_url = non_empty("SUPABASE_URL").ok_or(ApiError::MissingConfig("SUPABASE_URL"))?;
        let anon_key =
            non_empty("SUPABASE_ANON_KEY").ok_or(ApiError::MissingConfig("SUPABASE_ANON_KEY"))?;

        let mut config = Self::new(&base_url, anon_key)?;
        config.vapid_public_key = non_empty("VAPID_PUBLIC_KEY");
        Ok(config)
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_vapid_public_key(mut self, key: impl Into<String>) -> Self {
        self.vapid_public_key = Some(key.into());
        self
    }

    /// Raw bytes of the VAPID public key, as handed to the push service.
    pub fn application_server_key(&self) -> Result<Vec<u8>, ApiError> {
        let key = self
            .vapid_public_key
            .as_deref()
            .ok_or(ApiError::MissingConfig("VAPID_PUBLIC_KEY"))?;
        decode_application_server_key(key)
    }

    /// Resolve a path such as `rest/v1/daily_bible` against the base URL.
    pub fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }
}

/// Ensure the base path ends with `/` so relative joins append.
fn normalize_base(base_url: &str) -> Result<Url, ApiError> {
    let mut url = Url::parse(base_url.trim())?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_joins_under_base() {
        let config = ApiConfig::new("https://project.supabase.co", "anon").unwrap();
        assert_eq!(
            config.endpoint("rest/v1/daily_bible").unwrap().as_str(),
            "https://project.supabase.co/rest/v1/daily_bible"
        );

        let config = ApiConfig::new("http://127.0.0.1:54321/proxy", "anon").unwrap();
        assert_eq!(
            config.endpoint("/rest/v1/rpc/increment_view").unwrap().as_str(),
            "http://127.0.0.1:54321/proxy/rest/v1/rpc/increment_view"
        );
    }

    #[test]
    fn test_from_lookup() {
        let config = ApiConfig::from_lookup(|key| match key {
            "SUPABASE_URL" => Some("https://project.supabase.co".into()),
            "SUPABASE_ANON_KEY" => Some("anon".into()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.anon_key, "anon");
        assert_eq!(config.page_size, 14);
        assert!(config.vapid_public_key.is_none());
    }

    #[test]
    fn test_from_lookup_requires_key() {
        let result = ApiConfig::from_lookup(|key| {
            (key == "SUPABASE_URL").then(|| "https://project.supabase.co".to_string())
        });
        assert!(matches!(
            result,
            Err(ApiError::MissingConfig("SUPABASE_ANON_KEY"))
        ));
    }

    #[test]
    fn test_application_server_key() {
        let config = ApiConfig::new("https://project.supabase.co", "anon").unwrap();
        assert!(matches!(
            config.application_server_key(),
            Err(ApiError::MissingConfig("VAPID_PUBLIC_KEY"))
        ));

        let config = config.with_vapid_public_key("BAEC");
        assert_eq!(config.application_server_key().unwrap(), vec![4u8, 1, 2]);
    }
}
