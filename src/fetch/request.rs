use reqwest::Url;

use crate::error::{AppError, Result};

/// Join `base_url` and `path`, then append `params` and the `apikey` query parameter.
pub fn build_url(base_url: &str, path: &str, params: &[(&str, &str)], api_key: &str) -> Result<Url> {
    let raw = format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    let mut url = Url::parse(&raw)
        .map_err(|err| AppError::message(format!("invalid provider URL `{raw}`: {err}")))?;

    {
        let mut query = url.query_pairs_mut();
        for (key, value) in params {
            query.append_pair(key, value);
        }
        query.append_pair("apikey", api_key);
    }

    Ok(url)
}

/// Render a URL for logs with the api key masked.
pub fn redact(url: &Url) -> String {
    let mut redacted = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(key, value)| {
            let value = if key == "apikey" {
                "***".to_string()
            } else {
                value.into_owned()
            };
            (key.into_owned(), value)
        })
        .collect();
    redacted.query_pairs_mut().clear().extend_pairs(pairs);
    redacted.to_string()
}
