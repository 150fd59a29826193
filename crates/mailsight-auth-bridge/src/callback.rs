//! Parsing of the redirect that brings the user agent back from the
//! authorization server, and construction of the error-bearing landing URL.

use url::Url;

/// Query parameters carried by the callback redirect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl CallbackParams {
    pub fn with_code(code: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            ..Self::default()
        }
    }

    pub fn from_url(url: &Url) -> Self {
        let mut params = Self::default();
        for (key, value) in url.query_pairs() {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            match key.as_ref() {
                "code" => params.code = Some(value.to_string()),
                "error" => params.error = Some(value.to_string()),
                "error_description" => params.error_description = Some(value.to_string()),
                _ => {}
            }
        }
        params
    }

    /// Accepts a full redirect URL or just its path and query
    /// (`/auth/callback?code=...`), as a loopback listener sees it.
    pub fn parse(redirect: &str) -> Result<Self, url::ParseError> {
        let url = match Url::parse(redirect) {
            Ok(url) => url,
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                Url::parse("http://localhost/")?.join(redirect)?
            }
            Err(e) => return Err(e),
        };
        Ok(Self::from_url(&url))
    }

    /// Why the authorization server sent the user back without a code, if it said.
    pub fn denial_reason(&self) -> Option<String> {
        match (&self.error, &self.error_description) {
            (Some(error), Some(description)) => Some(format!("{error}: {description}")),
            (Some(error), None) => Some(error.clone()),
            (None, Some(description)) => Some(description.clone()),
            (None, None) => None,
        }
    }
}

/// The landing location, optionally carrying a human-readable `error`.
pub fn landing_url(base: &Url, error: Option<&str>) -> Url {
    let mut url = base.clone();
    if let Some(error) = error {
        // Drop any earlier error so repeated failures don't pile up.
        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| k != "error")
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        url.set_query(None);
        {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in &kept {
                pairs.append_pair(k, v);
            }
            pairs.append_pair("error", error);
        }
    }
    url
}
