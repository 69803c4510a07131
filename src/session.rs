//! Session driver: the capability set the crawler needs from an
//! authenticated interaction with a site.

mod http;

pub use http::HttpSession;

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SessionError;

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Credentials {
    None,
    Password { user: String, password: String },
    /// A `Cookie` header taken from a browser that is already logged in.
    Cookie(String),
}

impl Default for Credentials {
    fn default() -> Self {
        Credentials::None
    }
}

/// Where and how to submit a site's login form.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct LoginForm {
    /// Login page, absolute or relative to the base URL.
    pub url: String,
    pub form_selector: String,
    pub user_field: String,
    pub password_field: String,
    #[serde(default)]
    pub extra_fields: BTreeMap<String, String>,
    /// Present on the page reached after a successful login.
    #[serde(default)]
    pub success_selector: Option<String>,
    #[serde(default)]
    pub error_selector: Option<String>,
}

#[derive(Clone, Debug)]
pub struct PageSource {
    /// Final URL after redirects.
    pub url: String,
    pub status: u16,
    pub html: String,
}

#[derive(Clone, Debug)]
pub struct Binary {
    pub url: String,
    pub content_type: Option<String>,
    /// File name announced by `Content-Disposition`, if any.
    pub file_name: Option<String>,
    pub data: Vec<u8>,
}

#[async_trait]
pub trait Session: Send + Sync {
    async fn authenticate(&self, credentials: &Credentials) -> Result<(), SessionError>;

    async fn navigate(&self, url: &str) -> Result<PageSource, SessionError>;

    /// Fetches a binary asset with the session's authentication state.
    async fn download(&self, url: &str) -> Result<Binary, SessionError>;

    /// Hands a download to an agent that delivers it to `landing` later.
    async fn trigger_download(&self, url: &str, landing: &Path) -> Result<(), SessionError>;
}

/// Extracts the file name from a `Content-Disposition` header value.
pub fn disposition_file_name(value: &str) -> Option<String> {
    let mut plain = None;
    for part in value.split(';') {
        let part = part.trim();
        if let Some(encoded) = part.strip_prefix("filename*=") {
            let encoded = encoded.trim_matches('"');
            let encoded = encoded.splitn(3, '\'').last().unwrap_or(encoded);
            return Some(percent_decode(encoded)).filter(|x| !x.is_empty());
        }
        if let Some(name) = part.strip_prefix("filename=") {
            plain = Some(percent_decode(name.trim_matches('"')));
        }
    }
    plain.filter(|x| !x.is_empty())
}

fn percent_decode(text: &str) -> String {
    url::form_urlencoded::parse(format!("x={}", text.replace('+', "%2B")).as_bytes())
        .next()
        .map(|(_, value)| value.into_owned())
        .unwrap_or_else(|| text.to_owned())
}
