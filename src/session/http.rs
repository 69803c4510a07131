use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use cookie_store::CookieStore;
use http_types::Method;
use scraper::Html;
use url::Url;

use super::{disposition_file_name, Binary, Credentials, LoginForm, PageSource, Session};
use crate::common::{bounded, CancelToken};
use crate::error::SessionError;
use crate::page::{parse_selector, SiteProfile};

const MAX_REDIRECTS: usize = 10;

/// Session over plain HTTP that carries the site's cookies from the login
/// to every later page and asset request.
///
/// Cookies are kept in a [`CookieStore`], so each one only goes back to the
/// host and path that set it and expired ones are dropped.
pub struct HttpSession {
    client: surf::Client,
    base: Url,
    login: Option<LoginForm>,
    cookies: Mutex<CookieStore>,
    timeout: Duration,
    cancel: CancelToken,
}

impl HttpSession {
    pub fn new(profile: &SiteProfile, cancel: CancelToken) -> Result<Self, SessionError> {
        let base = profile
            .base()
            .map_err(|_| SessionError::InvalidUrl(profile.base_url.clone()))?;

        Ok(Self {
            client: surf::Client::new(),
            base,
            login: profile.login.clone(),
            cookies: Mutex::new(CookieStore::default()),
            timeout: Duration::from_secs(profile.download_timeout_secs),
            cancel,
        })
    }

    /// `Cookie` header value for a request to `url`.
    fn cookie_header(&self, url: &Url) -> Option<String> {
        let cookies = self.cookies.lock().ok()?;
        let mut pairs: Vec<String> = cookies
            .get_request_values(url)
            .map(|(name, value)| format!("{}={}", name, value))
            .collect();
        if pairs.is_empty() {
            return None;
        }
        pairs.sort();
        Some(pairs.join("; "))
    }

    /// Imports a pasted `Cookie` header as cookies of the base host.
    fn set_cookie_header(&self, header: &str) {
        for pair in header.split(';') {
            if let Some((name, value)) = split_pair(pair) {
                self.remember(&self.base, &format!("{}={}; Path=/", name, value));
            }
        }
    }

    /// Applies one `Set-Cookie` value received from `url`.
    fn remember(&self, url: &Url, set_cookie: &str) {
        if let Ok(mut cookies) = self.cookies.lock() {
            if let Err(e) = cookies.parse(set_cookie, url) {
                tracing::debug!("ignoring cookie from {}: {}", url, e);
            }
        }
    }

    fn store_cookies(&self, url: &Url, response: &surf::Response) {
        if let Some(values) = response.header("Set-Cookie") {
            for value in values.iter() {
                self.remember(url, value.as_str());
            }
        }
    }

    /// Sends a request, following redirects by hand so that cookies set on
    /// intermediate hops are kept.
    async fn send(
        &self,
        method: Method,
        url: &str,
        form: Option<Vec<(String, String)>>,
    ) -> Result<(Url, surf::Response), SessionError> {
        let mut url = Url::parse(url).map_err(|_| SessionError::InvalidUrl(url.to_owned()))?;
        let mut method = method;
        let mut form = form;

        for _ in 0..MAX_REDIRECTS {
            let mut builder = surf::Request::builder(method, url.clone());
            if let Some(cookie) = self.cookie_header(&url) {
                builder = builder.header("Cookie", cookie);
            }
            if let Some(form) = &form {
                let body = surf::Body::from_form(form).map_err(|e| SessionError::network(url.as_str(), e))?;
                builder = builder.body(body);
            }

            let response = self
                .client
                .send(builder.build())
                .await
                .map_err(|e| SessionError::network(url.as_str(), e))?;
            self.store_cookies(&url, &response);

            let status = response.status();
            if !status.is_redirection() {
                return Ok((url, response));
            }
            let location = match response.header("Location") {
                Some(x) => x.last().as_str().to_owned(),
                None => return Ok((url, response)),
            };
            url = url
                .join(&location)
                .map_err(|_| SessionError::InvalidUrl(location.clone()))?;
            if u16::from(status) != 307 && u16::from(status) != 308 {
                method = Method::Get;
                form = None;
            }
        }

        Err(SessionError::network(url.as_str(), "too many redirects"))
    }

    async fn fetch_page(
        &self,
        method: Method,
        url: &str,
        form: Option<Vec<(String, String)>>,
    ) -> Result<PageSource, SessionError> {
        let (final_url, mut response) = self.send(method, url, form).await?;
        let status = u16::from(response.status());
        if status != 200 {
            return Err(SessionError::Status {
                url: url.to_owned(),
                status,
            });
        }

        let html = response
            .body_string()
            .await
            .map_err(|e| SessionError::network(url, e))?;

        Ok(PageSource {
            url: final_url.to_string(),
            status,
            html,
        })
    }

    async fn fetch_binary(&self, url: &str) -> Result<Binary, SessionError> {
        let (_, mut response) = self.send(Method::Get, url, None).await?;
        let status = u16::from(response.status());
        if status != 200 {
            return Err(SessionError::Status {
                url: url.to_owned(),
                status,
            });
        }

        let content_type = response.content_type().map(|x| x.essence().to_owned());
        let file_name = response
            .header("Content-Disposition")
            .and_then(|x| disposition_file_name(x.last().as_str()));
        let data = response
            .body_bytes()
            .await
            .map_err(|e| SessionError::network(url, e))?;

        Ok(Binary {
            url: url.to_owned(),
            content_type,
            file_name,
            data,
        })
    }

    async fn login_with_password(
        &self,
        login: &LoginForm,
        user: &str,
        password: &str,
    ) -> Result<(), SessionError> {
        let login_url = self
            .base
            .join(&login.url)
            .map_err(|_| SessionError::InvalidUrl(login.url.clone()))?;

        let page = self
            .fetch_page(Method::Get, login_url.as_str(), None)
            .await
            .map_err(|e| SessionError::Authentication(format!("Login page cannot be loaded: {}", e)))?;

        let (action, fields) = login_request(login, &page, user, password)?;
        tracing::debug!("posting login form to {}", action);

        let landing = self
            .fetch_page(Method::Post, action.as_str(), Some(fields))
            .await
            .map_err(|e| SessionError::Authentication(format!("Login not possible because of an error: {}", e)))?;

        login_outcome(login, &landing)
    }
}

fn split_pair(pair: &str) -> Option<(String, String)> {
    let mut parts = pair.trim().splitn(2, '=');
    let name = parts.next()?.trim();
    let value = parts.next()?.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_owned(), value.to_owned()))
}

/// Builds the login form submission: its target and every field to post.
fn login_request(
    login: &LoginForm,
    page: &PageSource,
    user: &str,
    password: &str,
) -> Result<(Url, Vec<(String, String)>), SessionError> {
    let html = Html::parse_document(&page.html);
    let structure = |detail: String| SessionError::Authentication(detail);

    let form_selector = parse_selector(&login.form_selector).map_err(structure)?;
    let form = html
        .select(&form_selector)
        .next()
        .ok_or_else(|| structure(format!("login form `{}` not found", login.form_selector)))?;

    let page_url = Url::parse(&page.url).map_err(|_| SessionError::InvalidUrl(page.url.clone()))?;
    let action = match form.value().attr("action").filter(|x| !x.trim().is_empty()) {
        Some(x) => page_url
            .join(x)
            .map_err(|_| SessionError::InvalidUrl(x.to_owned()))?,
        None => page_url,
    };

    let mut fields: Vec<(String, String)> = Vec::new();
    let input = parse_selector("input[name]").map_err(structure)?;
    for element in form.select(&input) {
        let kind = element.value().attr("type").unwrap_or("text").to_ascii_lowercase();
        if kind == "submit" || kind == "button" || kind == "image" {
            continue;
        }
        if (kind == "checkbox" || kind == "radio") && element.value().attr("checked").is_none() {
            continue;
        }
        let name = element.value().attr("name").unwrap_or_default();
        let value = element.value().attr("value").unwrap_or_default();
        fields.push((name.to_owned(), value.to_owned()));
    }

    let mut set = |name: &str, value: &str| match fields.iter_mut().find(|(k, _)| k == name) {
        Some(field) => field.1 = value.to_owned(),
        None => fields.push((name.to_owned(), value.to_owned())),
    };
    set(&login.user_field, user);
    set(&login.password_field, password);
    for (name, value) in login.extra_fields.iter() {
        set(name, value);
    }

    Ok((action, fields))
}

/// Decides from the page reached after posting the form whether the login worked.
fn login_outcome(login: &LoginForm, landing: &PageSource) -> Result<(), SessionError> {
    let html = Html::parse_document(&landing.html);

    if let Some(selector) = &login.error_selector {
        let selector = parse_selector(selector).map_err(SessionError::Authentication)?;
        if let Some(element) = html.select(&selector).next() {
            let text = element.text().collect::<String>();
            return Err(SessionError::Authentication(text.trim().to_owned()));
        }
    }

    if let Some(selector) = &login.success_selector {
        let selector = parse_selector(selector).map_err(SessionError::Authentication)?;
        if html.select(&selector).next().is_none() {
            return Err(SessionError::Authentication(
                "Login not possible, please check web page for more information.".to_owned(),
            ));
        }
    }

    Ok(())
}

#[async_trait]
impl Session for HttpSession {
    async fn authenticate(&self, credentials: &Credentials) -> Result<(), SessionError> {
        match credentials {
            Credentials::None => Ok(()),
            Credentials::Cookie(header) => {
                self.set_cookie_header(header);
                match &self.login {
                    Some(login) if login.success_selector.is_some() => {
                        let landing = self
                            .fetch_page(Method::Get, self.base.as_str(), None)
                            .await
                            .map_err(|e| SessionError::Authentication(e.to_string()))?;
                        login_outcome(login, &landing)
                    }
                    _ => Ok(()),
                }
            }
            Credentials::Password { user, password } => {
                let login = self.login.as_ref().ok_or_else(|| {
                    SessionError::Authentication("site profile has no login form".to_owned())
                })?;
                self.login_with_password(login, user, password).await
            }
        }
    }

    async fn navigate(&self, url: &str) -> Result<PageSource, SessionError> {
        bounded(self.fetch_page(Method::Get, url, None), self.timeout, &self.cancel, url).await
    }

    async fn download(&self, url: &str) -> Result<Binary, SessionError> {
        bounded(self.fetch_binary(url), self.timeout, &self.cancel, url).await
    }

    async fn trigger_download(&self, url: &str, landing: &Path) -> Result<(), SessionError> {
        let binary = self.download(url).await?;
        let landing: PathBuf = landing.to_owned();
        async_std::task::spawn(async move {
            if let Err(e) = async_std::fs::write(&landing, &binary.data).await {
                tracing::warn!("unable to deliver {} to {}: {}", binary.url, landing.display(), e);
            }
        });
        Ok(())
    }
}
