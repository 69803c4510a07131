//! In-memory site used by the crawler and tree tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::common::CancelToken;
use crate::error::SessionError;
use crate::session::{Binary, Credentials, PageSource, Session};

pub const BASE: &str = "https://www.test.com";

#[derive(Default)]
pub struct FakeSite {
    pages: HashMap<String, String>,
    media: HashMap<String, (Option<String>, Vec<u8>)>,
    broken: Vec<String>,
    fetches: Mutex<Vec<String>>,
    pub reject_login: bool,
    /// Whether triggered downloads ever show up in the landing directory.
    pub deliver: bool,
    cancel_after: Option<(String, CancelToken)>,
}

impl FakeSite {
    pub fn page(mut self, path: &str, html: &str) -> Self {
        self.pages.insert(format!("{}{}", BASE, path), html.to_owned());
        self
    }

    pub fn media(mut self, path: &str, content_type: Option<&str>, data: &[u8]) -> Self {
        self.media.insert(
            format!("{}{}", BASE, path),
            (content_type.map(|x| x.to_owned()), data.to_vec()),
        );
        self
    }

    pub fn broken(mut self, path: &str) -> Self {
        self.broken.push(format!("{}{}", BASE, path));
        self
    }

    /// Fires `cancel` once the page at `path` has been served.
    pub fn cancel_after(mut self, path: &str, cancel: CancelToken) -> Self {
        self.cancel_after = Some((format!("{}{}", BASE, path), cancel));
        self
    }

    pub fn fetches(&self) -> Vec<String> {
        self.fetches.lock().unwrap().clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.lock().unwrap().len()
    }

    pub fn fetched(&self, url: &str) -> usize {
        self.fetches.lock().unwrap().iter().filter(|x| *x == url).count()
    }
}

#[async_trait]
impl Session for FakeSite {
    async fn authenticate(&self, _credentials: &Credentials) -> Result<(), SessionError> {
        if self.reject_login {
            return Err(SessionError::Authentication("Invalid login".to_owned()));
        }
        Ok(())
    }

    async fn navigate(&self, url: &str) -> Result<PageSource, SessionError> {
        self.fetches.lock().unwrap().push(url.to_owned());
        if let Some((after, cancel)) = &self.cancel_after {
            if after == url {
                cancel.cancel();
            }
        }
        match self.pages.get(url) {
            Some(html) => Ok(PageSource {
                url: url.to_owned(),
                status: 200,
                html: html.clone(),
            }),
            None => Err(SessionError::Status {
                url: url.to_owned(),
                status: 404,
            }),
        }
    }

    async fn download(&self, url: &str) -> Result<Binary, SessionError> {
        self.fetches.lock().unwrap().push(url.to_owned());
        if self.broken.iter().any(|x| x == url) {
            return Err(SessionError::network(url, "connection reset"));
        }
        match self.media.get(url) {
            Some((content_type, data)) => Ok(Binary {
                url: url.to_owned(),
                content_type: content_type.clone(),
                file_name: None,
                data: data.clone(),
            }),
            None => Err(SessionError::Status {
                url: url.to_owned(),
                status: 404,
            }),
        }
    }

    async fn trigger_download(&self, url: &str, landing: &Path) -> Result<(), SessionError> {
        if !self.deliver {
            self.fetches.lock().unwrap().push(url.to_owned());
            return Ok(());
        }
        let binary = self.download(url).await?;
        let landing = landing.to_owned();
        async_std::task::spawn(async move {
            async_std::task::sleep(Duration::from_millis(50)).await;
            let _ = async_std::fs::write(landing, binary.data).await;
        });
        Ok(())
    }
}
