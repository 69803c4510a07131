use std::collections::HashSet;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use super::context::{CrawlContext, ItemState, MirrorReport};
use super::item::{Item, ItemKind};
use super::rewrite::{relative_path, rewrite_links, LinkTarget};
use super::store::{self, IndexEntry, PathIndex};
use crate::common::CancelToken;
use crate::error::{MirrorError, SessionError};
use crate::page::{self, PageSnapshot, SiteProfile};
use crate::session::{Binary, Credentials, PageSource, Session};
use crate::status::StatusFn;

/// Upper bound on the pages of one paged document.
const MAX_PAGES: usize = 10_000;

/// What to mirror and where.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct MirrorRequest {
    pub target: PathBuf,
    #[serde(default)]
    pub credentials: Credentials,
    /// Entry page; defaults to the profile's base URL.
    #[serde(default)]
    pub root: Option<String>,
    /// Sub-sections to start from instead of the entry page.
    #[serde(default)]
    pub seeds: Vec<String>,
    /// Pattern a page or document URL must contain a match of.
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default)]
    pub max_items: Option<usize>,
}

pub struct Mirror<'a, S: Session + ?Sized> {
    session: &'a S,
    profile: &'a SiteProfile,
    base: Url,
    target: PathBuf,
    status: StatusFn,
    cancel: CancelToken,
    index: PathIndex,
    context: CrawlContext,
}

/// Authenticates, then mirrors the site described by `profile` into
/// `request.target`.
///
/// Only authentication, the entry page and the target directory can fail
/// the run; every other problem is reported per item.
pub async fn mirror<S: Session + ?Sized>(
    session: &S,
    profile: &SiteProfile,
    request: &MirrorRequest,
    status: StatusFn,
    cancel: CancelToken,
) -> Result<MirrorReport, MirrorError> {
    let base = profile.base()?;
    let filter = match &request.filter {
        Some(x) if !x.is_empty() => Some(Regex::new(x)?),
        _ => None,
    };

    async_std::fs::create_dir_all(&request.target)
        .await
        .map_err(|e| MirrorError::target(&request.target, e))?;
    store::ensure_stylesheet(&request.target, &profile.stylesheet)
        .await
        .map_err(|e| MirrorError::target(&request.target, e))?;

    status(&format!("Login: {}", base));
    session
        .authenticate(&request.credentials)
        .await
        .map_err(MirrorError::Authentication)?;

    let mut mirror = Mirror {
        session,
        profile,
        base,
        target: request.target.clone(),
        status,
        cancel,
        index: PathIndex::load(&request.target).await,
        context: CrawlContext::new(filter, request.max_items),
    };

    mirror.start(request).await?;
    mirror.drain().await;
    mirror.relink().await;

    if let Err(e) = mirror.index.save(&mirror.target).await {
        (mirror.status)(&format!("Unable to save the path index, because of {}", e));
    }

    let report = mirror.context.report;
    (mirror.status)(&format!(
        "Finished: {} saved, {} skipped, {} failed",
        report.count(ItemState::Saved),
        report.count(ItemState::Skipped),
        report.count(ItemState::Failed)
    ));
    Ok(report)
}

impl<'a, S: Session + ?Sized> Mirror<'a, S> {
    async fn start(&mut self, request: &MirrorRequest) -> Result<(), MirrorError> {
        if !request.seeds.is_empty() {
            for seed in request.seeds.iter() {
                let url = self
                    .base
                    .join(seed)
                    .map_err(|e| MirrorError::Profile(format!("seed {}: {}", seed, e)))?;
                let item = Item::new(&self.base, ItemKind::Page, seed, url.as_str());
                self.context.seed(item);
            }
            return Ok(());
        }

        let root = match &request.root {
            Some(x) => self
                .base
                .join(x)
                .map_err(|e| MirrorError::Profile(format!("root {}: {}", x, e)))?,
            None => self.base.clone(),
        };
        let mut item = Item::new(&self.base, ItemKind::Page, &self.profile.name, root.as_str());
        item.file_path = "index.html".to_owned();
        self.context.seed(item.clone());
        self.context.next(ItemKind::Page);

        // The entry page is the one listing whose failure ends the run.
        self.handle_listing(&item).await.map_err(MirrorError::Root)
    }

    /// Drains pages; after each one all documents it led to, and after
    /// each document all media it led to. Stops taking items once the run
    /// is cancelled.
    async fn drain(&mut self) {
        while !self.context.is_drained() && !self.cancel.is_cancelled() {
            while let Some(item) = self.next(ItemKind::Page) {
                self.listing(item).await;
                self.drain_documents().await;
            }
            self.drain_documents().await;
        }
        if self.cancel.is_cancelled() {
            let message = format!("Cancelled: {} items left", self.context.pending());
            tracing::info!("{}", message);
            (self.status)(&message);
        }
    }

    async fn drain_documents(&mut self) {
        while let Some(item) = self.next(ItemKind::Document) {
            self.listing(item).await;
            self.drain_media().await;
        }
        self.drain_media().await;
    }

    async fn drain_media(&mut self) {
        while let Some(item) = self.next(ItemKind::Media) {
            if let Err(e) = self.media(&item).await {
                self.fail(&item, e);
            }
        }
    }

    fn next(&mut self, kind: ItemKind) -> Option<Item> {
        if self.cancel.is_cancelled() {
            return None;
        }
        self.context.next(kind)
    }

    fn fail(&mut self, item: &Item, error: SessionError) {
        if let SessionError::Cancelled = error {
            tracing::debug!("{} interrupted by cancel", item.url);
        } else {
            let message = format!("Download failed of {} ({}), because of {}", item.name, item.url, error);
            tracing::warn!("{}", message);
            (self.status)(&message);
        }
        self.context
            .record(item, &item.file_path, ItemState::Failed, Some(error.to_string()));
    }

    async fn listing(&mut self, item: Item) {
        if let Err(e) = self.handle_listing(&item).await {
            self.fail(&item, e);
        }
    }

    async fn handle_listing(&mut self, item: &Item) -> Result<(), SessionError> {
        if self.cancel.is_cancelled() {
            return Err(SessionError::Cancelled);
        }

        if store::exists(&self.target, &item.file_path).await {
            tracing::debug!("skip {} because the file exists already", item.file_path);
            // Resume below an already saved page from what the index remembers.
            let children = self
                .index
                .get(&item.url)
                .map(|x| x.children.clone())
                .unwrap_or_default();
            for link in children.iter() {
                self.context.offer(Item::from_link(&self.base, link));
            }
            self.context
                .record(item, &item.file_path, ItemState::Skipped, None);
            return Ok(());
        }

        (self.status)(&format!("Download: {}", item.file_path));
        let url = match (&self.profile.page_query, item.kind) {
            (Some(query), ItemKind::Page) => {
                let separator = if item.url.contains('?') { '&' } else { '?' };
                format!("{}{}{}", item.url, separator, query)
            }
            _ => item.url.clone(),
        };
        let source = self.session.navigate(&url).await?;
        let mut snapshot = page::extract(self.profile, &source)?;
        let pages = self.follow_pages(item, &mut snapshot, source).await?;

        let mut targets = Vec::with_capacity(snapshot.links.len());
        for link in snapshot.links.iter() {
            if pages.contains(&link.url) {
                // Every page of a paged document lives in this one file.
                targets.push(LinkTarget {
                    url: link.url.clone(),
                    spellings: link.raw.clone(),
                    local: relative_path(&item.file_path, &item.file_path),
                });
                continue;
            }
            let child = Item::from_link(&self.base, link);
            let local = self.index.path_or(&child.url, &child.file_path);
            targets.push(LinkTarget {
                url: child.url.clone(),
                spellings: link.raw.clone(),
                local: relative_path(&item.file_path, local),
            });
            self.context.offer(child);
        }
        let content = rewrite_links(&snapshot.content, &self.base, &targets);
        snapshot.links.retain(|x| !pages.contains(&x.url));

        let title = if snapshot.title.is_empty() {
            item.name.clone()
        } else {
            snapshot.title.clone()
        };
        store::write_document(&self.target, &item.file_path, &title, &content).await?;

        self.index.insert(
            &item.url,
            IndexEntry {
                kind: item.kind,
                path: item.file_path.clone(),
                title: Some(title),
                children: snapshot.links,
            },
        );
        self.context.record(item, &item.file_path, ItemState::Saved, None);
        Ok(())
    }

    /// Follows the profile's next-page link from `source` and appends every
    /// further page to `snapshot`. Returns the canonical URLs of all pages
    /// of the document.
    async fn follow_pages(
        &mut self,
        item: &Item,
        snapshot: &mut PageSnapshot,
        mut source: PageSource,
    ) -> Result<HashSet<String>, SessionError> {
        let mut pages = HashSet::new();
        pages.insert(item.url.clone());
        if self.profile.next_page.is_none() {
            return Ok(pages);
        }

        let mut followed = HashSet::new();
        followed.insert(source.url.clone());
        while let Some(next) = page::next_page(self.profile, &source)? {
            if followed.len() >= MAX_PAGES || !followed.insert(next.to_string()) {
                break;
            }
            if self.cancel.is_cancelled() {
                return Err(SessionError::Cancelled);
            }
            if let Some(url) = page::canonicalize(&next, next.as_str(), &self.profile.canonical) {
                self.context.mark_visited(url.as_str());
                pages.insert(url.to_string());
            }

            tracing::debug!("next page of {}: {}", item.file_path, next);
            source = self.session.navigate(next.as_str()).await?;
            snapshot.append(page::extract(self.profile, &source)?);
        }
        Ok(pages)
    }

    async fn media(&mut self, item: &Item) -> Result<(), SessionError> {
        if self.cancel.is_cancelled() {
            return Err(SessionError::Cancelled);
        }

        let known = self.index.path_or(&item.url, &item.file_path).to_owned();
        if store::exists(&self.target, &known).await {
            tracing::debug!("skip {} because the file exists already", known);
            self.context.record(item, &known, ItemState::Skipped, None);
            return Ok(());
        }

        (self.status)(&format!("Download: {}", item.file_path));
        let binary = self.session.download(&item.url).await?;
        let file_path = media_path(&item.file_path, &binary);
        store::write_file(&self.target, &file_path, &binary.data).await?;
        tracing::info!(
            "downloaded {} {} bytes. {}",
            file_path,
            binary.data.len(),
            binary.content_type.as_deref().unwrap_or("unknown type")
        );

        self.index.insert(
            &item.url,
            IndexEntry {
                kind: ItemKind::Media,
                path: file_path.clone(),
                title: None,
                children: Vec::new(),
            },
        );
        self.context.record(item, &file_path, ItemState::Saved, None);
        Ok(())
    }

    /// Points saved listings at where their children actually landed.
    ///
    /// Runs over every listing in the index, so pages saved by an earlier
    /// run pick up children downloaded by this one.
    async fn relink(&mut self) {
        let mut relinked = 0;
        for (url, entry) in self.index.entries.iter() {
            if !entry.kind.is_listing() {
                continue;
            }

            let mut replacements = Vec::new();
            for link in entry.children.iter() {
                let predicted = Item::from_link(&self.base, link).file_path;
                let actual = self.index.path_or(&link.url, &predicted);
                if actual != predicted {
                    replacements.push((
                        relative_path(&entry.path, &predicted),
                        relative_path(&entry.path, actual),
                    ));
                }
            }
            if replacements.is_empty() {
                continue;
            }

            let path = store::resolve(&self.target, &entry.path);
            let text = match async_std::fs::read_to_string(&path).await {
                Ok(x) => x,
                Err(_) => continue,
            };
            let mut updated = text.clone();
            for (from, to) in replacements.iter() {
                for quote in ['"', '\''].iter() {
                    updated = updated.replace(
                        &format!("{}{}{}", quote, from, quote),
                        &format!("{}{}{}", quote, to, quote),
                    );
                }
            }
            if updated != text {
                match async_std::fs::write(&path, updated).await {
                    Ok(()) => relinked += 1,
                    Err(e) => tracing::warn!("unable to relink {}: {}", url, e),
                }
            }
        }
        self.context.report.relinked = relinked;
    }
}

fn has_extension(file_path: &str) -> bool {
    let name = file_path.rsplit('/').next().unwrap_or(file_path);
    Path::new(name).extension().is_some()
}

/// Where a media download is stored: its predicted path, with an extension
/// taken from the announced file name or content type when the URL has none.
pub fn media_path(predicted: &str, binary: &Binary) -> String {
    if has_extension(predicted) {
        return predicted.to_owned();
    }

    let from_name = binary
        .file_name
        .as_deref()
        .and_then(|x| Path::new(x).extension())
        .and_then(|x| x.to_str())
        .map(|x| x.to_ascii_lowercase());

    let from_type = || {
        let content_type = binary.content_type.as_deref()?;
        let extensions = mime_guess::get_mime_extensions_str(content_type)?;
        let subtype = content_type.rsplit('/').next().unwrap_or_default();
        extensions
            .iter()
            .find(|x| **x == subtype)
            .or_else(|| extensions.first())
            .map(|x| x.to_string())
    };

    match from_name.or_else(from_type) {
        Some(extension) => format!("{}.{}", predicted, extension),
        None => predicted.to_owned(),
    }
}
