use std::collections::{HashSet, VecDeque};

use scraper::Html;
use url::Url;

use super::model::{FileEntry, Folder};
use crate::error::{MirrorError, SessionError};
use crate::page::{canonicalize, parse_selector, Canonical, SiteProfile, TreeRules};
use crate::session::{PageSource, Session};
use crate::status::StatusFn;

/// One row of a folder listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    pub url: String,
    pub is_folder: bool,
    pub kind: String,
}

fn url_extension(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut x| x.next_back())
        .and_then(|x| x.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()))
        .unwrap_or_default()
}

/// Reads the rows of a listing page; folders and files in document order.
pub fn list_entries(rules: &TreeRules, source: &PageSource) -> Result<Vec<Entry>, SessionError> {
    let structure = |detail: String| SessionError::Structure {
        url: source.url.clone(),
        detail,
    };
    let page_url = Url::parse(&source.url).map_err(|_| SessionError::InvalidUrl(source.url.clone()))?;
    let entry_selector = parse_selector(&rules.entry_selector).map_err(structure)?;
    let anchor = parse_selector("a[href]").map_err(structure)?;
    // Listings address folders by query string, so it has to stay.
    let canonical = Canonical {
        strip_query: false,
        strip_fragment: true,
    };

    let html = Html::parse_document(&source.html);
    let mut entries = Vec::new();
    for element in html.select(&entry_selector) {
        let href = match element.value().attr("href") {
            Some(x) => Some(x),
            None => element.select(&anchor).next().and_then(|x| x.value().attr("href")),
        };
        let url = match href.and_then(|x| canonicalize(&page_url, x, &canonical)) {
            Some(x) => x,
            None => continue,
        };

        let text = element.text().collect::<Vec<_>>().join(" ");
        let mut name = text.split_whitespace().collect::<Vec<_>>().join(" ");

        let label = rules
            .kind_attribute
            .as_deref()
            .and_then(|x| element.value().attr(x));
        let (is_folder, kind) = match label.and_then(|x| x.rsplit_once(rules.kind_separator.as_str())) {
            Some((label_name, kind)) => {
                if name.is_empty() {
                    name = label_name.trim().to_owned();
                }
                (kind.trim() == rules.folder_kind, kind.trim().to_owned())
            }
            None => {
                let is_folder = rules
                    .folder_contains
                    .as_deref()
                    .map_or(false, |x| url.as_str().contains(x));
                let kind = if is_folder {
                    rules.folder_kind.clone()
                } else {
                    url_extension(&url)
                };
                (is_folder, kind)
            }
        };

        if name.is_empty() {
            name = url
                .path_segments()
                .and_then(|mut x| x.next_back().map(|x| x.to_owned()))
                .unwrap_or_default();
        }

        entries.push(Entry {
            name,
            url: url.to_string(),
            is_folder,
            kind,
        });
    }
    Ok(entries)
}

/// Walks a folder listing breadth-first and returns the whole tree below it.
///
/// Only a failure to list the top folder is fatal; sub-folders that fail
/// are reported and left empty.
pub async fn browse<S: Session + ?Sized>(
    session: &S,
    profile: &SiteProfile,
    name: &str,
    url: &str,
    status: StatusFn,
) -> Result<Folder, MirrorError> {
    let rules = profile
        .tree
        .as_ref()
        .ok_or_else(|| MirrorError::Profile(format!("{} has no tree rules", profile.name)))?;

    let mut root = Folder::new(name, url);
    let mut visited = HashSet::new();
    visited.insert(url.to_owned());
    let mut queue: VecDeque<Vec<usize>> = VecDeque::new();
    queue.push_back(Vec::new());

    while let Some(path) = queue.pop_front() {
        let (folder_name, folder_url) = match root.at(&path) {
            Some(x) => (x.name.clone(), x.url.clone()),
            None => continue,
        };
        status(&format!("Browse: {}", folder_name));

        let listed = match session.navigate(&folder_url).await {
            Ok(source) => list_entries(rules, &source),
            Err(e) => Err(e),
        };
        let entries = match listed {
            Ok(x) => x,
            Err(e) if path.is_empty() => return Err(MirrorError::Root(e)),
            Err(e) => {
                let message = format!("Browse failed of {}, because of {}", folder_name, e);
                tracing::warn!("{}", message);
                status(&message);
                continue;
            }
        };

        let folder = match root.at_mut(&path) {
            Some(x) => x,
            None => continue,
        };
        for entry in entries {
            if entry.is_folder {
                if !visited.insert(entry.url.clone()) {
                    continue;
                }
                let mut child = path.clone();
                child.push(folder.folders.len());
                folder.folders.push(Folder::new(&entry.name, &entry.url));
                queue.push_back(child);
            } else if !folder.files.iter().any(|x| x.url == entry.url) {
                folder.files.push(FileEntry {
                    name: entry.name,
                    url: entry.url,
                    kind: entry.kind,
                });
            }
        }
    }

    tracing::info!("browsed {}: {} files", name, root.file_count());
    Ok(root)
}
