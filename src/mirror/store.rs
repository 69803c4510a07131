use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::item::ItemKind;
use super::rewrite::relative_path;
use crate::page::Link;

pub const INDEX_FILE: &str = ".mirror-index.json";
pub const STYLESHEET_FILE: &str = "style.css";

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Wraps saved content into the fixed document every mirrored page uses.
pub fn render_document(title: &str, stylesheet_href: &str, content: &str) -> String {
    format!(
        r#"<html><head><meta http-equiv="content-type" content="text/html; charset=UTF-8">
<title>{}</title>
<link href="{}" rel="stylesheet">
</head><body>
{}
</body></html>
"#,
        escape_html(title),
        stylesheet_href,
        content
    )
}

pub fn resolve(target: &Path, file_path: &str) -> PathBuf {
    let mut path = target.to_owned();
    for part in file_path.split('/').filter(|x| !x.is_empty()) {
        path.push(part);
    }
    path
}

pub async fn exists(target: &Path, file_path: &str) -> bool {
    async_std::path::PathBuf::from(resolve(target, file_path)).exists().await
}

pub async fn write_file(target: &Path, file_path: &str, data: &[u8]) -> io::Result<()> {
    let path = resolve(target, file_path);
    if let Some(parent) = path.parent() {
        async_std::fs::create_dir_all(parent).await?;
    }
    async_std::fs::write(path, data).await
}

pub async fn write_document(target: &Path, file_path: &str, title: &str, content: &str) -> io::Result<()> {
    let stylesheet = relative_path(file_path, STYLESHEET_FILE);
    let document = render_document(title, &stylesheet, content);
    write_file(target, file_path, document.as_bytes()).await
}

/// Writes the shared stylesheet unless the target already has one.
pub async fn ensure_stylesheet(target: &Path, css: &str) -> io::Result<()> {
    if exists(target, STYLESHEET_FILE).await {
        return Ok(());
    }
    write_file(target, STYLESHEET_FILE, css.as_bytes()).await
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct IndexEntry {
    pub kind: ItemKind,
    /// Where the item actually landed, which for media may differ from the
    /// predicted path by an inferred extension.
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Link>,
}

/// Canonical URL to saved file, persisted next to the mirror so that later
/// runs can resume and relink without re-fetching anything.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct PathIndex {
    pub entries: BTreeMap<String, IndexEntry>,
}

impl PathIndex {
    /// Loads the index of `target`; a missing or unreadable index starts empty.
    pub async fn load(target: &Path) -> Self {
        let path = target.join(INDEX_FILE);
        let text = match async_std::fs::read_to_string(&path).await {
            Ok(x) => x,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                tracing::warn!("unable to read {}: {}", path.display(), e);
                return Self::default();
            }
        };

        match serde_json::from_str(&text) {
            Ok(x) => x,
            Err(e) => {
                tracing::warn!("ignoring corrupt index {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub async fn save(&self, target: &Path) -> io::Result<()> {
        let text = serde_json::to_string_pretty(self).map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        let temp = target.join(format!("{}.tmp", INDEX_FILE));
        async_std::fs::write(&temp, text).await?;
        async_std::fs::rename(&temp, target.join(INDEX_FILE)).await
    }

    pub fn get(&self, url: &str) -> Option<&IndexEntry> {
        self.entries.get(url)
    }

    pub fn insert(&mut self, url: &str, entry: IndexEntry) {
        self.entries.insert(url.to_owned(), entry);
    }

    /// Saved path of `url`, or `predicted` when it has not landed yet.
    pub fn path_or<'a>(&'a self, url: &str, predicted: &'a str) -> &'a str {
        self.entries.get(url).map(|x| x.path.as_str()).unwrap_or(predicted)
    }
}
