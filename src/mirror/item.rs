use serde::{Deserialize, Serialize};
use url::Url;

use crate::page::Link;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    /// Listing page whose links lead deeper into the site.
    Page,
    /// Leaf page holding text.
    Document,
    Media,
}

impl ItemKind {
    pub fn is_listing(self) -> bool {
        self != ItemKind::Media
    }
}

/// A discovered link together with where it is saved.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Item {
    pub kind: ItemKind,
    pub name: String,
    pub url: String,
    /// Sanitized URL path relative to the site base.
    pub suffix: String,
    pub key: String,
    /// Slash separated path below the mirror target.
    pub file_path: String,
}

impl Item {
    pub fn new(base: &Url, kind: ItemKind, name: &str, url: &str) -> Self {
        let suffix = local_suffix(base, url);
        let key = suffix.rsplit('/').next().unwrap_or_default().to_owned();

        let file_path = match kind {
            ItemKind::Media if suffix.is_empty() => "index".to_owned(),
            // Listings always gain `.html`, so a media file may only end in
            // `.html` when marked as different from any listing path.
            ItemKind::Media if is_html(&suffix) => match suffix.rsplit_once('.') {
                Some((stem, ext)) => format!("{}_{}.{}", stem, hash8(url), ext),
                None => suffix.clone(),
            },
            ItemKind::Media => suffix.clone(),
            _ if suffix.is_empty() => "index.html".to_owned(),
            _ => format!("{}.html", suffix),
        };

        Self {
            kind,
            name: name.to_owned(),
            url: url.to_owned(),
            suffix,
            key,
            file_path,
        }
    }

    pub fn from_link(base: &Url, link: &Link) -> Self {
        Self::new(base, link.kind, &link.name, &link.url)
    }
}

fn is_html(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    lower.ends_with(".html") || lower.ends_with(".htm")
}

fn hash8(url: &str) -> String {
    let digest = format!("{:x}", md5::compute(url));
    digest[..8].to_owned()
}

fn clean_chars(text: &str) -> String {
    let clean: String = text
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if clean.chars().all(|c| c == '.') {
        "_".to_owned()
    } else {
        clean
    }
}

fn sanitize_segment(segment: &str) -> String {
    let escaped = segment.replace('+', "%2B").replace('&', "%26");
    let decoded = url::form_urlencoded::parse(format!("x={}", escaped).as_bytes())
        .next()
        .map(|(_, value)| value.into_owned())
        .unwrap_or_else(|| segment.to_owned());
    clean_chars(&decoded)
}

/// Maps a URL onto a relative, filesystem-safe path.
///
/// URLs below `base` mirror their path; others live under `external/<host>/`.
/// Whenever sanitizing had to drop information, a short hash of the URL is
/// appended so two distinct URLs never share a path.
pub fn local_suffix(base: &Url, url: &str) -> String {
    let base_str = base.as_str().trim_end_matches('/');
    let rest = match url.strip_prefix(base_str) {
        Some(rest) if rest.is_empty() || rest.starts_with('/') || rest.starts_with('?') => Some(rest),
        _ => None,
    };

    let rest = match rest {
        Some(x) => x,
        None => {
            let parsed = Url::parse(url).ok();
            let host = parsed
                .as_ref()
                .and_then(|x| x.host_str())
                .map(sanitize_segment)
                .unwrap_or_else(|| "unknown".to_owned());
            let extension = parsed
                .as_ref()
                .and_then(|x| x.path_segments())
                .and_then(|mut x| x.next_back())
                .and_then(|x| x.rsplit_once('.').map(|(_, ext)| ext.to_owned()))
                .filter(|x| !x.is_empty() && x.len() <= 5 && x.chars().all(|c| c.is_ascii_alphanumeric()));
            let name = match extension {
                Some(ext) => format!("{:x}.{}", md5::compute(url), ext),
                None => format!("{:x}", md5::compute(url)),
            };
            return format!("external/{}/{}", host, name);
        }
    };

    let (path, query) = match rest.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (rest, None),
    };
    let raw = path.trim_matches('/');
    let mut segments: Vec<String> = raw
        .split('/')
        .filter(|x| !x.is_empty())
        .map(sanitize_segment)
        .collect();
    if let Some(query) = query.filter(|x| !x.is_empty()) {
        segments.push(clean_chars(query));
    }
    let mut suffix = segments.join("/");

    // Anything the plain path cannot tell apart gets a hash of the URL:
    // queries, characters lost to sanitizing, a trailing slash, empty
    // segments and the name the root page is saved under.
    let needs_hash = query.is_some()
        || suffix != raw
        || (!raw.is_empty() && path.ends_with('/'))
        || raw.contains("//")
        || suffix.eq_ignore_ascii_case("index");
    if needs_hash && !suffix.is_empty() {
        suffix = format!("{}_{}", suffix, hash8(url));
    }
    suffix
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://www.test.com").unwrap()
    }

    #[test]
    fn test_item_page_path() {
        let item = Item::new(&base(), ItemKind::Page, "A", "https://www.test.com/browse/a");
        assert_eq!(item.suffix, "browse/a");
        assert_eq!(item.key, "a");
        assert_eq!(item.file_path, "browse/a.html");
    }

    #[test]
    fn test_item_media_path() {
        let item = Item::new(&base(), ItemKind::Media, "pic", "https://www.test.com/media/pic.png");
        assert_eq!(item.file_path, "media/pic.png");
    }

    #[test]
    fn test_item_root_path() {
        let item = Item::new(&base(), ItemKind::Page, "Home", "https://www.test.com/");
        assert_eq!(item.file_path, "index.html");
    }

    #[test]
    fn test_item_base_with_path() {
        let base = Url::parse("https://lms.test.com/moodle").unwrap();
        let item = Item::new(&base, ItemKind::Page, "Course", "https://lms.test.com/moodle/course/view.php");
        assert_eq!(item.file_path, "course/view.php.html");

        let other = Item::new(&base, ItemKind::Page, "Other", "https://lms.test.com/moodlex/a");
        assert!(other.file_path.starts_with("external/lms.test.com/"));
    }

    #[test]
    fn test_item_query_gets_hash() {
        let first = Item::new(&base(), ItemKind::Document, "1", "https://www.test.com/mod/view.php?id=1");
        let second = Item::new(&base(), ItemKind::Document, "2", "https://www.test.com/mod/view.php?id=2");
        assert_ne!(first.file_path, second.file_path);
        assert!(first.file_path.starts_with("mod/view.php/id_1_"));
    }

    #[test]
    fn test_item_path_is_deterministic() {
        let url = "https://www.test.com/entries/%C3%9Cber sicht";
        let first = Item::new(&base(), ItemKind::Document, "x", url);
        let second = Item::new(&base(), ItemKind::Document, "y", url);
        assert_eq!(first.file_path, second.file_path);
        assert!(first.file_path.starts_with("entries/Über_sicht_"));
    }

    #[test]
    fn test_item_dot_segments_are_neutralized() {
        let suffix = local_suffix(&base(), "https://www.test.com/a/%2E%2E/b");
        assert!(suffix.starts_with("a/_/b_"));
    }

    #[test]
    fn test_item_paths_never_collide() {
        let urls = [
            "https://www.test.com/",
            "https://www.test.com/index",
            "https://www.test.com/entries/d",
            "https://www.test.com/entries/d.html",
            "https://www.test.com/entries/d/",
            "https://www.test.com/entries//d",
            "https://www.test.com/entries/d?",
        ];
        let mut paths = std::collections::HashSet::new();
        for url in urls.iter() {
            let item = Item::new(&base(), ItemKind::Document, "x", url);
            assert!(paths.insert(item.file_path.clone()), "{} collides at {}", url, item.file_path);
        }

        let page = Item::new(&base(), ItemKind::Page, "d", "https://www.test.com/entries/d");
        let media = Item::new(&base(), ItemKind::Media, "d", "https://www.test.com/entries/d.html");
        assert_eq!(page.file_path, "entries/d.html");
        assert_ne!(media.file_path, page.file_path);
        assert!(media.file_path.ends_with(".html"));
    }

    #[test]
    fn test_item_external() {
        let item = Item::new(&base(), ItemKind::Media, "cdn", "https://cdn.other.com/x/logo.svg");
        assert!(item.file_path.starts_with("external/cdn.other.com/"));
        assert!(item.file_path.ends_with(".svg"));
    }
}
