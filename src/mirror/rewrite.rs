use std::collections::HashMap;

use url::Url;

/// Relative path from the directory of `from_file` to `to_file`; both are
/// slash separated paths below the same root.
pub fn relative_path(from_file: &str, to_file: &str) -> String {
    let from: Vec<&str> = from_file.split('/').filter(|x| !x.is_empty()).collect();
    let to: Vec<&str> = to_file.split('/').filter(|x| !x.is_empty()).collect();
    let from_dir = &from[..from.len().saturating_sub(1)];
    let to_dir = &to[..to.len().saturating_sub(1)];

    let common = from_dir
        .iter()
        .zip(to_dir.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut parts: Vec<&str> = vec![".."; from_dir.len() - common];
    parts.extend(&to[common..]);
    parts.join("/")
}

fn is_url_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | '%' | '~')
}

/// A child link of a saved page and where its copy lives, relative to that
/// page.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkTarget {
    pub url: String,
    /// Attribute values in the page that resolved to `url`.
    pub spellings: Vec<String>,
    pub local: String,
}

impl LinkTarget {
    pub fn new(url: &str, local: &str) -> Self {
        Self {
            url: url.to_owned(),
            spellings: Vec::new(),
            local: local.to_owned(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Bound {
    /// The whole value of an `href` or `src` attribute.
    Exact,
    /// Starts right after a quote and ends on a URL boundary.
    Quoted,
    /// Ends on a URL boundary.
    Open,
}

#[derive(Debug)]
struct Needle {
    text: String,
    bound: Bound,
    replacement: String,
}

impl Needle {
    fn matches(&self, content: &str, at: usize) -> bool {
        if !content.as_bytes()[at..].starts_with(self.text.as_bytes()) {
            return false;
        }
        let before = content[..at].chars().next_back();
        let after = content[at + self.text.len()..].chars().next();
        let quoted = matches!(before, Some('"') | Some('\''));

        match self.bound {
            Bound::Open => after.map_or(true, |c| !is_url_char(c)),
            Bound::Quoted => quoted && after.map_or(true, |c| !is_url_char(c)),
            Bound::Exact => {
                let head = &content[..at.saturating_sub(1)];
                quoted && after == before && (head.ends_with("href=") || head.ends_with("src="))
            }
        }
    }
}

fn push_escaped(needles: &mut Vec<Needle>, text: &str, bound: Bound, replacement: &str) {
    if text.is_empty() {
        return;
    }
    needles.push(Needle {
        text: text.to_owned(),
        bound,
        replacement: replacement.to_owned(),
    });
    let escaped = text.replace('&', "&amp;");
    if escaped != text {
        needles.push(Needle {
            text: escaped,
            bound,
            replacement: replacement.to_owned(),
        });
    }
}

fn needles(base: &Url, targets: &[LinkTarget]) -> Vec<Needle> {
    let mut needles = Vec::new();
    for target in targets {
        push_escaped(&mut needles, &target.url, Bound::Open, &target.local);

        if let Ok(parsed) = Url::parse(&target.url) {
            if parsed.origin() == base.origin() {
                let site_relative = &target.url[parsed.origin().ascii_serialization().len()..];
                if site_relative.len() > 1 {
                    push_escaped(&mut needles, site_relative, Bound::Quoted, &target.local);
                }
            }
        }

        for spelling in target.spellings.iter().filter(|x| !x.starts_with('#')) {
            let replacement = match spelling.find('#') {
                Some(at) => format!("{}{}", target.local, &spelling[at..]),
                None => target.local.clone(),
            };
            push_escaped(&mut needles, spelling, Bound::Exact, &replacement);
        }
    }

    needles.sort_by(|a, b| {
        b.text
            .len()
            .cmp(&a.text.len())
            .then_with(|| a.text.cmp(&b.text))
            .then_with(|| a.bound.cmp(&b.bound))
            .then_with(|| a.replacement.cmp(&b.replacement))
    });
    needles.dedup_by(|a, b| a.text == b.text && a.bound == b.bound);
    needles
}

/// Rewrites the links of `targets` inside `content` to their local copies.
///
/// Replacement is textual and takes one pass over `content`, so inserted
/// paths are never rewritten again. Absolute URLs are replaced wherever they
/// occur (attributes and inline scripts alike), site-relative forms
/// (`/entries/x`) when they sit in quotes, and the exact attribute values a
/// page used, such as `../entries/x`, when they fill a whole `href` or `src`.
/// HTML-escaped forms count too. At each position the longest match wins,
/// so a URL never clobbers a longer one it is a prefix of.
pub fn rewrite_links(content: &str, base: &Url, targets: &[LinkTarget]) -> String {
    let needles = needles(base, targets);
    if needles.is_empty() {
        return content.to_owned();
    }

    let mut by_first: HashMap<u8, Vec<&Needle>> = HashMap::new();
    for needle in needles.iter() {
        by_first.entry(needle.text.as_bytes()[0]).or_default().push(needle);
    }

    let bytes = content.as_bytes();
    let mut out = String::with_capacity(content.len());
    let mut last = 0;
    let mut at = 0;
    while at < bytes.len() {
        let found = by_first
            .get(&bytes[at])
            .and_then(|x| x.iter().find(|needle| needle.matches(content, at)));
        match found {
            Some(needle) => {
                out.push_str(&content[last..at]);
                out.push_str(&needle.replacement);
                at += needle.text.len();
                last = at;
            }
            None => at += 1,
        }
    }
    out.push_str(&content[last..]);
    out
}
