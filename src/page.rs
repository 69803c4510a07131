//! Page model: one extraction pass over a loaded page, producing an
//! immutable snapshot of everything the crawler needs from it.

mod profile;

pub use profile::{
    default_stylesheet, parse_selector, Canonical, Fragment, LinkRule, SiteProfile, TreeRules,
};

use std::collections::HashMap;

use scraper::{ElementRef, Html};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::SessionError;
use crate::mirror::ItemKind;
use crate::session::PageSource;

/// A classified outbound link, already canonical.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Link {
    pub kind: ItemKind,
    pub name: String,
    pub url: String,
    /// Attribute values that resolved to `url`, as written in the page.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub raw: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct PageSnapshot {
    pub url: String,
    pub title: String,
    pub content: String,
    pub links: Vec<Link>,
}

impl PageSnapshot {
    /// Appends the next page of a paged document: its content after this
    /// one's, its links merged into this one's.
    pub fn append(&mut self, next: PageSnapshot) {
        self.content.push_str(&next.content);
        for link in next.links {
            match self.links.iter_mut().find(|x| x.url == link.url) {
                Some(known) => {
                    for raw in link.raw {
                        if !known.raw.contains(&raw) {
                            known.raw.push(raw);
                        }
                    }
                }
                None => self.links.push(link),
            }
        }
    }
}

/// Resolves `href` against `base` and strips navigation-only noise.
pub fn canonicalize(base: &Url, href: &str, rules: &Canonical) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let mut url = base.join(href).ok()?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return None;
    }
    if rules.strip_fragment {
        url.set_fragment(None);
    }
    if rules.strip_query {
        url.set_query(None);
    }
    Some(url)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn link_name(element: &ElementRef, url: &Url) -> String {
    let text = collapse_whitespace(&element.text().collect::<String>());
    if !text.is_empty() {
        return text;
    }
    if let Some(title) = element.value().attr("title") {
        let title = collapse_whitespace(title);
        if !title.is_empty() {
            return title;
        }
    }
    url.path_segments()
        .and_then(|mut x| x.next_back().map(|x| x.to_owned()))
        .filter(|x| !x.is_empty())
        .unwrap_or_else(|| url.to_string())
}

/// Extracts title, content fragments and classified links from `source`.
///
/// Fails with a structure mismatch when a required fragment is missing.
pub fn extract(profile: &SiteProfile, source: &PageSource) -> Result<PageSnapshot, SessionError> {
    let html = Html::parse_document(&source.html);
    let page_url = Url::parse(&source.url).map_err(|_| SessionError::InvalidUrl(source.url.clone()))?;
    let structure = |detail: String| SessionError::Structure {
        url: source.url.clone(),
        detail,
    };

    let title = match &profile.title_selector {
        Some(selector) => {
            let selector = parse_selector(selector).map_err(structure)?;
            html.select(&selector)
                .next()
                .map(|x| collapse_whitespace(&x.text().collect::<String>()))
        }
        None => None,
    };
    let title = match title {
        Some(x) => x,
        None => {
            let selector = parse_selector("title").map_err(structure)?;
            html.select(&selector)
                .next()
                .map(|x| collapse_whitespace(&x.text().collect::<String>()))
                .unwrap_or_default()
        }
    };

    let mut scope: Vec<ElementRef> = Vec::new();
    for fragment in profile.content.iter() {
        let selector = parse_selector(&fragment.selector).map_err(structure)?;
        match html.select(&selector).next() {
            Some(element) => scope.push(element),
            None if fragment.optional => {}
            None => return Err(structure(format!("missing element `{}`", fragment.selector))),
        }
    }

    let content = if profile.content.is_empty() {
        let body = parse_selector("body").map_err(structure)?;
        let element = html.select(&body).next().unwrap_or_else(|| html.root_element());
        scope.push(element);
        element.inner_html()
    } else {
        let mut content = String::new();
        for element in scope.iter() {
            content.push_str(&element.html());
            content.push('\n');
        }
        content
    };

    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut links: Vec<Link> = Vec::new();
    for rule in profile.links.iter() {
        let selector = parse_selector(&rule.selector).map_err(structure)?;
        for root in scope.iter() {
            for element in root.select(&selector) {
                let href = match element.value().attr("href").or_else(|| element.value().attr("src")) {
                    Some(x) => x,
                    None => continue,
                };
                let url = match canonicalize(&page_url, href, &profile.canonical) {
                    Some(x) => x,
                    None => continue,
                };
                if !url.as_str().contains(&rule.contains) {
                    continue;
                }
                match seen.get(url.as_str()) {
                    Some(index) => {
                        let link = &mut links[*index];
                        if !link.raw.iter().any(|x| x == href) {
                            link.raw.push(href.to_owned());
                        }
                    }
                    None => {
                        seen.insert(url.to_string(), links.len());
                        links.push(Link {
                            kind: rule.kind,
                            name: link_name(&element, &url),
                            url: url.to_string(),
                            raw: vec![href.to_owned()],
                        });
                    }
                }
            }
        }
    }

    Ok(PageSnapshot {
        url: source.url.clone(),
        title,
        content,
        links,
    })
}

/// Where the profile's next-page link of `source` points, if the page has one.
///
/// Only the fragment is dropped: paged readers often number their pages in
/// the query.
pub fn next_page(profile: &SiteProfile, source: &PageSource) -> Result<Option<Url>, SessionError> {
    let selector = match &profile.next_page {
        Some(x) => parse_selector(x).map_err(|detail| SessionError::Structure {
            url: source.url.clone(),
            detail,
        })?,
        None => return Ok(None),
    };
    let page_url = Url::parse(&source.url).map_err(|_| SessionError::InvalidUrl(source.url.clone()))?;
    let html = Html::parse_document(&source.html);
    let keep_query = Canonical {
        strip_query: false,
        strip_fragment: true,
    };

    Ok(html
        .select(&selector)
        .filter_map(|x| x.value().attr("href"))
        .find_map(|href| canonicalize(&page_url, href, &keep_query)))
}
