use std::path::Path;

use scraper::Selector;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::MirrorError;
use crate::mirror::ItemKind;
use crate::session::LoginForm;

/// Everything that differs between two mirrored sites.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SiteProfile {
    pub name: String,
    pub base_url: String,
    #[serde(default)]
    pub login: Option<LoginForm>,
    #[serde(default)]
    pub title_selector: Option<String>,
    /// Fragments persisted for a page, in order. Empty means the whole body.
    #[serde(default)]
    pub content: Vec<Fragment>,
    #[serde(default)]
    pub links: Vec<LinkRule>,
    #[serde(default)]
    pub canonical: Canonical,
    /// Query appended when navigating to sub-pages, e.g. to disable paging.
    #[serde(default)]
    pub page_query: Option<String>,
    /// Link to the next page of a document split over several pages, such
    /// as an e-book reader. The pages are saved as one document.
    #[serde(default)]
    pub next_page: Option<String>,
    #[serde(default)]
    pub tree: Option<TreeRules>,
    #[serde(default = "default_stylesheet")]
    pub stylesheet: String,
    #[serde(default = "default_timeout")]
    pub download_timeout_secs: u64,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Fragment {
    pub selector: String,
    #[serde(default)]
    pub optional: bool,
}

/// Classifies a link by the element it sits in and a substring of its URL.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct LinkRule {
    pub kind: ItemKind,
    #[serde(default = "default_link_selector")]
    pub selector: String,
    pub contains: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Canonical {
    #[serde(default = "yes")]
    pub strip_query: bool,
    #[serde(default = "yes")]
    pub strip_fragment: bool,
}

impl Default for Canonical {
    fn default() -> Self {
        Self {
            strip_query: true,
            strip_fragment: true,
        }
    }
}

/// How a document-library listing tells folders from files.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TreeRules {
    pub entry_selector: String,
    /// Attribute whose last `kind_separator` part names the entry type.
    #[serde(default)]
    pub kind_attribute: Option<String>,
    #[serde(default = "default_kind_separator")]
    pub kind_separator: String,
    #[serde(default = "default_folder_kind")]
    pub folder_kind: String,
    /// Fallback when no kind attribute is present.
    #[serde(default)]
    pub folder_contains: Option<String>,
}

fn default_link_selector() -> String {
    "a[href]".to_owned()
}

fn default_kind_separator() -> String {
    ", ".to_owned()
}

fn default_folder_kind() -> String {
    "Folder".to_owned()
}

fn default_timeout() -> u64 {
    20
}

fn yes() -> bool {
    true
}

pub fn default_stylesheet() -> String {
    r#".hidden {
  display: none;
  visibility: hidden;
}

.accesshide {
  position: absolute;
  left: -10000px;
  font-weight: normal;
  font-size: 1em;
}

p {
  text-indent: 20px;
}

div.title {
  font-weight: bold;
}
"#
    .to_owned()
}

pub fn parse_selector(selector: &str) -> Result<Selector, String> {
    Selector::parse(selector).map_err(|e| format!("selector `{}`: {:?}", selector, e))
}

impl SiteProfile {
    /// A profile that persists whole pages and treats every link below
    /// `base_url` as a sub-page.
    pub fn generic(base_url: &str) -> Self {
        Self {
            name: "generic".to_owned(),
            base_url: base_url.to_owned(),
            login: None,
            title_selector: None,
            content: Vec::new(),
            links: vec![LinkRule {
                kind: ItemKind::Page,
                selector: default_link_selector(),
                contains: String::new(),
            }],
            canonical: Canonical::default(),
            page_query: None,
            next_page: None,
            tree: None,
            stylesheet: default_stylesheet(),
            download_timeout_secs: default_timeout(),
        }
    }

    pub fn load(path: &Path) -> Result<Self, MirrorError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| MirrorError::Profile(format!("{}: {}", path.display(), e)))?;
        let profile: SiteProfile = serde_json::from_str(&text)
            .map_err(|e| MirrorError::Profile(format!("{}: {}", path.display(), e)))?;
        profile.validate()?;
        Ok(profile)
    }

    /// Checks the base URL and compiles every selector once up front.
    pub fn validate(&self) -> Result<(), MirrorError> {
        self.base()?;

        let mut selectors: Vec<&str> = Vec::new();
        selectors.extend(self.title_selector.as_deref());
        selectors.extend(self.content.iter().map(|x| x.selector.as_str()));
        selectors.extend(self.links.iter().map(|x| x.selector.as_str()));
        selectors.extend(self.next_page.as_deref());
        if let Some(login) = &self.login {
            selectors.push(&login.form_selector);
            selectors.extend(login.success_selector.as_deref());
            selectors.extend(login.error_selector.as_deref());
        }
        if let Some(tree) = &self.tree {
            selectors.push(&tree.entry_selector);
        }

        for selector in selectors {
            parse_selector(selector).map_err(MirrorError::Profile)?;
        }
        Ok(())
    }

    /// The base URL without a trailing slash, the way links are suffixed against it.
    pub fn base(&self) -> Result<Url, MirrorError> {
        let mut base = self.base_url.trim_end_matches('/').to_owned();
        if !base.starts_with("http") {
            base = format!("http://{}", base);
        }
        Url::parse(&base).map_err(|e| MirrorError::Profile(format!("base url {}: {}", base, e)))
    }
}
