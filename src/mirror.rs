//! Mirror crawl: walks a site breadth-first from an entry page, saves every
//! page, document and media item under a path derived from its URL and
//! points the saved links at the local copies.

mod context;
mod crawler;
mod item;
mod rewrite;
mod store;

pub use context::{CrawlContext, ItemState, MirrorReport, Outcome};
pub use crawler::{media_path, mirror, MirrorRequest};
pub use item::{local_suffix, Item, ItemKind};
pub use rewrite::{relative_path, rewrite_links, LinkTarget};
pub use store::{render_document, IndexEntry, PathIndex, INDEX_FILE, STYLESHEET_FILE};
