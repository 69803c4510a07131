use std::collections::{HashSet, VecDeque};

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::item::{Item, ItemKind};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    Saved,
    Skipped,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Outcome {
    pub url: String,
    pub file_path: String,
    pub state: ItemState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct MirrorReport {
    pub outcomes: Vec<Outcome>,
    /// Saved pages whose links were corrected after their children landed.
    pub relinked: usize,
}

impl MirrorReport {
    pub fn count(&self, state: ItemState) -> usize {
        self.outcomes.iter().filter(|x| x.state == state).count()
    }

    pub fn urls(&self, state: ItemState) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|x| x.state == state)
            .map(|x| x.url.as_str())
            .collect()
    }
}

/// Per-crawl bookkeeping: what was seen and what is still to do.
pub struct CrawlContext {
    visited: HashSet<String>,
    pages: VecDeque<Item>,
    documents: VecDeque<Item>,
    media: VecDeque<Item>,
    filter: Option<Regex>,
    max_items: Option<usize>,
    pub report: MirrorReport,
}

impl CrawlContext {
    pub fn new(filter: Option<Regex>, max_items: Option<usize>) -> Self {
        Self {
            visited: HashSet::new(),
            pages: VecDeque::new(),
            documents: VecDeque::new(),
            media: VecDeque::new(),
            filter,
            max_items,
            report: MirrorReport::default(),
        }
    }

    fn queue(&mut self, kind: ItemKind) -> &mut VecDeque<Item> {
        match kind {
            ItemKind::Page => &mut self.pages,
            ItemKind::Document => &mut self.documents,
            ItemKind::Media => &mut self.media,
        }
    }

    fn is_full(&self) -> bool {
        match self.max_items {
            Some(max) => self.visited.len() >= max,
            None => false,
        }
    }

    /// Enqueues `item` unless it was seen before, exceeds the item cap or,
    /// for listing items, fails the filter. Returns whether it was enqueued.
    pub fn offer(&mut self, item: Item) -> bool {
        if item.kind.is_listing() {
            if let Some(filter) = &self.filter {
                if !filter.is_match(&item.url) {
                    return false;
                }
            }
        }
        self.seed(item)
    }

    /// Like [`offer`](Self::offer) but bypasses the filter.
    pub fn seed(&mut self, item: Item) -> bool {
        if self.is_full() || !self.visited.insert(item.url.clone()) {
            return false;
        }
        self.queue(item.kind).push_back(item);
        true
    }

    pub fn next(&mut self, kind: ItemKind) -> Option<Item> {
        self.queue(kind).pop_front()
    }

    pub fn is_drained(&self) -> bool {
        self.pages.is_empty() && self.documents.is_empty() && self.media.is_empty()
    }

    /// Marks `url` as handled without queueing it. Returns whether it was new.
    pub fn mark_visited(&mut self, url: &str) -> bool {
        self.visited.insert(url.to_owned())
    }

    /// Items still waiting in any queue.
    pub fn pending(&self) -> usize {
        self.pages.len() + self.documents.len() + self.media.len()
    }

    pub fn is_visited(&self, url: &str) -> bool {
        self.visited.contains(url)
    }

    pub fn record(&mut self, item: &Item, file_path: &str, state: ItemState, reason: Option<String>) {
        self.report.outcomes.push(Outcome {
            url: item.url.clone(),
            file_path: file_path.to_owned(),
            state,
            reason,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn item(kind: ItemKind, url: &str) -> Item {
        let base = Url::parse("https://www.test.com").unwrap();
        Item::new(&base, kind, "x", url)
    }

    #[test]
    fn test_offer_once() {
        let mut context = CrawlContext::new(None, None);
        assert!(context.offer(item(ItemKind::Document, "https://www.test.com/entries/d")));
        assert!(!context.offer(item(ItemKind::Document, "https://www.test.com/entries/d")));
        // Seen under one class means seen for all of them.
        assert!(!context.offer(item(ItemKind::Media, "https://www.test.com/entries/d")));

        assert!(context.next(ItemKind::Document).is_some());
        assert!(context.next(ItemKind::Document).is_none());
        assert!(context.next(ItemKind::Media).is_none());
        assert!(context.is_drained());
    }

    #[test]
    fn test_offer_fifo() {
        let mut context = CrawlContext::new(None, None);
        context.offer(item(ItemKind::Page, "https://www.test.com/browse/a"));
        context.offer(item(ItemKind::Page, "https://www.test.com/browse/b"));

        assert_eq!(context.next(ItemKind::Page).unwrap().key, "a");
        assert_eq!(context.next(ItemKind::Page).unwrap().key, "b");
    }

    #[test]
    fn test_filter_applies_to_listings_only() {
        let filter = Regex::new("(history|law)").unwrap();
        let mut context = CrawlContext::new(Some(filter), None);

        assert!(!context.offer(item(ItemKind::Page, "https://www.test.com/browse/art")));
        assert!(context.offer(item(ItemKind::Page, "https://www.test.com/browse/history")));
        assert!(!context.offer(item(ItemKind::Document, "https://www.test.com/entries/art/a")));
        assert!(context.offer(item(ItemKind::Media, "https://www.test.com/media/art.png")));
        assert!(context.seed(item(ItemKind::Page, "https://www.test.com/browse/art")));
        assert!(!context.is_visited("https://www.test.com/entries/art/a"));
    }

    #[test]
    fn test_max_items() {
        let mut context = CrawlContext::new(None, Some(1));
        assert!(context.offer(item(ItemKind::Page, "https://www.test.com/browse/a")));
        assert!(!context.offer(item(ItemKind::Page, "https://www.test.com/browse/b")));
    }

    #[test]
    fn test_report_counts() {
        let mut context = CrawlContext::new(None, None);
        let a = item(ItemKind::Page, "https://www.test.com/browse/a");
        let b = item(ItemKind::Media, "https://www.test.com/media/b.png");
        context.record(&a, &a.file_path, ItemState::Saved, None);
        context.record(&b, &b.file_path, ItemState::Failed, Some("boom".to_owned()));

        assert_eq!(context.report.count(ItemState::Saved), 1);
        assert_eq!(context.report.urls(ItemState::Failed), vec!["https://www.test.com/media/b.png"]);
    }
}
