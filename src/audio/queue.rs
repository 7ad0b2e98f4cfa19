use crate::storage::Track;

/// A pending request referencing a catalog track. Never mutated in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub title: String,
    pub url: String,
    pub id: String,
}

impl From<&Track> for QueueEntry {
    fn from(track: &Track) -> Self {
        Self {
            title: track.title.clone(),
            url: track.url.clone(),
            id: track.id.clone(),
        }
    }
}

/// Read-only copy of a guild's queue, taken under its lock.
#[derive(Debug, Clone, Default)]
pub struct QueueInfo {
    pub current: Option<QueueEntry>,
    pub items: Vec<QueueEntry>,
}

impl QueueInfo {
    pub fn total_items(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_none() && self.items.is_empty()
    }

    /// One page of the pending entries. Pages are 1-based and clamped.
    pub fn get_page(&self, page: usize, items_per_page: usize) -> QueuePage {
        let items_per_page = items_per_page.max(1);
        let total_items = self.items.len();
        let total_pages = if total_items == 0 {
            1
        } else {
            total_items.div_ceil(items_per_page)
        };
        let current_page = page.clamp(1, total_pages);
        let start = (current_page - 1) * items_per_page;
        let end = (start + items_per_page).min(total_items);

        QueuePage {
            items: self.items[start.min(end)..end].to_vec(),
            offset: start,
            current_page,
            total_pages,
            total_items,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueuePage {
    pub items: Vec<QueueEntry>,
    /// Index of the first item of this page in the whole queue.
    pub offset: usize,
    pub current_page: usize,
    pub total_pages: usize,
    pub total_items: usize,
}
