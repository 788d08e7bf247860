use serde::Serialize;

pub const DEFAULT_PAGE_SIZE: i64 = 10;

/// Page number from a raw `?page=` value. Anything that is not a positive
/// integer falls back to the first page.
pub fn parse_page_number(raw: Option<&str>) -> i64 {
    raw.and_then(|value| value.trim().parse::<i64>().ok())
        .filter(|page| *page >= 1)
        .unwrap_or(1)
}

/// The clamped slice of a result set that one page covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub page_number: i64,
    pub page_size: i64,
    pub total_pages: i64,
    pub total_items: i64,
}

impl PageWindow {
    pub fn new(total_items: i64, page_number: i64, page_size: i64) -> Self {
        let page_size = page_size.max(1);
        let total_items = total_items.max(0);

        // An empty result still has one (empty) page.
        let total_pages = if total_items == 0 {
            1
        } else {
            (total_items - 1) / page_size + 1
        };
        let page_number = page_number.clamp(1, total_pages);

        Self {
            page_number,
            page_size,
            total_pages,
            total_items,
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page_number - 1) * self.page_size
    }

    pub fn limit(&self) -> i64 {
        self.page_size
    }

    pub fn has_next(&self) -> bool {
        self.page_number < self.total_pages
    }

    pub fn has_prev(&self) -> bool {
        self.page_number > 1
    }

    pub fn into_page<T>(self, items: Vec<T>) -> Page<T> {
        Page {
            items,
            page_number: self.page_number,
            page_size: self.page_size,
            total_pages: self.total_pages,
            total_items: self.total_items,
            has_next: self.has_next(),
            has_prev: self.has_prev(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page_number: i64,
    pub page_size: i64,
    pub total_pages: i64,
    pub total_items: i64,
    pub has_next: bool,
    pub has_prev: bool,
}

impl<T> Page<T> {
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            page_number: self.page_number,
            page_size: self.page_size,
            total_pages: self.total_pages,
            total_items: self.total_items,
            has_next: self.has_next,
            has_prev: self.has_prev,
        }
    }
}

pub fn paginate<T>(items: Vec<T>, page_number: i64, page_size: i64) -> Page<T> {
    let window = PageWindow::new(items.len() as i64, page_number, page_size);

    let page_items = items
        .into_iter()
        .skip(window.offset() as usize)
        .take(window.limit() as usize)
        .collect();

    window.into_page(page_items)
}
