use askama::Template;
use catalog_api::PaginatedList;
use serde::Deserialize;

pub const MAX_PAGE_SIZE: u32 = 200;

/// Raw `page` / `page_size` query values. Garbage never fails the request,
/// it falls back to the defaults.
#[derive(Deserialize, Debug, Default)]
pub struct PageQuery {
    pub page: Option<String>,
    pub page_size: Option<String>,
}

impl PageQuery {
    pub fn resolve(&self, default_page_size: u32) -> (u32, u32) {
        let page = self
            .page
            .as_deref()
            .and_then(|p| p.trim().parse::<i64>().ok())
            .map(|p| p.clamp(1, u32::MAX as i64) as u32)
            .unwrap_or(1);
        let page_size = self
            .page_size
            .as_deref()
            .and_then(|p| p.trim().parse::<i64>().ok())
            .map(|p| p.clamp(1, MAX_PAGE_SIZE as i64) as u32)
            .unwrap_or(default_page_size);
        (page, page_size)
    }
}

/// Pagination links for a rendered list. When `target` is set the links are
/// HTMX requests swapping that element.
#[derive(Template, Debug, Clone, PartialEq)]
#[template(path = "partials/pagination.html")]
pub struct Pager {
    pub page_number: u32,
    pub total_pages: u32,
    pub total_items: u32,
    pub prev_url: Option<String>,
    pub next_url: Option<String>,
    pub target: Option<String>,
}

impl Pager {
    pub fn new<T>(
        list: &PaginatedList<T>,
        base: &str,
        params: &[(&str, String)],
        page_size: u32,
    ) -> Self {
        let url = |page: u32| page_url(base, params, page, page_size);
        Self {
            page_number: list.page_number,
            total_pages: list.total_pages,
            total_items: list.total_items,
            prev_url: list
                .has_previous_page
                .then(|| url(list.page_number.saturating_sub(1).max(1))),
            next_url: list.has_next_page.then(|| url(list.page_number + 1)),
            target: None,
        }
    }

    pub fn target(mut self, target: &str) -> Self {
        self.target = Some(target.to_string());
        self
    }

    pub fn is_single_page(&self) -> bool {
        self.prev_url.is_none() && self.next_url.is_none()
    }
}

pub fn page_url(base: &str, params: &[(&str, String)], page: u32, page_size: u32) -> String {
    let mut query: Vec<(&str, String)> = params
        .iter()
        .filter(|(_, v)| !v.is_empty())
        .cloned()
        .collect();
    query.push(("page", page.to_string()));
    query.push(("page_size", page_size.to_string()));
    format!(
        "{base}?{}",
        serde_urlencoded::to_string(&query).unwrap_or_default()
    )
}

/// Cuts one page out of an in-memory list.
pub fn paginate<T>(items: Vec<T>, page: u32, page_size: u32) -> PaginatedList<T> {
    let page = page.max(1);
    let page_size = page_size.max(1);
    let total = items.len() as u32;
    let total_pages = total.div_ceil(page_size).max(1);
    let start = ((page - 1) as usize).saturating_mul(page_size as usize);
    let items = items
        .into_iter()
        .skip(start)
        .take(page_size as usize)
        .collect();
    PaginatedList {
        items,
        page_number: page,
        total_pages,
        total_items: total,
        has_previous_page: page > 1,
        has_next_page: page < total_pages,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(page: &str, page_size: &str) -> PageQuery {
        PageQuery {
            page: Some(page.to_string()),
            page_size: Some(page_size.to_string()),
        }
    }

    #[test]
    fn clamps_page_params() {
        assert_eq!(PageQuery::default().resolve(50), (1, 50));
        assert_eq!(q("0", "1000").resolve(50), (1, 200));
        assert_eq!(q("-3", "0").resolve(25), (1, 1));
        assert_eq!(q("abc", "x").resolve(25), (1, 25));
        assert_eq!(q("4", "10").resolve(25), (4, 10));
    }

    #[test]
    fn paginates_locally() {
        let page = paginate((1..=7).collect::<Vec<_>>(), 2, 3);
        assert_eq!(page.items, vec![4, 5, 6]);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.total_items, 7);
        assert!(page.has_previous_page);
        assert!(page.has_next_page);

        let empty = paginate(Vec::<i32>::new(), 1, 25);
        assert_eq!(empty.total_pages, 1);
        assert!(!empty.has_next_page);

        let beyond = paginate(vec![1, 2], 5, 25);
        assert!(beyond.items.is_empty());
    }

    #[test]
    fn pager_links_keep_filters() {
        let page = paginate((1..=60).collect::<Vec<_>>(), 2, 25);
        let pager = Pager::new(
            &page,
            "/sellers",
            &[("name", "Heritage House".to_string()), ("is_active", String::new())],
            25,
        )
        .target("#panel-left1-content");
        assert_eq!(
            pager.prev_url.as_deref(),
            Some("/sellers?name=Heritage+House&page=1&page_size=25")
        );
        assert_eq!(
            pager.next_url.as_deref(),
            Some("/sellers?name=Heritage+House&page=3&page_size=25")
        );
        assert_eq!(pager.target.as_deref(), Some("#panel-left1-content"));
        assert!(Pager::new(&paginate(vec![1], 1, 25), "/x", &[], 25).is_single_page());
    }
}
