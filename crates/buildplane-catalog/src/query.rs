//! Query filters, sorting and in-memory paging.
//!
//! The object store cannot filter or sort beyond prefix matching, so every
//! criterion here is applied after the listing has been joined into builds.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::build::Build;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisibilityFilter {
    #[default]
    Any,
    Visible,
    Hidden,
}

impl VisibilityFilter {
    pub fn admits(&self, visible: bool) -> bool {
        match self {
            VisibilityFilter::Any => true,
            VisibilityFilter::Visible => visible,
            VisibilityFilter::Hidden => !visible,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    /// Creation time.
    Id,
    Status,
    User,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortOrder {
    pub field: SortField,
    pub direction: Direction,
}

impl SortOrder {
    pub fn asc(field: SortField) -> Self {
        Self {
            field,
            direction: Direction::Asc,
        }
    }

    pub fn desc(field: SortField) -> Self {
        Self {
            field,
            direction: Direction::Desc,
        }
    }

    fn compare(&self, a: &Build, b: &Build) -> Ordering {
        let ordering = match self.field {
            SortField::Id => a.key.build_id.cmp(&b.key.build_id),
            SortField::Status => a.status.as_str().cmp(b.status.as_str()),
            SortField::User => a.user.cmp(&b.user),
        };
        match self.direction {
            Direction::Asc => ordering,
            Direction::Desc => ordering.reverse(),
        }
    }
}

/// Zero-based page request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: usize,
    pub size: usize,
    #[serde(default)]
    pub sort: Vec<SortOrder>,
}

impl PageRequest {
    pub fn new(page: usize, size: usize) -> Self {
        Self {
            page,
            size,
            sort: Vec::new(),
        }
    }

    pub fn sorted_by(mut self, order: SortOrder) -> Self {
        self.sort.push(order);
        self
    }
}

/// One page of results plus the total across all pages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub content: Vec<T>,
    pub page: usize,
    pub size: usize,
    pub total_elements: usize,
}

impl<T> Page<T> {
    pub fn total_pages(&self) -> usize {
        if self.size == 0 {
            return 0;
        }
        self.total_elements.div_ceil(self.size)
    }
}

/// Filters for find-all and find-one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildQuery {
    pub include_config: bool,
    pub include_qa_config: bool,
    pub include_validation_url: bool,
    pub visibility: VisibilityFilter,
    /// Drop soft-deleted builds from listings.
    pub exclude_deleted: bool,
    pub from_year: Option<i32>,
    pub to_year: Option<i32>,
    pub page: Option<PageRequest>,
}

impl Default for BuildQuery {
    fn default() -> Self {
        Self {
            include_config: false,
            include_qa_config: false,
            include_validation_url: false,
            visibility: VisibilityFilter::Any,
            exclude_deleted: true,
            from_year: None,
            to_year: None,
            page: None,
        }
    }
}

impl BuildQuery {
    pub fn with_config(mut self) -> Self {
        self.include_config = true;
        self
    }

    pub fn with_qa_config(mut self) -> Self {
        self.include_qa_config = true;
        self
    }

    pub fn with_validation_url(mut self) -> Self {
        self.include_validation_url = true;
        self
    }

    pub fn visibility(mut self, filter: VisibilityFilter) -> Self {
        self.visibility = filter;
        self
    }

    pub fn including_deleted(mut self) -> Self {
        self.exclude_deleted = false;
        self
    }

    pub fn years(mut self, from: Option<i32>, to: Option<i32>) -> Self {
        self.from_year = from;
        self.to_year = to;
        self
    }

    pub fn paged(mut self, page: PageRequest) -> Self {
        self.page = Some(page);
        self
    }

    /// Whether a joined build survives the deletion, visibility and year filters.
    pub fn admits(&self, build: &Build) -> bool {
        if self.exclude_deleted && build.deleted {
            return false;
        }
        if !self.visibility.admits(build.visible) {
            return false;
        }
        if self.from_year.is_some() || self.to_year.is_some() {
            let Some(year) = build.key.year() else {
                return false;
            };
            if self.from_year.is_some_and(|from| year < from) {
                return false;
            }
            if self.to_year.is_some_and(|to| year > to) {
                return false;
            }
        }
        true
    }

    /// Sort (newest first unless told otherwise) and cut out the requested page.
    pub fn paginate(&self, mut builds: Vec<Build>) -> Page<Build> {
        builds.sort_by(|a, b| b.key.build_id.cmp(&a.key.build_id));
        let total_elements = builds.len();

        let Some(request) = &self.page else {
            return Page {
                size: total_elements,
                content: builds,
                page: 0,
                total_elements,
            };
        };

        if !request.sort.is_empty() {
            builds.sort_by(|a, b| {
                request
                    .sort
                    .iter()
                    .map(|order| order.compare(a, b))
                    .find(|ordering| ordering.is_ne())
                    .unwrap_or(Ordering::Equal)
            });
        }

        let content = builds
            .into_iter()
            .skip(request.page.saturating_mul(request.size))
            .take(request.size)
            .collect();
        Page {
            content,
            page: request.page,
            size: request.size,
            total_elements,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use buildplane_core::{BuildKey, BuildStatus};

    fn build(id: &str, status: BuildStatus, user: Option<&str>) -> Build {
        let mut build = Build::new(BuildKey::new("c", "p", id));
        build.status = status;
        build.user = user.map(str::to_string);
        build
    }

    fn ids(page: &Page<Build>) -> Vec<&str> {
        page.content.iter().map(Build::id).collect()
    }

    #[test]
    fn default_order_is_newest_first() {
        let page = BuildQuery::default().paginate(vec![
            build("2023-05-01T00:00:00", BuildStatus::Built, None),
            build("2024-01-01T00:00:00", BuildStatus::Built, None),
            build("2023-12-01T00:00:00", BuildStatus::Built, None),
        ]);
        assert_eq!(
            ids(&page),
            vec!["2024-01-01T00:00:00", "2023-12-01T00:00:00", "2023-05-01T00:00:00"]
        );
        assert_eq!(page.total_elements, 3);
    }

    #[test]
    fn pages_are_cut_after_sorting() {
        let builds: Vec<Build> = (1..=5)
            .map(|d| build(&format!("2024-01-0{d}T00:00:00"), BuildStatus::Built, None))
            .collect();
        let query = BuildQuery::default().paged(PageRequest::new(1, 2));
        let page = query.paginate(builds);
        assert_eq!(ids(&page), vec!["2024-01-03T00:00:00", "2024-01-02T00:00:00"]);
        assert_eq!(page.total_elements, 5);
        assert_eq!(page.total_pages(), 3);
    }

    #[test]
    fn explicit_sort_orders_chain() {
        let builds = vec![
            build("2024-01-01T00:00:00", BuildStatus::Failed, Some("bob")),
            build("2024-01-02T00:00:00", BuildStatus::Built, Some("amy")),
            build("2024-01-03T00:00:00", BuildStatus::Built, Some("bob")),
        ];
        let query = BuildQuery::default().paged(
            PageRequest::new(0, 10)
                .sorted_by(SortOrder::asc(SortField::User))
                .sorted_by(SortOrder::asc(SortField::Id)),
        );
        let page = query.paginate(builds);
        assert_eq!(
            ids(&page),
            vec!["2024-01-02T00:00:00", "2024-01-01T00:00:00", "2024-01-03T00:00:00"]
        );
    }

    #[test]
    fn year_range_is_inclusive() {
        let query = BuildQuery::default().years(Some(2023), Some(2024));
        assert!(query.admits(&build("2023-01-01T00:00:00", BuildStatus::Built, None)));
        assert!(query.admits(&build("2024-12-31T23:59:59", BuildStatus::Built, None)));
        assert!(!query.admits(&build("2022-12-31T23:59:59", BuildStatus::Built, None)));
        assert!(!query.admits(&build("2025-01-01T00:00:00", BuildStatus::Built, None)));
    }

    #[test]
    fn deleted_and_visibility_filters() {
        let mut hidden = build("2024-01-01T00:00:00", BuildStatus::Built, None);
        hidden.visible = false;
        let mut deleted = build("2024-01-02T00:00:00", BuildStatus::Built, None);
        deleted.deleted = true;

        let default = BuildQuery::default();
        assert!(default.admits(&hidden));
        assert!(!default.admits(&deleted));

        assert!(!default.clone().visibility(VisibilityFilter::Visible).admits(&hidden));
        assert!(default.clone().visibility(VisibilityFilter::Hidden).admits(&hidden));
        assert!(default.including_deleted().admits(&deleted));
    }
}
