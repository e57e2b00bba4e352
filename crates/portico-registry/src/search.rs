use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::entry::RegistryEntry;

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    /// Cache, then remote with retry, then the local catalog.
    #[default]
    Auto,
    /// Local catalog only.
    Offline,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchRequest {
    pub query: Option<String>,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub page: u32,
    pub limit: u32,
    pub mode: SearchMode,
}

impl Default for SearchRequest {
    fn default() -> Self {
        Self {
            query: None,
            category: None,
            tags: Vec::new(),
            page: 1,
            limit: DEFAULT_PAGE_SIZE,
            mode: SearchMode::Auto,
        }
    }
}

impl SearchRequest {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    #[must_use]
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    #[must_use]
    pub fn page(mut self, page: u32) -> Self {
        self.page = page;
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    #[must_use]
    pub fn offline(mut self) -> Self {
        self.mode = SearchMode::Offline;
        self
    }

    /// Trim text filters, lowercase tags, and clamp paging to its valid range.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        fn clean(value: Option<String>) -> Option<String> {
            value
                .map(|v| v.trim().to_owned())
                .filter(|v| !v.is_empty())
        }

        self.query = clean(self.query);
        self.category = clean(self.category);
        self.tags = self
            .tags
            .iter()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if self.page == 0 {
            self.page = 1;
        }
        self.limit = match self.limit {
            0 => DEFAULT_PAGE_SIZE,
            n => n.min(MAX_PAGE_SIZE),
        };
        self
    }

    #[must_use]
    pub fn offset(&self) -> usize {
        (self.page.max(1) as usize - 1) * self.limit as usize
    }

    /// Identity of the request for caching; the mode is not part of it.
    pub(crate) fn cache_key(&self) -> String {
        format!(
            "q={}|c={}|t={}|p={}|l={}",
            self.query.as_deref().unwrap_or_default().to_lowercase(),
            self.category.as_deref().unwrap_or_default().to_lowercase(),
            self.tags.join(","),
            self.page,
            self.limit
        )
    }

    fn matches(&self, entry: &RegistryEntry) -> bool {
        if let Some(query) = &self.query {
            let query = query.to_lowercase();
            let hit = entry.name.to_lowercase().contains(&query)
                || entry.id.to_lowercase().contains(&query)
                || entry.description.to_lowercase().contains(&query)
                || entry.tags.iter().any(|t| t.to_lowercase().contains(&query));
            if !hit {
                return false;
            }
        }
        self.matches_filters(entry)
    }

    /// Category and tag constraints only. Free-text relevance is left to whoever
    /// produced the entries.
    pub(crate) fn matches_filters(&self, entry: &RegistryEntry) -> bool {
        if let Some(category) = &self.category
            && !entry
                .category
                .as_deref()
                .is_some_and(|c| c.eq_ignore_ascii_case(category))
        {
            return false;
        }
        self.tags
            .iter()
            .all(|wanted| entry.tags.iter().any(|t| t.eq_ignore_ascii_case(wanted)))
    }
}

/// Where the entries of a [`SearchResult`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSource {
    Remote,
    Cache,
    StaleCache,
    Catalog,
    Empty,
}

impl ResultSource {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Remote => "remote",
            Self::Cache => "cache",
            Self::StaleCache => "stale_cache",
            Self::Catalog => "catalog",
            Self::Empty => "empty",
        }
    }
}

impl std::fmt::Display for ResultSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub entries: Vec<RegistryEntry>,
    pub total: usize,
    pub has_more: bool,
    pub source: ResultSource,
}

impl SearchResult {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
            total: 0,
            has_more: false,
            source: ResultSource::Empty,
        }
    }

    /// Filter and paginate an in-memory entry list.
    #[must_use]
    pub fn filtered(
        entries: &[RegistryEntry],
        request: &SearchRequest,
        source: ResultSource,
    ) -> Self {
        let matching: Vec<&RegistryEntry> = entries.iter().filter(|e| request.matches(e)).collect();
        let total = matching.len();
        let offset = request.offset();
        let limit = request.limit as usize;
        Self {
            entries: matching
                .into_iter()
                .skip(offset)
                .take(limit)
                .cloned()
                .collect(),
            total,
            has_more: offset + limit < total,
            source,
        }
    }

    /// Build a result from one remote page, dropping entries that fail the request's
    /// category or tag filters. `total` shrinks by the number of dropped entries but never
    /// below what this page proves exists.
    #[must_use]
    pub(crate) fn from_remote_page(
        entries: Vec<RegistryEntry>,
        total: usize,
        has_more: bool,
        request: &SearchRequest,
    ) -> Self {
        let fetched = entries.len();
        let entries: Vec<_> = entries
            .into_iter()
            .filter(|e| request.matches_filters(e))
            .collect();
        let dropped = fetched - entries.len();
        let total = if dropped == 0 {
            total
        } else {
            total
                .saturating_sub(dropped)
                .max(request.offset() + entries.len())
        };
        Self {
            entries,
            total,
            has_more,
            source: ResultSource::Remote,
        }
    }

    #[must_use]
    pub(crate) fn with_source(mut self, source: ResultSource) -> Self {
        self.source = source;
        self
    }
}
