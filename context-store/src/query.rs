//! Item queries: filtering, ordering and pagination.
//!
//! [`select`] is the reference implementation of the query semantics. The
//! flat-file backend runs it directly over a session's items; the SQLite
//! backend translates the same [`ItemQuery`] into SQL and must return the
//! same rows in the same order.
//!
//! Input order is storage order: insertion order, newest first. Every sort is
//! stable, so items that compare equal keep that order.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ContextError, Result};
use crate::item::{Category, ContextItem, Priority};

/// Page size used when the caller does not pass one.
pub const DEFAULT_LIMIT: usize = 50;

/// Largest page size a caller may request.
pub const MAX_LIMIT: usize = 1000;

/// Largest offset SQLite accepts as a signed 64-bit integer.
pub const MAX_OFFSET: usize = i64::MAX as usize;

/// Result ordering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    CreatedAsc,
    #[default]
    CreatedDesc,
    UpdatedAsc,
    UpdatedDesc,
    /// Critical, high, normal, low.
    Priority,
}

impl SortOrder {
    pub const ALL: [SortOrder; 5] = [
        Self::CreatedAsc,
        Self::CreatedDesc,
        Self::UpdatedAsc,
        Self::UpdatedDesc,
        Self::Priority,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::CreatedAsc => "created_asc",
            Self::CreatedDesc => "created_desc",
            Self::UpdatedAsc => "updated_asc",
            Self::UpdatedDesc => "updated_desc",
            Self::Priority => "priority",
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortOrder {
    type Err = ContextError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|o| o.as_str() == s)
            .ok_or_else(|| {
                ContextError::validation(format!(
                    "invalid sort '{s}'; expected one of created_asc, created_desc, updated_asc, updated_desc, priority"
                ))
            })
    }
}

/// Filters, ordering and pagination for listing a session's items.
///
/// All filters are optional and combine with AND; set-valued filters match
/// any of their members.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ItemQuery {
    pub key: Option<String>,
    pub keys: Option<Vec<String>>,
    pub category: Option<Category>,
    pub categories: Option<Vec<Category>>,
    pub priority: Option<Priority>,
    pub priorities: Option<Vec<Priority>>,
    pub channel: Option<String>,
    pub private: Option<bool>,
    /// Exclusive lower bound on `created_at`.
    pub created_after: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `created_at`.
    pub created_before: Option<DateTime<Utc>>,
    /// Case-insensitive regular expression matched against keys.
    pub key_pattern: Option<String>,
    pub sort: SortOrder,
    pub offset: usize,
    pub limit: usize,
}

impl Default for ItemQuery {
    fn default() -> Self {
        Self {
            key: None,
            keys: None,
            category: None,
            categories: None,
            priority: None,
            priorities: None,
            channel: None,
            private: None,
            created_after: None,
            created_before: None,
            key_pattern: None,
            sort: SortOrder::default(),
            offset: 0,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl ItemQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_keys(mut self, keys: Vec<String>) -> Self {
        self.keys = Some(keys);
        self
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    pub fn with_categories(mut self, categories: Vec<Category>) -> Self {
        self.categories = Some(categories);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_priorities(mut self, priorities: Vec<Priority>) -> Self {
        self.priorities = Some(priorities);
        self
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn with_private(mut self, private: bool) -> Self {
        self.private = Some(private);
        self
    }

    pub fn created_after(mut self, ts: DateTime<Utc>) -> Self {
        self.created_after = Some(ts);
        self
    }

    pub fn created_before(mut self, ts: DateTime<Utc>) -> Self {
        self.created_before = Some(ts);
        self
    }

    pub fn with_key_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.key_pattern = Some(pattern.into());
        self
    }

    pub fn sorted(mut self, sort: SortOrder) -> Self {
        self.sort = sort;
        self
    }

    pub fn page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = limit;
        self
    }

    /// Check pagination bounds and compile the key pattern.
    pub fn validate(&self) -> Result<Option<Regex>> {
        if !(1..=MAX_LIMIT).contains(&self.limit) {
            return Err(ContextError::validation(format!(
                "limit must be between 1 and {MAX_LIMIT}, got {}",
                self.limit
            )));
        }
        if self.offset > MAX_OFFSET {
            return Err(ContextError::validation(format!(
                "offset must be at most {MAX_OFFSET}, got {}",
                self.offset
            )));
        }
        self.key_pattern
            .as_deref()
            .map(compile_key_pattern)
            .transpose()
    }

    /// Whether `item` satisfies every filter of this query.
    pub fn matches(&self, item: &ContextItem, key_pattern: Option<&Regex>) -> bool {
        if self.key.as_ref().is_some_and(|k| *k != item.key) {
            return false;
        }
        if self.keys.as_ref().is_some_and(|ks| !ks.contains(&item.key)) {
            return false;
        }
        if self.category.is_some() && self.category != item.category {
            return false;
        }
        if let Some(categories) = &self.categories {
            if !item.category.is_some_and(|c| categories.contains(&c)) {
                return false;
            }
        }
        if self.priority.is_some_and(|p| p != item.priority) {
            return false;
        }
        if self
            .priorities
            .as_ref()
            .is_some_and(|ps| !ps.contains(&item.priority))
        {
            return false;
        }
        if self.channel.is_some() && self.channel != item.channel {
            return false;
        }
        if self.private.is_some_and(|p| p != item.private) {
            return false;
        }
        let created = item.created_at.timestamp_millis();
        if self
            .created_after
            .is_some_and(|ts| created <= ts.timestamp_millis())
        {
            return false;
        }
        if self
            .created_before
            .is_some_and(|ts| created >= ts.timestamp_millis())
        {
            return false;
        }
        key_pattern.is_none_or(|re| re.is_match(&item.key))
    }
}

/// Compile a key pattern with case-insensitive matching.
pub fn compile_key_pattern(pattern: &str) -> Result<Regex> {
    Regex::new(&format!("(?i){pattern}"))
        .map_err(|e| ContextError::validation(format!("invalid key pattern '{pattern}': {e}")))
}

/// Filter, sort and paginate `items`, which must be in storage order.
pub fn select(items: Vec<ContextItem>, query: &ItemQuery) -> Result<Vec<ContextItem>> {
    let key_pattern = query.validate()?;

    let mut matched: Vec<ContextItem> = items
        .into_iter()
        .filter(|item| query.matches(item, key_pattern.as_ref()))
        .collect();

    match query.sort {
        SortOrder::CreatedAsc => matched.sort_by_key(|i| i.created_at),
        SortOrder::CreatedDesc => matched.sort_by_key(|i| std::cmp::Reverse(i.created_at)),
        SortOrder::UpdatedAsc => matched.sort_by_key(|i| i.updated_at),
        SortOrder::UpdatedDesc => matched.sort_by_key(|i| std::cmp::Reverse(i.updated_at)),
        SortOrder::Priority => matched.sort_by_key(|i| i.priority.rank()),
    }

    Ok(matched
        .into_iter()
        .skip(query.offset)
        .take(query.limit)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids;
    use crate::item::NewItem;
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    /// Items in storage order (newest first), one millisecond apart.
    fn fixture() -> Vec<ContextItem> {
        let base = ids::now();
        let specs = [
            ("task1", Category::Task, Priority::High, Some("backend")),
            ("note1", Category::Note, Priority::Low, None),
            ("task2", Category::Task, Priority::Critical, Some("frontend")),
            ("decision1", Category::Decision, Priority::Normal, Some("backend")),
            ("Task3", Category::Task, Priority::High, None),
        ];
        let mut items: Vec<ContextItem> = specs
            .iter()
            .enumerate()
            .map(|(i, (key, category, priority, channel))| {
                let mut request = NewItem::new(*key, format!("value of {key}"))
                    .with_category(*category)
                    .with_priority(*priority);
                if let Some(channel) = channel {
                    request = request.with_channel(*channel);
                }
                if i % 2 == 1 {
                    request = request.private();
                }
                ContextItem::create("s1", request, base + Duration::milliseconds(i as i64))
            })
            .collect();
        items.reverse();
        items
    }

    fn keys(items: &[ContextItem]) -> Vec<&str> {
        items.iter().map(|i| i.key.as_str()).collect()
    }

    #[test]
    fn test_default_query_is_newest_first() {
        let result = select(fixture(), &ItemQuery::new()).unwrap();
        assert_eq!(
            keys(&result),
            vec!["Task3", "decision1", "task2", "note1", "task1"]
        );
    }

    #[test]
    fn test_filters_combine_with_and() {
        let query = ItemQuery::new()
            .with_category(Category::Task)
            .with_channel("backend");
        assert_eq!(keys(&select(fixture(), &query).unwrap()), vec!["task1"]);

        let query = ItemQuery::new()
            .with_priorities(vec![Priority::High, Priority::Critical])
            .with_private(false);
        assert_eq!(
            keys(&select(fixture(), &query).unwrap()),
            vec!["Task3", "task2", "task1"]
        );
    }

    #[test]
    fn test_set_filters() {
        let query = ItemQuery::new().with_keys(vec!["note1".into(), "task2".into(), "nope".into()]);
        assert_eq!(keys(&select(fixture(), &query).unwrap()), vec!["task2", "note1"]);

        let query = ItemQuery::new().with_categories(vec![Category::Note, Category::Decision]);
        assert_eq!(
            keys(&select(fixture(), &query).unwrap()),
            vec!["decision1", "note1"]
        );

        let query = ItemQuery::new().with_keys(Vec::new());
        assert!(select(fixture(), &query).unwrap().is_empty());
    }

    #[test]
    fn test_created_range_is_exclusive() {
        let items = fixture();
        let oldest = items[4].created_at;
        let newest = items[0].created_at;
        let query = ItemQuery::new()
            .created_after(oldest)
            .created_before(newest)
            .sorted(SortOrder::CreatedAsc);
        assert_eq!(
            keys(&select(items, &query).unwrap()),
            vec!["note1", "task2", "decision1"]
        );
    }

    #[test]
    fn test_key_pattern_is_case_insensitive() {
        let query = ItemQuery::new().with_key_pattern("^task");
        assert_eq!(
            keys(&select(fixture(), &query).unwrap()),
            vec!["Task3", "task2", "task1"]
        );
    }

    #[test]
    fn test_invalid_pattern_and_limits() {
        let bad_pattern = ItemQuery::new().with_key_pattern("(unclosed");
        assert!(matches!(
            select(fixture(), &bad_pattern),
            Err(ContextError::Validation(_))
        ));
        for limit in [0, MAX_LIMIT + 1] {
            let query = ItemQuery::new().page(0, limit);
            assert!(matches!(
                select(fixture(), &query),
                Err(ContextError::Validation(_))
            ));
        }
        let far_offset: ItemQuery =
            serde_json::from_str(r#"{"offset":18446744073709551615}"#).unwrap();
        assert!(matches!(
            select(fixture(), &far_offset),
            Err(ContextError::Validation(_))
        ));
    }

    #[test]
    fn test_priority_sort_is_stable() {
        let query = ItemQuery::new().sorted(SortOrder::Priority);
        assert_eq!(
            keys(&select(fixture(), &query).unwrap()),
            vec!["task2", "Task3", "task1", "decision1", "note1"]
        );
    }

    #[test]
    fn test_pages_are_disjoint_and_complete() {
        let items = fixture();
        let full = select(items.clone(), &ItemQuery::new().sorted(SortOrder::Priority)).unwrap();
        let mut paged = Vec::new();
        for offset in (0..6).step_by(2) {
            let query = ItemQuery::new().sorted(SortOrder::Priority).page(offset, 2);
            paged.extend(select(items.clone(), &query).unwrap());
        }
        assert_eq!(paged, full);
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let query: ItemQuery =
            serde_json::from_str(r#"{"category":"task","sort":"priority","keyPattern":"x"}"#)
                .unwrap();
        assert_eq!(query.category, Some(Category::Task));
        assert_eq!(query.sort, SortOrder::Priority);
        assert_eq!(query.limit, DEFAULT_LIMIT);
        assert_eq!(query.offset, 0);
        assert_eq!("updated_desc".parse::<SortOrder>().unwrap(), SortOrder::UpdatedDesc);
    }
}
