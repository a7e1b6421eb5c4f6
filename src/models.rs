use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// --- Menu Schemas ---

/// MenuRecord
///
/// One row of the menu table as the business layer hands it over. Records arrive as an
/// unordered flat list; the only ordering signal is `sequence`.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct MenuRecord {
    pub record_id: String,
    pub name: String,
    /// Sort key among siblings, ascending.
    pub sequence: i64,
    pub icon: String,
    pub router: String,
    /// Hidden menus are left out of the current user's navigation tree.
    pub hidden: bool,
    /// `None` for top-level menus.
    pub parent_id: Option<String>,
    pub parent_path: String,
    pub creator: String,
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<MenuAction>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<MenuResource>,
}

/// An operation button attached to a menu (e.g. `add`, `edit`).
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct MenuAction {
    pub code: String,
    pub name: String,
}

/// An API endpoint a menu exposes, expressed as a method and path pattern.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct MenuResource {
    pub code: String,
    pub name: String,
    pub method: String,
    pub path: String,
}

/// MenuNode
///
/// A menu record with its ordered children. Leaves serialize without `children`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MenuNode {
    #[serde(flatten)]
    pub record: MenuRecord,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<MenuNode>,
}

impl MenuNode {
    /// Number of nodes in this subtree, itself included.
    pub fn node_count(&self) -> usize {
        let mut count = 0;
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            count += 1;
            stack.extend(node.children.iter());
        }
        count
    }
}

/// Filters for the paged menu listing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MenuQueryParam {
    pub name: Option<String>,
    pub hidden: Option<bool>,
    pub parent_id: Option<String>,
}

// --- Auth Schemas ---

/// TokenInfo
///
/// Response of the token refresh endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenInfo {
    pub access_token: String,
    pub token_type: String,
    /// Seconds since the epoch.
    pub expires_at: i64,
}

// --- HTTP Envelope Schemas ---

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 50;

/// PaginationParam
///
/// `current` is 1-based. Missing, zero or unparsable values fall back to the defaults,
/// and `pageSize` is capped at 50.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationParam {
    pub current: u32,
    pub page_size: u32,
}

impl PaginationParam {
    pub fn from_raw(current: Option<&str>, page_size: Option<&str>) -> Self {
        let current = current
            .and_then(|v| v.parse::<u32>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(1);
        let page_size = page_size
            .and_then(|v| v.parse::<u32>().ok())
            .filter(|v| *v > 0)
            .map(|v| v.min(MAX_PAGE_SIZE))
            .unwrap_or(DEFAULT_PAGE_SIZE);

        Self { current, page_size }
    }

    pub fn offset(&self) -> usize {
        (self.current as usize - 1) * self.page_size as usize
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpPagination {
    pub current: u32,
    pub page_size: u32,
    pub total: usize,
}

/// `{list: [...], pagination?: {...}}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpList<T> {
    pub list: Vec<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<HttpPagination>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpStatus {
    pub status: String,
}

impl HttpStatus {
    pub fn ok() -> Self {
        Self {
            status: "OK".to_string(),
        }
    }
}
