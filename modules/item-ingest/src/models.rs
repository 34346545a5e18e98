use serde::{Deserialize, Serialize};
use std::fmt;

/// Fixed set of item categories accepted from the upstream producer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Treats,
    Food,
    Supplements,
    Toys,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Treats,
        Category::Food,
        Category::Supplements,
        Category::Toys,
    ];

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "treats" => Some(Category::Treats),
            "food" => Some(Category::Food),
            "supplements" => Some(Category::Supplements),
            "toys" => Some(Category::Toys),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Treats => "treats",
            Category::Food => "food",
            Category::Supplements => "supplements",
            Category::Toys => "toys",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated item event
///
/// Wire field names are camelCase to match the upstream producer. The typed
/// view covers the fields the pipeline reasons about; the stored document is
/// built from the full decoded payload so unknown fields survive.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemEvent {
    /// Business key; one logical item per id across redeliveries
    pub id: String,
    pub name: String,
    pub category: Category,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}
