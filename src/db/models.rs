use serde::{Deserialize, Serialize};

/// Outcome of a posting attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    Success,
    Failed,
}

impl PostStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// The durable record of one posting attempt.
///
/// Exactly one row is written per cycle, success or failure; rows are never
/// mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PostRecord {
    pub id: i64,
    pub theme_id: String,
    pub caption: String,
    pub image_prompt: Option<String>,
    pub image_ref: Option<String>,
    pub similarity_report: Option<String>,
    pub weather_json: Option<String>,
    pub status: String,
    pub error_message: Option<String>,
    pub created_at: String,
}

impl PostRecord {
    #[must_use]
    pub fn status_enum(&self) -> Option<PostStatus> {
        PostStatus::from_str(&self.status)
    }
}

/// Data for inserting a new post record.
#[derive(Debug, Clone)]
pub struct NewPostRecord {
    pub theme_id: String,
    pub caption: String,
    pub image_prompt: Option<String>,
    pub image_ref: Option<String>,
    pub similarity_report: Option<String>,
    pub weather_json: Option<String>,
    pub status: PostStatus,
    pub error_message: Option<String>,
}

/// A transient failure recorded during image synthesis, for offline diagnosis.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ErrorLogRecord {
    pub id: i64,
    pub stage: String,
    pub attempt: i64,
    pub message: String,
    pub prompt_excerpt: Option<String>,
    pub created_at: String,
}

/// Data for appending an error log entry.
#[derive(Debug, Clone)]
pub struct NewErrorLog {
    pub stage: String,
    pub attempt: i64,
    pub message: String,
    pub prompt_excerpt: Option<String>,
}

/// Per-theme post counts for the stats endpoint.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ThemeCount {
    pub theme_id: String,
    pub success_count: i64,
    pub failed_count: i64,
}
