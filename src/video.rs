use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum IdSource {
    #[default]
    Explicit,
    UserId,
    VideoUrl,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoRecord {
    pub id: String,
    #[serde(default)]
    pub id_source: IdSource,
    pub username: String,
    pub description: String,
    pub video_url: String,
    pub like_count: i64,
    pub comment_count: i64,
}

impl VideoRecord {
    // Fallback identities can collide: two clips by one user share a user_id.
    pub fn has_derived_id(&self) -> bool {
        self.id_source != IdSource::Explicit
    }
}

// Field names vary between backend revisions, hence the aliases.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawVideo {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default, alias = "userId")]
    pub user_id: Option<Value>,
    #[serde(default, alias = "videoUrl")]
    pub video_url: Option<String>,
    #[serde(default, alias = "user")]
    pub username: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub instruments: Option<Value>,
    #[serde(default, alias = "likeCount")]
    pub likes: Option<i64>,
    #[serde(default, alias = "commentCount")]
    pub comments: Option<i64>,
}

impl RawVideo {
    pub fn identity(&self) -> Option<(String, IdSource)> {
        if let Some(id) = self.id.as_ref().and_then(scalar_to_string) {
            return Some((id, IdSource::Explicit));
        }
        if let Some(id) = self.user_id.as_ref().and_then(scalar_to_string) {
            return Some((id, IdSource::UserId));
        }
        self.video_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(|url| (url.to_string(), IdSource::VideoUrl))
    }

    pub fn into_record(self) -> Option<VideoRecord> {
        let (id, id_source) = self.identity()?;
        let description = match self.description.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => text.to_string(),
            _ => self
                .instruments
                .as_ref()
                .map(instrument_names)
                .unwrap_or_default()
                .join(", "),
        };

        Some(VideoRecord {
            id,
            id_source,
            username: self.username.unwrap_or_default(),
            description,
            video_url: self.video_url.map(|url| url.trim().to_string()).unwrap_or_default(),
            like_count: self.likes.unwrap_or(0).max(0),
            comment_count: self.comments.unwrap_or(0).max(0),
        })
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// The backend has shipped instruments both as a list of names and as a
// name -> level map.
fn instrument_names(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| item.as_str())
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect(),
        Value::Object(map) => map.keys().cloned().collect(),
        Value::String(s) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => Vec::new(),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    pub records: Vec<VideoRecord>,
    // Rows upstream sent, including ones that did not decode. Drives the
    // cursor and the short-page check.
    pub returned: usize,
}

impl Batch {
    pub fn from_records(records: Vec<VideoRecord>) -> Self {
        Self {
            returned: records.len(),
            records,
        }
    }

    pub fn skipped(&self) -> usize {
        self.returned.saturating_sub(self.records.len())
    }
}

// Anything other than a JSON array yields `None`. Rows without a usable
// identity are skipped but still counted.
pub fn records_from_payload(payload: Value) -> Option<Batch> {
    let Value::Array(items) = payload else {
        return None;
    };
    let returned = items.len();
    let records = items
        .into_iter()
        .filter_map(|item| serde_json::from_value::<RawVideo>(item).ok())
        .filter_map(RawVideo::into_record)
        .collect();
    Some(Batch { records, returned })
}
