use serde::{Deserialize, Serialize};

const REMOVED_PLACEHOLDERS: [&str; 2] = ["[removed]", "\\[removed\\]"];
const DELETED_PLACEHOLDERS: [&str; 2] = ["[deleted]", "\\[deleted\\]"];

/// The live source escapes the brackets, the archive does not.
pub fn is_removed(body: &str) -> bool {
    REMOVED_PLACEHOLDERS.contains(&body.trim())
}

pub fn is_deleted(body: &str) -> bool {
    DELETED_PLACEHOLDERS.contains(&body.trim())
}

pub fn is_placeholder(body: &str) -> bool {
    is_removed(body) || is_deleted(body)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    #[default]
    Comment,
    Post,
}

/// Canonical post or comment. Posts keep their self text in `body`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    #[serde(default)]
    pub kind: RecordKind,
    pub parent_id: String,
    pub link_id: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub subreddit: Option<String>,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub created_utc: i64,
    #[serde(default)]
    pub retrieved_utc: Option<i64>,
    #[serde(default)]
    pub retrieved_on: Option<i64>,
    #[serde(default)]
    pub removed: bool,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub edited_body: Option<String>,
    #[serde(default)]
    pub edited_utc: Option<i64>,
}

impl Record {
    pub fn comment(
        id: impl Into<String>,
        parent_id: impl Into<String>,
        link_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: RecordKind::Comment,
            parent_id: parent_id.into(),
            link_id: link_id.into(),
            author: String::new(),
            body: String::new(),
            title: None,
            subreddit: None,
            score: 0,
            created_utc: 0,
            retrieved_utc: None,
            retrieved_on: None,
            removed: false,
            deleted: false,
            edited_body: None,
            edited_utc: None,
        }
    }

    /// Minimal post used when neither source can produce the thread.
    pub fn post_stub(thread_id: &str, subreddit: Option<String>) -> Self {
        let mut post = Record::comment(thread_id, thread_id, thread_id);
        post.kind = RecordKind::Post;
        post.subreddit = subreddit;
        post
    }

    pub fn is_post(&self) -> bool {
        self.kind == RecordKind::Post
    }

    /// First time the archive saw this record, whichever field carried it.
    pub fn first_archived_utc(&self) -> Option<i64> {
        self.retrieved_utc.or(self.retrieved_on)
    }

    pub fn mark_removed(&mut self) {
        self.removed = true;
        self.deleted = false;
        self.clear_edit();
    }

    pub fn mark_deleted(&mut self) {
        self.deleted = true;
        self.removed = false;
        self.clear_edit();
    }

    pub fn clear_edit(&mut self) {
        self.edited_body = None;
        self.edited_utc = None;
    }
}

pub fn secs_from_float(raw: Option<f64>) -> Option<i64> {
    raw.filter(|v| v.is_finite()).map(|v| v.floor() as i64)
}
