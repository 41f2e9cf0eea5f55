use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const MIN_OPTIONS: usize = 2;
pub const MAX_OPTIONS: usize = 4;
pub const MAX_COMMENT_CHARS: usize = 500;
const TITLE_PREVIEW_CHARS: usize = 50;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Technology,
    Sports,
    Entertainment,
    Politics,
    Education,
    Health,
    Business,
    #[default]
    General,
}

impl Category {
    pub const ALL: [Category; 8] = [
        Category::Technology,
        Category::Sports,
        Category::Entertainment,
        Category::Politics,
        Category::Education,
        Category::Health,
        Category::Business,
        Category::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Technology => "Technology",
            Category::Sports => "Sports",
            Category::Entertainment => "Entertainment",
            Category::Politics => "Politics",
            Category::Education => "Education",
            Category::Health => "Health",
            Category::Business => "Business",
            Category::General => "General",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|category| category.as_str().eq_ignore_ascii_case(value.trim()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollOption {
    pub id: Uuid,
    pub text: String,
    pub votes: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: Uuid,
    pub poll_id: Uuid,
    pub text: String,
    pub author_id: Uuid,
    pub commented_by: Option<User>,
    pub hearts: i64,
    pub hearted_by: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub revision: i64,
}

impl Comment {
    pub fn is_hearted_by(&self, user_id: Uuid) -> bool {
        self.hearted_by.contains(&user_id)
    }
}

/// A poll with its options, voters and comments fully populated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Poll {
    pub id: Uuid,
    pub question: String,
    pub category: Category,
    pub creator_id: Uuid,
    pub created_by: Option<User>,
    pub options: Vec<PollOption>,
    pub voted_users: Vec<Uuid>,
    pub comments: Vec<Comment>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    /// Bumped by the store on every vote; lets receivers discard stale copies.
    pub revision: i64,
}

impl Poll {
    pub fn total_votes(&self) -> i64 {
        self.options.iter().map(|o| o.votes).sum()
    }

    pub fn has_voted(&self, user_id: Uuid) -> bool {
        self.voted_users.contains(&user_id)
    }

    pub fn option(&self, option_id: Uuid) -> Option<&PollOption> {
        self.options.iter().find(|o| o.id == option_id)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| now > expires_at)
    }

    pub fn title_preview(&self) -> String {
        if self.question.chars().count() > TITLE_PREVIEW_CHARS {
            let head: String = self.question.chars().take(TITLE_PREVIEW_CHARS).collect();
            format!("{head}...")
        } else {
            self.question.clone()
        }
    }
}

/// A validated poll ready to be written.
#[derive(Debug, Clone)]
pub struct NewPoll {
    pub question: String,
    pub options: Vec<String>,
    pub category: Category,
    pub creator_id: Uuid,
    pub expires_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn poll_with_question(question: &str) -> Poll {
        Poll {
            id: Uuid::new_v4(),
            question: question.to_string(),
            category: Category::General,
            creator_id: Uuid::new_v4(),
            created_by: None,
            options: vec![
                PollOption {
                    id: Uuid::new_v4(),
                    text: "Red".to_string(),
                    votes: 3,
                },
                PollOption {
                    id: Uuid::new_v4(),
                    text: "Blue".to_string(),
                    votes: 2,
                },
            ],
            voted_users: Vec::new(),
            comments: Vec::new(),
            expires_at: None,
            created_at: Utc::now(),
            revision: 0,
        }
    }

    #[test]
    fn total_votes_sums_options() {
        assert_eq!(poll_with_question("Colour?").total_votes(), 5);
    }

    #[test]
    fn title_preview_truncates_long_questions() {
        let long = "x".repeat(60);
        let preview = poll_with_question(&long).title_preview();
        assert_eq!(preview.len(), 53);
        assert!(preview.ends_with("..."));
        assert_eq!(poll_with_question("short").title_preview(), "short");
    }

    #[test]
    fn expiry_is_strictly_after_deadline() {
        let mut poll = poll_with_question("Colour?");
        let now = Utc::now();
        assert!(!poll.is_expired(now));
        poll.expires_at = Some(now);
        assert!(!poll.is_expired(now));
        assert!(poll.is_expired(now + chrono::Duration::seconds(1)));
    }

    #[test]
    fn category_parse_is_case_insensitive() {
        assert_eq!(Category::parse("sports"), Some(Category::Sports));
        assert_eq!(Category::parse(" Technology "), Some(Category::Technology));
        assert_eq!(Category::parse("gardening"), None);
    }
}
