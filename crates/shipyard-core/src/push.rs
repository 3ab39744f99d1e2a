//! Push events delivered by a Git host webhook.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pipeline::TriggerEvent;

/// SHA GitHub reports as `after` when a branch is deleted.
const NULL_SHA: &str = "0000000000000000000000000000000000000000";

/// Parsed push event data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushEvent {
    pub r#ref: String,
    pub before: String,
    pub after: String,
    pub repository_full_name: String,
    pub branch: Option<String>,
    pub tag: Option<String>,
    pub head_commit: Option<CommitInfo>,
    pub pusher: String,
    pub deleted: bool,
}

/// Commit information from a push event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitInfo {
    pub sha: String,
    pub message: String,
    pub author: String,
    pub timestamp: Option<DateTime<Utc>>,
}

impl PushEvent {
    /// Parse a GitHub push webhook payload
    pub fn from_github_payload(payload: &serde_json::Value) -> Option<Self> {
        let r#ref = payload.get("ref")?.as_str()?.to_string();
        let before = payload.get("before")?.as_str()?.to_string();
        let after = payload.get("after")?.as_str()?.to_string();
        let repository_full_name = payload
            .get("repository")?
            .get("full_name")?
            .as_str()?
            .to_string();

        let branch = r#ref.strip_prefix("refs/heads/").map(String::from);
        let tag = r#ref.strip_prefix("refs/tags/").map(String::from);

        let head_commit = payload
            .get("head_commit")
            .and_then(CommitInfo::from_github_commit);

        let pusher = payload
            .get("pusher")
            .and_then(|p| p.get("name"))
            .and_then(|n| n.as_str())
            .unwrap_or("unknown")
            .to_string();

        let deleted = payload
            .get("deleted")
            .and_then(|d| d.as_bool())
            .unwrap_or(after == NULL_SHA);

        Some(PushEvent {
            r#ref,
            before,
            after,
            repository_full_name,
            branch,
            tag,
            head_commit,
            pusher,
            deleted,
        })
    }

    /// The pipeline trigger for this push, if it updated a branch.
    pub fn to_trigger(&self) -> Option<TriggerEvent> {
        if self.deleted {
            return None;
        }
        let branch = self.branch.as_ref()?;
        Some(TriggerEvent::push(
            branch.clone(),
            Some(self.after.clone()),
            Some(self.pusher.clone()),
        ))
    }
}

impl CommitInfo {
    fn from_github_commit(value: &serde_json::Value) -> Option<Self> {
        Some(CommitInfo {
            sha: value.get("id")?.as_str()?.to_string(),
            message: value.get("message")?.as_str()?.to_string(),
            author: value
                .get("author")
                .and_then(|a| a.get("name"))
                .and_then(|n| n.as_str())
                .unwrap_or("unknown")
                .to_string(),
            timestamp: value
                .get("timestamp")
                .and_then(|t| t.as_str())
                .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
                .map(|dt| dt.with_timezone(&Utc)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::TriggerKind;
    use serde_json::json;

    fn payload(r#ref: &str, after: &str) -> serde_json::Value {
        json!({
            "ref": r#ref,
            "before": "1111111111111111111111111111111111111111",
            "after": after,
            "repository": { "full_name": "octo/app" },
            "pusher": { "name": "octocat" },
            "head_commit": {
                "id": after,
                "message": "Fix the thing",
                "author": { "name": "Octo Cat" },
                "timestamp": "2024-05-01T12:00:00Z"
            }
        })
    }

    #[test]
    fn test_branch_push_becomes_trigger() {
        let event = PushEvent::from_github_payload(&payload(
            "refs/heads/main",
            "abc123abc123abc123abc123abc123abc123abcd",
        ))
        .unwrap();
        assert_eq!(event.branch.as_deref(), Some("main"));
        assert_eq!(event.head_commit.as_ref().unwrap().author, "Octo Cat");

        let trigger = event.to_trigger().unwrap();
        assert_eq!(trigger.kind, TriggerKind::Push);
        assert_eq!(trigger.branch.as_deref(), Some("main"));
        assert_eq!(
            trigger.revision.as_deref(),
            Some("abc123abc123abc123abc123abc123abc123abcd")
        );
        assert_eq!(trigger.actor.as_deref(), Some("octocat"));
    }

    #[test]
    fn test_tag_push_and_branch_delete_do_not_trigger() {
        let tag = PushEvent::from_github_payload(&payload("refs/tags/v1.0.0", "abc")).unwrap();
        assert_eq!(tag.tag.as_deref(), Some("v1.0.0"));
        assert!(tag.to_trigger().is_none());

        let deleted = PushEvent::from_github_payload(&payload("refs/heads/old", NULL_SHA)).unwrap();
        assert!(deleted.deleted);
        assert!(deleted.to_trigger().is_none());
    }

    #[test]
    fn test_incomplete_payload() {
        assert!(PushEvent::from_github_payload(&json!({ "zen": "hi" })).is_none());
    }
}
