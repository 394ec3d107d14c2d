//! Domain types for listening tasks and the posts they produce.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Progress of a listening task through the worker pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum TaskStatus {
    /// Queued on the broker, not yet picked up.
    #[default]
    Queued,
    /// Picked up by the fan-out worker, listeners running.
    Processing,
    /// At least one listener completed without error.
    Succeeded,
    /// Every listener failed for this task.
    Failed,
}

/// A request to search a social platform for posts matching a query.
///
/// The wire form is the camelCase JSON of the task-queued event; a freshly
/// queued event carries neither `status` nor `updatedAt`, so both default on
/// deserialization. Only the worker pipeline mutates `status`/`updated_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListeningTask {
    pub id: Uuid,
    pub topic_id: Uuid,
    pub source_platform_id: Uuid,
    pub query: String,
    #[serde(default)]
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ListeningTask {
    /// Transition the task to a new status, stamping the update time.
    pub fn mark(&mut self, status: TaskStatus) {
        self.status = status;
        self.updated_at = Some(Utc::now());
    }
}

/// A normalized post found by a platform listener.
///
/// Immutable once built; ownership moves through the result channel to the
/// sink worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocialPost {
    pub id: Uuid,
    /// Platform-native identifier of the post.
    pub original_id: String,
    /// Canonical URL (or URI) of the post on its platform.
    pub original_url: String,
    pub content: String,
    pub source_platform_id: Uuid,
    pub generated_from_task_id: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn queued_event_deserializes_with_default_status() {
        let json = r#"{
            "id": "6f2c63f5-47a4-4d0a-9c40-3a9a6f9a9c11",
            "topicId": "2a4d0a63-1111-4d0a-9c40-3a9a6f9a9c22",
            "sourcePlatformId": "9b1d0a63-2222-4d0a-9c40-3a9a6f9a9c33",
            "query": "rustlang",
            "createdAt": "2026-01-15T10:30:00Z"
        }"#;

        let task: ListeningTask = serde_json::from_str(json).unwrap();
        assert_eq!(task.status, TaskStatus::Queued);
        assert_eq!(task.updated_at, None);
        assert_eq!(task.query, "rustlang");
    }

    #[test]
    fn mark_updates_status_and_timestamp() {
        let mut task = ListeningTask {
            id: Uuid::new_v4(),
            topic_id: Uuid::new_v4(),
            source_platform_id: Uuid::new_v4(),
            query: "coffee".to_string(),
            status: TaskStatus::Queued,
            created_at: Utc::now(),
            updated_at: None,
        };

        task.mark(TaskStatus::Processing);
        assert_eq!(task.status, TaskStatus::Processing);
        assert!(task.updated_at.is_some());
    }

    #[test]
    fn task_roundtrips_with_camel_case_fields() {
        let task = ListeningTask {
            id: Uuid::new_v4(),
            topic_id: Uuid::new_v4(),
            source_platform_id: Uuid::new_v4(),
            query: "local events".to_string(),
            status: TaskStatus::Queued,
            created_at: Utc::now(),
            updated_at: None,
        };

        let json = serde_json::to_value(&task).unwrap();
        assert!(json.get("topicId").is_some());
        assert!(json.get("sourcePlatformId").is_some());
        assert!(json.get("topic_id").is_none());
    }
}
