use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Notification type enumeration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
    /// A student enrolled in one of the recipient's courses
    Enrollment,
    /// A course owned or followed by the recipient was updated
    CourseUpdate,
    /// A course submitted by the recipient was approved
    CourseApproved,
    /// A new review was left on one of the recipient's courses
    Review,
    /// A message was posted in a study group the recipient belongs to
    GroupMessage,
    /// Platform-wide announcement
    Announcement,
    /// System notification
    System,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::Enrollment => "enrollment",
            NotificationType::CourseUpdate => "course_update",
            NotificationType::CourseApproved => "course_approved",
            NotificationType::Review => "review",
            NotificationType::GroupMessage => "group_message",
            NotificationType::Announcement => "announcement",
            NotificationType::System => "system",
        }
    }
}

/// Notification priority level
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationPriority {
    /// Standard delivery
    Normal,
    /// Surfaced immediately in the client
    High,
}

impl NotificationPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationPriority::Normal => "normal",
            NotificationPriority::High => "high",
        }
    }
}

/// Minimal sender profile attached to a notification
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Sender {
    pub id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

/// Core notification model.
///
/// `id` uniquely identifies an entry across both the REST source and the
/// push channel. `is_read` only ever transitions false -> true.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,

    /// Recipient user ID
    pub recipient_id: Uuid,

    /// Notification type
    #[serde(rename = "type")]
    pub notification_type: NotificationType,

    /// Notification title
    pub title: String,

    /// Notification body/message
    pub message: String,

    /// Related course, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub course_id: Option<Uuid>,

    /// Related study group, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<Uuid>,

    /// Related group message, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<Uuid>,

    /// Sender profile (absent for system notifications)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender: Option<Sender>,

    /// Read status
    pub is_read: bool,

    /// Priority level
    pub priority: NotificationPriority,

    /// Logical batch identifier; notifications sharing a group key are
    /// marked read as one atomic unit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_key: Option<String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

/// Pagination cursor describing the most recent applied REST fetch
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PageCursor {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub pages: u32,
    pub has_more: bool,
}

/// Response envelope for `GET /notifications`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPage {
    pub status: String,
    pub data: Vec<Notification>,
    pub pagination: PageCursor,
    pub unread_count: u64,
}

/// Response envelope for `GET /notifications/unread-count`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnreadCountResponse {
    pub status: String,
    pub data: UnreadCount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnreadCount {
    pub count: u64,
}

/// Events delivered over the push channel.
///
/// Delivery is at-least-once and possibly reordered; every variant must be
/// safe to apply more than once.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PushEvent {
    /// A new notification was created for this user
    New { notification: Box<Notification> },

    /// One or more notifications were marked read elsewhere.
    ///
    /// `unread_delta` is the number of entries the server actually flipped;
    /// it lets the counter stay correct even when some of the referenced
    /// ids were evicted from the local cache.
    #[serde(rename_all = "camelCase")]
    Read {
        ids: Vec<Uuid>,
        #[serde(skip_serializing_if = "Option::is_none")]
        unread_delta: Option<u64>,
    },

    /// A whole group thread was marked read elsewhere
    #[serde(rename_all = "camelCase")]
    GroupRead {
        group_key: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        unread_delta: Option<u64>,
    },

    /// All notifications were marked read elsewhere
    ReadAll,
}

impl PushEvent {
    /// Deserialize from the raw channel payload
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_notification() -> Notification {
        Notification {
            id: Uuid::new_v4(),
            recipient_id: Uuid::new_v4(),
            notification_type: NotificationType::Enrollment,
            title: "New enrollment".to_string(),
            message: "Someone enrolled in your course".to_string(),
            course_id: Some(Uuid::new_v4()),
            group_id: None,
            message_id: None,
            sender: None,
            is_read: false,
            priority: NotificationPriority::Normal,
            group_key: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_notification_type_roundtrip() {
        let types = vec![
            NotificationType::Enrollment,
            NotificationType::CourseUpdate,
            NotificationType::CourseApproved,
            NotificationType::Review,
            NotificationType::GroupMessage,
            NotificationType::Announcement,
            NotificationType::System,
        ];

        for notification_type in types {
            let json = serde_json::to_string(&notification_type).unwrap();
            let deserialized: NotificationType = serde_json::from_str(&json).unwrap();
            assert_eq!(notification_type, deserialized);
        }
    }

    #[test]
    fn test_notification_wire_format_is_camel_case() {
        let n = sample_notification();
        let json = serde_json::to_value(&n).unwrap();
        assert!(json.get("recipientId").is_some());
        assert!(json.get("isRead").is_some());
        assert!(json.get("createdAt").is_some());
        assert!(json.get("type").is_some());
        assert!(json.get("recipient_id").is_none());
    }

    #[test]
    fn test_push_event_new_roundtrip() {
        let event = PushEvent::New {
            notification: Box::new(sample_notification()),
        };
        let json = event.to_json().unwrap();
        assert!(json.contains("\"type\":\"new\""));
        assert_eq!(PushEvent::from_json(&json).unwrap(), event);
    }

    #[test]
    fn test_push_event_read_with_delta() {
        let json = format!(
            r#"{{"type":"read","ids":["{}"],"unreadDelta":2}}"#,
            Uuid::new_v4()
        );
        let event = PushEvent::from_json(&json).unwrap();
        match event {
            PushEvent::Read { ids, unread_delta } => {
                assert_eq!(ids.len(), 1);
                assert_eq!(unread_delta, Some(2));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_push_event_malformed_payload() {
        assert!(PushEvent::from_json(r#"{"type":"new"}"#).is_err());
        assert!(PushEvent::from_json("not json").is_err());
    }

    #[test]
    fn test_page_cursor_roundtrip() {
        let cursor = PageCursor {
            page: 1,
            limit: 20,
            total: 57,
            pages: 3,
            has_more: true,
        };
        let json = serde_json::to_string(&cursor).unwrap();
        assert!(json.contains("hasMore"));
        let deserialized: PageCursor = serde_json::from_str(&json).unwrap();
        assert_eq!(cursor, deserialized);
    }
}
