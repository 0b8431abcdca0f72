//! REST collaborator for the notification sync engine.
//!
//! The engine only ever talks to the server through the [`NotificationApi`]
//! trait; [`HttpNotificationApi`] is the production implementation and tests
//! substitute their own.

use crate::error::{Result, SyncError};
use crate::models::{Notification, NotificationPage, UnreadCountResponse};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::debug;
use uuid::Uuid;

/// Authoritative REST source consumed by the store and the mutation
/// coordinator.
#[async_trait]
pub trait NotificationApi: Send + Sync {
    /// `GET /notifications?page&limit&unreadOnly`
    async fn list(&self, page: u32, limit: u32, unread_only: bool) -> Result<NotificationPage>;

    /// `GET /notifications/unread-count`
    async fn unread_count(&self) -> Result<u64>;

    /// `PATCH /notifications/{id}/read`
    async fn mark_read(&self, id: Uuid) -> Result<Notification>;

    /// `PATCH /notifications/read-all`
    async fn mark_all_read(&self) -> Result<()>;

    /// `PATCH /notifications/group/{groupKey}/read`
    async fn mark_group_read(&self, group_key: &str) -> Result<()>;

    /// `DELETE /notifications/{id}`
    async fn delete(&self, id: Uuid) -> Result<()>;
}

/// HTTP implementation of [`NotificationApi`]
pub struct HttpNotificationApi {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpNotificationApi {
    pub fn new(base_url: &str, token: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Map a non-success response into the error taxonomy. 404 and 409 on
    /// mutation endpoints mean the target entity is gone server-side.
    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown error".to_string());

        match status {
            StatusCode::NOT_FOUND | StatusCode::CONFLICT => Err(SyncError::Conflict(body)),
            _ => Err(SyncError::Request(format!("{}: {}", status, body))),
        }
    }
}

#[async_trait]
impl NotificationApi for HttpNotificationApi {
    async fn list(&self, page: u32, limit: u32, unread_only: bool) -> Result<NotificationPage> {
        debug!(page, limit, unread_only, "fetching notification page");

        let response = self
            .client
            .get(self.url("/notifications"))
            .bearer_auth(&self.token)
            .query(&[
                ("page", page.to_string()),
                ("limit", limit.to_string()),
                ("unreadOnly", unread_only.to_string()),
            ])
            .send()
            .await?;

        let page = Self::check_status(response)
            .await?
            .json::<NotificationPage>()
            .await?;
        Ok(page)
    }

    async fn unread_count(&self) -> Result<u64> {
        let response = self
            .client
            .get(self.url("/notifications/unread-count"))
            .bearer_auth(&self.token)
            .send()
            .await?;

        let body = Self::check_status(response)
            .await?
            .json::<UnreadCountResponse>()
            .await?;
        Ok(body.data.count)
    }

    async fn mark_read(&self, id: Uuid) -> Result<Notification> {
        let response = self
            .client
            .patch(self.url(&format!("/notifications/{}/read", id)))
            .bearer_auth(&self.token)
            .send()
            .await?;

        let notification = Self::check_status(response)
            .await?
            .json::<Notification>()
            .await?;
        Ok(notification)
    }

    async fn mark_all_read(&self) -> Result<()> {
        let response = self
            .client
            .patch(self.url("/notifications/read-all"))
            .bearer_auth(&self.token)
            .send()
            .await?;

        Self::check_status(response).await?;
        Ok(())
    }

    async fn mark_group_read(&self, group_key: &str) -> Result<()> {
        let response = self
            .client
            .patch(self.url(&format!("/notifications/group/{}/read", group_key)))
            .bearer_auth(&self.token)
            .send()
            .await?;

        Self::check_status(response).await?;
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let response = self
            .client
            .delete(self.url(&format!("/notifications/{}", id)))
            .bearer_auth(&self.token)
            .send()
            .await?;

        Self::check_status(response).await?;
        Ok(())
    }
}
