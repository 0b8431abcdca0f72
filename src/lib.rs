pub mod api;
pub mod config;
pub mod connection;
pub mod error;
pub mod logging;
pub mod models;
pub mod mutation;
pub mod store;

pub use config::Config;
pub use connection::{ConnectionManager, ConnectionState, PushSession, PushTransport};
pub use error::{Result, SyncError};
pub use models::{Notification, NotificationPriority, NotificationType, PageCursor, PushEvent};
pub use mutation::MutationCoordinator;
pub use store::{NotificationStore, StoreEvent};
