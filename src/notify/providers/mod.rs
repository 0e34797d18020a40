//! Channel Providers (C11): concrete senders behind a common capability
//! contract (spec §4.11). Each provider owns its own client/transport; the
//! notification engine resolves a provider by channel tag and never reaches
//! into provider internals.

pub mod email;
pub mod webhook;

pub use email::EmailProvider;
pub use webhook::WebhookProvider;

use crate::error::AppResult;
use crate::messages::{NotificationChannel, NotificationMessage, SendOutcome};

#[async_trait::async_trait]
pub trait ChannelProvider: Send + Sync {
    fn channel(&self) -> NotificationChannel;
    async fn initialize(&self) -> AppResult<()>;
    async fn validate_config(&self) -> AppResult<()>;
    async fn send(&self, message: &NotificationMessage) -> AppResult<SendOutcome>;
    async fn cleanup(&self) -> AppResult<()>;
}
