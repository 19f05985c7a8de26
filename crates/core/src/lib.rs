//! Domain layer shared by the HTTP app and the storage adapter.
//!
//! Everything here is pure: message types, payload validation, signature
//! verification and the dashboard feed model.

pub mod feed;
pub mod signature;
pub mod types;
pub mod validator;

pub use feed::{FeedFilter, MessageFeed};
pub use types::{MessageType, NewMessage, RequestContext, ValidatedMessage, WebhookMessage};
pub use validator::{validate, ValidationError, ValidationLimits, Violation};
