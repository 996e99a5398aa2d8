//! Push delivery for Habitual.
//!
//! This crate provides:
//! - The `PushGateway` trait the dispatch jobs send through
//! - An FCM HTTP v1 client with topic membership via the Instance ID API
//! - A dry-run gateway that logs instead of delivering

mod auth;
mod client;
mod error;
mod gateway;
mod types;

pub use auth::{
    DEFAULT_METADATA_TOKEN_URL, DEFAULT_OAUTH_TOKEN_URL, FCM_SCOPE, ServiceAccountKey, TokenSource,
};
pub use client::{DEFAULT_FCM_URL, DEFAULT_IID_URL, FcmClient};
pub use error::PushError;
pub use gateway::{DryRunGateway, PushGateway};
pub use types::{MessageId, NotificationPayload, Target};
