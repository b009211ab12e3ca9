//! Wire-level data types shared across the API and auth modules.
//!
//! Only the authentication surface is modeled here; domain resources
//! (businesses, customers, rewards) are deserialized by their own feature
//! crates on top of the pipeline.

pub mod auth;
pub mod user;

pub use auth::{LoginResponse, RefreshResponse};
pub use user::UserIdentity;
