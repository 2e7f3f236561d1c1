//! Cache entries for network fetched subresources and the sessions loading them.
//!
//! A [`Resource`](resource::Resource) is shared by every client interested in one URL. It is
//! filled by a [`LoadSession`](loader::LoadSession), may be revalidated through a probe, and is
//! held by a [`ResourceStore`](store::ResourceStore) until nothing references it anymore.
//! Deferred client notifications are batched by the
//! [`NotificationScheduler`](scheduler::NotificationScheduler).

#[macro_use]
pub mod metrics;

pub mod buffer;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod freshness;
pub mod http;
pub mod loader;
pub mod logging;
pub mod resource;
pub mod response;
pub mod scheduler;
pub mod store;
