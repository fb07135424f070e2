//! telewatch: multi-tenant Telegram monitoring service.
//!
//! Each tenant registers watched groups, watched users, and forwarding
//! destinations. A pool of user-account sessions ingests group traffic,
//! the pipeline filters it against the tenant's watch criteria, archives
//! matches, and fans them out to destinations through the Bot API.

pub mod accounts;
pub mod analytics;
pub mod api_router;
pub mod auth;
pub mod destinations;
pub mod directory;
pub mod forwarding;
pub mod groups;
pub mod messages;
pub mod monitor;
pub mod shared;
pub mod telegram;
pub mod watchlist;
