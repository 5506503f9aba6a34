pub mod backends;
pub mod cache;
pub mod config;
pub mod environment;
pub mod error;
pub mod firestore;
pub mod google_auth;
pub mod import;
pub mod logging;
pub mod media;
pub mod metrics;
pub mod notifications;
pub mod onboarding;
pub mod pagination;
pub mod restaurants;
pub mod revenuecat;
pub mod session;
pub mod storage;
pub mod users;
pub mod web;
