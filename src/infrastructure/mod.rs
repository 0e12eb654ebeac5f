//! Infrastructure layer - stores, embedding providers, cache services

pub mod embedding;
pub mod logging;
pub mod observability;
pub mod services;
pub mod store;
