//! HealPlus Gateway - HTTP client for the remote clinical services.
//!
//! [`GatewayClient`] implements [`healplus_core::AssessmentGateway`] with one
//! JSON request per operation. It classifies failures and never retries.

pub mod client;

pub use client::{Endpoints, GatewayClient};
