//! FoodSaver Gate - Request Admission Control
//!
//! This crate implements the admission-control layer in front of the
//! FoodSaver API: fixed-window rate limiting over a shared Redis counter
//! store (with in-memory fallback), per-route brute-force lockout, and a
//! small set of request security filters, all exposed as axum middleware.

pub mod admission;
pub mod bruteforce;
pub mod clock;
pub mod config;
pub mod error;
pub mod ratelimit;
pub mod request;
pub mod response;
pub mod security;
pub mod server;
pub mod store;
pub mod sweep;
