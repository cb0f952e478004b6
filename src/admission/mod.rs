//! Request admission: limiter and brute-force checks around a handler.
//!
//! Each route group is wrapped in an [`AdmissionLayer`] naming the limiter
//! that protects it. Rejections never reach the handler; admitted requests
//! are completed with their final status so failure-counting limiters and
//! the brute-force guard see the outcome.

pub mod headers;
mod layer;
mod pipeline;
mod rejection;

pub use layer::{AdmissionLayer, AdmissionService, MAX_INSPECTED_BODY};
pub use pipeline::{AdmissionPipeline, RouteLimiter, RouteRule, Ticket};
pub use rejection::Rejection;
