//! # API Shared
//!
//! Small request/response types and services shared by the triage HTTP surfaces.
//!
//! Contains:
//! - `HealthRes`, `ErrorRes` and `StatusUpdateReq`
//! - `HealthService`

pub mod dto;
pub mod health;

pub use dto::{ErrorRes, HealthRes, StatusUpdateReq};
pub use health::HealthService;
