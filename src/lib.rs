// SPDX-License-Identifier: Apache-2.0

// QueryHub - multi-datasource query federation
// Core library

pub mod backends;
pub mod config;
pub mod federation;
pub mod metrics;
pub mod observability;
pub mod resolver;
pub mod resource;
mod service;

pub use service::QueryService;
