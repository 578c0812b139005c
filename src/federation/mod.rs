// SPDX-License-Identifier: Apache-2.0

//! Multi-Datasource Federation Engine
//!
//! Fans a multi-query request out to the backends its queries target:
//! parse → partition → validate → dispatch → adjust, with failures isolated
//! to the query that caused them.

pub mod executor;
pub mod manager;
pub mod parser;
pub mod planner;
pub mod types;

pub use manager::Dispatcher;
pub use parser::{parse_query, parse_request, ParsedQueries};
pub use planner::{partition, validate};
pub use types::{DispatchOptions, PartitionedRequest, QueryRequest, RejectedQuery, ValidationHints};
