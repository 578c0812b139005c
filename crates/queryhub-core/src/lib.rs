// SPDX-License-Identifier: Apache-2.0

//! QueryHub core
//!
//! Backend-agnostic types, collaborator traits and the error taxonomy shared
//! by the federation engine and every backend integration.

pub mod error;
pub mod frame;
pub mod model;
pub mod traits;
pub mod types;

pub use error::{EngineError, EngineResult};
pub use frame::{Field, FieldConfig, FieldValues, Frame, FrameMeta, FrameType, Labels};
pub use model::{Direction, ExpressionQuery, LokiQuery, PrometheusQuery, QueryModel, RangeKind};
pub use traits::{BackendClient, DataSourceInstance, InstanceResolver, RawResponse, ResponseAdjuster};
pub use types::*;
