// SPDX-License-Identifier: Apache-2.0

//! Columnar result frames
//!
//! The canonical output shape of every backend: a named set of equally long
//! fields, each optionally labeled, plus presentation metadata. Response
//! adjusters only ever rewrite names, labels, configs and metadata; the value
//! vectors are left as the backend produced them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Label set attached to a field (sorted for stable output)
pub type Labels = BTreeMap<String, String>;

/// Column values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "values")]
pub enum FieldValues {
    Time(Vec<DateTime<Utc>>),
    Float(Vec<f64>),
    String(Vec<String>),
    Json(Vec<serde_json::Value>),
}

impl FieldValues {
    pub fn len(&self) -> usize {
        match self {
            Self::Time(v) => v.len(),
            Self::Float(v) => v.len(),
            Self::String(v) => v.len(),
            Self::Json(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Per-field display configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name_from_ds: Option<String>,
    /// Sampling interval of a time field, in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: Labels,
    pub values: FieldValues,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<FieldConfig>,
}

impl Field {
    pub fn new(name: impl Into<String>, values: FieldValues) -> Self {
        Self {
            name: name.into(),
            labels: Labels::new(),
            values,
            config: None,
        }
    }

    pub fn time(name: impl Into<String>, values: Vec<DateTime<Utc>>) -> Self {
        Self::new(name, FieldValues::Time(values))
    }

    pub fn float(name: impl Into<String>, values: Vec<f64>) -> Self {
        Self::new(name, FieldValues::Float(values))
    }

    pub fn string(name: impl Into<String>, values: Vec<String>) -> Self {
        Self::new(name, FieldValues::String(values))
    }

    pub fn json(name: impl Into<String>, values: Vec<serde_json::Value>) -> Self {
        Self::new(name, FieldValues::Json(values))
    }

    pub fn with_labels(mut self, labels: Labels) -> Self {
        self.labels = labels;
        self
    }

    pub fn is_time(&self) -> bool {
        matches!(self.values, FieldValues::Time(_))
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self.values, FieldValues::Float(_))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Mutable access to the display config, creating it on first use
    pub fn config_mut(&mut self) -> &mut FieldConfig {
        self.config.get_or_insert_with(FieldConfig::default)
    }
}

/// Dataplane frame type tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameType {
    #[serde(rename = "timeseries-multi")]
    TimeSeriesMulti,
    #[serde(rename = "numeric-multi")]
    NumericMulti,
    #[serde(rename = "log-lines")]
    LogLines,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameMeta {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub frame_type: Option<FrameType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_version: Option<[u32; 2]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executed_query_string: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub fields: Vec<Field>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<FrameMeta>,
}

impl Frame {
    pub fn new(fields: Vec<Field>) -> Self {
        Self {
            name: None,
            fields,
            meta: None,
        }
    }

    /// Number of rows (length of the first field)
    pub fn row_count(&self) -> usize {
        self.fields.first().map(Field::len).unwrap_or(0)
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_mut(&mut self, name: &str) -> Option<&mut Field> {
        self.fields.iter_mut().find(|f| f.name == name)
    }

    pub fn time_field_mut(&mut self) -> Option<&mut Field> {
        self.fields.iter_mut().find(|f| f.is_time())
    }

    pub fn value_field(&self) -> Option<&Field> {
        self.fields.iter().find(|f| f.is_numeric())
    }

    pub fn value_field_mut(&mut self) -> Option<&mut Field> {
        self.fields.iter_mut().find(|f| f.is_numeric())
    }

    /// Mutable access to the metadata, creating it on first use
    pub fn meta_mut(&mut self) -> &mut FrameMeta {
        self.meta.get_or_insert_with(FrameMeta::default)
    }
}
