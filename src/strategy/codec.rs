//! Request <-> store record mapping.
//!
//! Records are flat maps keyed by field name with nested `progress`,
//! `results` and `config` sub-maps; timestamps are ISO-8601 strings.

use serde_json::Value;

use super::{StrategyError, StrategyResult};
use crate::models::IntelligenceRequest;
use crate::store::Record;

pub fn request_to_record(request: &IntelligenceRequest) -> StrategyResult<Record> {
    match serde_json::to_value(request)? {
        Value::Object(map) => Ok(map),
        other => Err(StrategyError::operation(
            "encode_request",
            format!("request serialized to non-object value: {other}"),
        )),
    }
}

pub fn record_to_request(record: Record) -> StrategyResult<IntelligenceRequest> {
    Ok(serde_json::from_value(Value::Object(record))?)
}
