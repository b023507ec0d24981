//! Dual-shape response parsing
//!
//! The remote answers list requests either with a wrapper object
//! (`{"count": 2, "total_count": 40, "clientes": [...]}`) or with a bare
//! array. Both are recognized in one pass over a `serde_json::Value`; the
//! result says which shape matched instead of failing through a chain of
//! attempts.

use serde_json::{Map, Value};
use velroute_core::{Error, PayloadShape, RecordSet};

/// Outcome of parsing one response body
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedPayload {
    Wrapper {
        records: Vec<Value>,
        count: Option<u64>,
        total_count: Option<u64>,
    },
    Array(Vec<Value>),
    /// A single record object (GET by id, write echoes)
    Single(Value),
    /// Empty body
    Empty,
    Failed { reason: String },
}

impl ParsedPayload {
    pub fn shape(&self) -> Option<PayloadShape> {
        match self {
            ParsedPayload::Wrapper { .. } => Some(PayloadShape::Wrapper),
            ParsedPayload::Array(_) => Some(PayloadShape::Array),
            ParsedPayload::Single(_) => Some(PayloadShape::Single),
            ParsedPayload::Empty => Some(PayloadShape::Empty),
            ParsedPayload::Failed { .. } => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ParsedPayload::Failed { .. })
    }

    /// Convert into the shared record set, mapping `Failed` to `Error::UpstreamFormat`
    pub fn into_record_set(self) -> Result<RecordSet, Error> {
        let shape = self.shape();
        let (records, total_count) = match self {
            ParsedPayload::Wrapper {
                records,
                count,
                total_count,
            } => (records, total_count.or(count)),
            ParsedPayload::Array(records) => (records, None),
            ParsedPayload::Single(record) => (vec![record], None),
            ParsedPayload::Empty => (Vec::new(), None),
            ParsedPayload::Failed { reason } => return Err(Error::UpstreamFormat(reason)),
        };

        Ok(RecordSet {
            records,
            total_count,
            shape,
        })
    }
}

/// Parse a list response for `collection`
pub fn parse_collection(body: &[u8], collection: &str) -> ParsedPayload {
    let value = match read_json(body) {
        Ok(Some(value)) => value,
        Ok(None) => return ParsedPayload::Empty,
        Err(reason) => return ParsedPayload::Failed { reason },
    };

    match value {
        Value::Array(records) => ParsedPayload::Array(records),
        Value::Object(map) => wrapper(&map, collection).unwrap_or_else(|| ParsedPayload::Failed {
            reason: format!(
                "object response has no '{}' array and is not an array itself",
                collection
            ),
        }),
        other => ParsedPayload::Failed {
            reason: format!("expected object or array, got {}", type_name(&other)),
        },
    }
}

/// Parse a single-record response
///
/// A wrapper or array is accepted as well, since some endpoints echo writes
/// inside the collection envelope.
pub fn parse_record(body: &[u8], collection: &str) -> ParsedPayload {
    let value = match read_json(body) {
        Ok(Some(value)) => value,
        Ok(None) => return ParsedPayload::Empty,
        Err(reason) => return ParsedPayload::Failed { reason },
    };

    match value {
        Value::Array(records) => ParsedPayload::Array(records),
        Value::Object(map) => {
            wrapper(&map, collection).unwrap_or_else(|| ParsedPayload::Single(Value::Object(map)))
        }
        other => ParsedPayload::Failed {
            reason: format!("expected a record object, got {}", type_name(&other)),
        },
    }
}

fn read_json(body: &[u8]) -> Result<Option<Value>, String> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(body)
        .map(Some)
        .map_err(|e| format!("invalid JSON: {}", e))
}

fn wrapper(map: &Map<String, Value>, collection: &str) -> Option<ParsedPayload> {
    let records = map
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(collection))
        .and_then(|(_, value)| value.as_array())?;

    Some(ParsedPayload::Wrapper {
        records: records.clone(),
        count: field_u64(map, "count"),
        total_count: field_u64(map, "total_count"),
    })
}

fn field_u64(map: &Map<String, Value>, name: &str) -> Option<u64> {
    map.iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .and_then(|(_, value)| value.as_u64())
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
