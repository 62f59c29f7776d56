// Copyright 2023 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Envelope encoding for published and received payloads.
//!
//! Every value travels as a one-field BSON document `{ "v": value }`, with
//! the timestamp under `"t"` when the caller provides one. Object
//! aggregates wrap their sub-document in `"v"`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::{
    bson::{tag, BsonError, Document, DocumentBuilder, Element},
    event::Data,
    types::Value,
};

const VALUE_KEY: &str = "v";
const TIMESTAMP_KEY: &str = "t";

/// Serializes an individual value into its wire document.
pub(crate) fn serialize_individual(
    value: &Value,
    timestamp: Option<DateTime<Utc>>,
) -> Result<Vec<u8>, BsonError> {
    let mut builder = DocumentBuilder::new();
    append_value(&mut builder, VALUE_KEY, value)?;
    if let Some(timestamp) = timestamp {
        builder.append_datetime(TIMESTAMP_KEY, timestamp);
    }
    Ok(builder.finish())
}

/// Serializes an object aggregate into its wire document.
pub(crate) fn serialize_object(
    values: &HashMap<String, Value>,
    timestamp: Option<DateTime<Utc>>,
) -> Result<Vec<u8>, BsonError> {
    let mut sub = DocumentBuilder::new();
    // Deterministic field order keeps the documents comparable.
    let mut keys = values.keys().collect::<Vec<_>>();
    keys.sort_unstable();
    for key in keys {
        append_value(&mut sub, key, &values[key])?;
    }

    let mut builder = DocumentBuilder::new();
    builder.append_document(VALUE_KEY, &sub.finish());
    if let Some(timestamp) = timestamp {
        builder.append_datetime(TIMESTAMP_KEY, timestamp);
    }
    Ok(builder.finish())
}

fn append_value(builder: &mut DocumentBuilder, key: &str, value: &Value) -> Result<(), BsonError> {
    match value {
        Value::Double(v) => builder.append_double(key, *v),
        Value::Integer(v) => builder.append_int32(key, *v),
        Value::LongInteger(v) => builder.append_int64(key, *v),
        Value::Boolean(v) => builder.append_boolean(key, *v),
        Value::String(v) => builder.append_string(key, v),
        Value::Binary(v) => builder.append_binary(key, v),
        Value::DateTime(v) => builder.append_datetime(key, *v),
        Value::Array(items) => {
            let mut sub = DocumentBuilder::new();
            for (i, item) in items.iter().enumerate() {
                if item.is_array() {
                    return Err(BsonError::NestedArray);
                }
                append_value(&mut sub, &i.to_string(), item)?;
            }
            builder.append_array_document(key, &sub.finish())
        }
    };
    Ok(())
}

/// Deserializes an inbound payload into its data and optional timestamp.
pub(crate) fn deserialize(payload: &[u8]) -> Result<(Data, Option<DateTime<Utc>>), BsonError> {
    let doc = Document::parse(payload)?;
    let value = doc
        .lookup(VALUE_KEY)?
        .ok_or(BsonError::MissingKey(VALUE_KEY))?;

    let timestamp = doc
        .lookup(TIMESTAMP_KEY)?
        .map(|el| el.as_datetime())
        .transpose()?;

    let data = if value.tag() == tag::DOCUMENT {
        Data::Object(object_from_element(&value)?)
    } else {
        Data::Individual(value_from_element(&value)?)
    };
    Ok((data, timestamp))
}

fn object_from_element(element: &Element<'_>) -> Result<HashMap<String, Value>, BsonError> {
    let doc = element.as_document()?;
    let mut values = HashMap::new();
    for field in doc.elements() {
        let field = field?;
        values.insert(field.key().to_owned(), value_from_element(&field)?);
    }
    Ok(values)
}

fn value_from_element(element: &Element<'_>) -> Result<Value, BsonError> {
    let value = match element.tag() {
        tag::DOUBLE => Value::Double(element.as_double()?),
        tag::INT32 => Value::Integer(element.as_int32()?),
        tag::INT64 => Value::LongInteger(element.as_int64()?),
        tag::BOOLEAN => Value::Boolean(element.as_boolean()?),
        tag::STRING => Value::String(element.as_str()?.to_owned()),
        tag::BINARY => Value::Binary(element.as_binary()?.to_vec()),
        tag::DATETIME => Value::DateTime(element.as_datetime()?),
        tag::ARRAY => {
            let doc = element.as_document()?;
            let mut items = Vec::new();
            for item in doc.elements() {
                let item = item?;
                items.push(value_from_element(&item)?);
            }
            Value::Array(items)
        }
        other => return Err(BsonError::UnexpectedTag(other)),
    };
    Ok(value)
}

#[cfg(test)]
mod test {
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    use super::*;

    fn roundtrip(value: Value) {
        let payload = serialize_individual(&value, None).unwrap();
        let (data, timestamp) = deserialize(&payload).unwrap();
        assert_eq!(data, Data::Individual(value));
        assert_eq!(timestamp, None);
    }

    #[test]
    fn roundtrip_scalars() {
        roundtrip(Value::Double(4.5));
        roundtrip(Value::Integer(-4));
        roundtrip(Value::LongInteger(45543543534));
        roundtrip(Value::Boolean(true));
        roundtrip(Value::String("hello".to_owned()));
        roundtrip(Value::Binary(vec![100, 101]));
        roundtrip(Value::DateTime(Utc.timestamp_millis_opt(1_627_580_808_000).unwrap()));
    }

    #[test]
    fn roundtrip_arrays() {
        roundtrip(Value::from(vec![1.1, 2.2]));
        roundtrip(Value::from(vec![1i32, 2]));
        roundtrip(Value::from(vec![1i64, 2]));
        roundtrip(Value::from(vec![true, false]));
        roundtrip(Value::from(vec!["a".to_owned(), "b".to_owned()]));
        roundtrip(Value::from(vec![vec![1u8], vec![2u8, 3]]));
        roundtrip(Value::from(vec![Utc.timestamp_millis_opt(0).unwrap()]));
        roundtrip(Value::Array(vec![]));
    }

    #[test]
    fn timestamp_is_appended_and_extracted() {
        let at = Utc.timestamp_millis_opt(1_686_486_131_000).unwrap();
        let payload = serialize_individual(&Value::Boolean(false), Some(at)).unwrap();
        let (data, timestamp) = deserialize(&payload).unwrap();
        assert_eq!(data, Data::Individual(Value::Boolean(false)));
        assert_eq!(timestamp, Some(at));
    }

    #[test]
    fn object_roundtrip() {
        let mut values = HashMap::new();
        values.insert("lat".to_owned(), Value::Double(45.0));
        values.insert("lng".to_owned(), Value::Double(11.0));

        let payload = serialize_object(&values, None).unwrap();
        let (data, _) = deserialize(&payload).unwrap();
        assert_eq!(data, Data::Object(values));
    }

    #[test]
    fn nested_arrays_are_rejected() {
        let nested = Value::Array(vec![Value::Array(vec![Value::Integer(1)])]);
        assert_eq!(
            serialize_individual(&nested, None),
            Err(BsonError::NestedArray)
        );
    }

    #[test]
    fn missing_value_key_is_an_error() {
        let mut builder = DocumentBuilder::new();
        builder.append_boolean("x", true);
        let payload = builder.finish();
        assert!(matches!(deserialize(&payload), Err(BsonError::MissingKey("v"))));
    }
}
