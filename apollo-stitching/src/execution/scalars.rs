//! Coercion of scalar values.
//!
//! `serialize` turns an internal value into its response representation. `parse_value` turns
//! a value received from a client variable or from a subschema response into the internal
//! representation other resolvers expect.

use std::sync::Arc;

use serde_json::Number;

use crate::json_ext::Value;

pub trait ScalarCoercion: Send + Sync {
    fn serialize(&self, value: &Value) -> Result<Value, String>;

    fn parse_value(&self, value: &Value) -> Result<Value, String>;
}

/// Passes values through unchanged. Used for custom scalars without a coercion.
#[derive(Clone, Copy, Debug, Default)]
pub struct Identity;

impl ScalarCoercion for Identity {
    fn serialize(&self, value: &Value) -> Result<Value, String> {
        Ok(value.clone())
    }

    fn parse_value(&self, value: &Value) -> Result<Value, String> {
        Ok(value.clone())
    }
}

#[derive(Clone, Copy, Debug)]
struct IntScalar;

fn as_i32(value: &Value) -> Option<i32> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| {
                number
                    .as_f64()
                    .filter(|float| float.fract() == 0.0)
                    .map(|float| float as i64)
            })
            .and_then(|int| i32::try_from(int).ok()),
        _ => None,
    }
}

impl ScalarCoercion for IntScalar {
    fn serialize(&self, value: &Value) -> Result<Value, String> {
        let int = match value {
            Value::Bool(bool) => Some(i32::from(*bool)),
            Value::String(string) => string.as_str().trim().parse::<i32>().ok(),
            other => as_i32(other),
        };
        int.map(Value::from)
            .ok_or_else(|| format!("Int cannot represent value: {value}"))
    }

    fn parse_value(&self, value: &Value) -> Result<Value, String> {
        as_i32(value)
            .map(Value::from)
            .ok_or_else(|| format!("Int cannot represent non-integer value: {value}"))
    }
}

#[derive(Clone, Copy, Debug)]
struct FloatScalar;

fn float(float: f64) -> Option<Value> {
    Number::from_f64(float).map(Value::Number)
}

impl ScalarCoercion for FloatScalar {
    fn serialize(&self, value: &Value) -> Result<Value, String> {
        match value {
            Value::Number(_) => Ok(value.clone()),
            Value::Bool(bool) => Ok(Value::from(i32::from(*bool))),
            Value::String(string) => string
                .as_str()
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(float)
                .ok_or_else(|| format!("Float cannot represent non numeric value: {value}")),
            _ => Err(format!("Float cannot represent non numeric value: {value}")),
        }
    }

    fn parse_value(&self, value: &Value) -> Result<Value, String> {
        match value {
            Value::Number(_) => Ok(value.clone()),
            _ => Err(format!("Float cannot represent non numeric value: {value}")),
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct StringScalar;

impl ScalarCoercion for StringScalar {
    fn serialize(&self, value: &Value) -> Result<Value, String> {
        match value {
            Value::String(_) => Ok(value.clone()),
            Value::Bool(_) | Value::Number(_) => Ok(Value::String(value.to_string().into())),
            _ => Err(format!("String cannot represent value: {value}")),
        }
    }

    fn parse_value(&self, value: &Value) -> Result<Value, String> {
        match value {
            Value::String(_) => Ok(value.clone()),
            _ => Err(format!("String cannot represent a non string value: {value}")),
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct BooleanScalar;

impl ScalarCoercion for BooleanScalar {
    fn serialize(&self, value: &Value) -> Result<Value, String> {
        match value {
            Value::Bool(_) => Ok(value.clone()),
            Value::Number(number) => Ok(Value::Bool(number.as_f64() != Some(0.0))),
            _ => Err(format!("Boolean cannot represent a non boolean value: {value}")),
        }
    }

    fn parse_value(&self, value: &Value) -> Result<Value, String> {
        match value {
            Value::Bool(_) => Ok(value.clone()),
            _ => Err(format!("Boolean cannot represent a non boolean value: {value}")),
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct IdScalar;

impl IdScalar {
    fn coerce(value: &Value) -> Result<Value, String> {
        match value {
            Value::String(_) => Ok(value.clone()),
            Value::Number(number) if number.is_i64() || number.is_u64() => {
                Ok(Value::String(number.to_string().into()))
            }
            _ => Err(format!("ID cannot represent value: {value}")),
        }
    }
}

impl ScalarCoercion for IdScalar {
    fn serialize(&self, value: &Value) -> Result<Value, String> {
        Self::coerce(value)
    }

    fn parse_value(&self, value: &Value) -> Result<Value, String> {
        Self::coerce(value)
    }
}

/// The coercion of a built-in scalar, if `name` is one.
pub(crate) fn built_in(name: &str) -> Option<Arc<dyn ScalarCoercion>> {
    let coercion: Arc<dyn ScalarCoercion> = match name {
        "Int" => Arc::new(IntScalar),
        "Float" => Arc::new(FloatScalar),
        "String" => Arc::new(StringScalar),
        "Boolean" => Arc::new(BooleanScalar),
        "ID" => Arc::new(IdScalar),
        _ => return None,
    };
    Some(coercion)
}
