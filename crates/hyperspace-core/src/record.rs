use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::Component;

/// A record is (vector, scalars) sharing a 64-bit id with the filter
/// index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub id: u64,
    pub vector: Vec<Component>,
    /// Every JSON member of the request body except `vectors` and `id`.
    /// Integer-valued members are indexed into FilterIndex; everything
    /// else is opaque scalar JSON.
    pub scalars: Map<String, Value>,
}

impl Record {
    /// Integer-valued scalar fields, the ones FilterIndex tracks.
    pub fn integer_fields(&self) -> impl Iterator<Item = (&str, i64)> + '_ {
        self.scalars.iter().filter_map(|(k, v)| match v {
            Value::Number(n) => n.as_i64().map(|i| (k.as_str(), i)),
            _ => None,
        })
    }
}

/// `filter { fieldName, op, fieldValue }` from a search request body.
/// The canonical field-value key is `fieldValue`; `value` is also
/// accepted as an alias for compatibility with older clients. `op`
/// arrives on the wire as `"="`/`"!="`, not as the enum's variant
/// names, so deserialization goes through an intermediate wire struct
/// and `FilterOp::from_request_str`.
#[derive(Debug, Clone, Serialize)]
pub struct FilterExpr {
    #[serde(rename = "fieldName")]
    pub field_name: String,
    pub op: FilterOp,
    #[serde(rename = "fieldValue")]
    pub field_value: i64,
}

impl<'de> Deserialize<'de> for FilterExpr {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Wire {
            #[serde(rename = "fieldName")]
            field_name: String,
            op: String,
            #[serde(alias = "value")]
            field_value: i64,
        }
        let wire = Wire::deserialize(deserializer)?;
        Ok(FilterExpr {
            field_name: wire.field_name,
            op: FilterOp::from_request_str(&wire.op),
            field_value: wire.field_value,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOp {
    Equal,
    NotEqual,
}

impl FilterOp {
    /// `"="` maps to EQUAL, any other string maps to NOT_EQUAL.
    pub fn from_request_str(s: &str) -> Self {
        if s == "=" {
            FilterOp::Equal
        } else {
            FilterOp::NotEqual
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_expr_deserializes_the_documented_wire_shape() {
        let expr: FilterExpr =
            serde_json::from_str(r#"{"fieldName":"tag","op":"=","fieldValue":7}"#).unwrap();
        assert_eq!(expr.field_name, "tag");
        assert_eq!(expr.op, FilterOp::Equal);
        assert_eq!(expr.field_value, 7);
    }

    #[test]
    fn filter_expr_accepts_value_alias_and_not_equal_op() {
        let expr: FilterExpr =
            serde_json::from_str(r#"{"fieldName":"tag","op":"!=","value":7}"#).unwrap();
        assert_eq!(expr.op, FilterOp::NotEqual);
        assert_eq!(expr.field_value, 7);
    }
}
