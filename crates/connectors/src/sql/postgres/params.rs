//! Binding of [`Value`]s to PostgreSQL parameters.
//!
//! The server decides the parameter type from the statement, so values are
//! encoded for whatever type it asks for instead of the Rust type they
//! happen to carry (an `i64` bound to an `int4` column, a string bound to a
//! `uuid` column, and so on).

use bytes::BytesMut;
use model::core::value::Value;
use rust_decimal::Decimal as RustDecimal;
use std::{error::Error, str::FromStr};
use tokio_postgres::types::{IsNull, Json as PgJson, ToSql, Type, to_sql_checked};

type BoxError = Box<dyn Error + Sync + Send>;

#[derive(Debug)]
pub struct PgParam(Value);

impl PgParam {
    pub fn from_value(value: Value) -> Self {
        PgParam(value)
    }

    fn encode_integer(v: i128, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        match *ty {
            Type::INT2 => i16::try_from(v)?.to_sql(ty, out),
            Type::INT4 => i32::try_from(v)?.to_sql(ty, out),
            Type::OID => u32::try_from(v)?.to_sql(ty, out),
            Type::FLOAT4 => (v as f32).to_sql(ty, out),
            Type::FLOAT8 => (v as f64).to_sql(ty, out),
            Type::NUMERIC => RustDecimal::from_i128_with_scale(v, 0).to_sql(ty, out),
            Type::BOOL => (v != 0).to_sql(ty, out),
            Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => {
                v.to_string().as_str().to_sql(ty, out)
            }
            _ => i64::try_from(v)?.to_sql(ty, out),
        }
    }

    fn encode_text(v: &str, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        match *ty {
            Type::INT2 | Type::INT4 | Type::INT8 | Type::OID => {
                Self::encode_integer(v.trim().parse::<i128>()?, ty, out)
            }
            Type::FLOAT4 => v.trim().parse::<f32>()?.to_sql(ty, out),
            Type::FLOAT8 => v.trim().parse::<f64>()?.to_sql(ty, out),
            Type::NUMERIC => RustDecimal::from_str(v.trim())?.to_sql(ty, out),
            Type::UUID => uuid::Uuid::parse_str(v)?.to_sql(ty, out),
            Type::JSON | Type::JSONB => {
                let json: serde_json::Value = serde_json::from_str(v)?;
                PgJson(json).to_sql(ty, out)
            }
            _ => v.to_sql(ty, out),
        }
    }
}

impl ToSql for PgParam {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        match &self.0 {
            Value::Null => Ok(IsNull::Yes),
            Value::Boolean(v) => v.to_sql(ty, out),
            Value::Int(v) => Self::encode_integer(i128::from(*v), ty, out),
            Value::Uint(v) => Self::encode_integer(i128::from(*v), ty, out),
            Value::Float(v) => match *ty {
                Type::FLOAT4 => (*v as f32).to_sql(ty, out),
                Type::NUMERIC => RustDecimal::from_str(&v.to_string())?.to_sql(ty, out),
                _ => v.to_sql(ty, out),
            },
            Value::Decimal(v) => match *ty {
                Type::FLOAT4 | Type::FLOAT8 => Self::encode_text(&v.to_string(), ty, out),
                Type::TEXT | Type::VARCHAR => v.to_string().as_str().to_sql(ty, out),
                _ => RustDecimal::from_str(&v.to_string())?.to_sql(ty, out),
            },
            Value::String(v) => Self::encode_text(v, ty, out),
            Value::Json(v) => match *ty {
                Type::TEXT | Type::VARCHAR => v.to_string().as_str().to_sql(ty, out),
                _ => PgJson(v).to_sql(ty, out),
            },
            Value::Uuid(v) => match *ty {
                Type::TEXT | Type::VARCHAR | Type::BPCHAR => v.to_string().as_str().to_sql(ty, out),
                _ => v.to_sql(ty, out),
            },
            Value::Bytes(v) => v.as_slice().to_sql(ty, out),
            Value::Date(v) => v.to_sql(ty, out),
            Value::Time(v) => v.to_sql(ty, out),
            Value::Timestamp(v) => match *ty {
                Type::TIMESTAMP => v.naive_utc().to_sql(ty, out),
                _ => v.to_sql(ty, out),
            },
            Value::TimestampNaive(v) => match *ty {
                Type::TIMESTAMPTZ => v.and_utc().to_sql(ty, out),
                _ => v.to_sql(ty, out),
            },
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

pub struct PgParamStore {
    pub params: Vec<PgParam>,
}

impl PgParamStore {
    pub fn from_values(values: &[Value]) -> Self {
        Self {
            params: values.iter().cloned().map(PgParam::from_value).collect(),
        }
    }

    pub fn as_refs(&self) -> Vec<&(dyn ToSql + Sync)> {
        self.params
            .iter()
            .map(|param| param as &(dyn ToSql + Sync))
            .collect()
    }
}
