//! Decoding of driver rows into [`RowData`].

use crate::error::DbError;
use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use model::{
    core::value::Value,
    records::row::{FieldValue, RowData},
};
use mysql_async::{
    Row as MySqlRow, Value as MySqlValue,
    consts::{ColumnFlags, ColumnType},
};
use rust_decimal::Decimal as RustDecimal;
use std::{error::Error, fmt, str::FromStr};
use tokio_postgres::{
    Row as PgRow,
    types::{FromSql, Type},
};

/// MySQL's character set id for binary strings.
const BINARY_CHARSET: u16 = 63;

pub enum DbRow<'a> {
    MySqlRow(&'a MySqlRow),
    PostgresRow(&'a PgRow),
}

impl DbRow<'_> {
    pub fn to_row_data(&self, table: &str) -> Result<RowData, DbError> {
        let field_values = match self {
            DbRow::PostgresRow(row) => (0..row.len())
                .map(|idx| {
                    Ok(FieldValue {
                        name: row.columns()[idx].name().to_string(),
                        value: decode_pg(row, idx)?,
                    })
                })
                .collect::<Result<Vec<_>, DbError>>()?,
            DbRow::MySqlRow(row) => row
                .columns_ref()
                .iter()
                .enumerate()
                .map(|(idx, column)| {
                    let raw = row.as_ref(idx).unwrap_or(&MySqlValue::NULL);
                    Ok(FieldValue {
                        name: column.name_str().into_owned(),
                        value: decode_mysql(
                            &column.name_str(),
                            column.column_type(),
                            column.flags(),
                            column.character_set(),
                            raw,
                        )?,
                    })
                })
                .collect::<Result<Vec<_>, DbError>>()?,
        };
        Ok(RowData::new(table, field_values))
    }
}

impl fmt::Debug for DbRow<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbRow::MySqlRow(row) => write!(f, "{row:?}"),
            DbRow::PostgresRow(row) => write!(f, "{row:?}"),
        }
    }
}

/// Raw fallback for types without a dedicated mapping (enums, domains).
struct RawValue(Value);

impl<'a> FromSql<'a> for RawValue {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn Error + Sync + Send>> {
        Ok(RawValue(match std::str::from_utf8(raw) {
            Ok(text) => Value::String(text.to_string()),
            Err(_) => Value::Bytes(raw.to_vec()),
        }))
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

fn decode_pg(row: &PgRow, idx: usize) -> Result<Value, DbError> {
    let ty = row.columns()[idx].type_().clone();
    let value = match ty {
        Type::BOOL => row.try_get::<_, Option<bool>>(idx)?.map(Value::Boolean),
        Type::INT2 => row
            .try_get::<_, Option<i16>>(idx)?
            .map(|v| Value::Int(v.into())),
        Type::INT4 => row
            .try_get::<_, Option<i32>>(idx)?
            .map(|v| Value::Int(v.into())),
        Type::INT8 => row.try_get::<_, Option<i64>>(idx)?.map(Value::Int),
        Type::OID => row
            .try_get::<_, Option<u32>>(idx)?
            .map(|v| Value::Uint(v.into())),
        Type::FLOAT4 => row
            .try_get::<_, Option<f32>>(idx)?
            .map(|v| Value::Float(v.into())),
        Type::FLOAT8 => row.try_get::<_, Option<f64>>(idx)?.map(Value::Float),
        Type::NUMERIC => match row.try_get::<_, Option<RustDecimal>>(idx)? {
            Some(decimal) => Some(Value::Decimal(
                BigDecimal::from_str(&decimal.to_string()).map_err(|e| DbError::Conversion {
                    column: row.columns()[idx].name().to_string(),
                    reason: e.to_string(),
                })?,
            )),
            None => None,
        },
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
            row.try_get::<_, Option<String>>(idx)?.map(Value::String)
        }
        Type::JSON | Type::JSONB => row
            .try_get::<_, Option<serde_json::Value>>(idx)?
            .map(Value::Json),
        Type::UUID => row.try_get::<_, Option<uuid::Uuid>>(idx)?.map(Value::Uuid),
        Type::BYTEA => row.try_get::<_, Option<Vec<u8>>>(idx)?.map(Value::Bytes),
        Type::DATE => row.try_get::<_, Option<NaiveDate>>(idx)?.map(Value::Date),
        Type::TIME => row.try_get::<_, Option<NaiveTime>>(idx)?.map(Value::Time),
        Type::TIMESTAMP => row
            .try_get::<_, Option<NaiveDateTime>>(idx)?
            .map(Value::TimestampNaive),
        Type::TIMESTAMPTZ => row
            .try_get::<_, Option<DateTime<Utc>>>(idx)?
            .map(Value::Timestamp),
        _ => row.try_get::<_, Option<RawValue>>(idx)?.map(|raw| raw.0),
    };
    Ok(value.unwrap_or(Value::Null))
}

fn decode_mysql(
    column: &str,
    column_type: ColumnType,
    flags: ColumnFlags,
    charset: u16,
    raw: &MySqlValue,
) -> Result<Value, DbError> {
    let conversion = |reason: String| DbError::Conversion {
        column: column.to_string(),
        reason,
    };

    let value = match raw {
        MySqlValue::NULL => Value::Null,
        MySqlValue::Int(v) => Value::Int(*v),
        MySqlValue::UInt(v) => Value::Uint(*v),
        MySqlValue::Float(v) => Value::Float(f64::from(*v)),
        MySqlValue::Double(v) => Value::Float(*v),
        MySqlValue::Date(year, month, day, hour, minute, second, micros) => {
            let date = NaiveDate::from_ymd_opt(i32::from(*year), u32::from(*month), u32::from(*day))
                .ok_or_else(|| conversion(format!("invalid date {year}-{month}-{day}")))?;
            if column_type == ColumnType::MYSQL_TYPE_DATE {
                Value::Date(date)
            } else {
                let time = NaiveTime::from_hms_micro_opt(
                    u32::from(*hour),
                    u32::from(*minute),
                    u32::from(*second),
                    *micros,
                )
                .ok_or_else(|| conversion("invalid time of day".to_string()))?;
                Value::TimestampNaive(date.and_time(time))
            }
        }
        MySqlValue::Time(negative, days, hours, minutes, seconds, micros) => {
            match (negative, days) {
                (false, 0) => NaiveTime::from_hms_micro_opt(
                    u32::from(*hours),
                    u32::from(*minutes),
                    u32::from(*seconds),
                    *micros,
                )
                .map(Value::Time)
                .ok_or_else(|| conversion("invalid time".to_string()))?,
                _ => {
                    let sign = if *negative { "-" } else { "" };
                    let total_hours = u32::from(*hours) + days * 24;
                    Value::String(format!(
                        "{sign}{total_hours:02}:{minutes:02}:{seconds:02}.{micros:06}"
                    ))
                }
            }
        }
        MySqlValue::Bytes(bytes) => decode_mysql_bytes(column_type, flags, charset, bytes)
            .map_err(conversion)?,
    };
    Ok(value)
}

fn decode_mysql_bytes(
    column_type: ColumnType,
    flags: ColumnFlags,
    charset: u16,
    bytes: &[u8],
) -> Result<Value, String> {
    use ColumnType::*;

    let text = || std::str::from_utf8(bytes).map_err(|e| e.to_string());
    let value = match column_type {
        MYSQL_TYPE_NEWDECIMAL | MYSQL_TYPE_DECIMAL => {
            Value::Decimal(BigDecimal::from_str(text()?).map_err(|e| e.to_string())?)
        }
        MYSQL_TYPE_JSON => {
            Value::Json(serde_json::from_slice(bytes).map_err(|e| e.to_string())?)
        }
        MYSQL_TYPE_TINY | MYSQL_TYPE_SHORT | MYSQL_TYPE_INT24 | MYSQL_TYPE_LONG
        | MYSQL_TYPE_LONGLONG | MYSQL_TYPE_YEAR => {
            if flags.contains(ColumnFlags::UNSIGNED_FLAG) {
                Value::Uint(text()?.parse().map_err(|e: std::num::ParseIntError| e.to_string())?)
            } else {
                Value::Int(text()?.parse().map_err(|e: std::num::ParseIntError| e.to_string())?)
            }
        }
        MYSQL_TYPE_FLOAT | MYSQL_TYPE_DOUBLE => {
            Value::Float(text()?.parse().map_err(|e: std::num::ParseFloatError| e.to_string())?)
        }
        MYSQL_TYPE_DATE | MYSQL_TYPE_NEWDATE => Value::Date(
            NaiveDate::parse_from_str(text()?, "%Y-%m-%d").map_err(|e| e.to_string())?,
        ),
        MYSQL_TYPE_DATETIME | MYSQL_TYPE_TIMESTAMP | MYSQL_TYPE_DATETIME2
        | MYSQL_TYPE_TIMESTAMP2 => Value::TimestampNaive(
            NaiveDateTime::parse_from_str(text()?, "%Y-%m-%d %H:%M:%S%.f")
                .map_err(|e| e.to_string())?,
        ),
        MYSQL_TYPE_BIT | MYSQL_TYPE_GEOMETRY => Value::Bytes(bytes.to_vec()),
        _ if charset == BINARY_CHARSET => Value::Bytes(bytes.to_vec()),
        _ => Value::String(String::from_utf8_lossy(bytes).into_owned()),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_mysql_text_protocol_values() {
        let unsigned = decode_mysql_bytes(
            ColumnType::MYSQL_TYPE_LONGLONG,
            ColumnFlags::UNSIGNED_FLAG,
            BINARY_CHARSET,
            b"18446744073709551615",
        )
        .unwrap();
        assert_eq!(unsigned, Value::Uint(u64::MAX));

        let decimal = decode_mysql_bytes(
            ColumnType::MYSQL_TYPE_NEWDECIMAL,
            ColumnFlags::empty(),
            BINARY_CHARSET,
            b"12.50",
        )
        .unwrap();
        assert_eq!(decimal, Value::Decimal(BigDecimal::from_str("12.50").unwrap()));

        let text = decode_mysql_bytes(
            ColumnType::MYSQL_TYPE_VAR_STRING,
            ColumnFlags::empty(),
            45,
            "héllo".as_bytes(),
        )
        .unwrap();
        assert_eq!(text, Value::String("héllo".into()));

        let blob = decode_mysql_bytes(
            ColumnType::MYSQL_TYPE_BLOB,
            ColumnFlags::BINARY_FLAG,
            BINARY_CHARSET,
            &[0xff, 0x00],
        )
        .unwrap();
        assert_eq!(blob, Value::Bytes(vec![0xff, 0x00]));
    }

    #[test]
    fn decodes_mysql_binary_protocol_dates() {
        let date = decode_mysql(
            "created_on",
            ColumnType::MYSQL_TYPE_DATE,
            ColumnFlags::empty(),
            BINARY_CHARSET,
            &MySqlValue::Date(2024, 2, 29, 0, 0, 0, 0),
        )
        .unwrap();
        assert_eq!(date, Value::Date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()));

        let invalid = decode_mysql(
            "created_on",
            ColumnType::MYSQL_TYPE_DATE,
            ColumnFlags::empty(),
            BINARY_CHARSET,
            &MySqlValue::Date(2023, 2, 30, 0, 0, 0, 0),
        );
        assert!(matches!(invalid, Err(DbError::Conversion { .. })));
    }
}
