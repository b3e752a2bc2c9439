use serde::{Deserialize, Serialize};
use std::fmt;

/// Column type as reported by the `information_schema` of the source or target.
///
/// Only the distinctions the pipeline acts on are kept: whether a column can
/// drive keyset pagination, and how raw driver values should be decoded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DataType {
    TinyInt,
    SmallInt,
    Int,
    BigInt,
    UnsignedBigInt,
    Decimal,
    Float,
    Double,
    Boolean,
    Char,
    VarChar,
    Text,
    Binary,
    Blob,
    Json,
    Uuid,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Enum,
    Custom(String),
}

impl DataType {
    /// Parses a type name from either MySQL or PostgreSQL catalogs.
    ///
    /// Length/precision suffixes and `unsigned` markers are accepted, e.g.
    /// `varchar(64)` or `bigint unsigned`.
    pub fn from_sql_name(type_name: &str) -> Self {
        let normalized = Self::normalize_type_name(type_name);
        let unsigned = normalized.ends_with(" unsigned");
        let base = normalized.trim_end_matches(" unsigned");

        match base {
            "tinyint" | "int1" => DataType::TinyInt,
            "smallint" | "int2" | "smallserial" | "mediumint" | "year" => DataType::SmallInt,
            "int" | "integer" | "int4" | "serial" => {
                if unsigned {
                    DataType::BigInt
                } else {
                    DataType::Int
                }
            }
            "bigint" | "int8" | "bigserial" => {
                if unsigned {
                    DataType::UnsignedBigInt
                } else {
                    DataType::BigInt
                }
            }
            "decimal" | "numeric" | "newdecimal" => DataType::Decimal,
            "float" | "real" | "float4" => DataType::Float,
            "double" | "double precision" | "float8" => DataType::Double,
            "bool" | "boolean" | "bit" => DataType::Boolean,
            "char" | "character" | "bpchar" => DataType::Char,
            "varchar" | "character varying" | "name" => DataType::VarChar,
            "text" | "tinytext" | "mediumtext" | "longtext" | "citext" => DataType::Text,
            "binary" | "varbinary" => DataType::Binary,
            "blob" | "tinyblob" | "mediumblob" | "longblob" | "bytea" => DataType::Blob,
            "json" | "jsonb" => DataType::Json,
            "uuid" => DataType::Uuid,
            "date" => DataType::Date,
            "time" | "time without time zone" => DataType::Time,
            "datetime" | "timestamp" | "timestamp without time zone" => DataType::Timestamp,
            "timestamptz" | "timestamp with time zone" => DataType::TimestampTz,
            "enum" | "set" => DataType::Enum,
            other => DataType::Custom(other.to_string()),
        }
    }

    /// Integer columns order numerically and can be paginated by range.
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            DataType::TinyInt
                | DataType::SmallInt
                | DataType::Int
                | DataType::BigInt
                | DataType::UnsignedBigInt
        )
    }

    /// String columns order by the target collation.
    pub fn is_string(&self) -> bool {
        matches!(self, DataType::Char | DataType::VarChar | DataType::Text)
    }

    fn normalize_type_name(type_name: &str) -> String {
        let lower = type_name.trim().to_ascii_lowercase();
        let unsigned = lower.contains("unsigned");
        let base = match lower.find('(') {
            Some(idx) => {
                let tail = lower[idx..]
                    .find(')')
                    .map(|end| &lower[idx + end + 1..])
                    .unwrap_or("");
                format!("{}{}", &lower[..idx], tail)
            }
            None => lower,
        };
        let base = base
            .replace("unsigned", "")
            .replace("zerofill", "")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        if unsigned {
            format!("{base} unsigned")
        } else {
            base
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Custom(name) => f.write_str(name),
            other => write!(f, "{other:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mysql_and_postgres_names() {
        assert_eq!(DataType::from_sql_name("INT(11)"), DataType::Int);
        assert_eq!(
            DataType::from_sql_name("bigint(20) unsigned"),
            DataType::UnsignedBigInt
        );
        assert_eq!(DataType::from_sql_name("character varying"), DataType::VarChar);
        assert_eq!(DataType::from_sql_name("varchar(255)"), DataType::VarChar);
        assert_eq!(
            DataType::from_sql_name("timestamp with time zone"),
            DataType::TimestampTz
        );
        assert_eq!(
            DataType::from_sql_name("geometry"),
            DataType::Custom("geometry".into())
        );
    }

    #[test]
    fn classifies_pagination_types() {
        assert!(DataType::BigInt.is_integer());
        assert!(DataType::VarChar.is_string());
        assert!(!DataType::Decimal.is_integer());
        assert!(!DataType::Timestamp.is_string());
    }
}
