use chrono::{Datelike, Timelike};
use model::core::value::Value;
use mysql_async::{Params, Value as MySqlValue};

pub struct MySqlParam(MySqlValue);

impl MySqlParam {
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Int(i) => MySqlParam(MySqlValue::Int(*i)),
            Value::Uint(u) => MySqlParam(MySqlValue::UInt(*u)),
            Value::Float(f) => MySqlParam(MySqlValue::Double(*f)),
            Value::Decimal(d) => MySqlParam(MySqlValue::Bytes(d.to_string().into_bytes())),
            Value::String(s) => MySqlParam(MySqlValue::Bytes(s.clone().into_bytes())),
            Value::Boolean(b) => MySqlParam(MySqlValue::Int(i64::from(*b))),
            Value::Json(j) => MySqlParam(MySqlValue::Bytes(j.to_string().into_bytes())),
            Value::Uuid(u) => MySqlParam(MySqlValue::Bytes(u.to_string().into_bytes())),
            Value::Bytes(b) => MySqlParam(MySqlValue::Bytes(b.clone())),
            Value::Date(d) => MySqlParam(MySqlValue::Date(
                d.year() as u16,
                d.month() as u8,
                d.day() as u8,
                0,
                0,
                0,
                0,
            )),
            Value::Time(t) => MySqlParam(MySqlValue::Time(
                false,
                0,
                t.hour() as u8,
                t.minute() as u8,
                t.second() as u8,
                t.nanosecond() / 1_000,
            )),
            Value::Timestamp(ts) => Self::datetime(&ts.naive_utc()),
            Value::TimestampNaive(ts) => Self::datetime(ts),
            Value::Null => MySqlParam(MySqlValue::NULL),
        }
    }

    fn datetime(naive: &chrono::NaiveDateTime) -> Self {
        MySqlParam(MySqlValue::Date(
            naive.year() as u16,
            naive.month() as u8,
            naive.day() as u8,
            naive.hour() as u8,
            naive.minute() as u8,
            naive.second() as u8,
            naive.and_utc().timestamp_subsec_micros(),
        ))
    }
}

pub struct MySqlParamStore {
    pub params: Vec<MySqlParam>,
}

impl MySqlParamStore {
    pub fn from_values(values: &[Value]) -> Self {
        let params = values.iter().map(MySqlParam::from_value).collect();
        MySqlParamStore { params }
    }

    pub fn params(&self) -> Params {
        if self.params.is_empty() {
            return Params::Empty;
        }
        let mysql_values: Vec<MySqlValue> = self.params.iter().map(|p| p.0.clone()).collect();
        Params::Positional(mysql_values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn encodes_timestamps_with_micros() {
        let ts = NaiveDate::from_ymd_opt(2024, 5, 17)
            .unwrap()
            .and_hms_micro_opt(8, 30, 15, 250)
            .unwrap();
        let store = MySqlParamStore::from_values(&[Value::TimestampNaive(ts), Value::Boolean(true)]);
        match store.params() {
            Params::Positional(values) => {
                assert_eq!(values[0], MySqlValue::Date(2024, 5, 17, 8, 30, 15, 250));
                assert_eq!(values[1], MySqlValue::Int(1));
            }
            other => panic!("unexpected params {other:?}"),
        }
    }

    #[test]
    fn empty_params_are_empty() {
        assert_eq!(MySqlParamStore::from_values(&[]).params(), Params::Empty);
    }
}
