use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// How `CHECK SCALING` compares source and target tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckAlgorithm {
    /// Row counts only.
    Count,
    /// Row counts plus a digest over every row in key order.
    #[default]
    DataMatch,
}

impl CheckAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckAlgorithm::Count => "COUNT",
            CheckAlgorithm::DataMatch => "DATA_MATCH",
        }
    }
}

impl fmt::Display for CheckAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckAlgorithm {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "COUNT" => Ok(CheckAlgorithm::Count),
            "DATA_MATCH" => Ok(CheckAlgorithm::DataMatch),
            _ => Err(ConfigError::UnknownCheckAlgorithm(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_names_loosely() {
        assert_eq!("count".parse::<CheckAlgorithm>().unwrap(), CheckAlgorithm::Count);
        assert_eq!(
            "data-match".parse::<CheckAlgorithm>().unwrap(),
            CheckAlgorithm::DataMatch
        );
        assert!(matches!(
            "CRC32".parse::<CheckAlgorithm>(),
            Err(ConfigError::UnknownCheckAlgorithm(_))
        ));
    }
}
