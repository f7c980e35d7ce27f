use serde::{Deserialize, Serialize};
use std::{fmt::Display, str::FromStr};
use thiserror::Error;

/// Test flag forwarded to the backend on every call.
///
/// `Verbose` turns on route trace logging, `Confirm` additionally makes the
/// backend ask for explicit confirmation before running a sensitive action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum TestMode {
    #[default]
    Off,
    Verbose,
    Confirm,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unsupported test mode {0}, expected 0, 1 or 2")]
pub struct InvalidTestMode(pub String);

impl TestMode {
    pub fn header_value(&self) -> &'static str {
        match self {
            TestMode::Off => "0",
            TestMode::Verbose => "1",
            TestMode::Confirm => "2",
        }
    }

    pub fn is_verbose(&self) -> bool {
        !matches!(self, TestMode::Off)
    }

    pub fn requires_confirmation(&self) -> bool {
        matches!(self, TestMode::Confirm)
    }
}

impl TryFrom<u8> for TestMode {
    type Error = InvalidTestMode;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(TestMode::Off),
            1 => Ok(TestMode::Verbose),
            2 => Ok(TestMode::Confirm),
            other => Err(InvalidTestMode(other.to_string())),
        }
    }
}

impl From<TestMode> for u8 {
    fn from(value: TestMode) -> Self {
        match value {
            TestMode::Off => 0,
            TestMode::Verbose => 1,
            TestMode::Confirm => 2,
        }
    }
}

impl FromStr for TestMode {
    type Err = InvalidTestMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s
            .trim()
            .parse::<u8>()
            .map_err(|_| InvalidTestMode(s.to_string()))?;
        TestMode::try_from(value)
    }
}

impl Display for TestMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.header_value())
    }
}
