//! Token amounts in chain base units and their decimal display form.
//!
//! Chain applications account prices as integers of base units with [`DECIMALS`] fractional
//! digits. Creators and readers see them as decimal strings ("0", "0.25", "12").

use std::fmt;
use std::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Number of fractional digits carried by one whole token.
pub const DECIMALS: u32 = 18;

const UNIT: u128 = 10u128.pow(DECIMALS);

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum AmountError {
    #[error("empty amount")]
    Empty,
    #[error("invalid amount `{0}`")]
    Invalid(String),
    #[error("amount `{0}` has more than 18 decimals")]
    TooManyDecimals(String),
    #[error("amount `{0}` overflows")]
    Overflow(String),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(u128);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub fn from_base_units(units: u128) -> Self {
        Self(units)
    }

    pub fn base_units(&self) -> u128 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Parses a decimal display string such as `"1.5"` into base units.
    pub fn from_decimal(value: &str) -> Result<Self, AmountError> {
        let value = value.trim();
        if value.is_empty() {
            return Err(AmountError::Empty);
        }
        let (whole, frac) = match value.split_once('.') {
            Some((w, f)) => (w, f),
            None => (value, ""),
        };
        if whole.is_empty() && frac.is_empty() {
            return Err(AmountError::Invalid(value.to_string()));
        }
        if !whole.bytes().all(|b| b.is_ascii_digit()) || !frac.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AmountError::Invalid(value.to_string()));
        }
        if frac.len() > DECIMALS as usize {
            return Err(AmountError::TooManyDecimals(value.to_string()));
        }

        let whole_units = if whole.is_empty() {
            0
        } else {
            whole.parse::<u128>().map_err(|_| AmountError::Overflow(value.to_string()))?
        };
        let frac_units = if frac.is_empty() {
            0
        } else {
            let scale = 10u128.pow(DECIMALS - frac.len() as u32);
            frac.parse::<u128>().map_err(|_| AmountError::Invalid(value.to_string()))? * scale
        };

        whole_units
            .checked_mul(UNIT)
            .and_then(|w| w.checked_add(frac_units))
            .map(Amount)
            .ok_or_else(|| AmountError::Overflow(value.to_string()))
    }

    /// Shortest decimal rendering, without trailing fractional zeros.
    pub fn to_decimal(&self) -> String {
        let whole = self.0 / UNIT;
        let frac = self.0 % UNIT;
        if frac == 0 {
            return whole.to_string();
        }
        let digits = format!("{frac:0width$}", width = DECIMALS as usize);
        format!("{whole}.{}", digits.trim_end_matches('0'))
    }

    /// Parses the wire form: a base-unit integer in decimal or `0x` hex.
    pub fn from_wire(value: &str) -> Result<Self, AmountError> {
        let value = value.trim();
        if value.is_empty() {
            return Err(AmountError::Empty);
        }
        let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
            Some(hex) => u128::from_str_radix(hex, 16),
            None => value.parse::<u128>(),
        };
        parsed.map(Amount).map_err(|_| AmountError::Invalid(value.to_string()))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_decimal())
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Amount::from_decimal(s)
    }
}

// JSON numbers lose precision above 2^53, so base units travel as strings.
impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct AmountVisitor;

        impl Visitor<'_> for AmountVisitor {
            type Value = Amount;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a base-unit integer as number or string")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Amount, E> {
                Ok(Amount(v as u128))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Amount, E> {
                u128::try_from(v).map(Amount).map_err(|_| E::custom(format!("negative amount {v}")))
            }

            fn visit_u128<E: de::Error>(self, v: u128) -> Result<Amount, E> {
                Ok(Amount(v))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Amount, E> {
                Amount::from_wire(v).map_err(E::custom)
            }
        }

        deserializer.deserialize_any(AmountVisitor)
    }
}
