//! Quantities: signed arbitrary-precision integers with an optional unit.
//!
//! Attribute values such as `"6000000uscrt"` or `"150"` are quantities.
//! Magnitudes are kept as normalized decimal digit strings, so comparisons
//! are exact at any size.

use std::cmp::Ordering;
use std::fmt;

/// Maximum number of digits in a quantity's magnitude.
pub const MAX_QUANTITY_DIGITS: usize = 78;

const MAX_PLAIN_UNIT_LEN: usize = 16;
const IBC_HASH_LEN: usize = 64;
const MAX_FACTORY_PATH_LEN: usize = 120;

/// An exact signed integer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Amount {
    negative: bool,
    /// Decimal digits without leading zeros; `"0"` for zero.
    digits: String,
}

impl Amount {
    fn from_parts(negative: bool, digits: &str) -> Self {
        let trimmed = digits.trim_start_matches('0');
        if trimmed.is_empty() {
            Self {
                negative: false,
                digits: "0".into(),
            }
        } else {
            Self {
                negative,
                digits: trimmed.to_string(),
            }
        }
    }

    fn cmp_magnitude(&self, other: &Self) -> Ordering {
        self.digits
            .len()
            .cmp(&other.digits.len())
            .then_with(|| self.digits.cmp(&other.digits))
    }
}

impl Ord for Amount {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.negative, other.negative) {
            (false, true) => Ordering::Greater,
            (true, false) => Ordering::Less,
            (false, false) => self.cmp_magnitude(other),
            (true, true) => other.cmp_magnitude(self),
        }
    }
}

impl PartialOrd for Amount {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negative {
            f.write_str("-")?;
        }
        f.write_str(&self.digits)
    }
}

/// An amount plus its (optional) unit suffix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Quantity {
    pub amount: Amount,
    pub unit: Option<String>,
}

impl Quantity {
    /// Parse `[-+]?DIGITS[UNIT]`, returning `None` for anything else.
    ///
    /// A unit is `[a-z0-9_]{1,16}`, `ibc/<64 uppercase hex>` or
    /// `factory/<1..120 non-whitespace>`.
    pub fn parse(text: &str) -> Option<Self> {
        let (negative, rest) = match text.as_bytes().first()? {
            b'-' => (true, &text[1..]),
            b'+' => (false, &text[1..]),
            _ => (false, text),
        };

        let digit_len = rest.bytes().take_while(u8::is_ascii_digit).count();
        if digit_len == 0 || digit_len > MAX_QUANTITY_DIGITS {
            return None;
        }

        let (digits, unit) = rest.split_at(digit_len);
        let unit = match unit {
            "" => None,
            u if is_unit(u) => Some(u.to_string()),
            _ => return None,
        };

        Some(Self {
            amount: Amount::from_parts(negative, digits),
            unit,
        })
    }

    pub fn unit(&self) -> Option<&str> {
        self.unit.as_deref()
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.amount, self.unit.as_deref().unwrap_or(""))
    }
}

fn is_unit(unit: &str) -> bool {
    if let Some(hash) = unit.strip_prefix("ibc/") {
        return hash.len() == IBC_HASH_LEN
            && hash.bytes().all(|b| b.is_ascii_digit() || (b'A'..=b'F').contains(&b));
    }
    if let Some(path) = unit.strip_prefix("factory/") {
        let len = path.chars().count();
        return (1..=MAX_FACTORY_PATH_LEN).contains(&len)
            && !path.chars().any(char::is_whitespace);
    }
    (1..=MAX_PLAIN_UNIT_LEN).contains(&unit.len())
        && unit
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
}
