use std::cmp::Ordering;
use std::fmt::Display;

/// `Number` holds the numeric representations of the value model.
/// A number is either inline binary (signed integer or double) or the
/// decimal text it was parsed from; conversion out of text is lazy.
#[derive(Debug, Clone)]
pub enum Number {
    Int(i64),
    Float(f64),
    Text(Box<str>),
}

use Number::*;

impl Display for Number {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Int(n) => write!(f, "{}", n),
            Float(n) => write!(f, "{}", n),
            Text(t) => write!(f, "{}", t),
        }
    }
}

impl From<i64> for Number {
    fn from(n: i64) -> Self {
        Int(n)
    }
}

impl From<f64> for Number {
    fn from(n: f64) -> Self {
        Float(n)
    }
}

impl From<&serde_json::Number> for Number {
    fn from(n: &serde_json::Number) -> Self {
        if let Some(n) = n.as_i64() {
            Int(n)
        } else if let Some(n) = n.as_u64() {
            Float(n as f64)
        } else {
            Float(n.as_f64().unwrap_or(f64::NAN))
        }
    }
}

impl TryFrom<&Number> for serde_json::Number {
    type Error = ();

    fn try_from(n: &Number) -> Result<Self, Self::Error> {
        if let Some(i) = n.as_i64() {
            Ok(serde_json::Number::from(i))
        } else {
            serde_json::Number::from_f64(n.as_f64()).ok_or(())
        }
    }
}

impl Number {
    /// Parse decimal literal text into a lazily-converted number.
    pub fn from_text(text: &str) -> Number {
        Text(text.into())
    }

    /// The numeric value, widened to f64.
    pub fn as_f64(&self) -> f64 {
        match self {
            Int(n) => *n as f64,
            Float(n) => *n,
            Text(t) => t.parse::<f64>().unwrap_or(f64::NAN),
        }
    }

    /// The numeric value as an integer, if it is one exactly.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Int(n) => Some(*n),
            Float(n) if n.fract() == 0.0 && *n >= i64::MIN as f64 && *n <= i64::MAX as f64 => {
                Some(*n as i64)
            }
            Float(_) => None,
            Text(t) => match t.parse::<i64>() {
                Ok(n) => Some(n),
                Err(_) => Float(t.parse::<f64>().unwrap_or(f64::NAN)).as_i64(),
            },
        }
    }

    /// Truncating integer conversion, in the manner of a C cast.
    pub fn to_i64_lossy(&self) -> i64 {
        self.as_i64().unwrap_or_else(|| self.as_f64() as i64)
    }

    pub fn is_integer(&self) -> bool {
        self.as_i64().is_some()
    }

    pub fn is_nan(&self) -> bool {
        match self {
            Int(_) => false,
            Float(n) => n.is_nan(),
            Text(t) => t.parse::<f64>().map(|n| n.is_nan()).unwrap_or(true),
        }
    }
}

fn f64_cmp(lhs: f64, rhs: f64) -> Ordering {
    match lhs.partial_cmp(&rhs) {
        Some(ord) => ord,
        None => match (lhs.is_nan(), rhs.is_nan()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, _) => Ordering::Greater,
        },
    }
}

impl Ord for Number {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.as_i64(), other.as_i64()) {
            (Some(lhs), Some(rhs)) => lhs.cmp(&rhs),
            _ => f64_cmp(self.as_f64(), other.as_f64()),
        }
    }
}

impl PartialOrd for Number {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Number {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for Number {}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_text_is_lazy_but_compares_numerically() {
        assert_eq!(Number::from_text("12"), Number::Int(12));
        assert_eq!(Number::from_text("1.5"), Number::Float(1.5));
        assert_eq!(Number::from_text("1.50").to_string(), "1.50");
        assert!(Number::from_text("2") < Number::Int(10));
    }

    #[test]
    fn test_int_float_ordering() {
        assert_eq!(Number::Int(3), Number::Float(3.0));
        assert!(Number::Int(3) < Number::Float(3.5));
        assert!(Number::Float(-0.5) < Number::Int(0));
        assert_eq!(Number::Int(i64::MAX).as_i64(), Some(i64::MAX));
    }

    #[test]
    fn test_serde_round_trip() {
        let n: Number = (&serde_json::Number::from(7i64)).into();
        assert_eq!(n, Number::Int(7));
        let back = serde_json::Number::try_from(&Number::Float(0.25)).unwrap();
        assert_eq!(back.as_f64(), Some(0.25));
    }
}
