//! The XML-RPC data model.

use std::collections::BTreeMap;
use std::fmt;

/// Members of an XML-RPC `<struct>`.
///
/// Keys are unique and iterate in sorted order, so encoding the same
/// struct twice produces the same bytes.
pub type Struct = BTreeMap<String, Value>;

/// A dynamically typed XML-RPC value.
///
/// Strings are byte strings: peers are free to send octets that are not
/// valid UTF-8 and those survive decoding and re-encoding unchanged.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Double(f64),
    Boolean(bool),
    String(Vec<u8>),
    DateTime(DateTime),
    Base64(Vec<u8>),
    Array(Vec<Value>),
    Struct(Struct),
}

/// `dateTime.iso8601` without a timezone, as six plain integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct DateTime {
    pub year: u32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
}

impl DateTime {
    pub fn new(year: u32, month: u32, day: u32, hour: u32, minute: u32, second: u32) -> Self {
        DateTime {
            year,
            month,
            day,
            hour,
            minute,
            second,
        }
    }
}

impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        // Years from 1000 on are written at their natural width.
        if self.year < 1000 {
            write!(f, "{:04}", self.year)?;
        } else {
            write!(f, "{}", self.year)?;
        }
        write!(
            f,
            "{:02}{:02}T{:02}:{:02}:{:02}",
            self.month, self.day, self.hour, self.minute, self.second
        )
    }
}

impl Value {
    pub fn string<S: AsRef<[u8]>>(s: S) -> Self {
        Value::String(s.as_ref().to_vec())
    }

    pub fn base64<B: Into<Vec<u8>>>(bytes: B) -> Self {
        Value::Base64(bytes.into())
    }

    pub fn array<I: IntoIterator<Item = Value>>(items: I) -> Self {
        Value::Array(items.into_iter().collect())
    }

    /// Build a struct from `(key, value)` pairs. Later duplicates win.
    pub fn structure<K, I>(members: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Struct(members.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Double(_) => "double",
            Value::Boolean(_) => "boolean",
            Value::String(_) => "string",
            Value::DateTime(_) => "dateTime.iso8601",
            Value::Base64(_) => "base64",
            Value::Array(_) => "array",
            Value::Struct(_) => "struct",
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            Value::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::String(s) | Value::Base64(s) => Some(s),
            _ => None,
        }
    }

    /// The string contents, if this is a `String` holding valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => std::str::from_utf8(s).ok(),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<&DateTime> {
        match self {
            Value::DateTime(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&Struct> {
        match self {
            Value::Struct(s) => Some(s),
            _ => None,
        }
    }

    /// Look up a struct member.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_struct().and_then(|s| s.get(key))
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i.into())
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Value::Double(d)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.as_bytes().to_vec())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s.into_bytes())
    }
}

impl From<DateTime> for Value {
    fn from(d: DateTime) -> Self {
        Value::DateTime(d)
    }
}

impl From<Struct> for Value {
    fn from(s: Struct) -> Self {
        Value::Struct(s)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Array(v.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static_assertions::assert_impl_all!(Value: Send, Sync, Clone);

    #[test]
    fn test_datetime_display() {
        assert_eq!(
            DateTime::new(1998, 7, 17, 14, 8, 55).to_string(),
            "19980717T14:08:55"
        );
        assert_eq!(DateTime::new(999, 1, 2, 3, 4, 5).to_string(), "09990102T03:04:05");
        assert_eq!(
            DateTime::new(12345, 12, 31, 23, 59, 59).to_string(),
            "123451231T23:59:59"
        );
    }

    #[test]
    fn test_accessors() {
        let v = Value::structure(vec![
            ("a", Value::from(1)),
            ("b", Value::from(vec!["x", "y"])),
        ]);
        assert_eq!(v.get("a").and_then(Value::as_int), Some(1));
        assert_eq!(
            v.get("b").and_then(Value::as_array).map(|a| a.len()),
            Some(2)
        );
        assert_eq!(v.get("c"), None);
        assert_eq!(Value::String(vec![0xff, 0xfe]).as_str(), None);
        assert_eq!(Value::from("ok").as_str(), Some("ok"));
        assert_eq!(Value::from(true).type_name(), "boolean");
    }
}
