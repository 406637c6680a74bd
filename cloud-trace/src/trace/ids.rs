use crate::trace::TraceError;
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A 16-byte value which identifies a given trace.
///
/// Rendered as 32 lowercase hex digits, the form used by the
/// `X-Cloud-Trace-Context` header.
#[derive(Clone, PartialEq, Eq, Copy, Hash, PartialOrd, Ord)]
pub struct TraceId(u128);

impl TraceId {
    /// Invalid trace id
    pub const INVALID: TraceId = TraceId(0);

    /// Converts a string in base 16 to a trace id.
    ///
    /// # Examples
    ///
    /// ```
    /// use cloud_trace::trace::TraceId;
    ///
    /// assert!(TraceId::from_hex("42").is_ok());
    /// assert!(TraceId::from_hex("58406520a006649127e371903a2de979").is_ok());
    ///
    /// assert!(TraceId::from_hex("not_hex").is_err());
    /// ```
    pub fn from_hex(hex: &str) -> Result<Self, TraceError> {
        u128::from_str_radix(hex, 16)
            .map(TraceId)
            .map_err(|err| TraceError::InvalidTraceId(hex.to_owned(), err))
    }

    /// Return the representation of this trace id as a byte array.
    pub const fn to_bytes(self) -> [u8; 16] {
        self.0.to_be_bytes()
    }
}

impl From<u128> for TraceId {
    fn from(value: u128) -> Self {
        TraceId(value)
    }
}

impl fmt::Debug for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{:032x}", self.0))
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{:032x}", self.0))
    }
}

impl Serialize for TraceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Identifies a span within a trace.
///
/// Span ids are decimal numbers. The textual form is kept exactly as
/// received, so a propagated `0000` is written back as `0000` rather than
/// being normalised.
#[derive(Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SpanId(String);

impl SpanId {
    /// Creates a span id from its numeric value.
    pub fn from_u64(value: u64) -> Self {
        SpanId(value.to_string())
    }

    /// Parses a span id, accepting any non-empty run of decimal digits.
    ///
    /// # Examples
    ///
    /// ```
    /// use cloud_trace::trace::SpanId;
    ///
    /// assert_eq!(SpanId::parse("0000").unwrap().as_str(), "0000");
    /// assert!(SpanId::parse("12a").is_err());
    /// assert!(SpanId::parse("").is_err());
    /// ```
    pub fn parse(value: &str) -> Result<Self, TraceError> {
        if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
            Ok(SpanId(value.to_owned()))
        } else {
            Err(TraceError::InvalidSpanId(value.to_owned()))
        }
    }

    /// The span id as received or generated.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The numeric value, if it fits in 64 bits.
    pub fn to_u64(&self) -> Option<u64> {
        self.0.parse().ok()
    }
}

impl From<u64> for SpanId {
    fn from(value: u64) -> Self {
        SpanId::from_u64(value)
    }
}

impl FromStr for SpanId {
    type Err = TraceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SpanId::parse(s)
    }
}

impl fmt::Debug for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[rustfmt::skip]
    fn trace_id_test_data() -> Vec<(TraceId, &'static str)> {
        vec![
            (TraceId(0), "00000000000000000000000000000000"),
            (TraceId(42), "0000000000000000000000000000002a"),
            (TraceId(126642714606581564793456114182061442190), "5f467fe7bf42676c05e20ba4a90e448e"),
        ]
    }

    #[test]
    fn test_trace_id() {
        for test_case in trace_id_test_data() {
            assert_eq!(format!("{}", test_case.0), test_case.1);
            assert_eq!(format!("{:?}", test_case.0), test_case.1);
            assert_eq!(TraceId::from_hex(test_case.1).unwrap(), test_case.0);
        }
    }

    #[test]
    fn trace_id_serializes_as_hex_string() {
        let json = serde_json::to_string(&TraceId(42)).unwrap();
        assert_eq!(json, "\"0000000000000000000000000000002a\"");
    }

    #[test]
    fn span_id_keeps_leading_zeros() {
        let span_id: SpanId = "0000".parse().unwrap();
        assert_eq!(span_id.to_string(), "0000");
        assert_eq!(span_id.to_u64(), Some(0));
        assert_ne!(span_id, SpanId::from_u64(0));
    }

    #[test]
    fn span_id_rejects_non_decimal() {
        for input in ["", "-1", "1.5", "ff", " 12"] {
            assert!(SpanId::parse(input).is_err(), "{input:?} should be rejected");
        }
    }

    #[test]
    fn span_id_serializes_transparently() {
        let json = serde_json::to_string(&SpanId::from_u64(4211)).unwrap();
        assert_eq!(json, "\"4211\"");
    }
}
