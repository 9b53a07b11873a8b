//! Composite resource identities.
//!
//! Apigee entities are addressed by compound paths (environment, keystore,
//! alias, revision, ...) while a resource carries a single opaque ID. This
//! module maps between the two.
//!
//! Segments are joined with `:`. A `:` or `%` inside a segment is
//! percent-escaped (`%3A`, `%25`), so decoding always recovers the original
//! segments. Segments without either character encode as a plain join.
//!
//! ```
//! use apigee_provider::identity::{decode, encode};
//!
//! let id = encode(["test", "orders-api"]);
//! assert_eq!(id, "test:orders-api");
//!
//! let key = decode(&id, 2).unwrap();
//! assert_eq!(key.segment(0), "test");
//! assert_eq!(key.segment(1), "orders-api");
//! ```

use std::fmt;

use crate::error::ProviderError;

/// Separator between encoded segments.
pub const DELIMITER: char = ':';

/// An ordered tuple of path segments identifying one remote entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompositeKey {
    segments: Vec<String>,
}

impl CompositeKey {
    /// Build a key from its segments.
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
        }
    }

    /// The number of segments.
    pub fn arity(&self) -> usize {
        self.segments.len()
    }

    /// All segments in order.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// The segment at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range. Keys returned by [`decode`] always
    /// have the arity the caller asked for.
    pub fn segment(&self, index: usize) -> &str {
        &self.segments[index]
    }

    /// Parse the segment at `index` as a positive integer.
    pub fn numeric(&self, index: usize) -> Result<u32, ProviderError> {
        let raw = self.segments.get(index).ok_or_else(|| {
            ProviderError::malformed(self.encode(), format!("no segment at position {}", index))
        })?;
        match raw.parse::<u32>() {
            Ok(n) if n > 0 => Ok(n),
            _ => Err(ProviderError::malformed(
                self.encode(),
                format!("segment '{}' is not a positive integer", raw),
            )),
        }
    }

    /// Encode into a single identifier string.
    pub fn encode(&self) -> String {
        encode(&self.segments)
    }
}

impl fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Join segments into a single identifier.
pub fn encode<I, S>(segments: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut id = String::new();
    for (i, segment) in segments.into_iter().enumerate() {
        if i > 0 {
            id.push(DELIMITER);
        }
        escape_into(segment.as_ref(), &mut id);
    }
    id
}

/// Split an identifier into exactly `arity` segments.
pub fn decode(id: &str, arity: usize) -> Result<CompositeKey, ProviderError> {
    let raw: Vec<&str> = id.split(DELIMITER).collect();
    if raw.len() != arity {
        return Err(ProviderError::malformed(
            id,
            format!("expected {} segments, found {}", arity, raw.len()),
        ));
    }

    let segments = raw
        .into_iter()
        .map(|segment| {
            unescape(segment).ok_or_else(|| ProviderError::malformed(id, "invalid escape sequence"))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(CompositeKey { segments })
}

fn escape_into(segment: &str, out: &mut String) {
    for c in segment.chars() {
        match c {
            '%' => out.push_str("%25"),
            DELIMITER => out.push_str("%3A"),
            c => out.push(c),
        }
    }
}

fn unescape(segment: &str) -> Option<String> {
    if !segment.contains('%') {
        return Some(segment.to_string());
    }

    let mut out = String::with_capacity(segment.len());
    let mut rest = segment;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let escape = rest.get(pos + 1..pos + 3)?;
        match escape {
            "25" => out.push('%'),
            "3A" => out.push(DELIMITER),
            _ => return None,
        }
        rest = &rest[pos + 3..];
    }
    out.push_str(rest);
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encode_plain_segments() {
        assert_eq!(encode(["test", "orders-api"]), "test:orders-api");
        assert_eq!(encode(["prod", "ks1", "alias1"]), "prod:ks1:alias1");
    }

    #[test]
    fn test_decode_arity_mismatch() {
        let err = decode("a:b", 3).unwrap_err();
        assert!(matches!(err, ProviderError::MalformedIdentity { .. }));

        let err = decode("a:b:c", 2).unwrap_err();
        assert!(matches!(err, ProviderError::MalformedIdentity { .. }));
    }

    #[test]
    fn test_delimiter_inside_segment_round_trips() {
        let id = encode(["prod", "ks:1", "alias%2"]);
        assert_eq!(id, "prod:ks%3A1:alias%252");

        let key = decode(&id, 3).unwrap();
        assert_eq!(key.segments(), &["prod", "ks:1", "alias%2"]);
    }

    #[test]
    fn test_invalid_escape_rejected() {
        assert!(decode("prod:bad%zz", 2).is_err());
        assert!(decode("prod:trailing%", 2).is_err());
    }

    #[test]
    fn test_numeric_segment() {
        let key = decode("orders-api:3:verify-key", 3).unwrap();
        assert_eq!(key.numeric(1).unwrap(), 3);
        assert!(key.numeric(0).is_err());
        assert!(key.numeric(5).is_err());

        let key = decode("orders-api:0:verify-key", 3).unwrap();
        assert!(key.numeric(1).is_err());
    }

    #[test]
    fn test_only_canonical_escapes_decode() {
        assert_eq!(decode("ks%3A1:x", 2).unwrap().segment(0), "ks:1");
        assert!(decode("ks%3a1:x", 2).is_err());
    }

    #[test]
    fn test_no_normalization() {
        let key = decode(" Test :API", 2).unwrap();
        assert_eq!(key.segment(0), " Test ");
        assert_ne!(key, decode("test:api", 2).unwrap());
    }

    proptest! {
        #[test]
        fn prop_round_trip(segments in proptest::collection::vec(".*", 2..=4)) {
            let id = encode(&segments);
            let key = decode(&id, segments.len()).unwrap();
            prop_assert_eq!(key.segments(), segments.as_slice());
        }
    }
}
