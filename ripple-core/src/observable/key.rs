//! Property keys.
//!
//! Every observable read or write is addressed by a [`PropKey`]. Numeric
//! looking names are normalised to [`PropKey::Index`] so that `"3"` and `3`
//! address the same slot, the way an array index and its string form do.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Marker keys answered by a wrapper itself, never tracked.
pub mod flags {
    pub const SKIP: &str = "__v_skip";
    pub const IS_REACTIVE: &str = "__v_isReactive";
    pub const IS_READONLY: &str = "__v_isReadonly";
    pub const IS_SHALLOW: &str = "__v_isShallow";
    pub const RAW: &str = "__v_raw";
}

const NON_TRACKABLE: [&str; 3] = ["__proto__", "__v_isRef", "__isVue"];

/// Largest array index; array lengths stop at `2^32 - 1`.
pub const MAX_ARRAY_INDEX: usize = (u32::MAX - 1) as usize;

/// A key addressing one field of an observable structure.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropKey {
    /// A named property.
    Name(Arc<str>),

    /// An array index (or integer-like property name).
    Index(usize),

    /// Reserved key subscribed to by enumeration (own keys, size, values).
    Iterate,

    /// Reserved key subscribed to by map key enumeration.
    MapKeyIterate,
}

impl PropKey {
    /// The `length` key of array targets.
    pub fn length() -> Self {
        Self::Name(Arc::from("length"))
    }

    pub fn is_length(&self) -> bool {
        matches!(self, Self::Name(name) if &**name == "length")
    }

    /// The index this key addresses, if it is integer-like.
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Self::Index(index) => Some(*index),
            _ => None,
        }
    }

    pub fn as_name(&self) -> Option<&str> {
        match self {
            Self::Name(name) => Some(name),
            _ => None,
        }
    }

    /// Reserved iteration keys are bookkeeping only.
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Iterate | Self::MapKeyIterate)
    }

    /// Keys that are read through without recording a dependency.
    pub fn is_non_trackable(&self) -> bool {
        match self {
            Self::Name(name) => NON_TRACKABLE.contains(&&**name),
            Self::Index(_) => false,
            Self::Iterate | Self::MapKeyIterate => true,
        }
    }

    /// Whether this key is one of the wrapper marker flags.
    pub(crate) fn flag(&self) -> Option<&str> {
        let name = self.as_name()?;
        [
            flags::SKIP,
            flags::IS_REACTIVE,
            flags::IS_READONLY,
            flags::IS_SHALLOW,
            flags::RAW,
        ]
        .into_iter()
        .find(|flag| *flag == name)
    }
}

/// Canonical decimal without sign or leading zeros.
fn parse_integer_key(key: &str) -> Option<usize> {
    let index = key.parse::<usize>().ok()?;
    (index <= MAX_ARRAY_INDEX && index.to_string() == key).then_some(index)
}

impl From<&str> for PropKey {
    fn from(key: &str) -> Self {
        match parse_integer_key(key) {
            Some(index) => Self::Index(index),
            None => Self::Name(Arc::from(key)),
        }
    }
}

impl From<String> for PropKey {
    fn from(key: String) -> Self {
        Self::from(key.as_str())
    }
}

impl From<Arc<str>> for PropKey {
    fn from(key: Arc<str>) -> Self {
        match parse_integer_key(&key) {
            Some(index) => Self::Index(index),
            None => Self::Name(key),
        }
    }
}

impl From<usize> for PropKey {
    fn from(index: usize) -> Self {
        if index <= MAX_ARRAY_INDEX {
            Self::Index(index)
        } else {
            Self::Name(Arc::from(index.to_string()))
        }
    }
}

impl From<i32> for PropKey {
    fn from(index: i32) -> Self {
        match usize::try_from(index) {
            Ok(index) => Self::Index(index),
            Err(_) => Self::Name(Arc::from(index.to_string())),
        }
    }
}

impl From<&PropKey> for PropKey {
    fn from(key: &PropKey) -> Self {
        key.clone()
    }
}

impl fmt::Display for PropKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => f.write_str(name),
            Self::Index(index) => write!(f, "{index}"),
            Self::Iterate => f.write_str("<iterate>"),
            Self::MapKeyIterate => f.write_str("<map-key-iterate>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_like_names_become_indices() {
        assert_eq!(PropKey::from("3"), PropKey::Index(3));
        assert_eq!(PropKey::from("0"), PropKey::Index(0));
        assert_eq!(PropKey::from(3usize), PropKey::Index(3));
        assert_eq!(PropKey::from(7), PropKey::Index(7));
    }

    #[test]
    fn non_canonical_numbers_stay_names() {
        assert_eq!(PropKey::from("03"), PropKey::Name(Arc::from("03")));
        assert_eq!(PropKey::from("-1"), PropKey::Name(Arc::from("-1")));
        assert_eq!(PropKey::from("+1"), PropKey::Name(Arc::from("+1")));
        assert_eq!(PropKey::from("NaN"), PropKey::Name(Arc::from("NaN")));
        assert_eq!(PropKey::from(-1), PropKey::Name(Arc::from("-1")));
    }

    #[test]
    fn indices_past_the_array_limit_stay_names() {
        assert_eq!(PropKey::from(MAX_ARRAY_INDEX), PropKey::Index(MAX_ARRAY_INDEX));
        assert_eq!(PropKey::from("4294967294"), PropKey::Index(4_294_967_294));

        assert_eq!(PropKey::from("4294967295"), PropKey::Name(Arc::from("4294967295")));
        assert_eq!(PropKey::from(usize::MAX), PropKey::Name(Arc::from(usize::MAX.to_string())));
    }

    #[test]
    fn classification() {
        assert!(PropKey::length().is_length());
        assert!(PropKey::from("__proto__").is_non_trackable());
        assert!(PropKey::Iterate.is_non_trackable());
        assert!(!PropKey::from("foo").is_non_trackable());
        assert_eq!(PropKey::from("__v_raw").flag(), Some(flags::RAW));
        assert_eq!(PropKey::from("foo").flag(), None);
    }
}
