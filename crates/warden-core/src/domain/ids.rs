//! Strongly-typed ULID identifiers.
//!
//! `Id<T>` はジェネリック ID 型で、`T` はマーカー型（PhantomData）です。
//! CallId と EntryId は同じ表現を持ちますが、型が異なるので混同できません。
//!
//! On the wire (and as a document `_id`) an id is the bare ULID string; the
//! `Display` form carries a prefix so log lines stay readable.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::str::FromStr;
use ulid::Ulid;

/// Marker trait providing the display prefix of each id type.
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

#[repr(transparent)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }

    /// The bare ULID string used as a document key.
    pub fn key(&self) -> String {
        self.ulid.to_string()
    }
}

// Manual impls: derives would put bounds on `T`, which is an uninhabited marker.
impl<T: IdMarker> Clone for Id<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: IdMarker> Copy for Id<T> {}

impl<T: IdMarker> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ulid == other.ulid
    }
}

impl<T: IdMarker> Eq for Id<T> {}

impl<T: IdMarker> Hash for Id<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ulid.hash(state);
    }
}

impl<T: IdMarker> PartialOrd for Id<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: IdMarker> Ord for Id<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.ulid.cmp(&other.ulid)
    }
}

impl<T: IdMarker> fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> FromStr for Id<T> {
    type Err = ulid::DecodeError;

    /// Accepts both the bare key and the prefixed display form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix(T::prefix()).unwrap_or(s);
        Ulid::from_string(raw).map(Self::from_ulid)
    }
}

impl<T: IdMarker> Serialize for Id<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.ulid.serialize(serializer)
    }
}

impl<'de, T: IdMarker> Deserialize<'de> for Id<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ulid::deserialize(deserializer).map(Self::from_ulid)
    }
}

/// Dispatched call marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Call {}

impl IdMarker for Call {
    fn prefix() -> &'static str {
        "call-"
    }
}

/// History entry marker (publish / sync results).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Entry {}

impl IdMarker for Entry {
    fn prefix() -> &'static str {
        "entry-"
    }
}

/// Identifier of one dispatched operation.
pub type CallId = Id<Call>;

/// Identifier of one publish / sync history record.
pub type EntryId = Id<Entry>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_prefix_but_key_does_not() {
        let ulid = Ulid::new();
        let call = CallId::from_ulid(ulid);

        assert_eq!(call.to_string(), format!("call-{ulid}"));
        assert_eq!(call.key(), ulid.to_string());
    }

    #[test]
    fn parses_prefixed_and_bare_forms() {
        let call = CallId::from_ulid(Ulid::new());

        assert_eq!(call.to_string().parse::<CallId>().unwrap(), call);
        assert_eq!(call.key().parse::<CallId>().unwrap(), call);
    }

    #[test]
    fn serializes_as_bare_string() {
        let entry = EntryId::from_ulid(Ulid::new());
        let value = serde_json::to_value(entry).unwrap();

        assert_eq!(value, serde_json::Value::String(entry.key()));
        let back: EntryId = serde_json::from_value(value).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn phantom_marker_is_free() {
        assert_eq!(std::mem::size_of::<CallId>(), std::mem::size_of::<Ulid>());
    }
}
