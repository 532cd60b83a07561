//! Performance oriented JSON manipulation.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json_bytes::ByteString;
use serde_json_bytes::Entry;
use serde_json_bytes::Map;
pub use serde_json_bytes::Value;

/// A JSON object.
pub type Object = Map<ByteString, Value>;

/// Extension trait for [`serde_json_bytes::Value`].
pub trait ValueExt {
    /// Deep merge the JSON objects, array and override the values in `&mut self` if they already
    /// exists.
    #[track_caller]
    fn deep_merge(&mut self, other: Self);
}

impl ValueExt for Value {
    fn deep_merge(&mut self, other: Self) {
        match (self, other) {
            (Value::Object(a), Value::Object(b)) => {
                for (key, value) in b.into_iter() {
                    match a.entry(key) {
                        Entry::Vacant(e) => {
                            e.insert(value);
                        }
                        Entry::Occupied(e) => {
                            e.into_mut().deep_merge(value);
                        }
                    }
                }
            }
            (Value::Array(a), Value::Array(mut b)) => {
                for (b_value, a_value) in b.drain(..std::cmp::min(a.len(), b.len())).zip(a.iter_mut()) {
                    a_value.deep_merge(b_value);
                }

                a.extend(b);
            }
            (_, Value::Null) => {}
            (Value::Object(_), Value::Array(_)) => {}
            (Value::Array(_), Value::Object(_)) => {}
            (a, b) => {
                *a = b;
            }
        }
    }
}

/// Inserts every entry of `other` whose key is not already present in `target`.
///
/// Returns the keys that were taken from `other`.
pub fn merge_first_wins(target: &mut Object, other: Object) -> Vec<ByteString> {
    let mut taken = Vec::new();
    for (key, value) in other {
        if let Entry::Vacant(entry) = target.entry(key.clone()) {
            entry.insert(value);
            taken.push(key);
        }
    }
    taken
}

/// A GraphQL path element that is composes of strings or numbers.
/// e.g `/book/3/name`
#[derive(Clone, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(untagged)]
pub enum PathElement {
    /// An index path element.
    Index(usize),

    /// A key path element.
    Key(String),
}

impl PathElement {
    pub fn as_key(&self) -> Option<&str> {
        match self {
            PathElement::Key(key) => Some(key.as_str()),
            PathElement::Index(_) => None,
        }
    }

    pub fn as_index(&self) -> Option<usize> {
        match self {
            PathElement::Index(index) => Some(*index),
            PathElement::Key(_) => None,
        }
    }
}

impl fmt::Display for PathElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathElement::Index(index) => write!(f, "{index}"),
            PathElement::Key(key) => write!(f, "{key}"),
        }
    }
}

impl From<&str> for PathElement {
    fn from(key: &str) -> Self {
        PathElement::Key(key.to_string())
    }
}

impl From<String> for PathElement {
    fn from(key: String) -> Self {
        PathElement::Key(key)
    }
}

impl From<usize> for PathElement {
    fn from(index: usize) -> Self {
        PathElement::Index(index)
    }
}

/// A path into the result document.
///
/// This can be composed of strings and numbers
#[derive(Clone, Deserialize, Serialize, Default, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct Path(pub Vec<PathElement>);

impl Path {
    pub fn empty() -> Path {
        Path(Default::default())
    }

    pub fn from_slice<T: AsRef<str>>(s: &[T]) -> Self {
        Self(
            s.iter()
                .map(|x| x.as_ref())
                .map(|s| {
                    if let Ok(index) = s.parse::<usize>() {
                        PathElement::Index(index)
                    } else {
                        PathElement::Key(s.to_string())
                    }
                })
                .collect(),
        )
    }

    pub fn iter(&self) -> impl Iterator<Item = &PathElement> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn first(&self) -> Option<&PathElement> {
        self.0.first()
    }

    pub fn get(&self, index: usize) -> Option<&PathElement> {
        self.0.get(index)
    }

    pub fn push(&mut self, element: PathElement) {
        self.0.push(element)
    }

    pub fn join(&self, other: impl AsRef<Self>) -> Self {
        let other = other.as_ref();
        let mut new = Vec::with_capacity(self.len() + other.len());
        new.extend(self.iter().cloned());
        new.extend(other.iter().cloned());
        Path(new)
    }

    /// Returns a new path with `element` appended.
    pub fn child(&self, element: impl Into<PathElement>) -> Self {
        let mut new = self.clone();
        new.push(element.into());
        new
    }

    /// Returns the path without its first `count` elements.
    pub fn skip(&self, count: usize) -> Self {
        Path(self.0.iter().skip(count).cloned().collect())
    }

    pub fn parent(&self) -> Option<Self> {
        if self.is_empty() {
            None
        } else {
            Some(Path(self.iter().take(self.len() - 1).cloned().collect()))
        }
    }

    pub fn last_key(&self) -> Option<&str> {
        self.0.last().and_then(PathElement::as_key)
    }
}

impl AsRef<Path> for Path {
    fn as_ref(&self) -> &Path {
        self
    }
}

impl<T> From<T> for Path
where
    T: AsRef<str>,
{
    fn from(s: T) -> Self {
        Self(
            s.as_ref()
                .split('/')
                .filter(|s| !s.is_empty())
                .map(|s| {
                    if let Ok(index) = s.parse::<usize>() {
                        PathElement::Index(index)
                    } else {
                        PathElement::Key(s.to_string())
                    }
                })
                .collect(),
        )
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for element in self.iter() {
            write!(f, "/{element}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;

    use super::*;

    #[test]
    fn test_deep_merge_objects() {
        let mut value = json!({"obj":{"a":1,"list":[{"x":1}]}});
        value.deep_merge(json!({"obj":{"b":2,"list":[{"y":2}]}}));
        assert_eq!(
            value,
            json!({"obj":{"a":1,"list":[{"x":1,"y":2}],"b":2}})
        );
    }

    #[test]
    fn test_merge_first_wins_keeps_existing_values() {
        let mut target = json!({"id": "1", "name": "first"})
            .as_object()
            .cloned()
            .unwrap_or_default();
        let other = json!({"name": "second", "email": "a@b.c"})
            .as_object()
            .cloned()
            .unwrap_or_default();
        let taken = merge_first_wins(&mut target, other);
        assert_eq!(taken, vec![ByteString::from("email")]);
        assert_eq!(
            Value::Object(target),
            json!({"id": "1", "name": "first", "email": "a@b.c"})
        );
    }

    #[test]
    fn test_path_display_and_parse() {
        let path = Path::from("user/friends/1/name");
        assert_eq!(path.to_string(), "/user/friends/1/name");
        assert_eq!(path.get(2), Some(&PathElement::Index(1)));
        assert_eq!(path.skip(1), Path::from("friends/1/name"));
        assert_eq!(path.parent(), Some(Path::from("user/friends/1")));
        assert_eq!(path.last_key(), Some("name"));
    }

    #[test]
    fn test_path_serializes_as_array() {
        let path = Path::from("user/0/name");
        let value = serde_json_bytes::to_value(&path).unwrap();
        assert_eq!(value, json!(["user", 0, "name"]));
    }
}
