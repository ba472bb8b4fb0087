use crate::error::{kind_of, Result, StoreError};
use serde_json::{Map, Value};
use std::fmt;

/// One step into a nested value: an object field or an array index.
///
/// Keys are canonical: a field name made only of digits (`"0"`, `"12"`, but
/// not `"012"`) is stored as an index, so `at("0")` and `index(0)` address the
/// same location. An index applied to an object looks up the field of the
/// same name, and a numeric field applied to an array is an index.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    Field(String),
    Index(usize),
}

impl Key {
    /// Build a key from a field name, canonicalizing numeric names.
    pub fn field(name: impl Into<String>) -> Self {
        let name = name.into();
        match parse_index(&name) {
            Some(index) => Key::Index(index),
            None => Key::Field(name),
        }
    }

    fn lookup<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        match (value, self) {
            (Value::Object(map), Key::Field(name)) => map.get(name),
            (Value::Object(map), Key::Index(index)) => map.get(&index.to_string()),
            (Value::Array(items), Key::Index(index)) => items.get(*index),
            _ => None,
        }
    }
}

fn parse_index(text: &str) -> Option<usize> {
    let canonical = text == "0" || (!text.starts_with('0') && !text.is_empty());
    if canonical && text.bytes().all(|b| b.is_ascii_digit()) {
        text.parse().ok()
    } else {
        None
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Field(name) => f.write_str(name),
            Key::Index(index) => write!(f, "{index}"),
        }
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Key::field(name)
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Key::field(name)
    }
}

impl From<usize> for Key {
    fn from(index: usize) -> Self {
        Key::Index(index)
    }
}

/// A location inside the root state, as an ordered sequence of keys.
///
/// The empty path is the root. Paths order lexicographically by key, so every
/// descendant of a path sorts directly after it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Path(Vec<Key>);

impl Path {
    pub fn root() -> Self {
        Path(Vec::new())
    }

    pub fn new<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<Key>,
    {
        Path(keys.into_iter().map(Into::into).collect())
    }

    /// Parse dot syntax: `"cart.items.0"`. The empty string is the root.
    pub fn parse(text: &str) -> Self {
        if text.is_empty() {
            return Path::root();
        }
        Path::new(text.split('.'))
    }

    /// Parse an RFC 6901 JSON pointer: `"/cart/items/0"`.
    pub fn from_pointer(pointer: &str) -> Result<Self> {
        if pointer.is_empty() {
            return Ok(Path::root());
        }
        let Some(rest) = pointer.strip_prefix('/') else {
            return Err(StoreError::InvalidPointer(pointer.to_string()));
        };
        rest.split('/')
            .map(|token| unescape(token).ok_or_else(|| StoreError::InvalidPointer(pointer.to_string())))
            .collect::<Result<Vec<_>>>()
            .map(Path::new)
    }

    pub fn keys(&self) -> &[Key] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// This path extended by one key.
    pub fn child(&self, key: impl Into<Key>) -> Self {
        let mut keys = self.0.clone();
        keys.push(key.into());
        Path(keys)
    }

    /// This path extended by every key of `other`.
    pub fn join(&self, other: &Path) -> Self {
        let mut keys = self.0.clone();
        keys.extend(other.0.iter().cloned());
        Path(keys)
    }

    pub fn parent(&self) -> Option<Self> {
        self.0.split_last().map(|(_, parent)| Path(parent.to_vec()))
    }

    /// The first `len` keys of this path.
    pub(crate) fn prefix(&self, len: usize) -> Self {
        Path(self.0[..len.min(self.0.len())].to_vec())
    }

    /// True if `self` equals `other` or lies above it.
    pub fn contains(&self, other: &Path) -> bool {
        other.0.starts_with(&self.0)
    }

    /// True if `self` lies strictly above `other`.
    pub fn is_ancestor_of(&self, other: &Path) -> bool {
        self.0.len() < other.0.len() && self.contains(other)
    }

    /// True if neither path contains the other: a write at one can never
    /// change the value at the other.
    pub fn is_disjoint(&self, other: &Path) -> bool {
        !self.contains(other) && !other.contains(self)
    }

    /// The keys left after removing `ancestor` from the front.
    pub(crate) fn strip_prefix(&self, ancestor: &Path) -> Option<Path> {
        self.0
            .strip_prefix(ancestor.0.as_slice())
            .map(|rest| Path(rest.to_vec()))
    }

    /// Resolve this path in `value`. `None` means the location is absent.
    pub fn lookup<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        self.0.iter().try_fold(value, |current, key| key.lookup(current))
    }

    /// Resolve this path for writing, creating missing object fields on the
    /// way. A `null` met on the way becomes an empty object. Writing at index
    /// `len` of an array appends.
    ///
    /// Nothing is modified when an error is returned: failures only happen on
    /// values that already existed, and everything created before them is a
    /// fresh object that cannot fail.
    pub(crate) fn slot_mut<'a>(&self, root: &'a mut Value) -> Result<&'a mut Value> {
        let mut current = root;
        for (depth, key) in self.0.iter().enumerate() {
            if current.is_null() {
                *current = Value::Object(Map::new());
            }
            current = match current {
                Value::Object(map) => map.entry(key.to_string()).or_insert(Value::Null),
                Value::Array(items) => {
                    let index = match key {
                        Key::Index(index) => *index,
                        Key::Field(_) => {
                            return Err(StoreError::KeyMismatch {
                                path: self.prefix(depth),
                                key: key.clone(),
                                found: "an array",
                            })
                        }
                    };
                    let len = items.len();
                    if index > len {
                        return Err(StoreError::IndexOutOfBounds {
                            path: self.prefix(depth),
                            index,
                            len,
                        });
                    }
                    if index == len {
                        items.push(Value::Null);
                    }
                    &mut items[index]
                }
                other => {
                    return Err(StoreError::NotAContainer {
                        path: self.prefix(depth),
                        found: kind_of(other),
                    })
                }
            };
        }
        Ok(current)
    }

    /// Check that a write at this path would succeed, without creating
    /// anything. Fails exactly where [`slot_mut`](Path::slot_mut) would.
    pub(crate) fn check_writable(&self, root: &Value) -> Result<()> {
        let mut current = root;
        for (depth, key) in self.0.iter().enumerate() {
            current = match current {
                // Everything from here down would be created.
                Value::Null => return Ok(()),
                Value::Object(map) => match map.get(&key.to_string()) {
                    Some(next) => next,
                    None => return Ok(()),
                },
                Value::Array(items) => {
                    let Key::Index(index) = key else {
                        return Err(StoreError::KeyMismatch {
                            path: self.prefix(depth),
                            key: key.clone(),
                            found: "an array",
                        });
                    };
                    match items.get(*index) {
                        Some(next) => next,
                        None if *index == items.len() => return Ok(()),
                        None => {
                            return Err(StoreError::IndexOutOfBounds {
                                path: self.prefix(depth),
                                index: *index,
                                len: items.len(),
                            })
                        }
                    }
                }
                other => {
                    return Err(StoreError::NotAContainer {
                        path: self.prefix(depth),
                        found: kind_of(other),
                    })
                }
            };
        }
        Ok(())
    }
}

fn unescape(token: &str) -> Option<String> {
    let mut out = String::with_capacity(token.len());
    let mut chars = token.chars();
    while let Some(c) = chars.next() {
        if c == '~' {
            match chars.next() {
                Some('0') => out.push('~'),
                Some('1') => out.push('/'),
                _ => return None,
            }
        } else {
            out.push(c);
        }
    }
    Some(out)
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("<root>");
        }
        for (i, key) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{key}")?;
        }
        Ok(())
    }
}

impl From<&str> for Path {
    fn from(text: &str) -> Self {
        Path::parse(text)
    }
}

impl From<Vec<Key>> for Path {
    fn from(keys: Vec<Key>) -> Self {
        Path(keys)
    }
}
