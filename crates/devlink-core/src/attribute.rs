/*!
 * Attributes and attribute sets.
 *
 * An [`Attribute`] names one typed field a device can report. Attributes are
 * interned: constructing the same `(id, type)` pair twice yields handles to the
 * same allocation, so containment checks usually resolve on pointer identity.
 */
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Identifier of the synthetic timestamp attribute
pub const TIMESTAMP_ID: &str = "timestamp";

/// The declared type of an attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeType {
    /// Boolean readings
    Boolean,
    /// Integer readings
    Integer,
    /// Floating-point readings
    Float,
    /// Text readings
    String,
    /// Raw bytes
    Binary,
    /// Points in time
    Timestamp,
    /// Untyped
    Any,
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AttributeType::Boolean => "boolean",
            AttributeType::Integer => "integer",
            AttributeType::Float => "float",
            AttributeType::String => "string",
            AttributeType::Binary => "binary",
            AttributeType::Timestamp => "timestamp",
            AttributeType::Any => "any",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
struct AttributeInner {
    id: String,
    ty: AttributeType,
}

type InternTable = RwLock<HashMap<(String, AttributeType), Arc<AttributeInner>>>;

fn intern_table() -> &'static InternTable {
    static TABLE: OnceLock<InternTable> = OnceLock::new();
    TABLE.get_or_init(|| RwLock::new(HashMap::new()))
}

/// A canonical, immutable `(id, type)` handle
#[derive(Clone)]
pub struct Attribute(Arc<AttributeInner>);

impl Attribute {
    /// Return the canonical attribute for `(id, ty)`, creating it on first use
    pub fn new<S: AsRef<str>>(id: S, ty: AttributeType) -> Self {
        let id = id.as_ref();
        let key = (id.to_string(), ty);

        if let Some(inner) = intern_table().read().get(&key) {
            return Self(inner.clone());
        }

        let mut table = intern_table().write();
        let inner = table
            .entry(key)
            .or_insert_with(|| {
                Arc::new(AttributeInner {
                    id: id.to_string(),
                    ty,
                })
            })
            .clone();
        Self(inner)
    }

    /// The synthetic timestamp attribute every delivered record carries
    pub fn timestamp() -> Self {
        Self::new(TIMESTAMP_ID, AttributeType::Timestamp)
    }

    /// Attribute identifier
    pub fn id(&self) -> &str {
        &self.0.id
    }

    /// Declared type
    pub fn attribute_type(&self) -> AttributeType {
        self.0.ty
    }

    /// Whether both handles point at the same interned allocation
    pub fn same_instance(&self, other: &Attribute) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Whether this is the synthetic timestamp attribute
    pub fn is_timestamp(&self) -> bool {
        self.id() == TIMESTAMP_ID && self.attribute_type() == AttributeType::Timestamp
    }
}

impl PartialEq for Attribute {
    fn eq(&self, other: &Self) -> bool {
        self.same_instance(other) || (self.0.id == other.0.id && self.0.ty == other.0.ty)
    }
}

impl Eq for Attribute {}

impl Hash for Attribute {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
        self.0.ty.hash(state);
    }
}

impl Ord for Attribute {
    fn cmp(&self, other: &Self) -> Ordering {
        if self.same_instance(other) {
            return Ordering::Equal;
        }
        self.0
            .id
            .cmp(&other.0.id)
            .then_with(|| self.0.ty.cmp(&other.0.ty))
    }
}

impl PartialOrd for Attribute {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.0.id, self.0.ty)
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.id)
    }
}

impl Serialize for Attribute {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (self.id(), self.attribute_type()).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Attribute {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (id, ty) = <(String, AttributeType)>::deserialize(deserializer)?;
        Ok(Attribute::new(id, ty))
    }
}

/// An ordered set of attributes
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttributeSet(BTreeSet<Attribute>);

impl AttributeSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an attribute, returning whether it was newly added
    pub fn insert(&mut self, attribute: Attribute) -> bool {
        self.0.insert(attribute)
    }

    /// Whether the set contains `attribute`
    pub fn contains(&self, attribute: &Attribute) -> bool {
        self.0.contains(attribute)
    }

    /// Whether the set contains an attribute with identifier `id`
    pub fn contains_id(&self, id: &str) -> bool {
        self.0.iter().any(|a| a.id() == id)
    }

    /// Whether every attribute of `other` is also in `self`
    pub fn is_superset_of(&self, other: &AttributeSet) -> bool {
        self.0.is_superset(&other.0)
    }

    /// Superset test that treats `ignored` as always satisfied
    pub fn covers(&self, requested: &AttributeSet, ignored: &Attribute) -> bool {
        requested
            .iter()
            .all(|a| a == ignored || self.contains(a))
    }

    /// Whether the two sets share no attribute
    pub fn is_disjoint(&self, other: &AttributeSet) -> bool {
        self.0.is_disjoint(&other.0)
    }

    /// Attributes present in both sets
    pub fn intersection(&self, other: &AttributeSet) -> AttributeSet {
        self.0.intersection(&other.0).cloned().collect()
    }

    /// Number of attributes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate in ascending order
    pub fn iter(&self) -> impl Iterator<Item = &Attribute> {
        self.0.iter()
    }
}

impl FromIterator<Attribute> for AttributeSet {
    fn from_iter<I: IntoIterator<Item = Attribute>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<const N: usize> From<[Attribute; N]> for AttributeSet {
    fn from(attributes: [Attribute; N]) -> Self {
        attributes.into_iter().collect()
    }
}

impl IntoIterator for AttributeSet {
    type Item = Attribute;
    type IntoIter = std::collections::btree_set::IntoIter<Attribute>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a AttributeSet {
    type Item = &'a Attribute;
    type IntoIter = std::collections::btree_set::Iter<'a, Attribute>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
