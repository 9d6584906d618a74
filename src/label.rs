//! Ordered label tuples.
//!
//! A [`LabelSet`] is the identity of a child within its family: an immutable
//! ordered run of name/value pairs. Families guarantee that every child
//! shares the family schema, so equality and the precomputed fingerprint
//! cover the values only, which is what makes the child lookup a single hash
//! probe.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::error::Error;
use crate::formatting::escape_label_value;

/// An ordered set of label name/value pairs.
#[derive(Clone, Debug)]
pub struct LabelSet {
    names: Vec<String>,
    values: Vec<String>,
    fingerprint: u64,
}

impl LabelSet {
    /// Creates a label set from parallel name and value vectors.
    ///
    /// Fails if the vectors have different lengths. Empty vectors are valid
    /// and produce the empty label set.
    pub fn new(names: Vec<String>, values: Vec<String>) -> Result<Self, Error> {
        if names.len() != values.len() {
            return Err(Error::LabelArityMismatch {
                expected: names.len(),
                actual: values.len(),
            });
        }
        let fingerprint = fingerprint(&values);
        Ok(Self { names, values, fingerprint })
    }

    /// Creates the empty label set.
    pub fn empty() -> Self {
        Self { names: Vec::new(), values: Vec::new(), fingerprint: fingerprint(&[]) }
    }

    /// Appends a single name/value pair.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.names.push(name.into());
        self.values.push(value.into());
        self.fingerprint = fingerprint(&self.values);
    }

    /// Appends every pair of `other`, preserving order.
    pub fn append(&mut self, other: &LabelSet) {
        self.names.extend_from_slice(&other.names);
        self.values.extend_from_slice(&other.values);
        self.fingerprint = fingerprint(&self.values);
    }

    /// Number of pairs in the set.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the set holds no pairs.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// The label names, in order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// The label values, in order.
    pub fn values(&self) -> &[String] {
        &self.values
    }

    /// Renders the set as `k1="v1",k2="v2",…` with escaped values.
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        self.serialize_into(&mut out);
        out
    }

    pub(crate) fn serialize_into(&self, out: &mut String) {
        for (i, (name, value)) in self.names.iter().zip(&self.values).enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push_str(name);
            out.push_str("=\"");
            escape_label_value(value, out);
            out.push('"');
        }
    }
}

// Children are keyed by their value tuple alone; the family already
// guarantees that all of its children carry the same names.
impl PartialEq for LabelSet {
    fn eq(&self, other: &Self) -> bool {
        self.fingerprint == other.fingerprint && self.values == other.values
    }
}

impl Eq for LabelSet {}

impl Hash for LabelSet {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.fingerprint);
    }
}

fn fingerprint(values: &[String]) -> u64 {
    let mut hasher = DefaultHasher::new();
    for value in values {
        value.hash(&mut hasher);
    }
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::LabelSet;
    use crate::error::Error;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_construction_and_append() {
        let mut labels = LabelSet::new(strings(&["Name1", "Name2"]), strings(&["Val1", "Val2"]))
            .expect("matched arity");
        labels.push("Name3", "Val3");

        let tail = LabelSet::new(strings(&["Name4", "Name5"]), strings(&["Val4", "Val5"]))
            .expect("matched arity");
        labels.append(&tail);

        assert_eq!(labels.len(), 5);
        assert_eq!(
            labels.serialize(),
            "Name1=\"Val1\",Name2=\"Val2\",Name3=\"Val3\",Name4=\"Val4\",Name5=\"Val5\""
        );
    }

    #[test]
    fn test_mismatched_arity_fails() {
        let result = LabelSet::new(strings(&["Name1", "Name2"]), strings(&["Val1"]));
        assert_eq!(result.unwrap_err(), Error::LabelArityMismatch { expected: 2, actual: 1 });
    }

    #[test]
    fn test_empty_set() {
        let labels = LabelSet::new(Vec::new(), Vec::new()).expect("empty is valid");
        assert_eq!(labels.len(), 0);
        assert!(labels.is_empty());
        assert_eq!(labels.serialize(), "");
        assert_eq!(labels, LabelSet::empty());
    }

    #[test]
    fn test_equality_covers_values_only() {
        let a = LabelSet::new(strings(&["x"]), strings(&["1"])).unwrap();
        let b = LabelSet::new(strings(&["y"]), strings(&["1"])).unwrap();
        let c = LabelSet::new(strings(&["x"]), strings(&["2"])).unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_value_escaping() {
        let labels =
            LabelSet::new(strings(&["msg"]), strings(&["a \"b\"\\c\r\nd"])).unwrap();
        assert_eq!(labels.serialize(), "msg=\"a \\\"b\\\"\\\\c\\nd\"");
    }
}
