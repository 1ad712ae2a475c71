use serde_json::{Map, Value};

/// Ordered keyed view over a decoded JSON value.
///
/// Objects keep their keys, arrays are keyed by position, and any other
/// non-null value becomes a single entry at key `"0"`.
#[derive(Clone, Debug, PartialEq)]
pub struct Collection {
    entries: Vec<(String, Value)>,
    sequential: bool,
}

impl Collection {
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Null => Self {
                entries: Vec::new(),
                sequential: true,
            },
            Value::Array(items) => Self {
                entries: items
                    .into_iter()
                    .enumerate()
                    .map(|(index, item)| (index.to_string(), item))
                    .collect(),
                sequential: true,
            },
            Value::Object(map) => Self {
                entries: map.into_iter().collect(),
                sequential: false,
            },
            scalar => Self {
                entries: vec![("0".to_owned(), scalar)],
                sequential: true,
            },
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(entry_key, _)| entry_key == key)
            .map(|(_, value)| value)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn first(&self) -> Option<&Value> {
        self.entries.first().map(|(_, value)| value)
    }

    pub fn last(&self) -> Option<&Value> {
        self.entries.last().map(|(_, value)| value)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }

    /// `field` of every object entry that has it, in order.
    pub fn pluck(&self, field: &str) -> Vec<&Value> {
        self.values()
            .filter_map(|value| value.as_object().and_then(|map| map.get(field)))
            .collect()
    }

    /// Entries accepted by `predicate`. Positional keys are renumbered.
    pub fn filter<F>(&self, mut predicate: F) -> Self
    where
        F: FnMut(&Value) -> bool,
    {
        let kept = self
            .entries
            .iter()
            .filter(|(_, value)| predicate(value))
            .cloned();
        if self.sequential {
            Self::from_value(Value::Array(kept.map(|(_, value)| value).collect()))
        } else {
            Self {
                entries: kept.collect(),
                sequential: false,
            }
        }
    }

    pub fn into_value(self) -> Value {
        if self.sequential {
            Value::Array(self.entries.into_iter().map(|(_, value)| value).collect())
        } else {
            Value::Object(self.entries.into_iter().collect::<Map<_, _>>())
        }
    }
}

impl Default for Collection {
    fn default() -> Self {
        Self::from_value(Value::Null)
    }
}

impl IntoIterator for Collection {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
