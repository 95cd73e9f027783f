//! In-memory index structures used by the memory backend.
//!
//! Both structures keep a reverse map from ticket id to indexed value(s), so
//! a ticket can be removed knowing only its id.

use std::collections::{BTreeSet, HashMap};
use std::ops::Bound;

/// Totally ordered encoding of a finite `f64`.
///
/// Negative values have every bit flipped, positive values only the sign bit,
/// so the unsigned integer order matches numeric order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SortKey(u64);

impl SortKey {
    pub fn from_f64(v: f64) -> Self {
        // -0.0 and 0.0 must collide, otherwise a range starting at 0 misses -0.0
        let v = if v == 0.0 { 0.0 } else { v };
        let bits = v.to_bits();
        let ordered = if (bits >> 63) == 1 {
            !bits
        } else {
            bits ^ (1 << 63)
        };
        SortKey(ordered)
    }
}

/// Ordered index over one numeric field.
#[derive(Debug, Default)]
pub struct NumericTree {
    entries: BTreeSet<(SortKey, String)>,
    members: HashMap<String, SortKey>,
}

impl NumericTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or move `id` to `value`.
    pub fn insert(&mut self, id: &str, value: f64) {
        let key = SortKey::from_f64(value);
        if let Some(old) = self.members.insert(id.to_string(), key) {
            if old == key {
                return;
            }
            self.entries.remove(&(old, id.to_string()));
        }
        self.entries.insert((key, id.to_string()));
    }

    /// Returns true if `id` was present.
    pub fn remove(&mut self, id: &str) -> bool {
        match self.members.remove(id) {
            Some(key) => {
                self.entries.remove(&(key, id.to_string()));
                true
            }
            None => false,
        }
    }

    /// Ids whose value lies in `[min, max]`.
    pub fn range(&self, min: f64, max: f64) -> Vec<String> {
        let lo = SortKey::from_f64(min);
        let hi = SortKey::from_f64(max);
        if lo > hi {
            return Vec::new();
        }

        self.entries
            .range((Bound::Included((lo, String::new())), Bound::Unbounded))
            .take_while(|(key, _)| *key <= hi)
            .map(|(_, id)| id.clone())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Set-membership index over one tag field.
#[derive(Debug, Default)]
pub struct TagTree {
    by_value: HashMap<String, BTreeSet<String>>,
    by_member: HashMap<String, BTreeSet<String>>,
}

impl TagTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the tag values recorded for `id`.
    pub fn insert(&mut self, id: &str, values: &[String]) {
        self.remove(id);
        if values.is_empty() {
            return;
        }

        let mut recorded = BTreeSet::new();
        for value in values {
            self.by_value
                .entry(value.clone())
                .or_default()
                .insert(id.to_string());
            recorded.insert(value.clone());
        }
        self.by_member.insert(id.to_string(), recorded);
    }

    /// Returns true if `id` was present.
    pub fn remove(&mut self, id: &str) -> bool {
        let Some(values) = self.by_member.remove(id) else {
            return false;
        };

        for value in values {
            if let Some(ids) = self.by_value.get_mut(&value) {
                ids.remove(id);
                if ids.is_empty() {
                    self.by_value.remove(&value);
                }
            }
        }
        true
    }

    pub fn members(&self, value: &str) -> Vec<String> {
        self.by_value
            .get(value)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.by_member.is_empty()
    }
}
