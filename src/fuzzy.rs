// 🗂️ FuzzyMap - Associative container keyed by Identity
// Exact, pattern and compound lookups with longest-match disambiguation
//
// Two lookup paths that are never conflated:
// - exact hits go through a case-folded hash index
// - fuzzy hits go through a linear scan in insertion order
// Pattern-based matching cannot live in a hash table (equal-by-pattern
// keys hash differently), so the scan is the only correct fuzzy path.

use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

use crate::identity::{Identity, IdentityError};

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum FuzzyMapError {
    /// No exact or fuzzy match for the requested key.
    #[error("key not found: {0}")]
    NotFound(String),
}

// ============================================================================
// KEYS
// ============================================================================

/// Map key: a single Identity, or a two-part compound key.
///
/// Compound keys represent already-merged entries (a tabulator covering
/// "SS15A" and "SS15B" at once). They require exact equality on both parts;
/// fuzzy matching never applies to them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum MapKey {
    Single(Identity),
    Pair(Identity, Identity),
}

impl MapKey {
    pub fn is_pair(&self) -> bool {
        matches!(self, MapKey::Pair(_, _))
    }

    /// The single identity, when this is not a compound key.
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            MapKey::Single(id) => Some(id),
            MapKey::Pair(_, _) => None,
        }
    }

    fn index_key(&self) -> IndexKey {
        match self {
            MapKey::Single(id) => IndexKey::One(id.folded().to_string()),
            MapKey::Pair(a, b) => {
                IndexKey::Two(a.folded().to_string(), b.folded().to_string())
            }
        }
    }
}

impl fmt::Display for MapKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapKey::Single(id) => write!(f, "{id}"),
            MapKey::Pair(a, b) => write!(f, "({a}, {b})"),
        }
    }
}

/// Exact-index key, case-folded.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum IndexKey {
    One(String),
    Two(String, String),
}

/// What a lookup is keyed on. An explicit tag per kind instead of runtime
/// type sniffing: callers say what they mean.
pub enum KeyQuery<'a> {
    /// Free text: exact first, then fuzzy scan.
    Text(&'a str),
    /// A compiled pattern applied to every single-identity key label.
    Pattern(&'a Regex),
    /// Compound key, exact equality on both parts.
    Pair(&'a str, &'a str),
    /// An already-resolved Identity, exact lookup by label.
    Id(&'a Identity),
}

impl<'a> From<&'a str> for KeyQuery<'a> {
    fn from(text: &'a str) -> Self {
        KeyQuery::Text(text)
    }
}

impl<'a> From<&'a Regex> for KeyQuery<'a> {
    fn from(pattern: &'a Regex) -> Self {
        KeyQuery::Pattern(pattern)
    }
}

impl<'a> From<(&'a str, &'a str)> for KeyQuery<'a> {
    fn from(pair: (&'a str, &'a str)) -> Self {
        KeyQuery::Pair(pair.0, pair.1)
    }
}

impl<'a> From<&'a Identity> for KeyQuery<'a> {
    fn from(id: &'a Identity) -> Self {
        KeyQuery::Id(id)
    }
}

// ============================================================================
// FUZZY MAP
// ============================================================================

/// Key-value container keyed by [`Identity`].
///
/// Insertion with a key that fuzzy-matches an existing key overwrites that
/// entry, so the map never holds two keys that match each other. Entries
/// are never removed; iteration is insertion order.
///
/// ```
/// use tally_audit::FuzzyMap;
///
/// let mut races: FuzzyMap<u32> = FuzzyMap::new();
/// races.add("Senate", 2, None, true).unwrap();
/// assert_eq!(*races.get("US Senate race").unwrap(), 2);
/// ```
pub struct FuzzyMap<V> {
    entries: Vec<(MapKey, V)>,
    exact: HashMap<IndexKey, usize>,
}

impl<V> FuzzyMap<V> {
    pub fn new() -> Self {
        FuzzyMap {
            entries: Vec::new(),
            exact: HashMap::new(),
        }
    }

    /// Look a key up.
    ///
    /// `best_match=true` scans every entry and keeps the match whose key
    /// label is longest (ties: first inserted). `best_match=false` returns
    /// the first fuzzy hit in insertion order. Exact hits win outright in
    /// both modes.
    pub fn search<'a, Q>(&self, query: Q, best_match: bool) -> Option<(&MapKey, &V)>
    where
        Q: Into<KeyQuery<'a>>,
    {
        match query.into() {
            KeyQuery::Text(text) => self.search_text(text, best_match),
            KeyQuery::Pattern(re) => self.search_pattern(re, best_match),
            KeyQuery::Pair(a, b) => {
                let key = IndexKey::Two(a.trim().to_lowercase(), b.trim().to_lowercase());
                self.exact
                    .get(&key)
                    .map(|&i| (&self.entries[i].0, &self.entries[i].1))
            }
            KeyQuery::Id(id) => {
                let key = IndexKey::One(id.folded().to_string());
                self.exact
                    .get(&key)
                    .map(|&i| (&self.entries[i].0, &self.entries[i].1))
            }
        }
    }

    fn search_text(&self, text: &str, best_match: bool) -> Option<(&MapKey, &V)> {
        let normalized = text.trim();
        let key = IndexKey::One(normalized.to_lowercase());
        if let Some(&i) = self.exact.get(&key) {
            return Some((&self.entries[i].0, &self.entries[i].1));
        }

        let mut best: Option<(&MapKey, &V)> = None;
        for (key, value) in &self.entries {
            // Compound keys never fuzzy-match free text.
            let id = match key.identity() {
                Some(id) => id,
                None => continue,
            };
            if !id.matches(normalized) {
                continue;
            }
            if !best_match {
                return Some((key, value));
            }
            if best.map_or(true, |(b, _)| {
                id.text().len() > b.identity().map_or(0, |i| i.text().len())
            }) {
                best = Some((key, value));
            }
        }
        best
    }

    fn search_pattern(&self, re: &Regex, best_match: bool) -> Option<(&MapKey, &V)> {
        let mut best: Option<(&MapKey, &V)> = None;
        for (key, value) in &self.entries {
            let id = match key.identity() {
                Some(id) => id,
                None => continue,
            };
            if !re.is_match(id.text()) {
                continue;
            }
            if !best_match {
                return Some((key, value));
            }
            if best.map_or(true, |(b, _)| {
                id.text().len() > b.identity().map_or(0, |i| i.text().len())
            }) {
                best = Some((key, value));
            }
        }
        best
    }

    /// First-match lookup, erroring when nothing matches.
    pub fn get<'a, Q>(&self, query: Q) -> Result<&V, FuzzyMapError>
    where
        Q: Into<KeyQuery<'a>>,
    {
        let query = query.into();
        let shown = describe(&query);
        self.search(query, false)
            .map(|(_, v)| v)
            .ok_or(FuzzyMapError::NotFound(shown))
    }

    pub fn contains<'a, Q>(&self, query: Q) -> bool
    where
        Q: Into<KeyQuery<'a>>,
    {
        self.search(query, false).is_some()
    }

    /// Insert or overwrite by label.
    ///
    /// Resolves the label through `search`: a fuzzy hit overwrites the
    /// stored value under the existing key (later insertion wins, no
    /// duplicate key is created); otherwise a new Identity is minted,
    /// with `pattern` attached when given. Returns the key that now holds
    /// the value.
    pub fn add(
        &mut self,
        label: &str,
        value: V,
        pattern: Option<&str>,
        best_match: bool,
    ) -> Result<Identity, IdentityError> {
        if let Some(idx) = self.position(label, best_match) {
            if let Some(pat) = pattern {
                if let Some(id) = self.entries[idx].0.identity() {
                    id.attach_pattern(pat)?;
                }
            }
            self.entries[idx].1 = value;
            let id = self.entries[idx]
                .0
                .identity()
                .expect("text search only hits single keys")
                .clone();
            return Ok(id);
        }

        let id = match pattern {
            Some(pat) => Identity::with_pattern(label, pat)?,
            None => Identity::new(label)?,
        };
        self.insert(MapKey::Single(id.clone()), value);
        Ok(id)
    }

    /// Get-or-create: when the label resolves to an existing entry return
    /// it untouched, otherwise build the value and insert it.
    pub fn build(
        &mut self,
        label: &str,
        make: impl FnOnce() -> V,
    ) -> Result<(Identity, &mut V), IdentityError> {
        if let Some(idx) = self.position(label, true) {
            let id = self.entries[idx]
                .0
                .identity()
                .expect("text search only hits single keys")
                .clone();
            return Ok((id, &mut self.entries[idx].1));
        }
        let id = Identity::new(label)?;
        self.insert(MapKey::Single(id.clone()), make());
        let last = self.entries.len() - 1;
        Ok((id, &mut self.entries[last].1))
    }

    /// Mutable best-match lookup by label.
    pub fn get_mut(&mut self, label: &str) -> Option<&mut V> {
        let idx = self.position(label, true)?;
        Some(&mut self.entries[idx].1)
    }

    /// Entry index for a text lookup, exact then fuzzy.
    fn position(&self, label: &str, best_match: bool) -> Option<usize> {
        let normalized = label.trim();
        let key = IndexKey::One(normalized.to_lowercase());
        if let Some(&i) = self.exact.get(&key) {
            return Some(i);
        }
        let mut best: Option<usize> = None;
        for (i, (key, _)) in self.entries.iter().enumerate() {
            let id = match key.identity() {
                Some(id) => id,
                None => continue,
            };
            if !id.matches(normalized) {
                continue;
            }
            if !best_match {
                return Some(i);
            }
            if best.map_or(true, |b| {
                let blen = self.entries[b].0.identity().map_or(0, |i| i.text().len());
                id.text().len() > blen
            }) {
                best = Some(i);
            }
        }
        best
    }

    /// Insert under an exact key (single or compound), overwriting any
    /// entry with the same exact key. Fuzzy resolution is `add`'s job.
    pub fn insert(&mut self, key: MapKey, value: V) {
        let index_key = key.index_key();
        if let Some(&i) = self.exact.get(&index_key) {
            self.entries[i] = (key, value);
            return;
        }
        self.exact.insert(index_key, self.entries.len());
        self.entries.push((key, value));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&MapKey, &V)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &MapKey> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.entries.iter().map(|(_, v)| v)
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut V> {
        self.entries.iter_mut().map(|(_, v)| v)
    }
}

impl<V> Default for FuzzyMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

// Serialized as a plain map of key label → value, insertion order kept.
impl<V: Serialize> Serialize for FuzzyMap<V> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(&key.to_string(), value)?;
        }
        map.end()
    }
}

fn describe(query: &KeyQuery<'_>) -> String {
    match query {
        KeyQuery::Text(t) => t.trim().to_string(),
        KeyQuery::Pattern(re) => format!("/{}/", re.as_str()),
        KeyQuery::Pair(a, b) => format!("({a}, {b})"),
        KeyQuery::Id(id) => id.text().to_string(),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;

    fn sample() -> FuzzyMap<i64> {
        let mut map = FuzzyMap::new();
        map.add("a", 1, None, true).unwrap();
        map.add("B", 2, None, true).unwrap();
        map.add("kyle", 10, Some(r".*\bkyle\b.*"), true).unwrap();
        map.add("timmy", 11, Some(r".*\btimmy\b.*"), true).unwrap();
        map.add("jimmy", 12, Some(r"jimmy\b.*"), true).unwrap();
        map
    }

    #[test]
    fn test_exact_and_folded_lookup() {
        let map = sample();
        assert_eq!(*map.get("a").unwrap(), 1);
        assert_eq!(*map.get("b").unwrap(), 2);
        assert_eq!(*map.get(" B ").unwrap(), 2);
    }

    #[test]
    fn test_fuzzy_lookup_through_patterns() {
        let map = sample();
        assert_eq!(*map.get("a xyz").unwrap(), 1);
        assert_eq!(*map.get("!TIMMY!").unwrap(), 11);
        // jimmy's pattern anchors at the word start
        assert_eq!(*map.get("jimmy jam").unwrap(), 12);
    }

    #[test]
    fn test_first_match_vs_best_match() {
        let map = sample();
        // get() walks insertion order: kyle comes first
        assert_eq!(*map.get("kyle timmy").unwrap(), 10);
        // best_match keeps the longest key label
        let (key, value) = map.search("kyle timmy", true).unwrap();
        assert_eq!(key.identity().unwrap().text(), "timmy");
        assert_eq!(*value, 11);
    }

    #[test]
    fn test_equal_length_tie_breaks_by_insertion_order() {
        let map = sample();
        // "jimmy timmy" matches both five-letter keys (jimmy's pattern
        // anchors at the start, which holds here). Equal label length, so
        // the earlier insertion wins: timmy.
        let (key, _) = map.search("jimmy timmy", true).unwrap();
        assert_eq!(key.identity().unwrap().text(), "timmy");
    }

    #[test]
    fn test_not_found_is_an_error() {
        let map = sample();
        assert!(matches!(
            map.get("KEY_NOT_FOUND"),
            Err(FuzzyMapError::NotFound(_))
        ));
    }

    #[test]
    fn test_collision_overwrite_reduces_entries() {
        let mut map = FuzzyMap::new();
        map.add("a", 0, None, true).unwrap();
        map.add("a b", 1, None, true).unwrap(); // fuzzy-hits "a", overwrites
        map.add("ab", 2, None, true).unwrap(); // no word boundary, new key

        assert!(map.len() < 3);
        assert_eq!(*map.get("a").unwrap(), 1);
        assert_eq!(*map.get("ab").unwrap(), 2);
    }

    #[test]
    fn test_pair_keys_require_exact_equality() {
        let mut map = FuzzyMap::new();
        let a = Identity::new("SS15A").unwrap();
        let b = Identity::new("SS15B").unwrap();
        map.insert(MapKey::Pair(a, b), 7);

        assert_eq!(*map.get(("SS15A", "SS15B")).unwrap(), 7);
        assert!(map.get(("SS15A", "SS15C")).is_err());
        // Free text never fuzzy-matches a compound key
        assert!(map.get("SS15A").is_err());
    }

    #[test]
    fn test_pattern_query_longest_match() {
        let map = sample();
        let re = Regex::new(r"^.immy$").unwrap();
        let (key, _) = map.search(&re, true).unwrap();
        // timmy and jimmy both match and tie on length: first inserted wins
        assert_eq!(key.identity().unwrap().text(), "timmy");
    }

    #[test]
    fn test_build_keeps_existing() {
        let mut map = FuzzyMap::new();
        map.add("Fulton", 1, None, true).unwrap();
        let (_, v) = map.build("Fulton County", || 99).unwrap();
        assert_eq!(*v, 1); // fuzzy hit, value untouched
        let (_, v) = map.build("Cobb", || 99).unwrap();
        assert_eq!(*v, 99);
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_identity_query_is_exact() {
        let map = sample();
        let id = Identity::new("kyle").unwrap();
        let (_, v) = map.search(&id, true).unwrap();
        assert_eq!(*v, 10);
    }
}
