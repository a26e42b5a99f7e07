// 🗳️ Identity - Canonical labels + fuzzy matching
// One stable token per real-world entity (precinct, candidate, race...)
//
// Problem solved:
// - "Ga Senate 1", "Georgia Senate (Perdue)", "GA SENATE 1 " → same race
// - "01A", " 01a" → same precinct
// - Sources never agree on spelling, so equality can't be plain string
//   equality. Each Identity carries an optional match pattern and the
//   registry guarantees a single instance per distinct label.

use regex::{Regex, RegexBuilder};
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use thiserror::Error;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum IdentityError {
    /// Caller tried to register an Identity whose label is already taken.
    /// This is a programming error (double-wrap), not a data problem.
    #[error("'{0}' is already a registered identity")]
    IdentityConflict(String),

    /// The supplied match pattern failed to compile.
    #[error("invalid match pattern for '{label}': {source}")]
    BadPattern {
        label: String,
        #[source]
        source: Box<regex::Error>,
    },
}

// ============================================================================
// IDENTITY
// ============================================================================

/// How an Identity matches candidate text beyond exact label equality.
#[derive(Debug)]
enum Matcher {
    /// Exact label comparison only. Fuzzy matching disabled.
    Disabled,
    /// Derived pattern: the label as a whole word anywhere in the text.
    Default(Regex),
    /// Caller-supplied pattern, anchored to cover the whole candidate.
    Explicit(Regex),
}

#[derive(Debug)]
struct IdentityInner {
    /// Trimmed label, original casing kept for display.
    label: String,
    /// Case-folded label used for equality and hashing.
    folded: String,
    matcher: RwLock<Matcher>,
}

/// A canonical, fuzzy-comparable label.
///
/// Cheap to clone (shared inner). `Eq` and `Hash` use the case-folded label
/// ONLY, so Identity is safe as a key in std maps. Pattern-based comparison
/// goes through [`Identity::matches`]; the two are deliberately separate
/// because pattern equality is not transitive and would corrupt hash tables.
///
/// ```
/// use tally_audit::Identity;
///
/// let trump = Identity::new("Trump").unwrap();
/// assert!(trump.matches("Donald Trump"));
/// assert!(!trump.matches("Trumpet"));
/// ```
#[derive(Debug, Clone)]
pub struct Identity {
    inner: Arc<IdentityInner>,
}

impl Identity {
    /// Identity with the default whole-word pattern derived from the label.
    pub fn new(label: &str) -> Result<Self, IdentityError> {
        let label = label.trim();
        let pat = format!(r".*\b{}\b.*", regex::escape(label));
        let re = compile_anchored(&pat).map_err(|e| IdentityError::BadPattern {
            label: label.to_string(),
            source: Box::new(e),
        })?;
        Ok(Self::build(label, Matcher::Default(re)))
    }

    /// Identity that only matches its exact label. No fuzzy matching.
    pub fn literal(label: &str) -> Self {
        Self::build(label.trim(), Matcher::Disabled)
    }

    /// Identity with an explicit match pattern. The pattern must cover the
    /// whole candidate string when matching (it is anchored on compile).
    pub fn with_pattern(label: &str, pattern: &str) -> Result<Self, IdentityError> {
        let label = label.trim();
        let re = compile_anchored(pattern).map_err(|e| IdentityError::BadPattern {
            label: label.to_string(),
            source: Box::new(e),
        })?;
        Ok(Self::build(label, Matcher::Explicit(re)))
    }

    fn build(label: &str, matcher: Matcher) -> Self {
        Identity {
            inner: Arc::new(IdentityInner {
                label: label.to_string(),
                folded: label.to_lowercase(),
                matcher: RwLock::new(matcher),
            }),
        }
    }

    /// The canonical label text. Explicit accessor instead of string
    /// inheritance: anything that needs "looks like a string" calls this.
    pub fn text(&self) -> &str {
        &self.inner.label
    }

    /// Case-folded label. Shared with FuzzyMap's exact index.
    pub(crate) fn folded(&self) -> &str {
        &self.inner.folded
    }

    /// True when fuzzy matching is disabled for this identity.
    pub fn is_literal(&self) -> bool {
        matches!(*self.inner.matcher.read().unwrap(), Matcher::Disabled)
    }

    /// True when an explicit caller pattern is attached.
    pub fn has_explicit_pattern(&self) -> bool {
        matches!(*self.inner.matcher.read().unwrap(), Matcher::Explicit(_))
    }

    /// Attach an explicit pattern to an identity that still uses the
    /// derived default. Identities are otherwise immutable: an existing
    /// explicit pattern is never replaced, and a literal identity stays
    /// literal.
    pub fn attach_pattern(&self, pattern: &str) -> Result<(), IdentityError> {
        let mut slot = self.inner.matcher.write().unwrap();
        if !matches!(*slot, Matcher::Default(_)) {
            return Ok(());
        }
        let re = compile_anchored(pattern).map_err(|e| IdentityError::BadPattern {
            label: self.inner.label.clone(),
            source: Box::new(e),
        })?;
        *slot = Matcher::Explicit(re);
        Ok(())
    }

    /// True if `text` equals the label (case-insensitive, trimmed) or the
    /// match pattern covers the entire candidate string.
    pub fn matches(&self, text: &str) -> bool {
        let candidate = text.trim();
        if candidate.to_lowercase() == self.inner.folded {
            return true;
        }
        match &*self.inner.matcher.read().unwrap() {
            Matcher::Disabled => false,
            Matcher::Default(re) | Matcher::Explicit(re) => re.is_match(candidate),
        }
    }

    /// Same underlying instance (the registry hands out shared clones).
    pub fn ptr_eq(&self, other: &Identity) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Compile a pattern so `is_match` behaves as a full-string match,
/// case-insensitively. Partial hits never count.
fn compile_anchored(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(&format!("^(?:{pattern})$"))
        .case_insensitive(true)
        .build()
}

// Equality and hashing are label-only. See the type-level docs.
impl PartialEq for Identity {
    fn eq(&self, other: &Self) -> bool {
        self.inner.folded == other.inner.folded
    }
}

impl Eq for Identity {}

impl std::hash::Hash for Identity {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.inner.folded.hash(state);
    }
}

// Cross-type comparison delegates to matches() in both directions so that
// `id == text` and `text == id` always agree.
impl PartialEq<str> for Identity {
    fn eq(&self, other: &str) -> bool {
        self.matches(other)
    }
}

impl PartialEq<&str> for Identity {
    fn eq(&self, other: &&str) -> bool {
        self.matches(other)
    }
}

impl PartialEq<Identity> for str {
    fn eq(&self, other: &Identity) -> bool {
        other.matches(self)
    }
}

impl PartialEq<Identity> for &str {
    fn eq(&self, other: &Identity) -> bool {
        other.matches(self)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner.label)
    }
}

impl Serialize for Identity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.inner.label)
    }
}

// ============================================================================
// IDENTITY REGISTRY
// ============================================================================

/// All Identities created for one run, in insertion order.
///
/// One registry per run, passed by reference to whatever needs label
/// resolution. Lookup is exact-first through a case-folded index, then a
/// linear fuzzy scan with longest-label-wins disambiguation (ties go to the
/// earliest insertion).
pub struct IdentityRegistry {
    entries: Vec<Identity>,
    exact: HashMap<String, usize>,
}

impl IdentityRegistry {
    pub fn new() -> Self {
        IdentityRegistry {
            entries: Vec::new(),
            exact: HashMap::new(),
        }
    }

    /// Resolve a label to its Identity, creating one if nothing matches.
    ///
    /// Resolution order: exact (normalized) label, then fuzzy scan keeping
    /// the match with the longest label. When an existing identity is found
    /// and `pattern` is supplied, the pattern is attached if the identity
    /// had none.
    pub fn resolve(
        &mut self,
        label: &str,
        pattern: Option<&str>,
    ) -> Result<Identity, IdentityError> {
        let normalized = label.trim();
        if let Some(existing) = self.search(normalized, true) {
            if let Some(pat) = pattern {
                existing.attach_pattern(pat)?;
            }
            return Ok(existing);
        }

        let id = match pattern {
            Some(pat) => Identity::with_pattern(normalized, pat)?,
            None => Identity::new(normalized)?,
        };
        self.insert(id.clone());
        Ok(id)
    }

    /// Register a pre-built Identity. Errors when the label is already
    /// taken: callers must resolve() instead of wrapping twice.
    pub fn register(&mut self, identity: Identity) -> Result<Identity, IdentityError> {
        if self.exact.contains_key(identity.folded()) {
            return Err(IdentityError::IdentityConflict(identity.text().to_string()));
        }
        self.insert(identity.clone());
        Ok(identity)
    }

    fn insert(&mut self, identity: Identity) {
        self.exact
            .insert(identity.folded().to_string(), self.entries.len());
        self.entries.push(identity);
    }

    /// Find an existing Identity without creating one.
    ///
    /// `best_match=false` returns the first fuzzy hit in insertion order;
    /// `best_match=true` scans everything and keeps the longest label.
    pub fn search(&self, label: &str, best_match: bool) -> Option<Identity> {
        let normalized = label.trim();
        let folded = normalized.to_lowercase();
        if let Some(&idx) = self.exact.get(&folded) {
            return Some(self.entries[idx].clone());
        }

        let mut best: Option<&Identity> = None;
        for candidate in &self.entries {
            if !candidate.matches(normalized) {
                continue;
            }
            if !best_match {
                return Some(candidate.clone());
            }
            // Strictly-greater keeps the first entry on equal lengths.
            if best.map_or(true, |b| candidate.text().len() > b.text().len()) {
                best = Some(candidate);
            }
        }
        best.cloned()
    }

    pub fn contains(&self, label: &str) -> bool {
        self.search(label, false).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Identities in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Identity> {
        self.entries.iter()
    }
}

impl Default for IdentityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match_trims_and_folds() {
        let id = Identity::new("Biden").unwrap();
        assert!(id.matches("biden"));
        assert!(id.matches(" BIDEN "));
        assert_eq!(id.text(), "Biden");
    }

    #[test]
    fn test_default_pattern_whole_word() {
        let id = Identity::new("Trump").unwrap();
        assert!(id.matches("Donald Trump"));
        assert!(id.matches("TRUMP, DONALD J"));
        assert!(!id.matches("Trumpet"));
    }

    #[test]
    fn test_explicit_pattern_full_match_only() {
        let id = Identity::with_pattern("Joe Biden", r".*\b(brandon|biden)\b.*").unwrap();
        assert!(id.matches("Biden"));
        assert!(id.matches("let's go brandon"));
        assert!(!id.matches("bidenomics"));
    }

    #[test]
    fn test_literal_disables_fuzzy() {
        let id = Identity::literal("Write-in");
        assert!(id.matches("write-in"));
        assert!(!id.matches("Write-in candidate"));
    }

    #[test]
    fn test_equality_symmetry() {
        let id = Identity::new("Perdue").unwrap();
        assert!(id == "David Perdue");
        assert!("David Perdue" == id);
        assert!(id != "Ossoff");
        assert!("Ossoff" != id);
    }

    #[test]
    fn test_hash_ignores_pattern() {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let plain = Identity::new("kyle").unwrap();
        let patterned = Identity::with_pattern("kyle", r"kyle.*").unwrap();

        let mut h1 = DefaultHasher::new();
        let mut h2 = DefaultHasher::new();
        plain.hash(&mut h1);
        patterned.hash(&mut h2);
        assert_eq!(h1.finish(), h2.finish());
        assert_eq!(plain, patterned);
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let mut registry = IdentityRegistry::new();
        let a = registry.resolve("Biden", None).unwrap();
        let b = registry.resolve("Biden", None).unwrap();
        let c = registry.resolve(" biden ", None).unwrap();

        assert!(a.ptr_eq(&b));
        assert!(a.ptr_eq(&c));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_resolve_fuzzy_returns_existing() {
        let mut registry = IdentityRegistry::new();
        let short = registry.resolve("Warnock", None).unwrap();
        let resolved = registry.resolve("Raphael Warnock", None).unwrap();

        assert!(short.ptr_eq(&resolved));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_resolve_longest_label_wins() {
        let mut registry = IdentityRegistry::new();
        registry.resolve("kyle", None).unwrap();
        registry.resolve("timmy", None).unwrap();

        let found = registry.search("kyle timmy", true).unwrap();
        assert_eq!(found.text(), "timmy");

        // First-match mode returns the earliest insertion instead.
        let first = registry.search("kyle timmy", false).unwrap();
        assert_eq!(first.text(), "kyle");
    }

    #[test]
    fn test_register_conflict() {
        let mut registry = IdentityRegistry::new();
        registry.resolve("Fulton", None).unwrap();

        let dup = Identity::new("fulton").unwrap();
        let err = registry.register(dup).unwrap_err();
        assert!(matches!(err, IdentityError::IdentityConflict(_)));
    }

    #[test]
    fn test_attach_pattern_on_later_resolve() {
        let mut registry = IdentityRegistry::new();
        registry.resolve("advanced", None).unwrap();

        let id = registry.resolve("advanced", Some(r"advanced.voting.*")).unwrap();
        assert!(id.has_explicit_pattern());
        assert!(id.matches("Advanced Voting Votes"));
        assert!(!id.matches("the advanced one"));
    }

    #[test]
    fn test_bad_pattern_is_an_error() {
        let err = Identity::with_pattern("x", r"(unclosed").unwrap_err();
        assert!(matches!(err, IdentityError::BadPattern { .. }));
    }
}
