// 🧮 HierarchicalTally - Nested vote accumulator
// Addressed by an ordered key path: candidate × source × precinct × vote-type
//
// Exact integer addition only. Missing data tallies as zero, never as an
// error: reconciliation runs over ragged inputs and the absence of a
// precinct is itself a finding, handled elsewhere.

use serde::Serialize;
use std::collections::HashMap;

use crate::identity::Identity;

// ============================================================================
// PATH STEPS
// ============================================================================

/// One component of a read path. `Wildcard` sums every child at that level.
#[derive(Debug, Clone)]
pub enum Step {
    Key(Identity),
    Wildcard,
}

impl From<&Identity> for Step {
    fn from(id: &Identity) -> Self {
        Step::Key(id.clone())
    }
}

impl From<Identity> for Step {
    fn from(id: Identity) -> Self {
        Step::Key(id)
    }
}

// ============================================================================
// NODES
// ============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Node {
    Leaf(u64),
    Branch(HashMap<Identity, Node>),
}

impl Node {
    fn sum(&self) -> u64 {
        match self {
            Node::Leaf(v) => *v,
            Node::Branch(children) => children.values().map(Node::sum).sum(),
        }
    }
}

// ============================================================================
// HIERARCHICAL TALLY
// ============================================================================

/// Tree of vote counts addressed by Identity paths.
///
/// ```
/// use tally_audit::{HierarchicalTally, Identity, Step};
///
/// let cand = Identity::new("Ossoff").unwrap();
/// let src = Identity::new("sos").unwrap();
/// let prec = Identity::new("01A").unwrap();
/// let vt = Identity::new("day_of").unwrap();
///
/// let mut votes = HierarchicalTally::new();
/// votes.set(&[cand.clone(), src, prec, vt], 5);
/// assert_eq!(votes.tally(&[Step::from(&cand), Step::Wildcard, Step::Wildcard, Step::Wildcard]), 5);
/// ```
#[derive(Debug, Clone, Default, Serialize)]
pub struct HierarchicalTally {
    root: HashMap<Identity, Node>,
}

impl HierarchicalTally {
    pub fn new() -> Self {
        HierarchicalTally { root: HashMap::new() }
    }

    /// Write a leaf, creating every missing intermediate level.
    ///
    /// Overwrites an existing leaf outright. There is no implicit
    /// accumulation on duplicate writes; callers that want running totals
    /// pre-aggregate or use [`HierarchicalTally::add_to`].
    pub fn set(&mut self, path: &[Identity], value: u64) {
        let Some((last, intermediate)) = path.split_last() else {
            return;
        };
        let mut level = &mut self.root;
        for key in intermediate {
            let node = level
                .entry(key.clone())
                .or_insert_with(|| Node::Branch(HashMap::new()));
            // A shallower write may have left a leaf here; the deeper path
            // replaces it.
            if let Node::Leaf(_) = node {
                *node = Node::Branch(HashMap::new());
            }
            level = match node {
                Node::Branch(children) => children,
                Node::Leaf(_) => unreachable!("leaf replaced above"),
            };
        }
        level.insert(last.clone(), Node::Leaf(value));
    }

    /// Accumulating write: adds `delta` to the leaf at `path`, treating a
    /// missing leaf as zero. Loader-side convenience; `set` stays
    /// overwrite-only.
    pub fn add_to(&mut self, path: &[Identity], delta: u64) {
        let current = self.tally_exact(path);
        self.set(path, current + delta);
    }

    fn tally_exact(&self, path: &[Identity]) -> u64 {
        let mut node: Option<&Node> = None;
        let mut level = Some(&self.root);
        for key in path {
            let Some(children) = level else { return 0 };
            match children.get(key) {
                Some(n) => {
                    node = Some(n);
                    level = match n {
                        Node::Branch(c) => Some(c),
                        Node::Leaf(_) => None,
                    };
                }
                None => return 0,
            }
        }
        node.map_or(0, |n| match n {
            Node::Leaf(v) => *v,
            Node::Branch(_) => n.sum(),
        })
    }

    /// Partial-sum read.
    ///
    /// Wildcard steps sum every child recursively; absent keys contribute
    /// zero; a path shorter than the stored depth sums the whole subtree.
    pub fn tally(&self, path: &[Step]) -> u64 {
        Self::tally_level(&self.root, path)
    }

    fn tally_level(level: &HashMap<Identity, Node>, path: &[Step]) -> u64 {
        let Some((step, rest)) = path.split_first() else {
            return level.values().map(Node::sum).sum();
        };
        match step {
            Step::Wildcard => level
                .values()
                .map(|child| Self::tally_node(child, rest))
                .sum(),
            Step::Key(key) => level
                .get(key)
                .map_or(0, |child| Self::tally_node(child, rest)),
        }
    }

    fn tally_node(node: &Node, path: &[Step]) -> u64 {
        match node {
            // A scalar ends the walk no matter how much path remains.
            Node::Leaf(v) => *v,
            Node::Branch(children) => Self::tally_level(children, path),
        }
    }

    /// Top-level keys (candidates, usually).
    pub fn keys(&self) -> impl Iterator<Item = &Identity> {
        self.root.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Grand total over everything.
    pub fn total(&self) -> u64 {
        self.root.values().map(Node::sum).sum()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn id(label: &str) -> Identity {
        Identity::new(label).unwrap()
    }

    fn path(labels: &[&str]) -> Vec<Identity> {
        labels.iter().map(|l| id(l)).collect()
    }

    #[test]
    fn test_set_then_tally_round_trip() {
        let mut t = HierarchicalTally::new();
        t.set(&path(&["cand", "src", "precA", "day_of"]), 5);

        let steps: Vec<Step> = path(&["cand", "src", "precA", "day_of"])
            .into_iter()
            .map(Step::from)
            .collect();
        assert_eq!(t.tally(&steps), 5);
    }

    #[test]
    fn test_wildcard_sums_children() {
        let mut t = HierarchicalTally::new();
        t.set(&path(&["cand", "src", "precA", "day_of"]), 5);

        let steps = vec![
            Step::from(&id("cand")),
            Step::from(&id("src")),
            Step::from(&id("precA")),
            Step::Wildcard,
        ];
        assert_eq!(t.tally(&steps), 5);
    }

    #[test]
    fn test_wildcards_across_all_levels() {
        let mut t = HierarchicalTally::new();
        t.set(&path(&["cand", "sos", "01A", "day_of"]), 5);
        t.set(&path(&["cand", "sos", "01A", "absentee"]), 7);
        t.set(&path(&["cand", "sos", "01B", "day_of"]), 11);
        t.set(&path(&["cand", "tape", "01A", "day_of"]), 13);
        t.set(&path(&["other", "sos", "01A", "day_of"]), 1000);

        let steps = vec![
            Step::from(&id("cand")),
            Step::Wildcard,
            Step::Wildcard,
            Step::Wildcard,
        ];
        assert_eq!(t.tally(&steps), 5 + 7 + 11 + 13);
    }

    #[test]
    fn test_missing_path_returns_zero() {
        let mut t = HierarchicalTally::new();
        t.set(&path(&["cand", "src", "precA", "day_of"]), 5);

        let steps: Vec<Step> = path(&["nonexistent", "src", "precA", "day_of"])
            .into_iter()
            .map(Step::from)
            .collect();
        assert_eq!(t.tally(&steps), 0);
        assert_eq!(t.tally(&[Step::from(&id("cand")), Step::from(&id("nope"))]), 0);
    }

    #[test]
    fn test_short_path_sums_subtree() {
        let mut t = HierarchicalTally::new();
        t.set(&path(&["cand", "sos", "01A", "day_of"]), 5);
        t.set(&path(&["cand", "sos", "01B", "day_of"]), 7);

        assert_eq!(t.tally(&[Step::from(&id("cand"))]), 12);
        assert_eq!(t.tally(&[]), 12);
        assert_eq!(t.total(), 12);
    }

    #[test]
    fn test_overwrite_not_accumulate() {
        let mut t = HierarchicalTally::new();
        let p = path(&["cand", "sos", "01A", "day_of"]);
        t.set(&p, 5);
        t.set(&p, 9);

        let steps: Vec<Step> = p.into_iter().map(Step::from).collect();
        assert_eq!(t.tally(&steps), 9);
    }

    #[test]
    fn test_add_to_accumulates() {
        let mut t = HierarchicalTally::new();
        let p = path(&["cand", "sos", "01A", "day_of"]);
        t.add_to(&p, 5);
        t.add_to(&p, 9);

        let steps: Vec<Step> = p.into_iter().map(Step::from).collect();
        assert_eq!(t.tally(&steps), 14);
    }

    #[test]
    fn test_fuzzy_labels_do_not_collide_here() {
        // Tally keys hash by folded label: " 01a " and "01A" land on the
        // same node, but "Trump" and "Donald Trump" stay distinct.
        let mut t = HierarchicalTally::new();
        t.set(&path(&["Trump"]), 5);
        t.set(&path(&["Donald Trump"]), 7);
        t.set(&[id(" trump ")], 6);

        assert_eq!(t.tally(&[Step::from(&id("Trump"))]), 6);
        assert_eq!(t.total(), 13);
    }
}
