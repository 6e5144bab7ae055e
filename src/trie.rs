//! Build-time trie over content hashes
//!
//! The trie is a scaffold used while laying out an archive: every hash is
//! inserted once and the trie reports how many leading units are needed to
//! tell each hash apart from all others. Nothing is ever removed; the trie is
//! dropped (or cleared) as a whole when the build is done.
//!
//! ```text
//! root ─┬─ 01 ─┬─ 02 ─┬─ 03 → Leaf(0102 03..)   depth 3
//!       │      │      └─ 04 → Leaf(0102 04..)   depth 3
//!       │      └─ 7f → Leaf(017f ..)            depth 2
//!       └─ a0 → Leaf(a0 ..)                     depth 1
//! ```

use crate::error::{ArchiveError, Result};
use crate::hash::{ContentHash, HASH_LEN};
use ahash::AHashMap;
use std::collections::hash_map::{Entry, Values};
use std::collections::BTreeMap;
use std::ops::ControlFlow;

/// Number of distinct leading units
pub const NUM_PREFIXES: usize = 256;

/// A trie node: either a single hash or a fan-out on the next unit
#[derive(Debug)]
enum Node {
    Leaf(ContentHash),
    Branch(Branch),
}

#[derive(Debug, Default)]
struct Branch {
    children: AHashMap<u8, Node>,
    /// Number of hashes stored beneath this branch
    occupancy: u32,
}

impl Branch {
    /// Branch holding a single leaf re-keyed on the unit at `depth`
    fn holding(leaf: ContentHash, depth: usize) -> Self {
        let mut children = AHashMap::with_capacity(2);
        children.insert(leaf.unit(depth), Node::Leaf(leaf));
        Branch {
            children,
            occupancy: 1,
        }
    }
}

impl Node {
    /// Split a leaf into a branch one level deeper, then descend into it
    fn split_into_branch(&mut self, depth: usize) -> &mut Branch {
        if let Node::Leaf(existing) = *self {
            *self = Node::Branch(Branch::holding(existing, depth));
        }
        match self {
            Node::Branch(branch) => branch,
            Node::Leaf(_) => unreachable!("leaf was split above"),
        }
    }
}

/// Trie over 256-bit hashes that tracks the minimum number of units needed
/// to keep every inserted hash unique
#[derive(Debug, Default)]
pub struct HashTrie {
    root: Branch,
    max_depth: usize,
}

impl HashTrie {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a hash, returning its discriminating depth
    ///
    /// The depth is the number of units on the path from the root to the new
    /// leaf, i.e. one more than the longest prefix shared with any hash
    /// already present. Fails with [`ArchiveError::DuplicateHash`] when the
    /// hash is already stored; the trie is left untouched in that case.
    pub fn insert(&mut self, hash: ContentHash) -> Result<usize> {
        if self.contains(&hash) {
            return Err(ArchiveError::DuplicateHash(hash));
        }

        let mut branch = &mut self.root;
        let mut depth = 0;
        loop {
            branch.occupancy += 1;
            let unit = hash.unit(depth);
            depth += 1;

            let node = match branch.children.entry(unit) {
                Entry::Vacant(slot) => {
                    slot.insert(Node::Leaf(hash));
                    break;
                }
                Entry::Occupied(slot) => slot.into_mut(),
            };

            // Every unit matched the existing leaf; contains() rules this out
            if depth == HASH_LEN {
                return Err(ArchiveError::DuplicateHash(hash));
            }

            branch = node.split_into_branch(depth);
        }

        self.max_depth = self.max_depth.max(depth);
        Ok(depth)
    }

    /// Check whether a hash has been inserted
    pub fn contains(&self, hash: &ContentHash) -> bool {
        let mut branch = &self.root;
        for depth in 0..HASH_LEN {
            match branch.children.get(&hash.unit(depth)) {
                None => return false,
                Some(Node::Leaf(existing)) => return existing == hash,
                Some(Node::Branch(next)) => branch = next,
            }
        }
        false
    }

    /// Largest depth returned by any insertion
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Number of distinct hashes stored
    pub fn len(&self) -> usize {
        self.root.occupancy as usize
    }

    pub fn is_empty(&self) -> bool {
        self.root.occupancy == 0
    }

    /// Drop every node and reset the depth tracking
    pub fn clear(&mut self) {
        self.root = Branch::default();
        self.max_depth = 0;
    }

    /// Lazy traversal yielding each stored hash with its discriminating depth
    ///
    /// Order follows the child maps and is not stable across runs.
    pub fn iter(&self) -> Leaves<'_> {
        Leaves {
            stack: vec![(self.root.children.values(), 1)],
        }
    }

    /// Visit every hash with its depth; the visitor may break early
    ///
    /// Returns `true` if the visitor stopped the traversal.
    pub fn for_each<F>(&self, mut visitor: F) -> bool
    where
        F: FnMut(&ContentHash, usize) -> ControlFlow<()>,
    {
        for (hash, depth) in self.iter() {
            if visitor(&hash, depth).is_break() {
                return true;
            }
        }
        false
    }

    /// Maximum discriminating depth per leading byte, 0 for empty prefixes
    pub fn prefix_depths(&self) -> [u8; NUM_PREFIXES] {
        let mut depths = [0u8; NUM_PREFIXES];
        for (hash, depth) in self.iter() {
            let slot = &mut depths[hash.prefix() as usize];
            *slot = (*slot).max(depth as u8);
        }
        depths
    }

    /// Number of stored hashes at each discriminating depth
    pub fn depth_histogram(&self) -> BTreeMap<usize, usize> {
        let mut histogram = BTreeMap::new();
        for (_, depth) in self.iter() {
            *histogram.entry(depth).or_insert(0) += 1;
        }
        histogram
    }
}

/// Iterator returned by [`HashTrie::iter`]
pub struct Leaves<'a> {
    stack: Vec<(Values<'a, u8, Node>, usize)>,
}

impl<'a> Iterator for Leaves<'a> {
    type Item = (ContentHash, usize);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (children, depth) = self.stack.last_mut()?;
            let depth = *depth;
            match children.next() {
                None => {
                    self.stack.pop();
                }
                Some(Node::Leaf(hash)) => return Some((*hash, depth)),
                Some(Node::Branch(branch)) => {
                    self.stack.push((branch.children.values(), depth + 1));
                }
            }
        }
    }
}
