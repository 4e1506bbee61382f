use rand::Rng;

use crate::memtable::Run;
use crate::types::{FixedWidth, KVPair};

/// Maximum height of the skip list. LevelDB uses 12.
pub const MAX_HEIGHT: usize = 12;

/// Probability that a node reaches the next level up.
const BRANCH_PROBABILITY: f64 = 0.5;

/// Arena index of the head sentinel (key = K::MIN).
const HEAD: usize = 0;
/// Arena index of the tail sentinel (key = K::MAX).
const TAIL: usize = 1;

/// A single node in the skip list.
///
/// Each node has `height` forward pointers, stored as indices into the
/// arena. Level 0 contains all nodes (a regular linked list). Higher levels
/// skip over nodes, enabling O(log n) average-case search.
///
/// ```text
/// Level 3:  HEAD ──────────────────────────────► 50 ──────────► TAIL
/// Level 2:  HEAD ──────────► 20 ────────────────► 50 ──────────► TAIL
/// Level 1:  HEAD ──► 10 ──► 20 ────► 35 ────────► 50 ──► 60 ──► TAIL
/// Level 0:  HEAD ──► 10 ──► 20 ──► 25 ──► 35 ──► 50 ──► 60 ──► 70 ► TAIL
/// ```
struct SkipNode<K, V> {
    key: K,
    value: V,
    forward: Vec<usize>,
}

/// One sorted run of the in-memory buffer: a probabilistic skip list.
///
/// Nodes live in an arena (`Vec<SkipNode>`) and link to each other by index.
/// Two reserved indices hold the sentinels: HEAD carries `K::MIN` and TAIL
/// carries `K::MAX`, so every descent terminates at TAIL without a bounds
/// check. Slots freed by `delete` are recycled by later inserts.
///
/// Average case: O(log n) insert, O(log n) lookup, O(n) drain.
pub struct MemTableRun<K, V> {
    nodes: Vec<SkipNode<K, V>>,
    free: Vec<usize>,
    /// Number of levels currently in use (1..=MAX_HEIGHT).
    height: usize,
    len: usize,
    /// Smallest and largest key ever inserted.
    bounds: Option<(K, K)>,
    /// Element count at which the run counts as full.
    capacity: usize,
}

impl<K: FixedWidth, V: FixedWidth> MemTableRun<K, V> {
    /// Create an empty run that reports full at `capacity` elements.
    pub fn new(capacity: usize) -> Self {
        let head = SkipNode {
            key: K::MIN,
            value: V::MIN,
            forward: vec![TAIL; MAX_HEIGHT],
        };
        let tail = SkipNode {
            key: K::MAX,
            value: V::MIN,
            forward: Vec::new(),
        };
        MemTableRun {
            nodes: vec![head, tail],
            free: Vec::new(),
            height: 1,
            len: 0,
            bounds: None,
            capacity,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Current number of levels in use.
    pub fn height(&self) -> usize {
        self.height
    }

    /// For every level, the last node whose key is < `key`.
    fn predecessors(&self, key: K) -> [usize; MAX_HEIGHT] {
        let mut update = [HEAD; MAX_HEIGHT];
        let mut current = HEAD;
        for level in (0..self.height).rev() {
            current = self.advance(current, level, key);
            update[level] = current;
        }
        update
    }

    /// Move right along `level` while the next key is < `key`.
    fn advance(&self, mut current: usize, level: usize, key: K) -> usize {
        loop {
            let next = self.nodes[current].forward[level];
            if next == TAIL || self.nodes[next].key >= key {
                return current;
            }
            current = next;
        }
    }

    /// The first node with key >= `key` (TAIL if none).
    fn seek(&self, key: K) -> usize {
        let mut current = HEAD;
        for level in (0..self.height).rev() {
            current = self.advance(current, level, key);
        }
        self.nodes[current].forward[0]
    }

    /// Coin flip loop, capped at MAX_HEIGHT: P(height > l) = 0.5^l.
    fn random_height() -> usize {
        let mut rng = rand::thread_rng();
        let mut height = 1;
        while height < MAX_HEIGHT && rng.gen_bool(BRANCH_PROBABILITY) {
            height += 1;
        }
        height
    }

    fn allocate(&mut self, node: SkipNode<K, V>) -> usize {
        match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = node;
                slot
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    fn track_bounds(&mut self, key: K) {
        self.bounds = Some(match self.bounds {
            None => (key, key),
            Some((min, max)) => (min.min(key), max.max(key)),
        });
    }

    /// Walk level 0 from `start` collecting every pair with key < `hi`.
    fn collect_from(&self, start: usize, hi: Option<K>) -> Vec<KVPair<K, V>> {
        let mut out = Vec::new();
        let mut current = start;
        while current != TAIL {
            let node = &self.nodes[current];
            if hi.is_some_and(|hi| node.key >= hi) {
                break;
            }
            out.push(KVPair::new(node.key, node.value));
            current = node.forward[0];
        }
        out
    }
}

impl<K: FixedWidth, V: FixedWidth> Run<K, V> for MemTableRun<K, V> {
    /// Insert a key-value pair. Overwrites if key already exists.
    ///
    /// Algorithm:
    ///   1. Find the insertion point at each level (track predecessors)
    ///   2. Generate a random height for the new node (coin flip per level)
    ///   3. Splice into the list at each level up to the node's height
    fn insert(&mut self, key: K, value: V) {
        debug_assert!(key > K::MIN && key < K::MAX, "sentinel key inserted");

        // Levels above the current height already point at HEAD.
        let update = self.predecessors(key);
        let next = self.nodes[update[0]].forward[0];
        if next != TAIL && self.nodes[next].key == key {
            self.nodes[next].value = value;
            return;
        }

        let height = Self::random_height();
        self.height = self.height.max(height);

        let node = self.allocate(SkipNode {
            key,
            value,
            forward: vec![TAIL; height],
        });
        for (level, &prev) in update.iter().enumerate().take(height) {
            self.nodes[node].forward[level] = self.nodes[prev].forward[level];
            self.nodes[prev].forward[level] = node;
        }

        self.len += 1;
        self.track_bounds(key);
    }

    /// Unlink `key` at every level it occupies and recycle its slot.
    fn delete(&mut self, key: K) -> bool {
        let update = self.predecessors(key);
        let target = self.nodes[update[0]].forward[0];
        if target == TAIL || self.nodes[target].key != key {
            return false;
        }

        let height = self.nodes[target].forward.len();
        for (level, &prev) in update.iter().enumerate().take(height) {
            if self.nodes[prev].forward[level] == target {
                self.nodes[prev].forward[level] = self.nodes[target].forward[level];
            }
        }
        self.nodes[target].forward.clear();
        self.free.push(target);
        self.len -= 1;

        while self.height > 1 && self.nodes[HEAD].forward[self.height - 1] == TAIL {
            self.height -= 1;
        }
        true
    }

    fn lookup(&self, key: K) -> Option<V> {
        let candidate = self.seek(key);
        if candidate != TAIL && self.nodes[candidate].key == key {
            Some(self.nodes[candidate].value)
        } else {
            None
        }
    }

    fn range(&self, lo: K, hi: K) -> Vec<KVPair<K, V>> {
        match self.bounds {
            Some((min, max)) if lo < hi && hi > min && lo <= max => {
                self.collect_from(self.seek(lo), Some(hi))
            }
            _ => Vec::new(),
        }
    }

    fn drain(self) -> Vec<KVPair<K, V>> {
        self.collect_from(self.nodes[HEAD].forward[0], None)
    }

    fn len(&self) -> usize {
        self.len
    }

    fn is_full(&self) -> bool {
        self.len >= self.capacity
    }

    fn bounds(&self) -> Option<(K, K)> {
        self.bounds
    }
}
