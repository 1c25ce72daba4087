//! Red-Black Ordered Map Module
//!
//! A red-black tree keyed by any type with a pluggable comparator. Nodes
//! live in an arena (`Vec`) and link to each other by index, so parent
//! links are plain back-references that never own anything.
//!
//! Invariants kept after every `put` and `delete`:
//! - the root is black
//! - a red node never has a red child
//! - every root-to-leaf path crosses the same number of black nodes

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::fmt;

use parking_lot::{Mutex, MutexGuard};

type NodeId = usize;

/// Key ordering used by an [`OrderedMap`].
pub type Comparator<K> = Box<dyn Fn(&K, &K) -> Ordering + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    Red,
    Black,
}

struct Node<K, V> {
    key: K,
    value: V,
    left: Option<NodeId>,
    right: Option<NodeId>,
    parent: Option<NodeId>,
    color: Color,
}

// == Tree ==
/// Unsynchronized tree state.
struct RbTree<K, V> {
    nodes: Vec<Node<K, V>>,
    root: Option<NodeId>,
    cmp: Comparator<K>,
}

impl<K, V> RbTree<K, V> {
    fn new(cmp: Comparator<K>) -> Self {
        Self {
            nodes: Vec::new(),
            root: None,
            cmp,
        }
    }

    fn len(&self) -> usize {
        self.nodes.len()
    }

    // Nil-tolerant accessors: an absent node is black and has no relatives.

    fn parent(&self, node: Option<NodeId>) -> Option<NodeId> {
        node.and_then(|n| self.nodes[n].parent)
    }

    fn left(&self, node: Option<NodeId>) -> Option<NodeId> {
        node.and_then(|n| self.nodes[n].left)
    }

    fn right(&self, node: Option<NodeId>) -> Option<NodeId> {
        node.and_then(|n| self.nodes[n].right)
    }

    fn color(&self, node: Option<NodeId>) -> Color {
        node.map_or(Color::Black, |n| self.nodes[n].color)
    }

    fn is_red(&self, node: Option<NodeId>) -> bool {
        self.color(node) == Color::Red
    }

    fn set_color(&mut self, node: Option<NodeId>, color: Color) {
        if let Some(n) = node {
            self.nodes[n].color = color;
        }
    }

    /// Points whatever referenced `old` as a child (or the root slot) at `new`.
    fn replace_child(&mut self, parent: Option<NodeId>, old: NodeId, new: Option<NodeId>) {
        match parent {
            None => self.root = new,
            Some(p) if self.nodes[p].left == Some(old) => self.nodes[p].left = new,
            Some(p) => self.nodes[p].right = new,
        }
    }

    // == Rotations ==

    fn rotate_left(&mut self, node: Option<NodeId>) {
        let Some(h) = node else { return };
        let Some(x) = self.nodes[h].right else { return };

        let inner = self.nodes[x].left;
        self.nodes[h].right = inner;
        if let Some(c) = inner {
            self.nodes[c].parent = Some(h);
        }

        let parent = self.nodes[h].parent;
        self.nodes[x].parent = parent;
        self.replace_child(parent, h, Some(x));

        self.nodes[x].left = Some(h);
        self.nodes[h].parent = Some(x);
    }

    fn rotate_right(&mut self, node: Option<NodeId>) {
        let Some(h) = node else { return };
        let Some(x) = self.nodes[h].left else { return };

        let inner = self.nodes[x].right;
        self.nodes[h].left = inner;
        if let Some(c) = inner {
            self.nodes[c].parent = Some(h);
        }

        let parent = self.nodes[h].parent;
        self.nodes[x].parent = parent;
        self.replace_child(parent, h, Some(x));

        self.nodes[x].right = Some(h);
        self.nodes[h].parent = Some(x);
    }

    // == Lookup ==

    fn find(&self, key: &K) -> Option<NodeId> {
        let mut node = self.root;
        while let Some(n) = node {
            node = match (self.cmp)(key, &self.nodes[n].key) {
                Ordering::Equal => return Some(n),
                Ordering::Less => self.nodes[n].left,
                Ordering::Greater => self.nodes[n].right,
            };
        }
        None
    }

    fn min_node(&self, mut node: NodeId) -> NodeId {
        while let Some(l) = self.nodes[node].left {
            node = l;
        }
        node
    }

    fn max_node(&self, mut node: NodeId) -> NodeId {
        while let Some(r) = self.nodes[node].right {
            node = r;
        }
        node
    }

    // == Insert ==

    fn put(&mut self, key: K, value: V) -> Option<V> {
        let Some(mut t) = self.root else {
            self.nodes.push(Node {
                key,
                value,
                left: None,
                right: None,
                parent: None,
                color: Color::Black,
            });
            self.root = Some(self.nodes.len() - 1);
            return None;
        };

        // Descend to the leaf the new key hangs from
        let (parent, went_left) = loop {
            match (self.cmp)(&key, &self.nodes[t].key) {
                Ordering::Equal => {
                    return Some(std::mem::replace(&mut self.nodes[t].value, value));
                }
                Ordering::Less => match self.nodes[t].left {
                    Some(l) => t = l,
                    None => break (t, true),
                },
                Ordering::Greater => match self.nodes[t].right {
                    Some(r) => t = r,
                    None => break (t, false),
                },
            }
        };

        let id = self.nodes.len();
        self.nodes.push(Node {
            key,
            value,
            left: None,
            right: None,
            parent: Some(parent),
            color: Color::Red,
        });
        if went_left {
            self.nodes[parent].left = Some(id);
        } else {
            self.nodes[parent].right = Some(id);
        }

        self.fix_after_insertion(id);
        None
    }

    fn fix_after_insertion(&mut self, mut node: NodeId) {
        while Some(node) != self.root && self.is_red(self.parent(Some(node))) {
            let parent = self.parent(Some(node));
            let grand = self.parent(parent);

            if parent == self.left(grand) {
                let uncle = self.right(grand);
                if self.is_red(uncle) {
                    self.set_color(parent, Color::Black);
                    self.set_color(uncle, Color::Black);
                    self.set_color(grand, Color::Red);
                    match grand {
                        Some(g) => node = g,
                        None => break,
                    }
                } else {
                    // Inner grandchild: rotate it to the outside first
                    if Some(node) == self.right(parent) {
                        if let Some(p) = parent {
                            node = p;
                        }
                        self.rotate_left(Some(node));
                    }
                    let parent = self.parent(Some(node));
                    let grand = self.parent(parent);
                    self.set_color(parent, Color::Black);
                    self.set_color(grand, Color::Red);
                    self.rotate_right(grand);
                }
            } else {
                let uncle = self.left(grand);
                if self.is_red(uncle) {
                    self.set_color(parent, Color::Black);
                    self.set_color(uncle, Color::Black);
                    self.set_color(grand, Color::Red);
                    match grand {
                        Some(g) => node = g,
                        None => break,
                    }
                } else {
                    if Some(node) == self.left(parent) {
                        if let Some(p) = parent {
                            node = p;
                        }
                        self.rotate_right(Some(node));
                    }
                    let parent = self.parent(Some(node));
                    let grand = self.parent(parent);
                    self.set_color(parent, Color::Black);
                    self.set_color(grand, Color::Red);
                    self.rotate_left(grand);
                }
            }
        }

        self.set_color(self.root, Color::Black);
    }

    // == Delete ==

    fn delete(&mut self, key: &K) -> Option<V> {
        let mut node = self.find(key)?;

        // Two children: trade places with the in-order successor, which has
        // at most a right child, and delete that slot instead.
        if let (Some(_), Some(right)) = (self.nodes[node].left, self.nodes[node].right) {
            let successor = self.min_node(right);
            self.swap_payload(node, successor);
            node = successor;
        }

        let parent = self.nodes[node].parent;
        let child = self.nodes[node].left.or(self.nodes[node].right);

        if let Some(replacement) = child {
            // A node with a single child is black and the child is red.
            self.nodes[replacement].parent = parent;
            self.replace_child(parent, node, Some(replacement));
            self.nodes[replacement].color = Color::Black;
        } else if parent.is_none() {
            self.root = None;
        } else {
            if !self.is_red(Some(node)) {
                self.fix_after_deletion(node);
            }
            // Fixup rotations may have moved the leaf under a new parent
            if let Some(p) = self.nodes[node].parent {
                if self.nodes[p].left == Some(node) {
                    self.nodes[p].left = None;
                } else if self.nodes[p].right == Some(node) {
                    self.nodes[p].right = None;
                }
            }
        }

        Some(self.release(node).value)
    }

    fn fix_after_deletion(&mut self, mut node: NodeId) {
        while Some(node) != self.root && !self.is_red(Some(node)) {
            let parent = self.parent(Some(node));

            if Some(node) == self.left(parent) {
                let mut brother = self.right(parent);

                if self.is_red(brother) {
                    self.set_color(brother, Color::Black);
                    self.set_color(parent, Color::Red);
                    self.rotate_left(parent);
                    brother = self.right(self.parent(Some(node)));
                }

                if !self.is_red(self.left(brother)) && !self.is_red(self.right(brother)) {
                    self.set_color(brother, Color::Red);
                    match self.parent(Some(node)) {
                        Some(p) => node = p,
                        None => break,
                    }
                } else {
                    if !self.is_red(self.right(brother)) {
                        self.set_color(self.left(brother), Color::Black);
                        self.set_color(brother, Color::Red);
                        self.rotate_right(brother);
                        brother = self.right(self.parent(Some(node)));
                    }

                    let parent = self.parent(Some(node));
                    self.set_color(brother, self.color(parent));
                    self.set_color(parent, Color::Black);
                    self.set_color(self.right(brother), Color::Black);
                    self.rotate_left(parent);
                    break;
                }
            } else {
                let mut brother = self.left(parent);

                if self.is_red(brother) {
                    self.set_color(brother, Color::Black);
                    self.set_color(parent, Color::Red);
                    self.rotate_right(parent);
                    brother = self.left(self.parent(Some(node)));
                }

                if !self.is_red(self.left(brother)) && !self.is_red(self.right(brother)) {
                    self.set_color(brother, Color::Red);
                    match self.parent(Some(node)) {
                        Some(p) => node = p,
                        None => break,
                    }
                } else {
                    if !self.is_red(self.left(brother)) {
                        self.set_color(self.right(brother), Color::Black);
                        self.set_color(brother, Color::Red);
                        self.rotate_left(brother);
                        brother = self.left(self.parent(Some(node)));
                    }

                    let parent = self.parent(Some(node));
                    self.set_color(brother, self.color(parent));
                    self.set_color(parent, Color::Black);
                    self.set_color(self.left(brother), Color::Black);
                    self.rotate_right(parent);
                    break;
                }
            }
        }

        self.set_color(Some(node), Color::Black);
        self.set_color(self.root, Color::Black);
    }

    fn swap_payload(&mut self, a: NodeId, b: NodeId) {
        if a == b {
            return;
        }
        let (lo, hi) = if a < b { (a, b) } else { (b, a) };
        let (head, tail) = self.nodes.split_at_mut(hi);
        std::mem::swap(&mut head[lo].key, &mut tail[0].key);
        std::mem::swap(&mut head[lo].value, &mut tail[0].value);
    }

    /// Removes an unlinked node from the arena. The last node moves into its
    /// slot and every link to it is rewritten.
    fn release(&mut self, id: NodeId) -> Node<K, V> {
        let last = self.nodes.len() - 1;
        if id != last {
            let (parent, left, right) = {
                let moved = &self.nodes[last];
                (moved.parent, moved.left, moved.right)
            };
            self.replace_child(parent, last, Some(id));
            if let Some(l) = left {
                self.nodes[l].parent = Some(id);
            }
            if let Some(r) = right {
                self.nodes[r].parent = Some(id);
            }
        }
        self.nodes.swap_remove(id)
    }

    // == Traversal ==

    fn in_order<'a>(&'a self, node: Option<NodeId>, out: &mut Vec<&'a K>) {
        if let Some(n) = node {
            self.in_order(self.nodes[n].left, out);
            out.push(&self.nodes[n].key);
            self.in_order(self.nodes[n].right, out);
        }
    }

    fn breadth_first(&self) -> Vec<&K> {
        let mut out = Vec::with_capacity(self.len());
        let mut queue: VecDeque<NodeId> = self.root.into_iter().collect();
        while let Some(n) = queue.pop_front() {
            let node = &self.nodes[n];
            out.push(&node.key);
            queue.extend(node.left);
            queue.extend(node.right);
        }
        out
    }

    fn height(&self, node: Option<NodeId>) -> usize {
        match node {
            None => 0,
            Some(n) => 1 + self.height(self.nodes[n].left).max(self.height(self.nodes[n].right)),
        }
    }

    // == Invariant Check ==

    fn check(&self) -> bool {
        let Some(root) = self.root else {
            return self.nodes.is_empty();
        };
        if self.nodes[root].color != Color::Black || self.nodes[root].parent.is_some() {
            return false;
        }

        // Black nodes on the leftmost path are the reference height
        let mut black = 0;
        let mut node = Some(root);
        while let Some(n) = node {
            if self.nodes[n].color == Color::Black {
                black += 1;
            }
            node = self.nodes[n].left;
        }

        self.is_bst(root) && self.no_red_red(root) && self.is_balanced(Some(root), black, 0)
    }

    fn is_bst(&self, n: NodeId) -> bool {
        let node = &self.nodes[n];
        let left_ok = node.left.map_or(true, |l| {
            self.nodes[l].parent == Some(n)
                && (self.cmp)(&self.nodes[l].key, &node.key) == Ordering::Less
                && self.is_bst(l)
        });
        let right_ok = node.right.map_or(true, |r| {
            self.nodes[r].parent == Some(n)
                && (self.cmp)(&self.nodes[r].key, &node.key) == Ordering::Greater
                && self.is_bst(r)
        });
        left_ok && right_ok
    }

    fn no_red_red(&self, n: NodeId) -> bool {
        let node = &self.nodes[n];
        if node.color == Color::Red && (self.is_red(node.left) || self.is_red(node.right)) {
            return false;
        }
        node.left.map_or(true, |l| self.no_red_red(l))
            && node.right.map_or(true, |r| self.no_red_red(r))
    }

    fn is_balanced(&self, node: Option<NodeId>, expected: usize, mut seen: usize) -> bool {
        let Some(n) = node else {
            return seen == expected;
        };
        if self.nodes[n].color == Color::Black {
            seen += 1;
        }
        self.is_balanced(self.nodes[n].left, expected, seen)
            && self.is_balanced(self.nodes[n].right, expected, seen)
    }
}

// == Ordered Map ==
/// Thread-safe ordered map backed by a red-black tree.
///
/// One lock per map; every public operation is atomic.
pub struct OrderedMap<K, V> {
    inner: Mutex<RbTree<K, V>>,
}

impl<K: Ord + 'static, V> OrderedMap<K, V> {
    // == Constructor ==
    /// Creates an empty map ordered by `K`'s natural order.
    pub fn new() -> Self {
        Self::with_comparator(K::cmp)
    }
}

impl<K: Ord + 'static, V> Default for OrderedMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: 'static, V> OrderedMap<K, V> {
    /// Creates an empty map ordered by `cmp`, which must be a total order.
    pub fn with_comparator<F>(cmp: F) -> Self
    where
        F: Fn(&K, &K) -> Ordering + Send + Sync + 'static,
    {
        Self {
            inner: Mutex::new(RbTree::new(Box::new(cmp))),
        }
    }

    // == Set Comparator ==
    /// Replaces the comparator, but only while the map is empty.
    ///
    /// On a non-empty map this does nothing and returns `false`.
    pub fn set_comparator<F>(&self, cmp: F) -> bool
    where
        F: Fn(&K, &K) -> Ordering + Send + Sync + 'static,
    {
        let mut tree = self.inner.lock();
        if tree.len() != 0 {
            return false;
        }
        tree.cmp = Box::new(cmp);
        true
    }
}

impl<K, V> OrderedMap<K, V> {
    // == Put ==
    /// Inserts a key or replaces the value of an existing one.
    ///
    /// Returns the previous value when the key was already present.
    pub fn put(&self, key: K, value: V) -> Option<V> {
        self.inner.lock().put(key, value)
    }

    // == Delete ==
    /// Removes a key, returning its value.
    pub fn delete(&self, key: &K) -> Option<V> {
        self.inner.lock().delete(key)
    }

    // == Contains ==
    pub fn contains(&self, key: &K) -> bool {
        self.inner.lock().find(key).is_some()
    }

    // == Length ==
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // == Height ==
    /// Number of nodes on the longest root-to-leaf path.
    pub fn height(&self) -> usize {
        let tree = self.inner.lock();
        tree.height(tree.root)
    }

    // == Check ==
    /// Verifies ordering, colouring and black height across the whole tree.
    ///
    /// O(n); intended for tests and debugging.
    pub fn check(&self) -> bool {
        self.inner.lock().check()
    }
}

impl<K: Clone, V: Clone> OrderedMap<K, V> {
    // == Get ==
    pub fn get(&self, key: &K) -> Option<V> {
        let tree = self.inner.lock();
        tree.find(key).map(|n| tree.nodes[n].value.clone())
    }

    // == Min / Max ==
    /// Smallest key and its value.
    pub fn min_key(&self) -> Option<(K, V)> {
        let tree = self.inner.lock();
        tree.root.map(|root| {
            let node = &tree.nodes[tree.min_node(root)];
            (node.key.clone(), node.value.clone())
        })
    }

    /// Largest key and its value.
    pub fn max_key(&self) -> Option<(K, V)> {
        let tree = self.inner.lock();
        tree.root.map(|root| {
            let node = &tree.nodes[tree.max_node(root)];
            (node.key.clone(), node.value.clone())
        })
    }

    // == Iterator ==
    /// Lazily walks the map level by level, yielding `(key, value)` pairs.
    ///
    /// The iterator holds the map's lock until dropped: other threads block
    /// on the map meanwhile, and touching the map from the iterating thread
    /// deadlocks.
    pub fn iter(&self) -> Iter<'_, K, V> {
        let tree = self.inner.lock();
        let queue = tree.root.into_iter().collect();
        Iter { tree, queue }
    }
}

impl<K: Clone, V> OrderedMap<K, V> {
    // == Key Lists ==
    /// All keys in comparator order.
    pub fn keys_in_order(&self) -> Vec<K> {
        let tree = self.inner.lock();
        let mut keys = Vec::with_capacity(tree.len());
        tree.in_order(tree.root, &mut keys);
        keys.into_iter().cloned().collect()
    }

    /// All keys level by level, starting from the root.
    pub fn keys_breadth_first(&self) -> Vec<K> {
        let tree = self.inner.lock();
        tree.breadth_first().into_iter().cloned().collect()
    }
}

impl<K, V> fmt::Debug for OrderedMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tree = self.inner.lock();
        f.debug_struct("OrderedMap")
            .field("len", &tree.len())
            .field("height", &tree.height(tree.root))
            .finish()
    }
}

// == Breadth-First Iterator ==
/// Level-order iterator returned by [`OrderedMap::iter`].
pub struct Iter<'a, K, V> {
    tree: MutexGuard<'a, RbTree<K, V>>,
    queue: VecDeque<NodeId>,
}

impl<K: Clone, V: Clone> Iterator for Iter<'_, K, V> {
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        let n = self.queue.pop_front()?;
        let node = &self.tree.nodes[n];
        self.queue.extend(node.left);
        self.queue.extend(node.right);
        Some((node.key.clone(), node.value.clone()))
    }
}
