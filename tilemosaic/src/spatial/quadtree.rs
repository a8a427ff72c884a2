//! Arena-backed quadtree over movable bounding boxes.
//!
//! Nodes live in a `Vec` and refer to their parent and children by index, so
//! there are no ownership cycles. Every object lives in exactly one node.
//!
//! # Subdivision
//!
//! Subdivision is lazy. An object descends into a child only when the child
//! fully contains it and the node is either at its object limit or already
//! has a child. Once any child exists, later inserts prefer children, which
//! keeps a node from flipping between zero and one child.
//!
//! # Aggregation
//!
//! After a removal, a node whose children are all leaves and whose subtree
//! holds fewer objects than the limit absorbs its children's objects. This is
//! applied to the node the object was removed from and to its parent; it
//! never cascades further in one call.
//!
//! # Queries
//!
//! Every node caches the object count of its subtree. A query region that
//! fully contains a node takes the whole subtree without testing objects.

use std::collections::HashMap;
use std::hash::Hash;

use super::Bounds;

/// Default maximum objects per node before inserts push into children.
pub const DEFAULT_NODE_LIMIT: usize = 8;

/// Default depth cap. The root is depth 0.
pub const DEFAULT_MAX_DEPTH: u32 = 19;

const ROOT: usize = 0;

#[derive(Debug)]
struct Node<K> {
    bounds: Bounds,
    depth: u32,
    parent: Option<usize>,
    children: [Option<usize>; 4],
    objects: Vec<(K, Bounds)>,
    /// Objects in this node plus all descendants.
    total: usize,
}

impl<K> Node<K> {
    fn new(bounds: Bounds, depth: u32, parent: Option<usize>) -> Self {
        Self {
            bounds,
            depth,
            parent,
            children: [None; 4],
            objects: Vec::new(),
            total: 0,
        }
    }

    fn has_children(&self) -> bool {
        self.children.iter().any(Option::is_some)
    }
}

/// Spatial index keyed by `K`.
///
/// Not internally synchronized; wrap in a lock when shared across threads.
#[derive(Debug)]
pub struct Quadtree<K> {
    nodes: Vec<Option<Node<K>>>,
    free: Vec<usize>,
    locations: HashMap<K, usize>,
    node_limit: usize,
    max_depth: u32,
}

impl<K: Copy + Eq + Hash> Quadtree<K> {
    /// Creates an empty tree covering `bounds`.
    ///
    /// Objects outside the root bounds are accepted and kept at the root.
    pub fn new(bounds: Bounds) -> Self {
        Self {
            nodes: vec![Some(Node::new(bounds, 0, None))],
            free: Vec::new(),
            locations: HashMap::new(),
            node_limit: DEFAULT_NODE_LIMIT,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_node_limit(mut self, limit: usize) -> Self {
        self.node_limit = limit.max(1);
        self
    }

    pub fn with_max_depth(mut self, depth: u32) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn bounds(&self) -> Bounds {
        self.node(ROOT).bounds
    }

    /// Number of objects in the index.
    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    /// Number of live nodes, including the root.
    pub fn node_count(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.locations.contains_key(key)
    }

    /// Bounds stored for `key`.
    pub fn bounds_of(&self, key: &K) -> Option<Bounds> {
        let id = *self.locations.get(key)?;
        self.node(id)
            .objects
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, b)| *b)
    }

    /// Inserts an object. An existing key is refreshed with the new bounds
    /// and `false` is returned.
    pub fn insert(&mut self, key: K, bounds: Bounds) -> bool {
        if self.locations.contains_key(&key) {
            self.refresh(key, bounds);
            return false;
        }
        self.insert_from(ROOT, key, bounds);
        true
    }

    /// Removes an object, returning whether it was present.
    pub fn remove(&mut self, key: &K) -> bool {
        let Some(id) = self.locations.remove(key) else {
            return false;
        };

        let node = self.node_mut(id);
        if let Some(pos) = node.objects.iter().position(|(k, _)| k == key) {
            node.objects.swap_remove(pos);
        }
        self.adjust_totals(id, -1);

        let parent = self.node(id).parent;
        self.try_aggregate(id);
        if let Some(parent) = parent {
            self.try_aggregate(parent);
        }
        true
    }

    /// Updates an object's bounds after it moved.
    ///
    /// Returns `true` when the object had to be relocated to another node,
    /// `false` when it still fits where it is or is not in the index.
    pub fn refresh(&mut self, key: K, bounds: Bounds) -> bool {
        let Some(&id) = self.locations.get(&key) else {
            return false;
        };

        let node = self.node(id);
        if id == ROOT || node.bounds.contains(&bounds) {
            if let Some(entry) = self.node_mut(id).objects.iter_mut().find(|(k, _)| *k == key) {
                entry.1 = bounds;
            }
            return false;
        }

        self.remove(&key);
        self.insert_from(ROOT, key, bounds);
        true
    }

    /// Keys of all objects whose bounds intersect `region`.
    pub fn query(&self, region: &Bounds) -> Vec<K> {
        let mut out = Vec::new();
        self.collect(ROOT, region, &mut out);
        out
    }

    /// Number of objects whose bounds intersect `region`.
    pub fn count(&self, region: &Bounds) -> usize {
        self.count_in(ROOT, region)
    }

    /// Removes every object and node.
    pub fn clear(&mut self) {
        let bounds = self.bounds();
        self.nodes = vec![Some(Node::new(bounds, 0, None))];
        self.free.clear();
        self.locations.clear();
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn node(&self, id: usize) -> &Node<K> {
        match self.nodes.get(id) {
            Some(Some(node)) => node,
            _ => unreachable!("quadtree node {} is not live", id),
        }
    }

    fn node_mut(&mut self, id: usize) -> &mut Node<K> {
        match self.nodes.get_mut(id) {
            Some(Some(node)) => node,
            _ => unreachable!("quadtree node {} is not live", id),
        }
    }

    fn insert_from(&mut self, start: usize, key: K, bounds: Bounds) {
        let mut id = start;
        loop {
            let node = self.node(id);
            let crowded = node.objects.len() >= self.node_limit;
            if node.depth < self.max_depth && (crowded || node.has_children()) {
                if let Some(q) = (0..4).find(|&q| node.bounds.quadrant(q).contains(&bounds)) {
                    id = self.child_or_create(id, q);
                    continue;
                }
            }
            break;
        }

        self.node_mut(id).objects.push((key, bounds));
        self.locations.insert(key, id);
        self.adjust_totals(id, 1);
    }

    fn child_or_create(&mut self, id: usize, quadrant: usize) -> usize {
        if let Some(child) = self.node(id).children[quadrant] {
            return child;
        }

        let parent = self.node(id);
        let child = Node::new(parent.bounds.quadrant(quadrant), parent.depth + 1, Some(id));
        let child_id = match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = Some(child);
                slot
            }
            None => {
                self.nodes.push(Some(child));
                self.nodes.len() - 1
            }
        };
        self.node_mut(id).children[quadrant] = Some(child_id);
        child_id
    }

    fn adjust_totals(&mut self, mut id: usize, delta: isize) {
        loop {
            let node = self.node_mut(id);
            node.total = node.total.saturating_add_signed(delta);
            match node.parent {
                Some(parent) => id = parent,
                None => break,
            }
        }
    }

    fn try_aggregate(&mut self, id: usize) {
        let node = self.node(id);
        if !node.has_children() || node.total >= self.node_limit {
            return;
        }
        let children: Vec<usize> = node.children.iter().flatten().copied().collect();
        if children.iter().any(|&c| self.node(c).has_children()) {
            return;
        }

        for child in children {
            if let Some(node) = self.nodes[child].take() {
                for (key, bounds) in node.objects {
                    self.locations.insert(key, id);
                    self.node_mut(id).objects.push((key, bounds));
                }
            }
            self.free.push(child);
        }
        self.node_mut(id).children = [None; 4];
    }

    fn collect(&self, id: usize, region: &Bounds, out: &mut Vec<K>) {
        let node = self.node(id);
        if id != ROOT && region.contains(&node.bounds) {
            self.collect_all(id, out);
            return;
        }

        out.extend(
            node.objects
                .iter()
                .filter(|(_, b)| b.intersects(region))
                .map(|(k, _)| *k),
        );
        for child in node.children.iter().flatten() {
            if self.node(*child).bounds.intersects(region) {
                self.collect(*child, region, out);
            }
        }
    }

    fn collect_all(&self, id: usize, out: &mut Vec<K>) {
        let mut stack = vec![id];
        while let Some(id) = stack.pop() {
            let node = self.node(id);
            out.extend(node.objects.iter().map(|(k, _)| *k));
            stack.extend(node.children.iter().flatten());
        }
    }

    fn count_in(&self, id: usize, region: &Bounds) -> usize {
        let node = self.node(id);
        if id != ROOT && region.contains(&node.bounds) {
            return node.total;
        }

        let own = node
            .objects
            .iter()
            .filter(|(_, b)| b.intersects(region))
            .count();
        own + node
            .children
            .iter()
            .flatten()
            .filter(|c| self.node(**c).bounds.intersects(region))
            .map(|c| self.count_in(*c, region))
            .sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(x: f64, y: f64, size: f64) -> Bounds {
        Bounds::new(x, y, x + size, y + size)
    }

    fn tree(limit: usize) -> Quadtree<u32> {
        Quadtree::new(Bounds::new(0.0, 0.0, 100.0, 100.0)).with_node_limit(limit)
    }

    #[test]
    fn test_insert_and_query() {
        let mut qt = tree(4);
        assert!(qt.insert(1, square(10.0, 10.0, 5.0)));
        assert!(qt.insert(2, square(80.0, 80.0, 5.0)));

        assert_eq!(qt.len(), 2);
        assert_eq!(qt.query(&square(0.0, 0.0, 20.0)), vec![1]);
        assert_eq!(qt.count(&Bounds::new(0.0, 0.0, 100.0, 100.0)), 2);
    }

    #[test]
    fn test_lazy_subdivision() {
        let mut qt = tree(2);
        qt.insert(1, square(10.0, 60.0, 1.0));
        qt.insert(2, square(20.0, 60.0, 1.0));
        assert_eq!(qt.node_count(), 1, "under the limit stays in root");

        qt.insert(3, square(30.0, 60.0, 1.0));
        assert_eq!(qt.node_count(), 2, "at the limit pushes into a child");

        // Root drops below its limit but still has a child, so new objects
        // keep descending
        qt.remove(&1);
        assert_eq!(qt.node_count(), 2);
        qt.insert(4, square(70.0, 10.0, 1.0));
        assert_eq!(qt.node_count(), 3);
        assert_eq!(qt.len(), 3);
    }

    #[test]
    fn test_straddling_object_stays_in_parent() {
        let mut qt = tree(1);
        qt.insert(1, square(10.0, 10.0, 1.0));
        qt.insert(2, Bounds::new(40.0, 40.0, 60.0, 60.0));

        assert_eq!(qt.node_count(), 1);
        assert_eq!(qt.query(&square(50.0, 50.0, 1.0)), vec![2]);
    }

    #[test]
    fn test_remove_aggregates_children() {
        let mut qt = tree(2);
        for i in 0..5u32 {
            qt.insert(i, square(5.0 + i as f64, 5.0, 1.0));
        }
        assert!(qt.node_count() > 1);

        for i in 0..4u32 {
            assert!(qt.remove(&i));
        }
        assert!(!qt.remove(&0));

        assert_eq!(qt.len(), 1);
        assert_eq!(qt.count(&qt.bounds()), 1);
        assert!(qt.node_count() <= 2);
    }

    #[test]
    fn test_aggregation_is_one_level_per_call() {
        let mut qt = tree(1).with_max_depth(3);
        // Deep chain: every object sits in the lower-left corner
        qt.insert(1, square(1.0, 1.0, 0.5));
        qt.insert(2, square(2.0, 2.0, 0.5));
        qt.insert(3, square(3.0, 3.0, 0.5));
        let before = qt.node_count();
        assert!(before >= 3);

        qt.remove(&3);
        qt.remove(&2);
        assert!(qt.node_count() < before);
        assert_eq!(qt.query(&qt.bounds()), vec![1]);
    }

    #[test]
    fn test_refresh_relocates_when_out_of_node() {
        let mut qt = tree(1);
        qt.insert(1, square(10.0, 10.0, 1.0));
        qt.insert(2, square(20.0, 20.0, 1.0));

        // Object 2 moved to the opposite corner
        assert!(qt.refresh(2, square(90.0, 90.0, 1.0)));
        assert_eq!(qt.query(&square(85.0, 85.0, 10.0)), vec![2]);
        assert!(qt.query(&square(15.0, 15.0, 10.0)).is_empty());

        // Small move inside the same node does not relocate
        assert!(!qt.refresh(2, square(91.0, 91.0, 1.0)));
        assert_eq!(qt.bounds_of(&2), Some(square(91.0, 91.0, 1.0)));

        assert!(!qt.refresh(99, square(0.0, 0.0, 1.0)));
    }

    #[test]
    fn test_objects_outside_root_are_counted() {
        let mut qt = tree(2);
        qt.insert(1, square(150.0, 150.0, 5.0));
        qt.insert(2, square(10.0, 10.0, 5.0));

        assert_eq!(qt.count(&Bounds::new(0.0, 0.0, 100.0, 100.0)), 1);
        assert_eq!(qt.count(&Bounds::new(-500.0, -500.0, 500.0, 500.0)), 2);
    }

    #[test]
    fn test_duplicate_insert_refreshes() {
        let mut qt = tree(4);
        assert!(qt.insert(7, square(1.0, 1.0, 1.0)));
        assert!(!qt.insert(7, square(50.0, 50.0, 1.0)));
        assert_eq!(qt.len(), 1);
        assert_eq!(qt.bounds_of(&7), Some(square(50.0, 50.0, 1.0)));
    }

    #[test]
    fn test_clear() {
        let mut qt = tree(1);
        for i in 0..10u32 {
            qt.insert(i, square(i as f64 * 9.0, 5.0, 1.0));
        }
        qt.clear();
        assert!(qt.is_empty());
        assert_eq!(qt.node_count(), 1);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        enum Op {
            Insert(u8, f64, f64, f64),
            Remove(u8),
            Refresh(u8, f64, f64, f64),
        }

        fn op() -> impl Strategy<Value = Op> {
            prop_oneof![
                (0u8..32, 0.0..95.0_f64, 0.0..95.0_f64, 0.01..5.0_f64)
                    .prop_map(|(k, x, y, s)| Op::Insert(k, x, y, s)),
                (0u8..32).prop_map(Op::Remove),
                (0u8..32, 0.0..95.0_f64, 0.0..95.0_f64, 0.01..5.0_f64)
                    .prop_map(|(k, x, y, s)| Op::Refresh(k, x, y, s)),
            ]
        }

        proptest! {
            #[test]
            fn test_count_matches_population(ops in proptest::collection::vec(op(), 1..120)) {
                let mut qt: Quadtree<u8> =
                    Quadtree::new(Bounds::new(0.0, 0.0, 100.0, 100.0)).with_node_limit(3);
                let mut live: HashMap<u8, Bounds> = HashMap::new();

                for op in ops {
                    match op {
                        Op::Insert(k, x, y, s) => {
                            qt.insert(k, square(x, y, s));
                            live.insert(k, square(x, y, s));
                        }
                        Op::Remove(k) => {
                            prop_assert_eq!(qt.remove(&k), live.remove(&k).is_some());
                        }
                        Op::Refresh(k, x, y, s) => {
                            qt.refresh(k, square(x, y, s));
                            if let Some(b) = live.get_mut(&k) {
                                *b = square(x, y, s);
                            }
                        }
                    }

                    prop_assert_eq!(qt.len(), live.len());
                    prop_assert_eq!(qt.count(&qt.bounds()), live.len());
                }

                for (k, b) in &live {
                    prop_assert!(qt.query(b).contains(k));
                    let enclosing = Bounds::new(b.min_x - 1.0, b.min_y - 1.0, b.max_x + 1.0, b.max_y + 1.0);
                    prop_assert!(qt.query(&enclosing).contains(k));
                }
            }
        }
    }
}
