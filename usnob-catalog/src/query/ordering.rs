//! Bounded, ordered accumulation of accepted records.
//!
//! [`ResultOrderingEngine`] keeps the best `K` records seen so far in an
//! unbalanced ternary search tree: `lt` and `gt` links hold strictly lesser
//! and greater records, and records comparing equal chain off `eq`. Nodes
//! live in a pool indexed by position, so the tree never allocates once the
//! pool is full and a displaced worst node is reused for its replacement.

use std::cmp::Ordering;

use super::predicate::Field;
use crate::record::CatalogRecord;

/// One sort key: a field and a direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortKey {
    pub field: Field,
    pub descending: bool,
}

impl SortKey {
    pub fn ascending(field: Field) -> Self {
        Self {
            field,
            descending: false,
        }
    }

    pub fn descending(field: Field) -> Self {
        Self {
            field,
            descending: true,
        }
    }
}

/// Lexicographic comparison over sort keys.
///
/// Records without a derived value (distance or offsets with no center) sort
/// before all others whatever the direction. Other missing values, such as an
/// absent band, sort as larger than any present value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Comparator {
    keys: Vec<SortKey>,
}

impl Comparator {
    pub fn new(keys: Vec<SortKey>) -> Self {
        Self { keys }
    }

    pub fn keys(&self) -> &[SortKey] {
        &self.keys
    }

    pub fn compare(&self, a: &CatalogRecord, b: &CatalogRecord) -> Ordering {
        for key in &self.keys {
            let ordering = match key.field {
                Field::Identifier => directed((a.zone, a.id).cmp(&(b.zone, b.id)), key.descending),
                field => compare_values(field, a, b, key.descending),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

fn directed(ordering: Ordering, descending: bool) -> Ordering {
    if descending {
        ordering.reverse()
    } else {
        ordering
    }
}

fn compare_values(field: Field, a: &CatalogRecord, b: &CatalogRecord, descending: bool) -> Ordering {
    match (field.value(a), field.value(b)) {
        (Some(x), Some(y)) => directed(x.cmp(&y), descending),
        (None, None) => Ordering::Equal,
        (None, Some(_)) if field.is_derived() => Ordering::Less,
        (Some(_), None) if field.is_derived() => Ordering::Greater,
        (None, Some(_)) => directed(Ordering::Greater, descending),
        (Some(_), None) => directed(Ordering::Less, descending),
    }
}

#[derive(Debug, Clone)]
struct Node {
    record: CatalogRecord,
    lt: Option<usize>,
    gt: Option<usize>,
    eq: Option<usize>,
}

impl Node {
    fn leaf(record: CatalogRecord) -> Self {
        Self {
            record,
            lt: None,
            gt: None,
            eq: None,
        }
    }
}

/// The rightmost node and the node whose `gt` link reaches it, if any.
#[derive(Debug, Clone, Copy)]
struct Worst {
    node: usize,
    parent: Option<usize>,
}

/// Top-K accumulator under a [`Comparator`].
#[derive(Debug, Clone)]
pub struct ResultOrderingEngine {
    comparator: Comparator,
    capacity: usize,
    nodes: Vec<Node>,
    root: Option<usize>,
    /// Located once the pool is full, kept until the tree changes shape.
    worst: Option<Worst>,
    offered: u64,
}

impl ResultOrderingEngine {
    /// An engine keeping at most `capacity` records, at least one.
    pub fn new(comparator: Comparator, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            comparator,
            capacity,
            nodes: Vec::with_capacity(capacity.min(1 << 16)),
            root: None,
            worst: None,
            offered: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Records offered so far, kept or not.
    pub fn offered(&self) -> u64 {
        self.offered
    }

    /// Some offered record has been dropped.
    pub fn is_truncated(&self) -> bool {
        self.offered > self.nodes.len() as u64
    }

    /// Offer a record. Returns `false` when the engine is full and the record
    /// does not sort strictly before the current worst.
    pub fn insert(&mut self, record: CatalogRecord) -> bool {
        self.offered += 1;
        if self.nodes.len() < self.capacity {
            let slot = self.nodes.len();
            self.nodes.push(Node::leaf(record));
            self.attach(slot);
            self.worst = None;
            return true;
        }

        let worst = match self.worst {
            Some(worst) => worst,
            None => {
                let worst = self.find_worst();
                self.worst = Some(worst);
                worst
            }
        };
        if self.comparator.compare(&record, &self.nodes[worst.node].record) != Ordering::Less {
            return false;
        }

        let slot = match self.nodes[worst.node].eq {
            // An equal sibling gives up its slot; the worst node stays put.
            Some(sibling) => {
                self.nodes[worst.node].eq = self.nodes[sibling].eq;
                sibling
            }
            None => {
                // The rightmost node has no `gt` child; its `lt` subtree
                // takes its place under the parent.
                let lesser = self.nodes[worst.node].lt;
                match worst.parent {
                    Some(parent) => self.nodes[parent].gt = lesser,
                    None => self.root = lesser,
                }
                self.worst = None;
                worst.node
            }
        };
        self.nodes[slot] = Node::leaf(record);
        self.attach(slot);
        true
    }

    /// Link a detached leaf into the tree by descent from the root.
    fn attach(&mut self, slot: usize) {
        let Some(mut at) = self.root else {
            self.root = Some(slot);
            return;
        };
        loop {
            let ordering = self
                .comparator
                .compare(&self.nodes[slot].record, &self.nodes[at].record);
            let node = &mut self.nodes[at];
            let link = match ordering {
                Ordering::Less => &mut node.lt,
                Ordering::Greater => &mut node.gt,
                Ordering::Equal => {
                    let chain = node.eq.replace(slot);
                    self.nodes[slot].eq = chain;
                    return;
                }
            };
            match *link {
                Some(next) => at = next,
                None => {
                    *link = Some(slot);
                    return;
                }
            }
        }
    }

    fn find_worst(&self) -> Worst {
        let mut worst = Worst {
            node: self.root.unwrap_or(0),
            parent: None,
        };
        while let Some(next) = self.nodes[worst.node].gt {
            worst = Worst {
                node: next,
                parent: Some(worst.node),
            };
        }
        worst
    }

    /// The current worst record kept, if any.
    pub fn worst(&self) -> Option<&CatalogRecord> {
        self.root?;
        Some(&self.nodes[self.find_worst().node].record)
    }

    /// Kept records in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = &CatalogRecord> + '_ {
        InOrder::new(&self.nodes, self.root).map(|slot| &self.nodes[slot].record)
    }

    /// Drain the kept records in ascending order.
    pub fn into_sorted(self) -> Vec<CatalogRecord> {
        let order: Vec<usize> = InOrder::new(&self.nodes, self.root).collect();
        let mut slots: Vec<Option<CatalogRecord>> =
            self.nodes.into_iter().map(|node| Some(node.record)).collect();
        order.into_iter().filter_map(|slot| slots[slot].take()).collect()
    }
}

/// Iterative in-order walk yielding node slots: left subtree, the node and
/// its `eq` chain, right subtree.
struct InOrder<'a> {
    nodes: &'a [Node],
    stack: Vec<usize>,
    chain: Option<usize>,
}

impl<'a> InOrder<'a> {
    fn new(nodes: &'a [Node], root: Option<usize>) -> Self {
        let mut walk = Self {
            nodes,
            stack: Vec::new(),
            chain: None,
        };
        walk.push_lesser(root);
        walk
    }

    fn push_lesser(&mut self, mut at: Option<usize>) {
        while let Some(slot) = at {
            self.stack.push(slot);
            at = self.nodes[slot].lt;
        }
    }
}

impl Iterator for InOrder<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if let Some(slot) = self.chain {
            self.chain = self.nodes[slot].eq;
            return Some(slot);
        }
        let slot = self.stack.pop()?;
        self.chain = self.nodes[slot].eq;
        self.push_lesser(self.nodes[slot].gt);
        Some(slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::predicate::ColorSelector;
    use crate::record::Band;
    use proptest::prelude::*;

    fn star(id: u32, mag: i32) -> CatalogRecord {
        let mut record = CatalogRecord::native(900, id, 0, 0);
        record.magnitudes[Band::Red1.index()] = mag;
        record
    }

    fn by_magnitude() -> Comparator {
        Comparator::new(vec![SortKey::ascending(Field::Magnitude(ColorSelector::Band(Band::Red1)))])
    }

    fn mags(engine: &ResultOrderingEngine) -> Vec<i32> {
        engine.iter().map(|r| r.magnitudes[Band::Red1.index()]).collect()
    }

    #[test]
    fn test_unbounded_insert_sorts() {
        let mut engine = ResultOrderingEngine::new(by_magnitude(), 10);
        for (id, mag) in [5, 3, 8, 3, 1, 9].into_iter().enumerate() {
            assert!(engine.insert(star(id as u32, mag)));
        }
        assert_eq!(mags(&engine), vec![1, 3, 3, 5, 8, 9]);
        assert!(!engine.is_truncated());
    }

    #[test]
    fn test_full_engine_replaces_worst() {
        let mut engine = ResultOrderingEngine::new(by_magnitude(), 3);
        for (id, mag) in [5, 7, 6].into_iter().enumerate() {
            engine.insert(star(id as u32, mag));
        }
        assert!(!engine.insert(star(10, 7)), "equal to worst is rejected");
        assert!(!engine.insert(star(11, 8)));
        assert!(engine.insert(star(12, 1)));
        assert_eq!(mags(&engine), vec![1, 5, 6]);
        assert!(engine.insert(star(13, 2)));
        assert_eq!(mags(&engine), vec![1, 2, 5]);
        assert_eq!(engine.worst().map(|r| r.id), Some(0));
        assert!(engine.is_truncated());
        assert_eq!(engine.offered(), 7);
    }

    #[test]
    fn test_worst_with_equal_siblings_gives_up_one() {
        let mut engine = ResultOrderingEngine::new(by_magnitude(), 3);
        engine.insert(star(1, 2));
        engine.insert(star(2, 9));
        engine.insert(star(3, 9));
        assert!(engine.insert(star(4, 4)));
        assert_eq!(mags(&engine), vec![2, 4, 9]);
        assert!(engine.insert(star(5, 3)));
        assert_eq!(mags(&engine), vec![2, 3, 4]);
    }

    #[test]
    fn test_worst_at_root_replaced() {
        // Descending inserts keep the worst at the root with a lesser subtree.
        let mut engine = ResultOrderingEngine::new(by_magnitude(), 3);
        for mag in [9, 8, 7] {
            engine.insert(star(mag as u32, mag));
        }
        assert!(engine.insert(star(1, 1)));
        assert_eq!(mags(&engine), vec![1, 7, 8]);
        assert!(engine.insert(star(2, 7)));
        assert_eq!(mags(&engine), vec![1, 7, 7]);
    }

    #[test]
    fn test_capacity_one() {
        let mut engine = ResultOrderingEngine::new(by_magnitude(), 0);
        assert_eq!(engine.capacity(), 1);
        engine.insert(star(1, 5));
        engine.insert(star(2, 3));
        engine.insert(star(3, 4));
        assert_eq!(mags(&engine), vec![3]);
        assert_eq!(engine.into_sorted()[0].id, 2);
    }

    #[test]
    fn test_multi_key_and_descending() {
        let comparator = Comparator::new(vec![
            SortKey::descending(Field::Detections),
            SortKey::ascending(Field::Identifier),
        ]);
        let mut engine = ResultOrderingEngine::new(comparator, 10);
        for (id, detections) in [(1, 2), (2, 5), (3, 2), (4, 5)] {
            let mut record = star(id, 0);
            record.detections = detections;
            engine.insert(record);
        }
        let ids: Vec<u32> = engine.into_sorted().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![2, 4, 1, 3]);
    }

    #[test]
    fn test_missing_values() {
        let comparator = by_magnitude();
        let absent = CatalogRecord::native(900, 1, 0, 0);
        assert_eq!(comparator.compare(&absent, &star(2, 1500)), Ordering::Greater);

        let distance = Comparator::new(vec![SortKey::descending(Field::Distance)]);
        let mut near = star(3, 0);
        near.derived.distance = Some(10);
        assert_eq!(distance.compare(&absent, &near), Ordering::Less);
    }

    proptest! {
        #[test]
        fn prop_top_k_matches_sorted_prefix(
            values in prop::collection::vec(0i32..50, 0..80),
            k in 1usize..20,
        ) {
            let mut forward = ResultOrderingEngine::new(by_magnitude(), k);
            for (id, &mag) in values.iter().enumerate() {
                forward.insert(star(id as u32, mag));
            }
            let mut expected = values.clone();
            expected.sort_unstable();
            expected.truncate(k);
            prop_assert_eq!(mags(&forward), expected.clone());

            let mut reversed = values.clone();
            reversed.sort_unstable_by(|a, b| b.cmp(a));
            let mut backward = ResultOrderingEngine::new(by_magnitude(), k);
            for (id, &mag) in reversed.iter().enumerate() {
                backward.insert(star(id as u32, mag));
            }
            prop_assert_eq!(mags(&backward), expected);
        }
    }
}
