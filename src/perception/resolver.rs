use crate::perception::types::UiNode;

/// Locate the node at pre-order position `target`.
///
/// Counts visits in the same order the snapshot builder assigns indices, so an
/// index taken from a snapshot always resolves against that snapshot.
pub fn find_by_index(root: &UiNode, target: usize) -> Option<&UiNode> {
    let mut visited = 0usize;
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if visited == target {
            return Some(node);
        }
        visited += 1;
        stack.extend(node.children.iter().rev());
    }
    None
}

/// Index lookup plus upward search over one captured tree.
///
/// Snapshot nodes carry no parent pointers; the resolver annotates the parent
/// chain once and walks that.
pub struct NodeResolver<'a> {
    nodes: Vec<&'a UiNode>,
    parents: Vec<Option<usize>>,
}

impl<'a> NodeResolver<'a> {
    pub fn new(root: &'a UiNode) -> Self {
        let mut nodes = Vec::new();
        let mut parents = Vec::new();
        let mut stack: Vec<(&'a UiNode, Option<usize>)> = vec![(root, None)];
        while let Some((node, parent)) = stack.pop() {
            let position = nodes.len();
            nodes.push(node);
            parents.push(parent);
            stack.extend(node.children.iter().rev().map(|c| (c, Some(position))));
        }
        Self { nodes, parents }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn find_by_index(&self, index: usize) -> Option<&'a UiNode> {
        self.nodes.get(index).copied()
    }

    pub fn parent_of(&self, index: usize) -> Option<usize> {
        self.parents.get(index).copied().flatten()
    }

    /// Number of ancestors above `index` (the root has depth 0).
    pub fn depth(&self, index: usize) -> Option<usize> {
        if index >= self.nodes.len() {
            return None;
        }
        let mut depth = 0;
        let mut current = self.parent_of(index);
        while let Some(parent) = current {
            depth += 1;
            current = self.parent_of(parent);
        }
        Some(depth)
    }

    /// Walk from `index` towards the root and return the first node matching
    /// `predicate`. The node itself is tested first.
    pub fn find_ancestor_where<P>(&self, index: usize, mut predicate: P) -> Option<&'a UiNode>
    where
        P: FnMut(&UiNode) -> bool,
    {
        let mut current = Some(index);
        while let Some(position) = current {
            let node = self.nodes.get(position)?;
            if predicate(node) {
                return Some(node);
            }
            current = self.parents[position];
        }
        None
    }

    pub fn nearest_clickable(&self, index: usize) -> Option<&'a UiNode> {
        self.find_ancestor_where(index, |n| n.clickable)
    }

    pub fn nearest_scrollable(&self, index: usize) -> Option<&'a UiNode> {
        self.find_ancestor_where(index, |n| n.scrollable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perception::types::Bounds;

    fn leaf(class: &str) -> UiNode {
        UiNode {
            index: 0,
            class_name: class.into(),
            text: None,
            accessibility_label: None,
            resource_id: None,
            clickable: false,
            scrollable: false,
            editable: false,
            checkable: false,
            checked: false,
            bounds: Bounds::default(),
            children: Vec::new(),
        }
    }

    fn with(class: &str, children: Vec<UiNode>) -> UiNode {
        UiNode { children, ..leaf(class) }
    }

    /// Stamp pre-order indices the way the snapshot builder does.
    fn numbered(mut root: UiNode) -> UiNode {
        fn stamp(node: &mut UiNode, next: usize) -> usize {
            node.index = next;
            let mut next = next + 1;
            for child in &mut node.children {
                next = stamp(child, next);
            }
            next
        }
        stamp(&mut root, 0);
        root
    }

    /// Deterministic pseudo-random tree with a bounded fan-out.
    fn generated(seed: u64, max_nodes: usize) -> UiNode {
        fn grow(state: &mut u64, depth: usize, budget: &mut usize) -> UiNode {
            *state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let fan_out = if depth > 6 { 0 } else { (*state >> 60) as usize % 4 };
            let mut node = leaf(&format!("N{depth}"));
            for _ in 0..fan_out {
                if *budget == 0 {
                    break;
                }
                *budget -= 1;
                node.children.push(grow(state, depth + 1, budget));
            }
            node
        }
        let mut state = seed;
        let mut budget = max_nodes;
        numbered(grow(&mut state, 0, &mut budget))
    }

    #[test]
    fn find_by_index_round_trips_assigned_indices() {
        for seed in 1..40 {
            let root = generated(seed, 60);
            for node in root.flatten() {
                let found = find_by_index(&root, node.index).expect("index resolves");
                assert!(std::ptr::eq(found, node), "seed {seed} index {}", node.index);
            }
            assert!(find_by_index(&root, root.subtree_len()).is_none());
        }
    }

    #[test]
    fn resolver_agrees_with_single_traversal_lookup() {
        let root = generated(7, 80);
        let resolver = NodeResolver::new(&root);
        assert_eq!(resolver.len(), root.subtree_len());
        for i in 0..resolver.len() {
            let a = resolver.find_by_index(i).unwrap();
            let b = find_by_index(&root, i).unwrap();
            assert!(std::ptr::eq(a, b));
            assert_eq!(a.index, i);
        }
    }

    #[test]
    fn ancestor_search_returns_self_when_it_matches() {
        let mut button = leaf("Button");
        button.clickable = true;
        let mut frame = with("Frame", vec![button]);
        frame.clickable = true;
        let root = numbered(frame);
        let resolver = NodeResolver::new(&root);
        assert_eq!(resolver.nearest_clickable(1).unwrap().index, 1);
    }

    #[test]
    fn ancestor_search_walks_to_nearest_match() {
        // 0 Root [clickable]
        //   1 Card [clickable]
        //     2 Row
        //       3 Text
        let mut card = with("Card", vec![with("Row", vec![leaf("Text")])]);
        card.clickable = true;
        let mut root = with("Root", vec![card]);
        root.clickable = true;
        let root = numbered(root);
        let resolver = NodeResolver::new(&root);
        assert_eq!(resolver.nearest_clickable(3).unwrap().index, 1);
        assert_eq!(resolver.parent_of(3), Some(2));
        assert_eq!(resolver.parent_of(0), None);
    }

    #[test]
    fn ancestor_search_without_match_visits_only_the_chain() {
        let root = generated(11, 80);
        let resolver = NodeResolver::new(&root);
        for i in 0..resolver.len() {
            let mut visits = 0;
            let found = resolver.find_ancestor_where(i, |_| {
                visits += 1;
                false
            });
            assert!(found.is_none());
            // the node itself plus each of its ancestors
            assert_eq!(visits, resolver.depth(i).unwrap() + 1);
        }
    }

    #[test]
    fn out_of_range_index_resolves_to_nothing() {
        let root = numbered(with("Root", vec![leaf("A")]));
        let resolver = NodeResolver::new(&root);
        assert!(resolver.find_by_index(2).is_none());
        assert!(resolver.find_ancestor_where(9, |_| true).is_none());
        assert!(resolver.depth(9).is_none());
    }
}
