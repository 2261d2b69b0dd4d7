//! A generic worklist solver for dataflow problems on graphs.
//!
//! A problem is described by a [`Context`]: a graph, a join operator on node values
//! and a transfer function per edge. Values flow along edges only.
//! Nodes are program points and edges are the state transitions between them.
//! An edge transfer function may return `None` if no state reaches the target of the edge,
//! e.g. for a branch whose condition contradicts the incoming state.
//!
//! The solver looks for the least assignment `val` of values to nodes
//! with `e(val(source)) <= val(target)` for every edge `e`,
//! starting from the values set through [`Computation::set_node_value`].
//!
//! Nodes are processed in weak topological order, so that the inner nodes of a loop
//! stabilize before the nodes after the loop are visited.
//! Every node has a visit budget and the whole run may have a deadline.
//! A computation that runs out of either is not a fixpoint,
//! which [`Computation::compute_with_budget`] reports by returning `false`.
//!
//! # Widening
//!
//! The context can mark nodes as widening points (the loop heads)
//! and provide a widening operator.
//! The [`WideningStrategy`] of the computation decides after how many updates
//! of a widening point widening replaces joining.

use fnv::FnvHashMap;
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

/// Strategy for when to apply widening at widening points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WideningStrategy {
    /// Widen at every update of a widening point.
    AllJoins,
    /// Only merge, never widen.
    /// Suitable for value domains that guarantee termination without widening.
    Never,
    /// Merge for the first `n` updates of each widening point, then widen.
    Delayed(usize),
}

impl WideningStrategy {
    /// Returns whether the `update_count`-th update (counting from zero) of a widening point should widen.
    pub fn should_widen(&self, update_count: usize) -> bool {
        match self {
            Self::AllJoins => true,
            Self::Never => false,
            Self::Delayed(n) => update_count >= *n,
        }
    }
}

/// The problem description of a fixpoint computation.
pub trait Context {
    type EdgeLabel: Clone;
    type NodeLabel;
    /// The abstract state at a node. Values must form a join-semilattice.
    type NodeValue: PartialEq + Eq + Clone;

    /// Get the graph on which the fixpoint computation operates.
    fn get_graph(&self) -> &DiGraph<Self::NodeLabel, Self::EdgeLabel>;

    /// Join two values.
    fn merge(&self, val1: &Self::NodeValue, val2: &Self::NodeValue) -> Self::NodeValue;

    /// Widen the old value at a widening point with a new incoming value.
    /// The result must be an upper bound of both values
    /// and every chain of repeated widenings must stabilize.
    ///
    /// Defaults to [`Context::merge`].
    fn widen(&self, old: &Self::NodeValue, new: &Self::NodeValue) -> Self::NodeValue {
        self.merge(old, new)
    }

    /// Returns whether values at the given node should be widened once the widening strategy allows it.
    fn is_widening_point(&self, _node: NodeIndex) -> bool {
        false
    }

    /// Transfer the value at the source of an edge to its target.
    /// Returns `None` if the edge cannot be taken from the given value.
    fn update_edge(&self, value: &Self::NodeValue, edge: EdgeIndex) -> Option<Self::NodeValue>;
}

/// A running fixpoint computation together with its current node values.
///
/// ```ignore
/// let mut computation = Computation::new(context, None);
/// computation.set_node_value(entry, entry_state);
/// let stabilized = computation.compute_with_budget(max_steps, deadline);
/// let exit_state = computation.get_node_value(exit);
/// ```
pub struct Computation<T: Context> {
    fp_context: T,
    /// Node index to priority. Higher priorities are processed first.
    node_priority_list: Vec<usize>,
    /// Priority to node index.
    priority_to_node_list: Vec<NodeIndex>,
    /// Priorities of the nodes that are not yet stable.
    worklist: BTreeSet<usize>,
    node_values: FnvHashMap<NodeIndex, T::NodeValue>,
    /// When to widen at widening points.
    widening: WideningStrategy,
    /// Counts for each node how often its value changed through merging.
    update_counts: FnvHashMap<NodeIndex, usize>,
}

impl<T: Context> Computation<T> {
    /// Create a computation with the nodes ordered by the strongly connected components of the graph.
    /// With a default value every node starts with it and is put on the worklist.
    pub fn new(fp_context: T, default_value: Option<T::NodeValue>) -> Self {
        let graph = fp_context.get_graph();
        // order the nodes in weak topological order
        let priority_sorted_nodes: Vec<NodeIndex> = petgraph::algo::kosaraju_scc(&graph)
            .into_iter()
            .flatten()
            .collect();
        Self::from_node_priority_list(fp_context, default_value, priority_sorted_nodes)
    }

    /// Create a computation with an explicit node order.
    /// Nodes later in `priority_sorted_nodes` are processed first.
    pub fn from_node_priority_list(
        fp_context: T,
        default_value: Option<T::NodeValue>,
        priority_sorted_nodes: Vec<NodeIndex>,
    ) -> Self {
        let mut node_to_index = BTreeMap::new();
        for (i, node_index) in priority_sorted_nodes.iter().enumerate() {
            node_to_index.insert(node_index, i);
        }
        let node_priority_list: Vec<usize> = node_to_index.values().copied().collect();
        let mut worklist = BTreeSet::new();
        // If a default value exists, all nodes are added to the worklist. If not, the worklist is empty
        let mut node_values: FnvHashMap<NodeIndex, T::NodeValue> = FnvHashMap::default();
        if let Some(default) = default_value {
            for i in 0..priority_sorted_nodes.len() {
                worklist.insert(i);
                node_values.insert(NodeIndex::new(i), default.clone());
            }
        }
        Computation {
            fp_context,
            node_priority_list,
            priority_to_node_list: priority_sorted_nodes,
            worklist,
            node_values,
            widening: WideningStrategy::Never,
            update_counts: FnvHashMap::default(),
        }
    }

    /// Set the widening strategy of the computation.
    pub fn with_widening(mut self, widening: WideningStrategy) -> Self {
        self.widening = widening;
        self
    }

    /// Get the value of a node.
    pub fn get_node_value(&self, node: NodeIndex) -> Option<&T::NodeValue> {
        self.node_values.get(&node)
    }

    /// Set the value of a node and mark the node as not yet stabilized.
    pub fn set_node_value(&mut self, node: NodeIndex, value: T::NodeValue) {
        self.node_values.insert(node, value);
        self.worklist.insert(self.node_priority_list[node.index()]);
    }

    /// Merge the value at a node with some new value.
    /// At widening points the widening strategy decides whether to merge or to widen.
    fn merge_node_value(&mut self, node: NodeIndex, value: T::NodeValue) {
        if let Some(old_value) = self.node_values.get(&node) {
            let update_count = self.update_counts.get(&node).copied().unwrap_or(0);
            let merged_value = if self.fp_context.is_widening_point(node)
                && self.widening.should_widen(update_count)
            {
                self.fp_context.widen(old_value, &value)
            } else {
                self.fp_context.merge(old_value, &value)
            };
            if merged_value != *old_value {
                *self.update_counts.entry(node).or_insert(0) += 1;
                self.set_node_value(node, merged_value);
            }
        } else {
            self.set_node_value(node, value);
        }
    }

    /// Compute and update the value at the end node of an edge.
    fn update_edge(&mut self, edge: EdgeIndex) {
        let Some((start_node, end_node)) = self.fp_context.get_graph().edge_endpoints(edge) else {
            return;
        };
        if let Some(start_val) = self.node_values.get(&start_node) {
            if let Some(new_end_val) = self.fp_context.update_edge(start_val, edge) {
                self.merge_node_value(end_node, new_end_val);
            }
        }
    }

    /// Update all outgoing edges of a node.
    fn update_node(&mut self, node: NodeIndex) {
        let edges: Vec<EdgeIndex> = self
            .fp_context
            .get_graph()
            .edges(node)
            .map(|edge_ref| edge_ref.id())
            .collect();
        for edge in edges {
            self.update_edge(edge);
        }
    }

    /// Compute the fixpoint of the fixpoint problem with a step budget per node and an optional deadline.
    ///
    /// Each node will be visited at most `max_steps` times.
    /// If the deadline passes, the computation stops and all nodes still on the worklist count as not stabilized.
    /// Returns `true` if the computation has stabilized.
    pub fn compute_with_budget(&mut self, max_steps: u64, deadline: Option<Instant>) -> bool {
        let mut steps = vec![0; self.fp_context.get_graph().node_count()];
        let mut non_stabilized_nodes = BTreeSet::new();
        while let Some(priority) = self.worklist.pop_last() {
            if deadline.map_or(false, |deadline| Instant::now() >= deadline) {
                non_stabilized_nodes.insert(priority);
                break;
            }
            let node = self.priority_to_node_list[priority];
            if steps[node.index()] < max_steps {
                steps[node.index()] += 1;
                self.update_node(node);
            } else {
                non_stabilized_nodes.insert(priority);
            }
        }
        // After the algorithm finished, the new worklist is the list of non-stabilized nodes
        self.worklist.append(&mut non_stabilized_nodes);
        self.has_stabilized()
    }

    /// Get a reference to the underlying context object
    pub fn get_context(&self) -> &T {
        &self.fp_context
    }

    /// Returns `True` if the computation has stabilized, i.e. the internal worklist is empty.
    pub fn has_stabilized(&self) -> bool {
        self.worklist.is_empty()
    }

    /// Return a list of all nodes which are marked as not-stabilized
    pub fn get_worklist(&self) -> Vec<NodeIndex> {
        self.worklist
            .iter()
            .map(|priority| self.priority_to_node_list[*priority])
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Shortest-path distances, merged by taking the minimum.
    struct FPContext {
        graph: DiGraph<(), u64>,
    }

    impl Context for FPContext {
        type EdgeLabel = u64;
        type NodeLabel = ();
        type NodeValue = u64;

        fn get_graph(&self) -> &DiGraph<(), u64> {
            &self.graph
        }

        fn merge(&self, val1: &Self::NodeValue, val2: &Self::NodeValue) -> Self::NodeValue {
            std::cmp::min(*val1, *val2)
        }

        fn update_edge(&self, value: &Self::NodeValue, edge: EdgeIndex) -> Option<Self::NodeValue> {
            Some(value + self.graph.edge_weight(edge).unwrap())
        }
    }

    /// A counter that is incremented around a loop.
    /// Without widening the value at the loop head grows with every iteration.
    struct CounterContext {
        graph: DiGraph<(), ()>,
    }

    impl Context for CounterContext {
        type EdgeLabel = ();
        type NodeLabel = ();
        type NodeValue = u64;

        fn get_graph(&self) -> &DiGraph<(), ()> {
            &self.graph
        }

        fn merge(&self, val1: &u64, val2: &u64) -> u64 {
            std::cmp::max(*val1, *val2)
        }

        fn widen(&self, old: &u64, new: &u64) -> u64 {
            if new > old {
                u64::MAX
            } else {
                *old
            }
        }

        fn is_widening_point(&self, node: NodeIndex) -> bool {
            node.index() == 1
        }

        fn update_edge(&self, value: &u64, _edge: EdgeIndex) -> Option<u64> {
            Some(value.saturating_add(1))
        }
    }

    fn counter_loop() -> CounterContext {
        let mut graph = DiGraph::new();
        let entry = graph.add_node(());
        let head = graph.add_node(());
        let body = graph.add_node(());
        graph.add_edge(entry, head, ());
        graph.add_edge(head, body, ());
        graph.add_edge(body, head, ());
        CounterContext { graph }
    }

    fn take_next_node_from_worklist<T: Context>(
        computation: &mut Computation<T>,
    ) -> Option<NodeIndex> {
        let priority = computation.worklist.pop_last()?;
        Some(computation.priority_to_node_list[priority])
    }

    fn chain_graph() -> DiGraph<(), u64> {
        let mut graph: DiGraph<(), u64> = DiGraph::new();
        for _i in 0..101 {
            graph.add_node(());
        }
        for i in 0..100 {
            graph.add_edge(NodeIndex::new(i), NodeIndex::new(i + 1), i as u64 % 10 + 1);
        }
        for i in 0..10 {
            graph.add_edge(NodeIndex::new(i * 10), NodeIndex::new(i * 10 + 5), 0);
        }
        graph
    }

    #[test]
    fn fixpoint() {
        let mut graph = chain_graph();
        graph.add_edge(NodeIndex::new(100), NodeIndex::new(0), 0);

        let mut solution = Computation::new(FPContext { graph }, None);
        solution.set_node_value(NodeIndex::new(0), 0);
        solution.compute_with_budget(20, None);

        assert!(solution.has_stabilized());
        assert_eq!(30, *solution.get_node_value(NodeIndex::new(9)).unwrap());
        assert_eq!(0, *solution.get_node_value(NodeIndex::new(5)).unwrap());
    }

    #[test]
    fn fixpoint_with_default_value() {
        let mut solution = Computation::new(
            FPContext {
                graph: chain_graph(),
            },
            Some(100),
        );
        solution.set_node_value(NodeIndex::new(10), 0);
        solution.compute_with_budget(20, None);

        assert_eq!(100, *solution.get_node_value(NodeIndex::new(0)).unwrap());
        assert_eq!(3, *solution.get_node_value(NodeIndex::new(12)).unwrap());
    }

    #[test]
    fn delayed_widening() {
        let mut computation =
            Computation::new(counter_loop(), None).with_widening(WideningStrategy::Delayed(3));
        computation.set_node_value(NodeIndex::new(0), 0);
        assert!(computation.compute_with_budget(100, None));
        assert_eq!(
            *computation.get_node_value(NodeIndex::new(1)).unwrap(),
            u64::MAX
        );
        assert_eq!(computation.update_counts[&NodeIndex::new(1)], 4);
    }

    #[test]
    fn step_budget_without_widening() {
        let mut computation = Computation::new(counter_loop(), None);
        computation.set_node_value(NodeIndex::new(0), 0);
        assert!(!computation.compute_with_budget(10, None));
        assert!(!computation.get_worklist().is_empty());
        assert!(WideningStrategy::AllJoins.should_widen(0));
        assert!(!WideningStrategy::Never.should_widen(1000));
    }

    #[test]
    fn deadline_stops_computation() {
        let mut computation = Computation::new(counter_loop(), None);
        computation.set_node_value(NodeIndex::new(0), 0);
        assert!(!computation.compute_with_budget(100, Some(Instant::now())));
        assert_eq!(computation.get_worklist(), vec![NodeIndex::new(0)]);
    }

    #[test]
    fn worklist_node_order() {
        let mut graph: DiGraph<(), u64> = DiGraph::new();
        for _i in 0..21 {
            graph.add_node(());
        }
        for i in 1..19 {
            graph.add_edge(NodeIndex::new(0), NodeIndex::new(i), 1);
            graph.add_edge(NodeIndex::new(i), NodeIndex::new(19), 1);
        }
        graph.add_edge(NodeIndex::new(19), NodeIndex::new(20), 1);
        let mut computation = Computation::new(FPContext { graph }, Some(1));
        assert!(computation.node_priority_list[0] > computation.node_priority_list[1]);
        assert!(computation.node_priority_list[1] > computation.node_priority_list[19]);
        assert!(computation.node_priority_list[19] > computation.node_priority_list[20]);
        assert_eq!(
            take_next_node_from_worklist(&mut computation),
            Some(NodeIndex::new(0))
        );
        for _i in 1..19 {
            assert!(take_next_node_from_worklist(&mut computation).unwrap().index() < 19);
        }
        assert_eq!(
            take_next_node_from_worklist(&mut computation),
            Some(NodeIndex::new(19))
        );
        assert_eq!(
            take_next_node_from_worklist(&mut computation),
            Some(NodeIndex::new(20))
        );
    }
}
