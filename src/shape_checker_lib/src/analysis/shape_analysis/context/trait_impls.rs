use super::*;
use crate::analysis::abstraction::{fold_segments, JoinMode};
use crate::analysis::graph::{Edge, Graph, Node};
use petgraph::graph::{EdgeIndex, NodeIndex};

impl<'a, 'b> crate::analysis::fixpoint::Context for Context<'a, 'b> {
    type EdgeLabel = Edge<'a>;
    type NodeLabel = Node<'a>;
    type NodeValue = StateSet;

    /// Get the control flow graph of the analysed function.
    fn get_graph(&self) -> &Graph<'a> {
        &self.graph.graph
    }

    /// Merge two disjunct sets, enforcing the disjunct cap.
    fn merge(&self, value1: &StateSet, value2: &StateSet) -> StateSet {
        let mut reports = Vec::new();
        let merged = value1.merge(value2, self.analysis.config.disjunct_cap, &mut reports);
        self.analysis.handle_reports(reports, &self.graph.sub.tid);
        merged
    }

    /// Widen the old disjunct set of a loop head by the new one.
    fn widen(&self, old: &StateSet, new: &StateSet) -> StateSet {
        let mut reports = Vec::new();
        let widened = old.widen(new, self.analysis.config.disjunct_cap, &mut reports);
        self.analysis.handle_reports(reports, &self.graph.sub.tid);
        widened
    }

    fn is_widening_point(&self, node: NodeIndex) -> bool {
        self.graph.loop_heads.contains(&node)
    }

    /// Compute the disjuncts at the end of an edge.
    ///
    /// List segments are folded at loop heads.
    /// Returns `None` if no disjunct reaches the end of the edge.
    fn update_edge(&self, value: &StateSet, edge: EdgeIndex) -> Option<StateSet> {
        let graph = &self.graph.graph;
        let (start, end) = graph.edge_endpoints(edge)?;
        let successors: Vec<Disjunct> = match graph[edge] {
            Edge::Block => match graph[start] {
                Node::BlkStart(block) => self.execute_block(value, block).into_iter().collect(),
                Node::BlkEnd(_) | Node::Exit => return None,
            },
            Edge::Jump(jump, untaken) => self.take_jump(value, jump, untaken),
            Edge::Call(call) => self.call(value, call),
            Edge::Return(jump) => self.return_from_function(value, jump),
            Edge::LongJmp { longjmp, setjmp } => self.resume_after_longjmp(value, longjmp, setjmp),
            Edge::CallLongJmp { call, setjmp } => {
                self.resume_after_callee_longjmp(value, call, setjmp)
            }
        };
        let fold = self.graph.loop_heads.contains(&end);
        let mut result = StateSet::new();
        for mut disjunct in successors {
            if fold {
                fold_segments(&mut disjunct);
            }
            result.add(disjunct, JoinMode::Join);
        }
        let mut reports = Vec::new();
        result.enforce_cap(self.analysis.config.disjunct_cap, &mut reports);
        self.analysis.handle_reports(reports, &self.graph.sub.tid);
        (!result.is_empty()).then_some(result)
    }
}
