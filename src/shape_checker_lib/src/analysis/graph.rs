//! Generate control flow graphs out of the functions of a program.
//!
//! The generated graphs follow some basic principles:
//! * **Nodes** denote specific (abstract) points in time during program execution,
//! i.e. information does not change on a node.
//! So a basic block itself is not a node,
//! but the points in time before and after execution of the basic block can be nodes.
//! * **Edges** denote transitions between the points in time of their start and end nodes during program execution.
//!
//! # Function graphs
//!
//! The analysis is interprocedural through call summaries,
//! so every function gets its own control flow graph built as follows:
//! * Each basic block is converted into two nodes, *BlkStart* and *BlkEnd*,
//! and a *Block* edge from *BlkStart* to *BlkEnd*.
//! * Intraprocedural jumps are converted to *Jump* edges from the *BlkEnd* node of their source
//! to the *BlkStart* node of their target.
//! * Calls (to internal functions, extern functions and builtins alike) are converted to *Call* edges
//! from the *BlkEnd* node of the call site to the *BlkStart* node of the block the call returns to.
//! * Return instructions are converted to *Return* edges to the unique *Exit* node of the function.
//! * Each `longjmp` call gets a *LongJmp* edge to the return block of each `setjmp` call of the same function.
//! * Calls to internal functions that may `longjmp` get a *CallLongJmp* edge
//! to the return block of each `setjmp` call of the calling function.
//!
//! The last two edge types make nonlocal control transfers explicit in the graph,
//! so the fixpoint computation never needs to unwind a runtime stack.
//!
//! Loop heads are the targets of back edges of a depth-first search starting at the entry node.

use crate::intermediate_representation::*;
use crate::prelude::*;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{depth_first_search, Control, DfsEvent};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Names of extern functions that behave like `setjmp`.
pub const SETJMP_SYMBOLS: [&str; 4] = ["setjmp", "_setjmp", "sigsetjmp", "__builtin_setjmp"];

/// Names of extern functions that behave like `longjmp`.
pub const LONGJMP_SYMBOLS: [&str; 4] = ["longjmp", "_longjmp", "siglongjmp", "__builtin_longjmp"];

/// The graph type of a function control flow graph.
pub type Graph<'a> = DiGraph<Node<'a>, Edge<'a>>;

/// The node type of a function control flow graph.
#[derive(Serialize, Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum Node<'a> {
    /// A node corresponding to the start of a basic block,
    /// i.e. to the point in time just before the execution of the block.
    BlkStart(&'a Term<Blk>),
    /// A node corresponding to the end of the basic block,
    /// i.e. to the point in time just after the execution of all `Def` instructions in the block
    /// but before execution of the jump instructions at the end of the block.
    BlkEnd(&'a Term<Blk>),
    /// The point in time just after the function returned and its stack frame was torn down.
    Exit,
}

impl<'a> std::fmt::Display for Node<'a> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::BlkStart(block) => write!(formatter, "BlkStart @ {}", block.tid),
            Self::BlkEnd(block) => write!(formatter, "BlkEnd @ {}", block.tid),
            Self::Exit => write!(formatter, "Exit"),
        }
    }
}

/// The edge type of a function control flow graph.
///
/// Where applicable the edge carries a reference to the corresponding jump instruction.
/// Intraprocedural jumps carry a second optional reference,
/// which is only set if the jump directly follows a conditional jump,
/// i.e. it represents the "conditional jump not taken" branch.
#[derive(Serialize, Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum Edge<'a> {
    /// An edge between the `BlkStart` and `BlkEnd` nodes of a basic block.
    Block,
    /// An edge corresponding to an intraprocedural jump instruction.
    /// If the jump is only taken if a previous conditional jump is not taken,
    /// then a reference to the untaken conditional jump is also added to the jump label.
    Jump(&'a Term<Jmp>, Option<&'a Term<Jmp>>),
    /// A call from the call site to the return-to block.
    Call(&'a Term<Jmp>),
    /// A return instruction to the exit node.
    Return(&'a Term<Jmp>),
    /// A `longjmp` call resuming at the return block of a `setjmp` call of the same function.
    LongJmp {
        /// The `longjmp` call.
        longjmp: &'a Term<Jmp>,
        /// The `setjmp` call.
        setjmp: &'a Term<Jmp>,
    },
    /// A call to an internal function that may leave the callee through a `longjmp`
    /// to the given `setjmp` call of the caller.
    CallLongJmp {
        /// The call to the internal function.
        call: &'a Term<Jmp>,
        /// The `setjmp` call.
        setjmp: &'a Term<Jmp>,
    },
}

/// The control flow graph of one function together with its distinguished nodes.
pub struct FunctionGraph<'a> {
    /// The function.
    pub sub: &'a Term<Sub>,
    /// The graph.
    pub graph: Graph<'a>,
    /// The `BlkStart` node of the entry block.
    pub entry: NodeIndex,
    /// The exit node.
    pub exit: NodeIndex,
    /// Targets of back edges, i.e. nodes where widening is applied.
    pub loop_heads: BTreeSet<NodeIndex>,
}

/// A builder struct for function graphs.
struct GraphBuilder<'a, 'b> {
    sub: &'a Term<Sub>,
    may_longjmp: &'b BTreeSet<Tid>,
    graph: Graph<'a>,
    /// Maps block TIDs to their `BlkStart` and `BlkEnd` nodes.
    block_nodes: HashMap<&'a Tid, (NodeIndex, NodeIndex)>,
    exit: NodeIndex,
}

impl<'a, 'b> GraphBuilder<'a, 'b> {
    fn new(sub: &'a Term<Sub>, may_longjmp: &'b BTreeSet<Tid>) -> GraphBuilder<'a, 'b> {
        let mut graph = Graph::new();
        let exit = graph.add_node(Node::Exit);
        GraphBuilder {
            sub,
            may_longjmp,
            graph,
            block_nodes: HashMap::new(),
            exit,
        }
    }

    /// Add start and end nodes of all blocks and the connecting edges.
    fn add_blocks(&mut self) {
        for block in self.sub.term.blocks.iter() {
            let start = self.graph.add_node(Node::BlkStart(block));
            let end = self.graph.add_node(Node::BlkEnd(block));
            self.graph.add_edge(start, end, Edge::Block);
            self.block_nodes.insert(&block.tid, (start, end));
        }
    }

    fn block_start(&self, tid: &Tid) -> Result<NodeIndex, Error> {
        self.block_nodes
            .get(tid)
            .map(|(start, _)| *start)
            .ok_or_else(|| anyhow!("Jump to unknown block {}", tid))
    }

    /// Add the edge for one jump instruction at the end of a block.
    fn add_jump_edge(
        &mut self,
        source: NodeIndex,
        jump: &'a Term<Jmp>,
        untaken_conditional: Option<&'a Term<Jmp>>,
    ) -> Result<(), Error> {
        match &jump.term {
            Jmp::Branch(target) | Jmp::CBranch { target, .. } => {
                let target = self.block_start(target)?;
                self.graph
                    .add_edge(source, target, Edge::Jump(jump, untaken_conditional));
            }
            Jmp::Call { return_, .. } => {
                let target = self.block_start(return_)?;
                self.graph.add_edge(source, target, Edge::Call(jump));
            }
            Jmp::Return(_) => {
                self.graph.add_edge(source, self.exit, Edge::Return(jump));
            }
        }
        Ok(())
    }

    fn add_jump_and_call_edges(&mut self) -> Result<(), Error> {
        for block in self.sub.term.blocks.iter() {
            let (_, end) = self.block_nodes[&block.tid];
            match block.term.jmps.as_slice() {
                [] => (),
                [jump] => self.add_jump_edge(end, jump, None)?,
                [if_jump, else_jump] => {
                    self.add_jump_edge(end, if_jump, None)?;
                    self.add_jump_edge(end, else_jump, Some(if_jump))?;
                }
                _ => {
                    return Err(anyhow!(
                        "Basic block {} with more than 2 jumps encountered",
                        block.tid
                    ))
                }
            }
        }
        Ok(())
    }

    /// Add `LongJmp` and `CallLongJmp` edges to every `setjmp` return block of the function.
    fn add_nonlocal_jump_edges(&mut self) -> Result<(), Error> {
        let calls: Vec<(&'a Term<Jmp>, NodeIndex)> = self
            .sub
            .term
            .blocks
            .iter()
            .flat_map(|block| {
                let end = self.block_nodes[&block.tid].1;
                block
                    .term
                    .jmps
                    .iter()
                    .filter(|jmp| matches!(jmp.term, Jmp::Call { .. }))
                    .map(move |jmp| (jmp, end))
            })
            .collect();
        let setjmps: Vec<&'a Term<Jmp>> = calls
            .iter()
            .filter(|(jmp, _)| is_setjmp_call(&jmp.term))
            .map(|(jmp, _)| *jmp)
            .collect();
        for setjmp in setjmps {
            let Jmp::Call { return_, .. } = &setjmp.term else {
                continue;
            };
            let resume = self.block_start(return_)?;
            for (jmp, source) in calls.iter() {
                if is_longjmp_call(&jmp.term) {
                    let edge = Edge::LongJmp {
                        longjmp: jmp,
                        setjmp,
                    };
                    self.graph.add_edge(*source, resume, edge);
                } else if let Jmp::Call {
                    target: Callee::Internal(callee),
                    ..
                } = &jmp.term
                {
                    if self.may_longjmp.contains(callee) {
                        let edge = Edge::CallLongJmp { call: jmp, setjmp };
                        self.graph.add_edge(*source, resume, edge);
                    }
                }
            }
        }
        Ok(())
    }

    /// Compute the targets of back edges of a depth-first search from the entry node.
    fn loop_heads(&self, entry: NodeIndex) -> BTreeSet<NodeIndex> {
        let mut loop_heads = BTreeSet::new();
        depth_first_search(&self.graph, Some(entry), |event| {
            if let DfsEvent::BackEdge(_, target) = event {
                loop_heads.insert(target);
            }
            Control::<()>::Continue
        });
        loop_heads
    }

    fn build(mut self) -> Result<FunctionGraph<'a>, Error> {
        self.add_blocks();
        self.add_jump_and_call_edges()?;
        self.add_nonlocal_jump_edges()?;
        let entry_block = self
            .sub
            .term
            .blocks
            .first()
            .ok_or_else(|| anyhow!("Function {} contains no blocks", self.sub.tid))?;
        let entry = self.block_nodes[&entry_block.tid].0;
        let loop_heads = self.loop_heads(entry);
        Ok(FunctionGraph {
            sub: self.sub,
            graph: self.graph,
            entry,
            exit: self.exit,
            loop_heads,
        })
    }
}

/// Returns true if the jump is a call to a `setjmp`-like function.
pub fn is_setjmp_call(jmp: &Jmp) -> bool {
    jmp.extern_callee_name()
        .map_or(false, |name| SETJMP_SYMBOLS.contains(&name))
}

/// Returns true if the jump is a call to a `longjmp`-like function.
pub fn is_longjmp_call(jmp: &Jmp) -> bool {
    jmp.extern_callee_name()
        .map_or(false, |name| LONGJMP_SYMBOLS.contains(&name))
}

/// Compute the set of functions that may leave through a `longjmp`,
/// either directly or through one of their (transitive) callees.
pub fn functions_that_may_longjmp(program: &Program) -> BTreeSet<Tid> {
    let mut callers: BTreeMap<&Tid, BTreeSet<&Tid>> = BTreeMap::new();
    let mut worklist: Vec<&Tid> = Vec::new();
    for sub in program.subs.iter() {
        for jmp in sub.term.blocks.iter().flat_map(|blk| blk.term.jmps.iter()) {
            if is_longjmp_call(&jmp.term) {
                worklist.push(&sub.tid);
            } else if let Jmp::Call {
                target: Callee::Internal(callee),
                ..
            } = &jmp.term
            {
                callers.entry(callee).or_default().insert(&sub.tid);
            }
        }
    }
    let mut may_longjmp = BTreeSet::new();
    while let Some(tid) = worklist.pop() {
        if may_longjmp.insert(tid.clone()) {
            if let Some(tid_callers) = callers.get(tid) {
                worklist.extend(tid_callers.iter().copied());
            }
        }
    }
    may_longjmp
}

/// Build the control flow graph of a single function.
pub fn get_function_graph<'a>(
    sub: &'a Term<Sub>,
    may_longjmp: &BTreeSet<Tid>,
) -> Result<FunctionGraph<'a>, Error> {
    GraphBuilder::new(sub, may_longjmp).build()
}

#[cfg(test)]
mod tests;
