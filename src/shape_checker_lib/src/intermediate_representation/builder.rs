//! Builder functions for assembling programs of the intermediate representation by hand.
//!
//! Used by unit tests, acceptance tests and benchmarks.
//! Term identifiers are generated from labels:
//! a block with label `loop` in function `main` gets the TID `main_loop`,
//! its statements get the TIDs `main_loop_def0`, `main_loop_def1`, ...
//! and its jumps the TIDs `main_loop_jmp0` and `main_loop_jmp1`.

use super::*;

/// A 4-byte integer variable.
pub fn int_var(name: &str) -> Variable {
    Variable::new(name, DataType::Integer(ByteSize::new(4)))
}

/// A variable of type `void*`.
pub fn ptr_var(name: &str) -> Variable {
    Variable::new(name, DataType::pointer_to(DataType::Void))
}

/// A variable of type `struct <struct_name> *`.
pub fn struct_ptr_var(name: &str, struct_name: &str) -> Variable {
    Variable::new(
        name,
        DataType::pointer_to(DataType::Struct(struct_name.to_string())),
    )
}

/// The expression reading the given variable.
pub fn var_expr(var: &Variable) -> Expression {
    Expression::Var(var.clone())
}

/// The TID of the `index`-th statement of a block.
pub fn def_tid(sub: &str, label: &str, index: usize) -> Tid {
    Tid::new(format!("{}_{}_def{}", sub, label, index))
}

/// The TID of the `index`-th jump of a block.
pub fn jmp_tid(sub: &str, label: &str, index: usize) -> Tid {
    Tid::new(format!("{}_{}_jmp{}", sub, label, index))
}

/// The TID of a block.
pub fn blk_tid(sub: &str, label: &str) -> Tid {
    Tid::new(format!("{}_{}", sub, label))
}

/// Build a struct layout from `(field name, offset, type)` triples.
pub fn struct_layout(size: u64, fields: &[(&str, u64, DataType)]) -> StructLayout {
    StructLayout {
        size: ByteSize::new(size),
        fields: fields
            .iter()
            .map(|(name, offset, data_type)| StructField {
                name: name.to_string(),
                offset: ByteSize::new(*offset),
                data_type: data_type.clone(),
            })
            .collect(),
    }
}

/// Builder for a [`Program`].
#[derive(Default)]
pub struct ProgramBuilder {
    program: Program,
}

impl ProgramBuilder {
    /// Start with an empty program.
    pub fn new() -> ProgramBuilder {
        ProgramBuilder::default()
    }

    /// Add a struct type.
    pub fn structure(mut self, name: &str, layout: StructLayout) -> ProgramBuilder {
        self.program.structs.insert(name.to_string(), layout);
        self
    }

    /// Add a global variable.
    pub fn global(mut self, var: Variable) -> ProgramBuilder {
        self.program.globals.push(var);
        self
    }

    /// Add a function.
    pub fn sub(mut self, sub: SubBuilder) -> ProgramBuilder {
        self.program.subs.push(sub.build());
        self
    }

    /// Mark the function with the given name as an entry point.
    pub fn entry(mut self, name: &str) -> ProgramBuilder {
        self.program.entry_points.push(Tid::new(name));
        self
    }

    /// Return the finished program.
    pub fn build(self) -> Program {
        self.program
    }
}

/// Builder for a function. The first added block is the entry block.
pub struct SubBuilder {
    name: String,
    params: Vec<Variable>,
    locals: Vec<Variable>,
    blocks: Vec<Term<Blk>>,
}

impl SubBuilder {
    /// Start a new function with the given name. The name is also the TID of the function.
    pub fn new(name: &str) -> SubBuilder {
        SubBuilder {
            name: name.to_string(),
            params: Vec::new(),
            locals: Vec::new(),
            blocks: Vec::new(),
        }
    }

    /// Add a formal parameter.
    pub fn param(&mut self, var: Variable) -> &mut SubBuilder {
        self.params.push(var);
        self
    }

    /// Add a local variable.
    pub fn local(&mut self, var: Variable) -> &mut SubBuilder {
        self.locals.push(var);
        self
    }

    /// Start a new block with the given label.
    pub fn block(&mut self, label: &str) -> BlockBuilder<'_> {
        self.blocks.push(Term {
            tid: blk_tid(&self.name, label),
            term: Blk {
                defs: Vec::new(),
                jmps: Vec::new(),
            },
        });
        let index = self.blocks.len() - 1;
        BlockBuilder {
            sub_name: &self.name,
            label: label.to_string(),
            address: format!("{}:{}", self.name, label),
            blk: &mut self.blocks[index],
        }
    }

    fn build(self) -> Term<Sub> {
        Term {
            tid: Tid::new(&self.name),
            term: Sub {
                name: self.name,
                params: self.params,
                locals: self.locals,
                blocks: self.blocks,
            },
        }
    }
}

/// Builder for the statements of one block.
pub struct BlockBuilder<'a> {
    sub_name: &'a str,
    label: String,
    address: String,
    blk: &'a mut Term<Blk>,
}

impl<'a> BlockBuilder<'a> {
    fn push_def(self, def: Def) -> Self {
        let index = self.blk.term.defs.len();
        let tid = def_tid(self.sub_name, &self.label, index).with_address(&self.address);
        self.blk.term.defs.push(Term { tid, term: def });
        self
    }

    fn push_jmp(self, jmp: Jmp) -> Self {
        let index = self.blk.term.jmps.len();
        let tid = jmp_tid(self.sub_name, &self.label, index).with_address(&self.address);
        self.blk.term.jmps.push(Term { tid, term: jmp });
        self
    }

    fn target(&self, label: &str) -> Tid {
        blk_tid(self.sub_name, label)
    }

    /// `var = value`
    pub fn assign(self, var: &Variable, value: Expression) -> Self {
        self.push_def(Def::Assign {
            var: var.clone(),
            value,
        })
    }

    /// `var = *address`
    pub fn load(self, var: &Variable, address: Expression) -> Self {
        self.push_def(Def::Load {
            var: var.clone(),
            address,
        })
    }

    /// `*address = value` writing `size` bytes.
    pub fn store(self, address: Expression, value: Expression, size: u64) -> Self {
        self.push_def(Def::Store {
            address,
            value,
            size: ByteSize::new(size),
        })
    }

    /// Unconditional jump to the block with the given label.
    pub fn jump(self, label: &str) -> Self {
        let target = self.target(label);
        self.push_jmp(Jmp::Branch(target))
    }

    /// Conditional jump: to `then_label` if `condition` holds, else to `else_label`.
    pub fn cbranch(self, condition: Expression, then_label: &str, else_label: &str) -> Self {
        let then_target = self.target(then_label);
        let else_target = self.target(else_label);
        self.push_jmp(Jmp::CBranch {
            target: then_target,
            condition,
        })
        .push_jmp(Jmp::Branch(else_target))
    }

    /// Call an internal function and continue at the block with label `return_label`.
    pub fn call(
        self,
        callee: &str,
        args: Vec<Expression>,
        result: Option<&Variable>,
        return_label: &str,
    ) -> Self {
        let return_ = self.target(return_label);
        self.push_jmp(Jmp::Call {
            target: Callee::Internal(Tid::new(callee)),
            args,
            result: result.cloned(),
            return_,
        })
    }

    /// Call an extern function (or builtin) and continue at the block with label `return_label`.
    pub fn call_extern(
        self,
        name: &str,
        args: Vec<Expression>,
        result: Option<&Variable>,
        return_label: &str,
    ) -> Self {
        let return_ = self.target(return_label);
        self.push_jmp(Jmp::Call {
            target: Callee::Extern(name.to_string()),
            args,
            result: result.cloned(),
            return_,
        })
    }

    /// Return from the function.
    pub fn ret(self, value: Option<Expression>) -> Self {
        self.push_jmp(Jmp::Return(value))
    }
}
