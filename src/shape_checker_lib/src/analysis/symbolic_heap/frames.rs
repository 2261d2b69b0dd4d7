//! Stack frames of function calls and the jump markers of `setjmp`.

use super::*;
use crate::abstract_domain::SpecializeByConditional;
use crate::intermediate_representation::{DataType, Expression, Jmp, Sub, Variable};
use std::collections::BTreeMap;

/// The initial content of a parameter of a new frame.
enum Argument {
    Value(Value),
    /// A copy of the caller's object holding an aggregate argument.
    Aggregate(HeapObject),
    Unknown,
}

impl<'a> Engine<'a> {
    /// Push a frame for a call of `sub`.
    ///
    /// The arguments are evaluated in the frame of the caller.
    /// If `args` is `None` (e.g. for the entry function of the analysis),
    /// all parameters hold unknown values.
    /// Local variables start uninitialized.
    pub fn enter_function(
        &self,
        disjunct: &mut Disjunct,
        sub: &Term<Sub>,
        call_site: Option<Tid>,
        args: Option<&[Expression]>,
    ) -> Result<(), Error> {
        let mut arguments = Vec::new();
        for (index, param) in sub.term.params.iter().enumerate() {
            let arg = args.and_then(|args| args.get(index));
            arguments.push(match arg {
                None => Argument::Unknown,
                Some(Expression::Var(source)) if param.data_type.is_aggregate() => {
                    let id = self.var_object(disjunct, source)?;
                    let object = disjunct
                        .object(id)
                        .ok_or_else(|| anyhow!("Variable {} without memory object", source))?;
                    Argument::Aggregate(object.clone())
                }
                Some(arg) if param.data_type.is_aggregate() => {
                    return Err(anyhow!("Aggregate argument {} is not a variable", arg))
                }
                Some(arg) => Argument::Value(self.eval(disjunct, arg)?),
            });
        }
        let mut frame = Frame::new(sub.tid.clone(), call_site);
        for (param, argument) in sub.term.params.iter().zip(arguments) {
            let size = self.program.size_of(param)?;
            let object = match argument {
                Argument::Aggregate(mut object) => {
                    object.storage = Storage::Stack;
                    object.origin = None;
                    object
                }
                Argument::Value(value) => {
                    let mut object = HeapObject::new(
                        Storage::Stack,
                        size.as_offset().into(),
                        Fill::Uninitialized,
                    );
                    object.write_at(0, self.coerce(value, &param.data_type)?);
                    object
                }
                Argument::Unknown => {
                    let mut object =
                        HeapObject::new(Storage::Stack, size.as_offset().into(), Fill::Unknown);
                    if !param.data_type.is_aggregate() {
                        object.write_at(0, unknown_value(&param.data_type, size));
                    }
                    object
                }
            };
            frame.vars.insert(param.name.clone(), disjunct.add_object(object));
        }
        for local in sub.term.locals.iter() {
            let size = self.program.size_of(local)?;
            let object =
                HeapObject::new(Storage::Stack, size.as_offset().into(), Fill::Uninitialized);
            frame.vars.insert(local.name.clone(), disjunct.add_object(object));
        }
        disjunct.frames.push(frame);
        Ok(())
    }

    /// Pop the innermost frame.
    ///
    /// The objects of the frame become wild and the jump markers of the frame are dropped.
    /// `return_value` becomes the pending return value of the disjunct.
    /// Objects that became unreachable are collected and reported as leaks
    /// in the context of the returning function.
    pub fn leave_function(
        &self,
        disjunct: &mut Disjunct,
        return_value: Option<Value>,
        reports: &mut Vec<EngineReport>,
    ) {
        let stack = report_stack(disjunct);
        let Some(frame) = disjunct.frames.pop() else {
            return;
        };
        for id in frame.vars.values().chain(frame.allocas.iter()) {
            if let Some(object) = disjunct.object_mut(*id) {
                object.kill();
            }
        }
        let depth = disjunct.depth();
        disjunct.jump_markers.retain(|marker| marker.depth <= depth);
        disjunct.return_value = return_value;
        let first_new_report = reports.len();
        self.collect_garbage(disjunct, reports);
        for report in reports[first_new_report..].iter_mut() {
            report.stack = stack.clone();
        }
    }

    /// Record the jump context of a `setjmp` call that stores it in the buffer `env`.
    ///
    /// Returns false if the jump buffer is not a known object.
    pub fn record_jump_marker(
        &self,
        disjunct: &mut Disjunct,
        site: &Tid,
        env: &Expression,
    ) -> Result<bool, Error> {
        let Some(env) = self.eval(disjunct, env)?.referenced_object() else {
            return Ok(false);
        };
        let depth = disjunct.depth();
        let mut snapshot = BTreeMap::new();
        for var in self.current_sub(disjunct)?.term.frame_variables() {
            if var.is_volatile {
                continue;
            }
            let id = self.var_object(disjunct, var)?;
            if let Some(object) = disjunct.object(id) {
                snapshot.insert(var.name.clone(), object.fields.clone());
            }
        }
        disjunct
            .jump_markers
            .retain(|marker| !(marker.site == *site && marker.env == env && marker.depth == depth));
        disjunct.jump_markers.push(JumpMarker {
            site: site.clone(),
            env,
            depth,
            snapshot,
        });
        Ok(true)
    }

    /// The object of the jump buffer argument of a `longjmp` call.
    /// Returns `None` if the buffer is not a known object.
    pub fn jump_buffer(
        &self,
        disjunct: &Disjunct,
        env: &Expression,
    ) -> Result<Option<ObjectId>, Error> {
        Ok(self.eval(disjunct, env)?.referenced_object())
    }

    /// Resume execution after the `setjmp` call `setjmp` because of a `longjmp` with `value`.
    ///
    /// Frames above the frame of the `setjmp` call are popped.
    /// Non-volatile variables of the frame that changed since the `setjmp` call become stale.
    /// The result of the `setjmp` call is the (non-zero) `longjmp` value.
    /// Returns `None` if no matching jump marker exists.
    pub fn resume_at_setjmp(
        &self,
        mut disjunct: Disjunct,
        setjmp: &Term<Jmp>,
        env: Option<ObjectId>,
        value: Value,
        reports: &mut Vec<EngineReport>,
    ) -> Result<Option<Disjunct>, Error> {
        let Some(marker_depth) = find_marker(&disjunct, &setjmp.tid, env).map(|m| m.depth) else {
            return Ok(None);
        };
        if marker_depth > disjunct.depth() {
            return Ok(None);
        }
        while disjunct.depth() > marker_depth {
            self.leave_function(&mut disjunct, None, reports);
        }
        disjunct.return_value = None;
        let Some(marker) = find_marker(&disjunct, &setjmp.tid, env).cloned() else {
            return Ok(None);
        };
        let sub = self.current_sub(&disjunct)?;
        for var in sub.term.frame_variables() {
            let Some(snapshot) = marker.snapshot.get(&var.name) else {
                continue;
            };
            let id = self.var_object(&disjunct, var)?;
            let changed = disjunct
                .object(id)
                .map_or(false, |object| object.fields != *snapshot);
            if changed {
                self.mark_stale(&mut disjunct, var, id)?;
            }
        }
        if let Jmp::Call {
            result: Some(result),
            ..
        } = &setjmp.term
        {
            let size = self.program.size_of(result)?;
            let value = match value {
                Value::Scalar { interval, .. } => Value::Scalar {
                    interval: interval
                        .add_not_equal_bound(0)
                        .unwrap_or_else(|_| IntervalDomain::from(1)),
                    size,
                },
                _ => Value::unknown_scalar(size),
            };
            self.write_var(&mut disjunct, result, value)?;
        }
        Ok(Some(disjunct))
    }

    /// Overwrite every component of a variable with a stale value.
    fn mark_stale(
        &self,
        disjunct: &mut Disjunct,
        var: &Variable,
        id: ObjectId,
    ) -> Result<(), Error> {
        let leaves = var.data_type.leaf_fields(&self.program.structs)?;
        let mut stale_fields = Vec::new();
        for (offset, data_type) in leaves {
            let size = data_type.size(&self.program.structs)?;
            stale_fields.push((
                offset,
                Value::Indeterminate {
                    cause: Indeterminacy::Stale,
                    size,
                },
            ));
        }
        if let Some(object) = disjunct.object_mut(id) {
            for (offset, value) in stale_fields {
                object.write_at(offset, value);
            }
        }
        Ok(())
    }

    /// The function of the innermost frame.
    fn current_sub(&self, disjunct: &Disjunct) -> Result<&'a Term<Sub>, Error> {
        let function = disjunct
            .current_function()
            .ok_or_else(|| anyhow!("No stack frame"))?;
        self.program
            .get_sub(function)
            .ok_or_else(|| anyhow!("Unknown function {}", function))
    }
}

/// Find the jump marker of the given `setjmp` call and jump buffer.
/// Any buffer matches if the buffer is unknown.
fn find_marker<'b>(
    disjunct: &'b Disjunct,
    site: &Tid,
    env: Option<ObjectId>,
) -> Option<&'b JumpMarker> {
    disjunct
        .jump_markers
        .iter()
        .rev()
        .find(|marker| marker.site == *site && env.map_or(true, |env| marker.env == env))
}

/// An unknown value of the given non-aggregate type.
fn unknown_value(data_type: &DataType, size: ByteSize) -> Value {
    if data_type.is_pointer() {
        Value::Top(size)
    } else {
        Value::unknown_scalar(size)
    }
}
