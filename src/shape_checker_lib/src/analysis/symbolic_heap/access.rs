//! Memory accesses through pointers.
//!
//! Every load and store first resolves its address.
//! Resolving checks the address for the memory-safety defects that a dereference can cause
//! and materializes list segments, so that the access always hits a single concrete object.

use super::*;
use crate::abstract_domain::SpecializeByConditional;
use crate::analysis::abstraction::materialize_target;
use crate::checkers::{FindingKind, NoticeKind};
use crate::intermediate_representation::{DataType, Expression, Variable};

/// The memory location hit by an access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// A byte range of a live object.
    Field {
        /// The accessed object.
        object: ObjectId,
        /// The possible offsets of the access inside the object.
        offset: IntervalDomain,
    },
    /// An unknown location. Reads yield unknown values and writes are ignored.
    Unknown,
}

impl<'a> Engine<'a> {
    /// Resolve the address of an access of `size` bytes.
    ///
    /// Returns the disjuncts in which the access can proceed together with the accessed location.
    /// Defects are reported and their paths pruned,
    /// unless the engine is configured to continue after errors.
    pub fn resolve_address(
        &self,
        disjunct: Disjunct,
        address: &Expression,
        size: ByteSize,
        reports: &mut Vec<EngineReport>,
    ) -> Result<Vec<(Disjunct, Target)>, Error> {
        let mut pending = vec![(disjunct, 0)];
        let mut resolved = Vec::new();
        while let Some((disjunct, rounds)) = pending.pop() {
            let value = self.eval(&disjunct, address)?;
            let (target, id, offset) = match value {
                Value::Pointer {
                    target: target @ (PointerTarget::Object(id) | PointerTarget::Last(id)),
                    offset,
                } => (target, id, offset),
                Value::Pointer {
                    target: PointerTarget::MaybeNull(id),
                    offset,
                } => {
                    if rounds == 0 {
                        let description =
                            format!("Dereference of possibly NULL pointer {}", address);
                        self.defect_path(
                            disjunct.clone(),
                            FindingKind::NullDereference,
                            description,
                            reports,
                            &mut resolved,
                        );
                    }
                    (PointerTarget::Object(id), id, offset)
                }
                Value::Pointer {
                    target: PointerTarget::Null,
                    ..
                } => {
                    let description = format!("Dereference of NULL pointer {}", address);
                    self.defect_path(
                        disjunct,
                        FindingKind::NullDereference,
                        description,
                        reports,
                        &mut resolved,
                    );
                    continue;
                }
                Value::Scalar { interval, .. } if interval.try_to_value() == Some(0) => {
                    let description = format!("Dereference of NULL value {}", address);
                    self.defect_path(
                        disjunct,
                        FindingKind::NullDereference,
                        description,
                        reports,
                        &mut resolved,
                    );
                    continue;
                }
                Value::Scalar { interval, .. } if interval.contains(0) => {
                    // The non-zero values continue as an access to an unknown location.
                    let description = format!("Dereference of possibly NULL value {}", address);
                    self.defect(&disjunct, FindingKind::NullDereference, description, reports);
                    self.notice(
                        &disjunct,
                        NoticeKind::UnknownValueDereference,
                        format!("Dereference of unknown value {}", address),
                        reports,
                    );
                    resolved.push((disjunct, Target::Unknown));
                    continue;
                }
                Value::Indeterminate { cause, .. } => {
                    let description = match cause {
                        Indeterminacy::Uninitialized => {
                            format!("Dereference of uninitialized pointer {}", address)
                        }
                        Indeterminacy::Stale => format!(
                            "Dereference of pointer {} clobbered by longjmp",
                            address
                        ),
                    };
                    self.defect_path(
                        disjunct,
                        FindingKind::WildPointer,
                        description,
                        reports,
                        &mut resolved,
                    );
                    continue;
                }
                Value::Scalar { .. } | Value::Top(_) => {
                    self.notice(
                        &disjunct,
                        NoticeKind::UnknownValueDereference,
                        format!("Dereference of unknown value {}", address),
                        reports,
                    );
                    resolved.push((disjunct, Target::Unknown));
                    continue;
                }
            };
            let Some(object) = disjunct.object(id) else {
                self.notice(
                    &disjunct,
                    NoticeKind::UnsupportedConstruct,
                    format!("Dereference of dangling object reference {}", id),
                    reports,
                );
                continue;
            };
            match object.validity {
                Validity::Freed => {
                    let description = format!("Access to freed memory through {}", address);
                    self.defect_path(
                        disjunct,
                        FindingKind::UseAfterFree,
                        description,
                        reports,
                        &mut resolved,
                    );
                    continue;
                }
                Validity::Wild => {
                    let description =
                        format!("Access to a dead stack frame through {}", address);
                    self.defect_path(
                        disjunct,
                        FindingKind::WildPointer,
                        description,
                        reports,
                        &mut resolved,
                    );
                    continue;
                }
                Validity::Live => (),
            }
            if object.is_segment() {
                if rounds < self.options.unfold_bound {
                    pending.extend(
                        materialize_target(disjunct, target)
                            .into_iter()
                            .map(|disjunct| (disjunct, rounds + 1)),
                    );
                } else {
                    self.notice(
                        &disjunct,
                        NoticeKind::UnsupportedConstruct,
                        "Segment materialization limit reached",
                        reports,
                    );
                    resolved.push((disjunct, Target::Unknown));
                }
                continue;
            }
            let last_valid_offset = object.min_size() - size.as_offset();
            let valid = (last_valid_offset >= 0).then(|| IntervalDomain::new(0, last_valid_offset));
            if let Some(valid) = &valid {
                if valid.contains_interval(&offset) {
                    resolved.push((disjunct, Target::Field { object: id, offset }));
                    continue;
                }
            }
            let description = format!(
                "Access of {} bytes at offset {} of an object of size {}",
                size, offset, object.size
            );
            let in_bounds = valid.and_then(|valid| offset.intersect(&valid).ok());
            if let Some(offset) = in_bounds {
                // The defect only concerns the out-of-bounds part of the offsets.
                self.defect(&disjunct, FindingKind::OutOfBoundsAccess, description, reports);
                let offset = offset.without_widening_hints();
                resolved.push((disjunct, Target::Field { object: id, offset }));
            } else {
                self.defect_path(
                    disjunct,
                    FindingKind::OutOfBoundsAccess,
                    description,
                    reports,
                    &mut resolved,
                );
            }
        }
        Ok(resolved)
    }

    /// Report a defect and keep the path with an unknown target if configured to continue after errors.
    fn defect_path(
        &self,
        disjunct: Disjunct,
        kind: FindingKind,
        description: String,
        reports: &mut Vec<EngineReport>,
        resolved: &mut Vec<(Disjunct, Target)>,
    ) {
        self.defect(&disjunct, kind, description, reports);
        if self.options.continue_after_error {
            resolved.push((disjunct, Target::Unknown));
        }
    }

    /// `var = value`
    pub fn assign(
        &self,
        mut disjunct: Disjunct,
        var: &Variable,
        value: &Expression,
    ) -> Result<Disjunct, Error> {
        if var.data_type.is_aggregate() {
            let Expression::Var(source) = value else {
                return Err(anyhow!("Aggregate assignment from {}", value));
            };
            let source = self.var_object(&disjunct, source)?;
            let target = self.var_object(&disjunct, var)?;
            self.copy_aggregate(
                &mut disjunct,
                &var.data_type,
                source,
                0,
                target,
                &IntervalDomain::from(0),
            )?;
        } else {
            let value = self.eval(&disjunct, value)?;
            self.write_var(&mut disjunct, var, value)?;
        }
        Ok(disjunct)
    }

    /// `var = *address`
    pub fn load(
        &self,
        disjunct: Disjunct,
        var: &Variable,
        address: &Expression,
        reports: &mut Vec<EngineReport>,
    ) -> Result<Vec<Disjunct>, Error> {
        let size = self.program.size_of(var)?;
        let mut results = Vec::new();
        for (mut disjunct, target) in self.resolve_address(disjunct, address, size, reports)? {
            match target {
                Target::Field { object, offset } if var.data_type.is_aggregate() => {
                    let var_object = self.var_object(&disjunct, var)?;
                    let exact_offset = offset
                        .try_to_value()
                        .ok_or_else(|| anyhow!("Aggregate load from imprecise offset"))?;
                    self.copy_aggregate(
                        &mut disjunct,
                        &var.data_type,
                        object,
                        exact_offset,
                        var_object,
                        &IntervalDomain::from(0),
                    )?;
                }
                Target::Field { object, offset } => {
                    let value = disjunct
                        .object(object)
                        .map(|object| object.read(&offset, size))
                        .unwrap_or(Value::Top(size));
                    self.write_var(&mut disjunct, var, value)?;
                }
                Target::Unknown => self.forget_var(&mut disjunct, var)?,
            }
            results.push(disjunct);
        }
        Ok(results)
    }

    /// `*address = value`
    pub fn store(
        &self,
        disjunct: Disjunct,
        address: &Expression,
        value: &Expression,
        size: ByteSize,
        reports: &mut Vec<EngineReport>,
    ) -> Result<Vec<Disjunct>, Error> {
        let aggregate_source = match value {
            Expression::Var(var) if var.data_type.is_aggregate() => Some(var),
            _ => None,
        };
        let mut results = Vec::new();
        for (mut disjunct, target) in self.resolve_address(disjunct, address, size, reports)? {
            if let Target::Field { object, offset } = target {
                if let Some(source) = aggregate_source {
                    let source_object = self.var_object(&disjunct, source)?;
                    self.copy_aggregate(
                        &mut disjunct,
                        &source.data_type,
                        source_object,
                        0,
                        object,
                        &offset,
                    )?;
                } else {
                    let value = resize(self.eval(&disjunct, value)?, size);
                    if let Some(object) = disjunct.object_mut(object) {
                        object.write(&offset, value);
                    }
                }
            }
            results.push(disjunct);
        }
        Ok(results)
    }

    /// Copy the value of an aggregate type field by field.
    /// Large arrays are copied as one byte range.
    fn copy_aggregate(
        &self,
        disjunct: &mut Disjunct,
        data_type: &DataType,
        source: ObjectId,
        source_offset: i64,
        target: ObjectId,
        target_offset: &IntervalDomain,
    ) -> Result<(), Error> {
        let source = disjunct
            .object(source)
            .ok_or_else(|| anyhow!("Copy from unknown object {}", source))?
            .clone();
        let leaves = data_type.leaf_fields(&self.program.structs)?;
        let target = disjunct
            .object_mut(target)
            .ok_or_else(|| anyhow!("Copy to unknown object {}", target))?;
        for (field_offset, field_type) in leaves {
            let size = field_type.size(&self.program.structs)?;
            let position = target_offset.add(&IntervalDomain::from(field_offset));
            if let DataType::Array(..) = field_type {
                match position.try_to_value() {
                    Some(position) => target.copy_from(
                        &source,
                        source_offset + field_offset,
                        position,
                        size.as_offset(),
                    ),
                    None => target.write(&position, Value::Top(size)),
                }
                continue;
            }
            let value = source.read_at(source_offset + field_offset, size);
            let value = if field_type.is_pointer() {
                value.into_pointer_if_zero()
            } else {
                value
            };
            target.write(&position, value);
        }
        Ok(())
    }

    /// Set a variable to an unknown value.
    pub fn forget_var(&self, disjunct: &mut Disjunct, var: &Variable) -> Result<(), Error> {
        if var.data_type.is_aggregate() {
            let id = self.var_object(disjunct, var)?;
            if let Some(object) = disjunct.object_mut(id) {
                object.fields.clear();
                object.fill = Fill::Unknown;
            }
            Ok(())
        } else {
            let size = self.program.size_of(var)?;
            self.write_var(disjunct, var, Value::Top(size))
        }
    }
}

/// Adjust a value to the number of bytes written by a store.
fn resize(value: Value, size: ByteSize) -> Value {
    match value {
        Value::Scalar { interval, .. } => Value::Scalar { interval, size },
        value => value.resized(size),
    }
}
