use super::*;
use crate::intermediate_representation::builder::*;
use crate::intermediate_representation::{Callee, DataType, Expression, Jmp, Variable};

fn node_layout() -> crate::intermediate_representation::StructLayout {
    struct_layout(
        16,
        &[
            ("next", 0, DataType::pointer_to(DataType::Struct("node".into()))),
            ("data", 8, DataType::Integer(ByteSize::new(4))),
        ],
    )
}

fn env_var() -> Variable {
    Variable::new("env", DataType::Integer(ByteSize::new(8)))
}

fn buffer_var(name: &str) -> Variable {
    Variable::new(
        name,
        DataType::Array(Box::new(DataType::Integer(ByteSize::new(1))), 4096),
    )
}

fn mock_program() -> Program {
    let mut main = SubBuilder::new("main");
    main.local(struct_ptr_var("p", "node"))
        .local(ptr_var("q"))
        .local(int_var("x"))
        .local(int_var("v").volatile())
        .local(int_var("r"))
        .local(env_var())
        .local(Variable::new("tmp", DataType::Struct("node".into())))
        .local(buffer_var("buf"))
        .local(buffer_var("copy"));
    let mut callee = SubBuilder::new("callee");
    callee.local(ptr_var("t")).local(int_var("u"));
    ProgramBuilder::new()
        .structure("node", node_layout())
        .global(int_var("counter"))
        .sub(main)
        .sub(callee)
        .entry("main")
        .build()
}

fn start(engine: &Engine) -> Disjunct {
    let mut disjunct = engine.initial_disjunct(Fill::Zeroed).unwrap();
    let main = engine.program.get_sub(&Tid::new("main")).unwrap();
    engine
        .enter_function(&mut disjunct, main, None, None)
        .unwrap();
    disjunct
}

fn malloc(engine: &Engine, disjunct: Disjunct, var: &Variable, size: i64) -> Disjunct {
    let mut results = engine.allocate(
        disjunct,
        Storage::Heap,
        &Value::scalar(size, POINTER_SIZE),
        Fill::Uninitialized,
        &Tid::new("malloc_site"),
        false,
    );
    assert_eq!(results.len(), 1);
    let (mut disjunct, pointer) = results.pop().unwrap();
    engine.write_var(&mut disjunct, var, pointer).unwrap();
    disjunct
}

fn def(name: &str, def: Def) -> Term<Def> {
    Term {
        tid: Tid::new(name),
        term: def,
    }
}

fn defect_kinds(reports: &[EngineReport]) -> Vec<ReportKind> {
    reports.iter().map(|report| report.kind).collect()
}

#[test]
fn null_dereference() {
    let program = mock_program();
    let engine = Engine::new(&program, EngineOptions::default());
    let p = struct_ptr_var("p", "node");
    let mut reports = Vec::new();
    let disjunct = start(&engine);
    let disjunct = engine
        .execute_def(
            disjunct,
            &def("null", Def::Assign {
                var: p.clone(),
                value: Expression::Const(0),
            }),
            &mut reports,
        )
        .pop()
        .unwrap();
    assert!(engine.read_var(&disjunct, &p).unwrap().is_null());
    let store = def(
        "store",
        Def::Store {
            address: var_expr(&p).plus_const(8),
            value: Expression::Const(1),
            size: ByteSize::new(4),
        },
    );
    let results = engine.execute_def(disjunct.clone(), &store, &mut reports);
    assert!(results.is_empty());
    assert_eq!(
        defect_kinds(&reports),
        vec![ReportKind::Defect(FindingKind::NullDereference)]
    );
    assert_eq!(reports[0].function(), Some(&Tid::new("main")));
    assert_eq!(
        reports[0].witness.last(),
        Some(&TraceStep::Statement(Tid::new("store")))
    );

    let engine = Engine::new(
        &program,
        EngineOptions {
            continue_after_error: true,
            ..EngineOptions::default()
        },
    );
    let results = engine.execute_def(disjunct, &store, &mut reports);
    assert_eq!(results.len(), 1);
}

#[test]
fn use_after_free_and_double_free() {
    let program = mock_program();
    let engine = Engine::new(&program, EngineOptions::default());
    let p = struct_ptr_var("p", "node");
    let x = int_var("x");
    let mut reports = Vec::new();
    let disjunct = malloc(&engine, start(&engine), &p, 16);
    let mut freed = engine.free(disjunct, &var_expr(&p), &mut reports).unwrap();
    assert_eq!(freed.len(), 1);
    assert!(reports.is_empty());
    let disjunct = freed.pop().unwrap();
    let id = engine.read_var(&disjunct, &p).unwrap().referenced_object().unwrap();
    assert_eq!(disjunct.object(id).unwrap().validity, Validity::Freed);

    let results = engine
        .load(disjunct.clone(), &x, &var_expr(&p).plus_const(8), &mut reports)
        .unwrap();
    assert!(results.is_empty());
    assert_eq!(
        defect_kinds(&reports),
        vec![ReportKind::Defect(FindingKind::UseAfterFree)]
    );

    reports.clear();
    let results = engine.free(disjunct, &var_expr(&p), &mut reports).unwrap();
    assert!(results.is_empty());
    assert_eq!(
        defect_kinds(&reports),
        vec![ReportKind::Defect(FindingKind::DoubleFree)]
    );
}

#[test]
fn free_of_null_and_invalid_free() {
    let program = mock_program();
    let engine = Engine::new(&program, EngineOptions::default());
    let p = struct_ptr_var("p", "node");
    let x = int_var("x");
    let mut reports = Vec::new();
    let results = engine
        .free(start(&engine), &Expression::Null, &mut reports)
        .unwrap();
    assert_eq!(results.len(), 1);
    assert!(reports.is_empty());

    let results = engine
        .free(start(&engine), &Expression::AddressOf(x), &mut reports)
        .unwrap();
    assert!(results.is_empty());
    assert_eq!(
        defect_kinds(&reports),
        vec![ReportKind::Defect(FindingKind::InvalidFree)]
    );

    reports.clear();
    let disjunct = malloc(&engine, start(&engine), &p, 16);
    let results = engine
        .free(disjunct, &var_expr(&p).plus_const(8), &mut reports)
        .unwrap();
    assert!(results.is_empty());
    assert_eq!(
        defect_kinds(&reports),
        vec![ReportKind::Defect(FindingKind::InvalidFree)]
    );
}

#[test]
fn leak_on_overwrite() {
    let program = mock_program();
    let engine = Engine::new(&program, EngineOptions::default());
    let p = struct_ptr_var("p", "node");
    let mut reports = Vec::new();
    let disjunct = malloc(&engine, start(&engine), &p, 16);
    let results = engine.execute_def(
        disjunct,
        &def("overwrite", Def::Assign {
            var: p.clone(),
            value: Expression::Null,
        }),
        &mut reports,
    );
    assert_eq!(results.len(), 1);
    assert_eq!(
        defect_kinds(&reports),
        vec![ReportKind::Defect(FindingKind::MemoryLeak)]
    );
    assert!(reports[0].description.contains("malloc_site"));
}

#[test]
fn out_of_bounds_access() {
    let program = mock_program();
    let engine = Engine::new(&program, EngineOptions::default());
    let p = struct_ptr_var("p", "node");
    let x = int_var("x");
    let mut reports = Vec::new();
    let disjunct = malloc(&engine, start(&engine), &p, 16);
    let results = engine
        .store(
            disjunct.clone(),
            &var_expr(&p).plus_const(16),
            &Expression::Const(1),
            ByteSize::new(4),
            &mut reports,
        )
        .unwrap();
    assert!(results.is_empty());
    assert_eq!(
        defect_kinds(&reports),
        vec![ReportKind::Defect(FindingKind::OutOfBoundsAccess)]
    );

    // Only some of the possible offsets are out of bounds.
    reports.clear();
    let mut disjunct = disjunct;
    let index = Value::Scalar {
        interval: IntervalDomain::new_with_stride(0, 16, 4),
        size: ByteSize::new(4),
    };
    engine.write_var(&mut disjunct, &x, index).unwrap();
    let mut results = engine
        .store(
            disjunct,
            &var_expr(&p).plus(var_expr(&x)),
            &Expression::Const(0),
            ByteSize::new(4),
            &mut reports,
        )
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(
        defect_kinds(&reports),
        vec![ReportKind::Defect(FindingKind::OutOfBoundsAccess)]
    );
    let disjunct = results.pop().unwrap();
    let id = engine.read_var(&disjunct, &p).unwrap().referenced_object().unwrap();
    assert_eq!(
        disjunct.object(id).unwrap().read_at(12, ByteSize::new(4)),
        Value::uninitialized(ByteSize::new(4)).weak_merge(&Value::scalar(0, ByteSize::new(4)))
    );
}

#[test]
fn uninitialized_pointer() {
    let program = mock_program();
    let engine = Engine::new(&program, EngineOptions::default());
    let q = ptr_var("q");
    let x = int_var("x");
    let mut reports = Vec::new();
    let results = engine
        .load(start(&engine), &x, &var_expr(&q), &mut reports)
        .unwrap();
    assert!(results.is_empty());
    assert_eq!(
        defect_kinds(&reports),
        vec![ReportKind::Defect(FindingKind::WildPointer)]
    );
}

#[test]
fn failing_allocation_and_null_check() {
    let program = mock_program();
    let engine = Engine::new(&program, EngineOptions::default());
    let p = struct_ptr_var("p", "node");
    let results = engine.allocate(
        start(&engine),
        Storage::Heap,
        &Value::scalar(16, POINTER_SIZE),
        Fill::Uninitialized,
        &Tid::new("malloc_site"),
        true,
    );
    assert_eq!(results.len(), 2);
    assert!(results[0].1.is_null());
    let condition = Expression::bin_op(
        crate::intermediate_representation::BinOpType::NotEqual,
        var_expr(&p),
        Expression::Null,
    );
    let mut non_null = Vec::new();
    for (mut disjunct, pointer) in results {
        engine.write_var(&mut disjunct, &p, pointer).unwrap();
        non_null.extend(engine.assume(disjunct, &condition, true).unwrap());
    }
    assert_eq!(non_null.len(), 1);
    assert!(engine
        .read_var(&non_null[0], &p)
        .unwrap()
        .referenced_object()
        .is_some());
}

#[test]
fn canonical_numbering() {
    let program = mock_program();
    let engine = Engine::new(&program, EngineOptions::default());
    let p = struct_ptr_var("p", "node");
    let q = ptr_var("q");
    let mut reports = Vec::new();
    let first = malloc(&engine, malloc(&engine, start(&engine), &p, 16), &q, 8);
    let second = malloc(&engine, malloc(&engine, start(&engine), &q, 8), &p, 16);
    assert_ne!(first, second);
    let first = engine.finish_transfer(first, &mut reports);
    let second = engine.finish_transfer(second, &mut reports);
    assert_eq!(first, second);
    assert!(reports.is_empty());
}

#[test]
fn return_from_function() {
    let program = mock_program();
    let engine = Engine::new(&program, EngineOptions::default());
    let t = ptr_var("t");
    let u = int_var("u");
    let callee = program.get_sub(&Tid::new("callee")).unwrap();
    let mut reports = Vec::new();

    let mut disjunct = start(&engine);
    engine
        .enter_function(&mut disjunct, callee, Some(Tid::new("call")), Some(&[]))
        .unwrap();
    let mut disjunct = malloc(&engine, disjunct, &t, 8);
    engine.leave_function(&mut disjunct, None, &mut reports);
    assert_eq!(disjunct.depth(), 1);
    assert_eq!(
        defect_kinds(&reports),
        vec![ReportKind::Defect(FindingKind::MemoryLeak)]
    );
    assert_eq!(reports[0].function(), Some(&Tid::new("callee")));
    let finding = reports[0].to_finding(&Tid::new("ret")).unwrap();
    assert_eq!(finding.call_stack, vec![Tid::new("call")]);

    // Returned objects do not leak, returned stack addresses become wild.
    reports.clear();
    let mut disjunct = start(&engine);
    engine
        .enter_function(&mut disjunct, callee, Some(Tid::new("call")), Some(&[]))
        .unwrap();
    let pointer = engine
        .eval(&disjunct, &Expression::AddressOf(u))
        .unwrap();
    engine.leave_function(&mut disjunct, Some(pointer), &mut reports);
    assert!(reports.is_empty());
    let id = disjunct
        .return_value
        .as_ref()
        .and_then(Value::referenced_object)
        .unwrap();
    assert_eq!(disjunct.object(id).unwrap().validity, Validity::Wild);
}

#[test]
fn longjmp_marks_modified_variables_stale() {
    let program = mock_program();
    let engine = Engine::new(&program, EngineOptions::default());
    let x = int_var("x");
    let v = int_var("v").volatile();
    let r = int_var("r");
    let env = Expression::AddressOf(env_var());
    let setjmp = Term {
        tid: Tid::new("setjmp_call"),
        term: Jmp::Call {
            target: Callee::Extern("setjmp".into()),
            args: vec![env.clone()],
            result: Some(r.clone()),
            return_: Tid::new("after"),
        },
    };
    let mut reports = Vec::new();
    let mut disjunct = start(&engine);
    engine
        .write_var(&mut disjunct, &x, Value::scalar(1, ByteSize::new(4)))
        .unwrap();
    assert!(engine
        .record_jump_marker(&mut disjunct, &setjmp.tid, &env)
        .unwrap());
    engine
        .write_var(&mut disjunct, &x, Value::scalar(2, ByteSize::new(4)))
        .unwrap();
    engine
        .write_var(&mut disjunct, &v, Value::scalar(2, ByteSize::new(4)))
        .unwrap();

    let buffer = engine.jump_buffer(&disjunct, &env).unwrap();
    assert!(buffer.is_some());
    let resumed = engine
        .resume_at_setjmp(
            disjunct,
            &setjmp,
            buffer,
            Value::scalar(0, ByteSize::new(4)),
            &mut reports,
        )
        .unwrap()
        .unwrap();
    assert_eq!(
        engine.read_var(&resumed, &x).unwrap(),
        Value::Indeterminate {
            cause: Indeterminacy::Stale,
            size: ByteSize::new(4)
        }
    );
    assert_eq!(
        engine.read_var(&resumed, &v).unwrap(),
        Value::scalar(2, ByteSize::new(4))
    );
    // `longjmp(env, 0)` makes `setjmp` return 1.
    assert_eq!(
        engine.read_var(&resumed, &r).unwrap(),
        Value::scalar(1, ByteSize::new(4))
    );
    assert!(reports.is_empty());
}

#[test]
fn aggregate_copy() {
    let program = mock_program();
    let engine = Engine::new(&program, EngineOptions::default());
    let p = struct_ptr_var("p", "node");
    let q = struct_ptr_var("q", "node");
    let x = int_var("x");
    let mut reports = Vec::new();
    let disjunct = malloc(&engine, start(&engine), &p, 16);
    let disjunct = malloc(&engine, disjunct, &q, 16);
    let mut results = engine
        .store(
            disjunct,
            &var_expr(&p).plus_const(8),
            &Expression::Const(42),
            ByteSize::new(4),
            &mut reports,
        )
        .unwrap();
    let disjunct = results.pop().unwrap();
    // `*q = *p` through a struct-typed temporary.
    let tmp = Variable::new("tmp", DataType::Struct("node".into()));
    let mut results = engine
        .load(disjunct, &tmp, &var_expr(&p), &mut reports)
        .unwrap();
    let mut results = engine
        .store(
            results.pop().unwrap(),
            &var_expr(&q),
            &var_expr(&tmp),
            ByteSize::new(16),
            &mut reports,
        )
        .unwrap();
    let mut results = engine
        .load(
            results.pop().unwrap(),
            &x,
            &var_expr(&q).plus_const(8),
            &mut reports,
        )
        .unwrap();
    let disjunct = results.pop().unwrap();
    assert_eq!(
        engine.read_var(&disjunct, &x).unwrap(),
        Value::scalar(42, ByteSize::new(4))
    );
    assert!(reports.is_empty());
}

#[test]
fn large_array_copy() {
    let program = mock_program();
    let engine = Engine::new(&program, EngineOptions::default());
    let buf = buffer_var("buf");
    let copy = buffer_var("copy");
    let x = int_var("x");
    let mut reports = Vec::new();
    let mut results = engine
        .store(
            start(&engine),
            &var_expr(&buf).plus_const(100),
            &Expression::Const(7),
            ByteSize::new(4),
            &mut reports,
        )
        .unwrap();
    let disjunct = engine
        .assign(results.pop().unwrap(), &copy, &var_expr(&buf))
        .unwrap();
    let id = engine.var_object(&disjunct, &copy).unwrap();
    assert!(disjunct.object(id).unwrap().fields.iter().count() <= 3);
    let mut results = engine
        .load(disjunct, &x, &var_expr(&copy).plus_const(100), &mut reports)
        .unwrap();
    assert_eq!(
        engine.read_var(&results.pop().unwrap(), &x).unwrap(),
        Value::scalar(7, ByteSize::new(4))
    );
    assert!(reports.is_empty());
}

#[test]
fn possibly_null_integer_address() {
    let program = mock_program();
    let engine = Engine::new(&program, EngineOptions::default());
    let p = struct_ptr_var("p", "node");
    let q = ptr_var("q");
    let mut reports = Vec::new();
    // `p = (node *) unknown_int; q = malloc(8);`
    let mut disjunct = malloc(&engine, start(&engine), &q, 8);
    engine
        .write_var(&mut disjunct, &p, Value::unknown_scalar(POINTER_SIZE))
        .unwrap();
    let mut results = engine
        .store(
            disjunct,
            &var_expr(&p),
            &Expression::Const(1),
            ByteSize::new(4),
            &mut reports,
        )
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(
        defect_kinds(&reports),
        vec![
            ReportKind::Defect(FindingKind::NullDereference),
            ReportKind::Notice(NoticeKind::UnknownValueDereference)
        ]
    );

    // The path continues, so the double free of `q` is still found.
    reports.clear();
    let disjunct = results.pop().unwrap();
    let mut freed = engine.free(disjunct, &var_expr(&q), &mut reports).unwrap();
    assert_eq!(freed.len(), 1);
    let results = engine
        .free(freed.pop().unwrap(), &var_expr(&q), &mut reports)
        .unwrap();
    assert!(results.is_empty());
    assert_eq!(
        defect_kinds(&reports),
        vec![ReportKind::Defect(FindingKind::DoubleFree)]
    );
}

#[test]
fn possibly_null_pointer() {
    let program = mock_program();
    let engine = Engine::new(&program, EngineOptions::default());
    let p = struct_ptr_var("p", "node");
    let mut reports = Vec::new();
    let mut disjunct = malloc(&engine, start(&engine), &p, 16);
    let id = engine.read_var(&disjunct, &p).unwrap().referenced_object().unwrap();
    let maybe_null = Value::Pointer {
        target: PointerTarget::MaybeNull(id),
        offset: 0.into(),
    };
    engine.write_var(&mut disjunct, &p, maybe_null).unwrap();
    let store = |disjunct: Disjunct, reports: &mut Vec<EngineReport>| {
        engine
            .store(
                disjunct,
                &var_expr(&p).plus_const(8),
                &Expression::Const(1),
                ByteSize::new(4),
                reports,
            )
            .unwrap()
    };
    let results = store(disjunct.clone(), &mut reports);
    assert_eq!(results.len(), 1);
    assert_eq!(
        defect_kinds(&reports),
        vec![ReportKind::Defect(FindingKind::NullDereference)]
    );

    // After `if (p != NULL)` the pointer certainly points to the object.
    reports.clear();
    let condition = Expression::bin_op(
        crate::intermediate_representation::BinOpType::NotEqual,
        var_expr(&p),
        Expression::Null,
    );
    let mut checked = engine.assume(disjunct.clone(), &condition, true).unwrap();
    assert_eq!(checked.len(), 1);
    assert_eq!(store(checked.pop().unwrap(), &mut reports).len(), 1);
    assert!(reports.is_empty());
    let null = engine.assume(disjunct, &condition, false).unwrap();
    assert_eq!(null.len(), 1);
    assert!(engine.read_var(&null[0], &p).unwrap().is_null());
}

#[test]
fn materialization_bound() {
    let program = mock_program();
    let p = struct_ptr_var("p", "node");
    let x = int_var("x");
    let with_segment = |engine: &Engine| {
        let mut disjunct = start(engine);
        let mut segment =
            HeapObject::new(Storage::Heap, IntervalDomain::from(16), Fill::Uninitialized);
        segment.write_at(0, Value::null());
        segment.write_at(8, Value::scalar(3, ByteSize::new(4)));
        segment.kind = ObjectKind::Segment {
            next_offset: 0,
            prev_offset: None,
            length: IntervalDomain::at_least(1),
        };
        let id = disjunct.add_object(segment);
        engine
            .write_var(&mut disjunct, &p, Value::pointer(id, 0))
            .unwrap();
        disjunct
    };

    let engine = Engine::new(&program, EngineOptions::default());
    let mut reports = Vec::new();
    let mut results = engine
        .load(with_segment(&engine), &x, &var_expr(&p).plus_const(8), &mut reports)
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(
        engine.read_var(&results.pop().unwrap(), &x).unwrap(),
        Value::scalar(3, ByteSize::new(4))
    );
    assert!(reports.is_empty());

    let engine = Engine::new(
        &program,
        EngineOptions {
            unfold_bound: 0,
            ..EngineOptions::default()
        },
    );
    let results = engine
        .load(with_segment(&engine), &x, &var_expr(&p).plus_const(8), &mut reports)
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(
        defect_kinds(&reports),
        vec![ReportKind::Notice(NoticeKind::UnsupportedConstruct)]
    );
}
