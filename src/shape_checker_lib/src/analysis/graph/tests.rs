use super::*;
use crate::intermediate_representation::builder::*;

fn loop_program() -> Program {
    let i = int_var("i");
    let mut main = SubBuilder::new("main");
    main.local(i.clone());
    main.block("entry")
        .assign(&i, Expression::Const(0))
        .jump("head");
    main.block("head").cbranch(
        Expression::bin_op(BinOpType::Less, var_expr(&i), Expression::Const(10)),
        "body",
        "exit",
    );
    main.block("body")
        .assign(&i, var_expr(&i).plus_const(1))
        .call_extern("rand", vec![], None, "head");
    main.block("exit").ret(None);
    ProgramBuilder::new().sub(main).entry("main").build()
}

fn setjmp_program() -> Program {
    let env = int_var("env");
    let r = int_var("r");
    let mut main = SubBuilder::new("main");
    main.local(env.clone()).local(r.clone());
    main.block("entry").call_extern(
        "setjmp",
        vec![Expression::AddressOf(env.clone())],
        Some(&r),
        "check",
    );
    main.block("check").cbranch(
        Expression::bin_op(BinOpType::Equal, var_expr(&r), Expression::Const(0)),
        "jump",
        "call",
    );
    main.block("jump").call_extern(
        "longjmp",
        vec![Expression::AddressOf(env.clone()), Expression::Const(1)],
        None,
        "call",
    );
    main.block("call")
        .call("thrower", vec![Expression::AddressOf(env)], None, "exit");
    main.block("exit").ret(None);
    let mut thrower = SubBuilder::new("thrower");
    thrower.param(ptr_var("e"));
    thrower.block("entry").call_extern(
        "longjmp",
        vec![var_expr(&ptr_var("e")), Expression::Const(2)],
        None,
        "exit",
    );
    thrower.block("exit").ret(None);
    let mut wrapper = SubBuilder::new("wrapper");
    wrapper.param(ptr_var("e"));
    wrapper
        .block("entry")
        .call("thrower", vec![var_expr(&ptr_var("e"))], None, "exit");
    wrapper.block("exit").ret(None);
    let mut quiet = SubBuilder::new("quiet");
    quiet.block("entry").ret(None);
    ProgramBuilder::new()
        .sub(main)
        .sub(thrower)
        .sub(wrapper)
        .sub(quiet)
        .entry("main")
        .build()
}

#[test]
fn create_function_graph() {
    let program = loop_program();
    let may_longjmp = BTreeSet::new();
    let graph = get_function_graph(&program.subs[0], &may_longjmp).unwrap();
    // Two nodes per block plus the exit node.
    assert_eq!(graph.graph.node_count(), 9);
    // Four block edges, one jump, two conditional jump edges, one call and one return edge.
    assert_eq!(graph.graph.edge_count(), 9);
    assert_eq!(graph.graph[graph.entry], Node::BlkStart(&program.subs[0].term.blocks[0]));
    assert_eq!(graph.graph[graph.exit], Node::Exit);
    assert_eq!(graph.loop_heads.len(), 1);
    let head = *graph.loop_heads.iter().next().unwrap();
    assert_eq!(
        graph.graph[head],
        Node::BlkStart(&program.subs[0].term.blocks[1])
    );
}

#[test]
fn nonlocal_jump_edges() {
    let program = setjmp_program();
    let may_longjmp = functions_that_may_longjmp(&program);
    let expected: BTreeSet<Tid> = ["main", "thrower", "wrapper"]
        .iter()
        .map(Tid::new)
        .collect();
    assert_eq!(may_longjmp, expected);

    let graph = get_function_graph(&program.subs[0], &may_longjmp).unwrap();
    let long_jumps = graph
        .graph
        .edge_weights()
        .filter(|edge| matches!(edge, Edge::LongJmp { .. }))
        .count();
    let call_long_jumps = graph
        .graph
        .edge_weights()
        .filter(|edge| matches!(edge, Edge::CallLongJmp { .. }))
        .count();
    assert_eq!(long_jumps, 1);
    assert_eq!(call_long_jumps, 1);
    // The longjmp back to the setjmp return block closes a loop.
    assert!(!graph.loop_heads.is_empty());

    // Functions without setjmp calls get no nonlocal jump edges.
    let graph = get_function_graph(&program.subs[2], &may_longjmp).unwrap();
    assert_eq!(graph.graph.edge_count(), 4);
}

#[test]
fn unknown_jump_target() {
    let mut main = SubBuilder::new("main");
    main.block("entry").jump("nowhere");
    let program = ProgramBuilder::new().sub(main).build();
    let may_longjmp = BTreeSet::new();
    assert!(get_function_graph(&program.subs[0], &may_longjmp).is_err());
}
