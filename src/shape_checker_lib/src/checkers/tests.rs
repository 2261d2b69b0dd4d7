use super::*;
use crate::intermediate_representation::builder::*;

fn call_chain_program() -> Program {
    let mut main = SubBuilder::new("main");
    main.block("entry").call("helper", vec![], None, "exit");
    main.block("exit").ret(None);
    let mut helper = SubBuilder::new("helper");
    helper.block("entry").ret(None);
    let mut other = SubBuilder::new("other");
    other.block("entry").ret(None);
    ProgramBuilder::new()
        .sub(main)
        .sub(helper)
        .sub(other)
        .entry("main")
        .build()
}

#[test]
fn verdicts_propagate_to_callers() {
    let program = call_chain_program();
    let finding = Finding::new(
        FindingKind::NullDereference,
        Tid::new("helper"),
        def_tid("helper", "entry", 0),
        "NULL dereference",
    )
    .call_stack(vec![jmp_tid("main", "entry", 0)]);
    let analysed: BTreeSet<Tid> = ["main", "helper", "other"].iter().map(Tid::new).collect();
    let verdicts = compute_verdicts(&program, &[finding], &BTreeSet::new(), &analysed);
    assert_eq!(verdicts[&Tid::new("main")], Verdict::Unsafe);
    assert_eq!(verdicts[&Tid::new("helper")], Verdict::Unsafe);
    assert_eq!(verdicts[&Tid::new("other")], Verdict::Safe);
}

#[test]
fn precision_loss_yields_unknown() {
    let program = call_chain_program();
    let analysed: BTreeSet<Tid> = ["main", "helper"].iter().map(Tid::new).collect();
    let imprecise: BTreeSet<Tid> = [Tid::new("helper")].into_iter().collect();
    let verdicts = compute_verdicts(&program, &[], &imprecise, &analysed);
    assert_eq!(verdicts[&Tid::new("main")], Verdict::Safe);
    assert_eq!(verdicts[&Tid::new("helper")], Verdict::Unknown);
    // Never analysed functions are not declared safe.
    assert_eq!(verdicts[&Tid::new("other")], Verdict::Unknown);
}

#[test]
fn property_names() {
    let names: Vec<Property> =
        serde_json::from_str(r#"["null-deref", "use-after-free", "out-of-bounds"]"#).unwrap();
    assert_eq!(
        names,
        vec![
            Property::NullDeref,
            Property::UseAfterFree,
            Property::OutOfBounds
        ]
    );
    assert_eq!(FindingKind::InvalidFree.property(), Property::DoubleFree);
    assert_eq!(
        serde_json::to_string(&Verdict::Unknown).unwrap(),
        r#""unknown""#
    );
}

#[test]
fn finding_display() {
    let location = Tid::new("main_entry_def0").with_address("main:entry");
    let finding = Finding::new(
        FindingKind::DoubleFree,
        Tid::new("main"),
        location,
        "Object freed twice",
    );
    assert_eq!(
        format!("{}", finding),
        "[DoubleFree] @ main:entry: Object freed twice"
    );
}
