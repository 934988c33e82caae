//! End-to-end tests for the Boolean-graph preprocessor.
//!
//! Every scenario builds its graph twice: once to record the reference
//! truth table, once to preprocess and compare. Equivalence is checked
//! exhaustively over all variable assignments.

use pdag_rs::eval::{canonical_form, evaluate};
use pdag_rs::gate::{GateOps, GatePtr, Operator, State};
use pdag_rs::graph::BooleanGraph;
use pdag_rs::node::Node;
use pdag_rs::preprocessor::preprocess;

// ─── Helpers ──────────────────────────────────────────────────────────────────

/// Collects the truth table of the graph over all assignments.
fn truth_table(graph: &BooleanGraph) -> Vec<bool> {
    let num_vars = graph.num_variables();
    assert!(num_vars <= 20, "Exhaustive checking is bounded");
    (0..(1u32 << num_vars))
        .map(|bits| {
            let assignment: Vec<bool> = (0..num_vars).map(|i| bits & (1 << i) != 0).collect();
            evaluate(graph, &assignment)
        })
        .collect()
}

/// Builds the graph twice and checks that preprocessing preserves the
/// truth table. Returns the preprocessed graph for shape assertions.
fn check_preprocess(build: impl Fn() -> BooleanGraph) -> BooleanGraph {
    let reference = truth_table(&build());
    let mut graph = build();
    preprocess(&mut graph);
    assert_eq!(truth_table(&graph), reference, "Preprocessing changed the semantics");
    graph
}

/// Asserts the output shape contract: only OR/AND gates (a NULL or
/// constant-state root is allowed), no constants, consistent links.
fn check_output_shape(graph: &BooleanGraph) {
    fn walk(gate: &GatePtr, is_root: bool) {
        let g = gate.borrow();
        if g.state() != State::Normal {
            assert!(is_root, "Only the root may stay constant");
            assert_eq!(g.num_args(), 0);
            return;
        }
        match g.op() {
            Operator::And | Operator::Or => assert!(g.num_args() > 1),
            Operator::Null => {
                assert!(is_root, "NULL gates must be spliced out");
                assert_eq!(g.num_args(), 1);
            }
            op => panic!("Operator {:?} must not survive preprocessing", op),
        }
        assert!(g.constant_args().is_empty(), "Constants must be dissolved");
        for child in g.gate_args().values() {
            walk(child, false);
        }
    }
    assert!(graph.root().borrow().parents().is_empty());
    walk(graph.root(), true);
    assert!(graph.validate_links());
}

/// Variables reachable from a gate, by index.
fn collect_variables(gate: &GatePtr, out: &mut std::collections::BTreeSet<i32>) {
    let g = gate.borrow();
    for var in g.variable_args().values() {
        out.insert(var.borrow().index());
    }
    for child in g.gate_args().values() {
        collect_variables(child, out);
    }
}

// ─── Seed scenarios ───────────────────────────────────────────────────────────

#[test]
fn double_negation_collapses_to_variable() {
    // ROOT = NOT(NOT(x)) => ROOT = x.
    let graph = check_preprocess(|| {
        let mut graph = BooleanGraph::new();
        let x = graph.new_variable();
        let inner = graph.new_gate(Operator::Not);
        inner.add_variable_arg(1, &x);
        let root = graph.new_gate(Operator::Not);
        root.add_gate_arg(2, &inner);
        graph.set_root(root);
        graph
    });
    check_output_shape(&graph);
    let root = graph.root().borrow();
    assert_eq!(root.op(), Operator::Null);
    assert!(root.args().contains(&1), "The root must pass through x positively");
}

#[test]
fn true_constant_in_and_is_absorbed() {
    // ROOT = AND(x, TRUE) => ROOT = NULL(x).
    let graph = check_preprocess(|| {
        let mut graph = BooleanGraph::new();
        let x = graph.new_variable();
        let constant = graph.new_constant(true);
        let root = graph.new_gate(Operator::And);
        root.add_variable_arg(1, &x);
        root.add_constant_arg(2, &constant);
        graph.set_root(root);
        graph
    });
    check_output_shape(&graph);
    let root = graph.root().borrow();
    assert_eq!(root.op(), Operator::Null);
    assert!(root.args().contains(&1));
}

#[test]
fn false_constant_in_or_is_removed() {
    // ROOT = OR(x, FALSE, y) => ROOT = OR(x, y).
    let graph = check_preprocess(|| {
        let mut graph = BooleanGraph::new();
        let x = graph.new_variable();
        let y = graph.new_variable();
        let constant = graph.new_constant(false);
        let root = graph.new_gate(Operator::Or);
        root.add_variable_arg(1, &x);
        root.add_constant_arg(3, &constant);
        root.add_variable_arg(2, &y);
        graph.set_root(root);
        graph
    });
    check_output_shape(&graph);
    assert_eq!(canonical_form(&graph), "Or(v1,v2)");
}

#[test]
fn xor_is_expanded_by_full_normalization() {
    // ROOT = XOR(a, b) => OR(AND(a, -b), AND(-a, b)).
    let graph = check_preprocess(|| {
        let mut graph = BooleanGraph::new();
        let a = graph.new_variable();
        let b = graph.new_variable();
        let root = graph.new_gate(Operator::Xor);
        root.add_variable_arg(1, &a);
        root.add_variable_arg(2, &b);
        graph.set_root(root);
        graph
    });
    check_output_shape(&graph);
    assert_eq!(canonical_form(&graph), "Or(And(v1,~v2),And(v2,~v1))");
}

#[test]
fn atleast_is_expanded_recursively() {
    // ROOT = ATLEAST(2; a, b, c) => OR(AND(a, OR(b, c)), AND(b, c)).
    let graph = check_preprocess(|| {
        let mut graph = BooleanGraph::new();
        let a = graph.new_variable();
        let b = graph.new_variable();
        let c = graph.new_variable();
        let root = graph.new_gate(Operator::Atleast);
        root.borrow_mut().set_vote_number(2);
        root.add_variable_arg(1, &a);
        root.add_variable_arg(2, &b);
        root.add_variable_arg(3, &c);
        graph.set_root(root);
        graph
    });
    check_output_shape(&graph);
}

#[test]
fn distributive_arguments_are_factored() {
    // ROOT = AND(OR(a, x), OR(a, y)) => OR(a, AND(x, y)).
    let graph = check_preprocess(|| {
        let mut graph = BooleanGraph::new();
        let a = graph.new_variable();
        let x = graph.new_variable();
        let y = graph.new_variable();
        let left = graph.new_gate(Operator::Or);
        left.add_variable_arg(1, &a);
        left.add_variable_arg(2, &x);
        let right = graph.new_gate(Operator::Or);
        right.add_variable_arg(1, &a);
        right.add_variable_arg(3, &y);
        let root = graph.new_gate(Operator::And);
        root.add_gate_arg(4, &left);
        root.add_gate_arg(5, &right);
        graph.set_root(root);
        graph
    });
    check_output_shape(&graph);
    assert_eq!(canonical_form(&graph), "Or(And(v2,v3),v1)");
}

#[test]
fn redundant_shared_argument_is_optimized_away() {
    // ROOT = AND(a, OR(a, x)) => ROOT = a.
    let graph = check_preprocess(|| {
        let mut graph = BooleanGraph::new();
        let a = graph.new_variable();
        let x = graph.new_variable();
        let or = graph.new_gate(Operator::Or);
        or.add_variable_arg(1, &a);
        or.add_variable_arg(2, &x);
        let root = graph.new_gate(Operator::And);
        root.add_variable_arg(1, &a);
        root.add_gate_arg(3, &or);
        graph.set_root(root);
        graph
    });
    check_output_shape(&graph);
    let root = graph.root().borrow();
    assert_eq!(root.op(), Operator::Null);
    assert!(root.args().contains(&1));
}

#[test]
fn contradiction_collapses_to_constant_false() {
    // ROOT = AND(x, NOT(x)) => FALSE.
    let graph = check_preprocess(|| {
        let mut graph = BooleanGraph::new();
        let x = graph.new_variable();
        let not = graph.new_gate(Operator::Not);
        not.add_variable_arg(1, &x);
        let root = graph.new_gate(Operator::And);
        root.add_variable_arg(1, &x);
        root.add_gate_arg(2, &not);
        graph.set_root(root);
        graph
    });
    assert_eq!(graph.root().borrow().state(), State::Null);
    assert!(!evaluate(&graph, &[true]));
    assert!(!evaluate(&graph, &[false]));
}

// ─── Whole-pipeline equivalence ───────────────────────────────────────────────

#[test]
fn mixed_noncoherent_graph_is_normalized_and_equivalent() {
    // All the non-normal kinds at once, over four variables.
    let graph = check_preprocess(|| {
        let mut graph = BooleanGraph::new();
        let a = graph.new_variable();
        let b = graph.new_variable();
        let c = graph.new_variable();
        let d = graph.new_variable();

        let not_b = graph.new_gate(Operator::Not);
        not_b.add_variable_arg(2, &b);
        let and_one = graph.new_gate(Operator::And);
        and_one.add_variable_arg(1, &a);
        and_one.add_gate_arg(5, &not_b);

        let xor = graph.new_gate(Operator::Xor);
        xor.add_variable_arg(3, &c);
        xor.add_variable_arg(4, &d);

        let vote = graph.new_gate(Operator::Atleast);
        vote.borrow_mut().set_vote_number(2);
        vote.add_variable_arg(1, &a);
        vote.add_variable_arg(3, &c);
        vote.add_variable_arg(4, &d);

        let nand = graph.new_gate(Operator::Nand);
        nand.add_variable_arg(2, &b);
        nand.add_variable_arg(4, &d);

        let root = graph.new_gate(Operator::Or);
        root.add_gate_arg(6, &and_one);
        root.add_gate_arg(7, &xor);
        root.add_gate_arg(8, &vote);
        root.add_gate_arg(9, &nand);
        graph.set_root(root);
        graph
    });
    check_output_shape(&graph);
}

#[test]
fn nor_root_with_shared_subtrees_is_equivalent() {
    let graph = check_preprocess(|| {
        let mut graph = BooleanGraph::new();
        let a = graph.new_variable();
        let b = graph.new_variable();
        let c = graph.new_variable();

        let shared = graph.new_gate(Operator::And);
        shared.add_variable_arg(1, &a);
        shared.add_variable_arg(2, &b);

        let left = graph.new_gate(Operator::Or);
        left.add_gate_arg(4, &shared);
        left.add_variable_arg(3, &c);

        let root = graph.new_gate(Operator::Nor);
        root.add_gate_arg(4, &shared);
        root.add_gate_arg(5, &left);
        graph.set_root(root);
        graph
    });
    check_output_shape(&graph);
}

#[test]
fn nested_same_kind_gates_coalesce() {
    // AND(AND(a, b), AND(b, c)) flattens into one AND; the children share
    // a variable, so neither becomes a module that would be preserved.
    let graph = check_preprocess(|| {
        let mut graph = BooleanGraph::new();
        let a = graph.new_variable();
        let b = graph.new_variable();
        let c = graph.new_variable();
        let left = graph.new_gate(Operator::And);
        left.add_variable_arg(1, &a);
        left.add_variable_arg(2, &b);
        let right = graph.new_gate(Operator::And);
        right.add_variable_arg(2, &b);
        right.add_variable_arg(3, &c);
        let root = graph.new_gate(Operator::And);
        root.add_gate_arg(4, &left);
        root.add_gate_arg(5, &right);
        graph.set_root(root);
        graph
    });
    check_output_shape(&graph);
    assert_eq!(canonical_form(&graph), "And(v1,v2,v3)");
}

#[test]
fn duplicate_definitions_are_merged() {
    // OR(AND(a, b), AND(a, b), c) keeps a single AND definition.
    let graph = check_preprocess(|| {
        let mut graph = BooleanGraph::new();
        let a = graph.new_variable();
        let b = graph.new_variable();
        let c = graph.new_variable();
        let first = graph.new_gate(Operator::And);
        first.add_variable_arg(1, &a);
        first.add_variable_arg(2, &b);
        let second = graph.new_gate(Operator::And);
        second.add_variable_arg(1, &a);
        second.add_variable_arg(2, &b);
        let root = graph.new_gate(Operator::Or);
        root.add_gate_arg(4, &first);
        root.add_gate_arg(5, &second);
        root.add_variable_arg(3, &c);
        graph.set_root(root);
        graph
    });
    check_output_shape(&graph);
    assert_eq!(canonical_form(&graph), "Or(And(v1,v2),v3)");
}

// ─── Idempotence ──────────────────────────────────────────────────────────────

#[test]
fn preprocessing_is_idempotent() {
    let builders: Vec<fn() -> BooleanGraph> = vec![
        || {
            // ATLEAST over shared variables.
            let mut graph = BooleanGraph::new();
            let a = graph.new_variable();
            let b = graph.new_variable();
            let c = graph.new_variable();
            let root = graph.new_gate(Operator::Atleast);
            root.borrow_mut().set_vote_number(2);
            root.add_variable_arg(1, &a);
            root.add_variable_arg(2, &b);
            root.add_variable_arg(3, &c);
            graph.set_root(root);
            graph
        },
        || {
            // Distributive factoring example.
            let mut graph = BooleanGraph::new();
            let a = graph.new_variable();
            let x = graph.new_variable();
            let y = graph.new_variable();
            let left = graph.new_gate(Operator::Or);
            left.add_variable_arg(1, &a);
            left.add_variable_arg(2, &x);
            let right = graph.new_gate(Operator::Or);
            right.add_variable_arg(1, &a);
            right.add_variable_arg(3, &y);
            let root = graph.new_gate(Operator::And);
            root.add_gate_arg(4, &left);
            root.add_gate_arg(5, &right);
            graph.set_root(root);
            graph
        },
    ];
    for build in builders {
        let mut graph = build();
        preprocess(&mut graph);
        let once = canonical_form(&graph);
        preprocess(&mut graph);
        let twice = canonical_form(&graph);
        assert_eq!(once, twice, "A second pass must be a fixpoint");
    }
}

// ─── Modules ──────────────────────────────────────────────────────────────────

#[test]
fn modules_do_not_share_variables_with_the_rest() {
    let mut graph = BooleanGraph::new();
    let shared = graph.new_variable();
    let m1 = graph.new_variable();
    let m2 = graph.new_variable();
    let k1 = graph.new_variable();

    // AND(m1, m2) is exclusive; the shared variable spans two branches.
    let module = graph.new_gate(Operator::And);
    module.add_variable_arg(2, &m1);
    module.add_variable_arg(3, &m2);
    let left = graph.new_gate(Operator::Or);
    left.add_variable_arg(1, &shared);
    left.add_gate_arg(5, &module);
    let right = graph.new_gate(Operator::Or);
    right.add_variable_arg(1, &shared);
    right.add_variable_arg(4, &k1);
    let root = graph.new_gate(Operator::And);
    root.add_gate_arg(6, &left);
    root.add_gate_arg(7, &right);
    graph.set_root(root);

    preprocess(&mut graph);
    check_output_shape(&graph);

    // For every tagged module, the variables below it must not appear
    // anywhere else in the graph.
    let root = graph.root().clone();
    let mut stack = vec![root.clone()];
    let mut seen = std::collections::BTreeSet::new();
    while let Some(gate) = stack.pop() {
        if !seen.insert(gate.borrow().index()) {
            continue;
        }
        for child in gate.borrow().gate_args().values() {
            stack.push(child.clone());
        }
        if gate.borrow().is_module() && !std::rc::Rc::ptr_eq(&gate, &root) {
            let mut inside = std::collections::BTreeSet::new();
            collect_variables(&gate, &mut inside);
            for var in &inside {
                let holders: Vec<i32> = {
                    let parents: Vec<i32> = graph
                        .variables()
                        .iter()
                        .find(|v| v.borrow().index() == *var)
                        .map(|v| v.borrow().parents().keys().copied().collect())
                        .unwrap_or_default();
                    parents
                };
                // Every parent of an inside-variable must be inside the module.
                let mut module_gates = std::collections::BTreeSet::new();
                let mut module_stack = vec![gate.clone()];
                while let Some(m) = module_stack.pop() {
                    if !module_gates.insert(m.borrow().index()) {
                        continue;
                    }
                    for child in m.borrow().gate_args().values() {
                        module_stack.push(child.clone());
                    }
                }
                for holder in holders {
                    assert!(
                        module_gates.contains(&holder),
                        "Variable {} of a module leaks to gate {}",
                        var,
                        holder
                    );
                }
            }
        }
    }
}

// ─── Stress: layered vote trees ───────────────────────────────────────────────

#[test]
fn layered_vote_tree_is_equivalent_after_preprocessing() {
    let graph = check_preprocess(|| {
        let mut graph = BooleanGraph::new();
        let vars: Vec<_> = (0..6).map(|_| graph.new_variable()).collect();
        let mut layer: Vec<GatePtr> = Vec::new();
        for chunk in vars.chunks(2) {
            let gate = graph.new_gate(Operator::Or);
            for var in chunk {
                let index = var.borrow().index();
                gate.add_variable_arg(index, var);
            }
            layer.push(gate);
        }
        let root = graph.new_gate(Operator::Atleast);
        root.borrow_mut().set_vote_number(2);
        for gate in &layer {
            let index = gate.borrow().index();
            root.add_gate_arg(index, gate);
        }
        // One shared variable across two branches breaks full modularity.
        let extra_index = vars[0].borrow().index();
        layer[2].add_variable_arg(extra_index, &vars[0]);
        graph.set_root(root);
        graph
    });
    check_output_shape(&graph);
}
