//! Truth evaluation and structural summaries of Boolean graphs.
//!
//! These helpers are primarily useful in tests and during development: the
//! preprocessor guarantees semantic equivalence, and the cheapest way to
//! check that property on small graphs is an exhaustive truth-table
//! comparison before and after processing.

use crate::gate::{GatePtr, Operator, State};
use crate::graph::BooleanGraph;

/// Evaluates the graph for one variable assignment.
///
/// `assignment[i]` is the value of the variable with index `i + 1`; the
/// builder allocates variables before gates, so the vector stays dense.
pub fn evaluate(graph: &BooleanGraph, assignment: &[bool]) -> bool {
    evaluate_gate(graph.root(), assignment)
}

/// Evaluates a single gate for one variable assignment.
pub fn evaluate_gate(gate: &GatePtr, assignment: &[bool]) -> bool {
    let g = gate.borrow();
    match g.state() {
        State::Unity => return true,
        State::Null => return false,
        State::Normal => {}
    }
    let arg_value = |arg: i32| -> bool {
        let value = if let Some(child) = g.gate_args().get(&arg) {
            evaluate_gate(child, assignment)
        } else if g.variable_args().contains_key(&arg) {
            assignment[(arg.abs() - 1) as usize]
        } else {
            g.constant_args()[&arg].borrow().state()
        };
        value ^ (arg < 0)
    };
    let values: Vec<bool> = g.args().iter().map(|&arg| arg_value(arg)).collect();
    match g.op() {
        Operator::And => values.iter().all(|&v| v),
        Operator::Or => values.iter().any(|&v| v),
        Operator::Nand => !values.iter().all(|&v| v),
        Operator::Nor => !values.iter().any(|&v| v),
        Operator::Not => {
            assert_eq!(values.len(), 1);
            !values[0]
        }
        Operator::Null => {
            assert_eq!(values.len(), 1);
            values[0]
        }
        Operator::Xor => {
            assert_eq!(values.len(), 2);
            values[0] ^ values[1]
        }
        Operator::Atleast => values.iter().filter(|&&v| v).count() as i32 >= g.vote_number(),
    }
}

/// Renders the graph as a canonical expression string.
///
/// Children are printed recursively and sorted, with variables named by
/// index, so two structurally isomorphic graphs (up to gate index renaming
/// and argument order) produce the same string. Intended for idempotence
/// checks in tests.
pub fn canonical_form(graph: &BooleanGraph) -> String {
    canonical_gate(graph.root())
}

fn canonical_gate(gate: &GatePtr) -> String {
    let g = gate.borrow();
    match g.state() {
        State::Unity => return "T".to_string(),
        State::Null => return "F".to_string(),
        State::Normal => {}
    }
    let mut parts: Vec<String> = Vec::new();
    for (&arg, child) in g.gate_args() {
        let rendered = canonical_gate(child);
        parts.push(if arg < 0 { format!("~{}", rendered) } else { rendered });
    }
    for &arg in g.variable_args().keys() {
        parts.push(if arg < 0 { format!("~v{}", -arg) } else { format!("v{}", arg) });
    }
    for (&arg, constant) in g.constant_args() {
        let value = constant.borrow().state() ^ (arg < 0);
        parts.push(if value { "T".to_string() } else { "F".to_string() });
    }
    parts.sort();
    let label = match g.op() {
        Operator::Atleast => format!("Atleast#{}", g.vote_number()),
        op => format!("{:?}", op),
    };
    format!("{}({})", label, parts.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::GateOps;

    #[test]
    fn test_evaluate_basic_kinds() {
        let mut graph = BooleanGraph::new();
        let x = graph.new_variable();
        let y = graph.new_variable();
        let root = graph.new_gate(Operator::And);
        root.add_variable_arg(1, &x);
        root.add_variable_arg(-2, &y);
        graph.set_root(root);
        assert!(evaluate(&graph, &[true, false]));
        assert!(!evaluate(&graph, &[true, true]));
        assert!(!evaluate(&graph, &[false, false]));
    }

    #[test]
    fn test_evaluate_atleast() {
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
        assert!(!evaluate(&graph, &[true, false, false]));
        assert!(evaluate(&graph, &[true, true, false]));
        assert!(evaluate(&graph, &[true, true, true]));
    }

    #[test]
    fn test_evaluate_constant_state() {
        let mut graph = BooleanGraph::new();
        let x = graph.new_variable();
        let root = graph.new_gate(Operator::And);
        root.add_variable_arg(1, &x);
        root.nullify();
        graph.set_root(root);
        assert!(!evaluate(&graph, &[true]));
    }

    #[test]
    fn test_canonical_form_ignores_argument_order() {
        let mut first = BooleanGraph::new();
        let x = first.new_variable();
        let y = first.new_variable();
        let root = first.new_gate(Operator::Or);
        root.add_variable_arg(2, &y);
        root.add_variable_arg(-1, &x);
        first.set_root(root);

        let mut second = BooleanGraph::new();
        let x = second.new_variable();
        let y = second.new_variable();
        let root = second.new_gate(Operator::Or);
        root.add_variable_arg(-1, &x);
        root.add_variable_arg(2, &y);
        second.set_root(root);

        assert_eq!(canonical_form(&first), canonical_form(&second));
        assert_eq!(canonical_form(&first), "Or(v2,~v1)");
    }
}
