//! Graphviz export of Boolean graphs.

use hashbrown::HashSet;

use crate::gate::{GatePtr, Operator, State};
use crate::graph::BooleanGraph;
use crate::node::Node;

impl BooleanGraph {
    /// Renders the graph in Graphviz DOT format.
    ///
    /// Gates are boxes labelled by kind (vote number included for ATLEAST),
    /// variables are ellipses, constants are diamonds. Complemented edges
    /// are dashed; modules get a double border.
    pub fn to_dot(&self) -> Result<String, std::fmt::Error> {
        use std::fmt::Write as _;

        let mut dot = String::new();
        writeln!(dot, "digraph boolean_graph {{")?;
        writeln!(dot, "node [shape=box];")?;

        let mut visited: HashSet<i32> = HashSet::new();
        let mut stack: Vec<GatePtr> = vec![self.root().clone()];
        while let Some(gate) = stack.pop() {
            let g = gate.borrow();
            if !visited.insert(g.index()) {
                continue;
            }
            let label = match g.state() {
                State::Unity => "TRUE".to_string(),
                State::Null => "FALSE".to_string(),
                State::Normal => match g.op() {
                    Operator::Atleast => format!("ATLEAST {}/{}", g.vote_number(), g.num_args()),
                    op => format!("{:?}", op).to_uppercase(),
                },
            };
            let peripheries = if g.is_module() { 2 } else { 1 };
            writeln!(dot, "G{} [label=\"{}\", peripheries={}];", g.index(), label, peripheries)?;

            for (&arg, child) in g.gate_args() {
                let style = if arg < 0 { " [style=dashed]" } else { "" };
                writeln!(dot, "G{} -> G{}{};", g.index(), child.borrow().index(), style)?;
                stack.push(child.clone());
            }
            for (&arg, var) in g.variable_args() {
                let index = var.borrow().index();
                if visited.insert(index) {
                    writeln!(dot, "G{} [label=\"x{}\", shape=ellipse];", index, index)?;
                }
                let style = if arg < 0 { " [style=dashed]" } else { "" };
                writeln!(dot, "G{} -> G{}{};", g.index(), index, style)?;
            }
            for (&arg, constant) in g.constant_args() {
                let index = constant.borrow().index();
                if visited.insert(index) {
                    let value = if constant.borrow().state() { "1" } else { "0" };
                    writeln!(dot, "G{} [label=\"{}\", shape=diamond];", index, value)?;
                }
                let style = if arg < 0 { " [style=dashed]" } else { "" };
                writeln!(dot, "G{} -> G{}{};", g.index(), index, style)?;
            }
        }

        writeln!(dot, "}}")?;
        Ok(dot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::GateOps;

    #[test]
    fn test_to_dot_renders_all_nodes() {
        let mut graph = BooleanGraph::new();
        let x = graph.new_variable();
        let y = graph.new_variable();
        let child = graph.new_gate(Operator::Or);
        child.add_variable_arg(1, &x);
        child.add_variable_arg(-2, &y);
        let root = graph.new_gate(Operator::And);
        root.add_variable_arg(1, &x);
        root.add_gate_arg(3, &child);
        graph.set_root(root);

        let dot = graph.to_dot().unwrap();
        assert!(dot.starts_with("digraph"));
        assert!(dot.contains("label=\"AND\""));
        assert!(dot.contains("label=\"OR\""));
        assert!(dot.contains("label=\"x1\""));
        assert!(dot.contains("style=dashed"));
    }
}
