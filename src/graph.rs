//! The Boolean graph: a rooted DAG of gates over variable and constant
//! leaves, together with the bookkeeping the preprocessor needs.
//!
//! The graph owns the node index allocator, the registries of constants and
//! pre-existing NULL gates filled in during model construction, and the
//! `coherent`/`normal` structure flags of the input contract. It also owns
//! the process-wide scratch clearing passes: every algorithm that consumes
//! node marks, visit times, optimization values, or polarity counters asks
//! the graph to reset them first.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use hashbrown::HashSet;
use log::trace;

use crate::gate::{Gate, GatePtr, GateWeak, Operator, State};
use crate::node::{Constant, ConstantPtr, Node, NodeRef, Variable, VariablePtr};

/// A rooted Boolean graph with single ownership of all rewriting scratch.
pub struct BooleanGraph {
    root: Option<GatePtr>,
    coherent: bool,
    normal: bool,
    constants: Vec<Weak<RefCell<Constant>>>,
    null_gates: Vec<GateWeak>,
    variables: Vec<VariablePtr>,
}

impl Default for BooleanGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl BooleanGraph {
    /// Starts an empty graph and restarts node numbering from 1.
    pub fn new() -> Self {
        crate::node::reset_index_allocator();
        Self {
            root: None,
            coherent: true,
            normal: true,
            constants: Vec::new(),
            null_gates: Vec::new(),
            variables: Vec::new(),
        }
    }

    /// Creates a fresh variable leaf. Variables receive the smallest indices
    /// when allocated before any gate, which keeps assignment vectors dense.
    pub fn new_variable(&mut self) -> VariablePtr {
        let var = Rc::new(RefCell::new(Variable::new()));
        self.variables.push(var.clone());
        var
    }

    /// Creates a constant leaf and registers it for Phase I removal.
    pub fn new_constant(&mut self, state: bool) -> ConstantPtr {
        let constant = Rc::new(RefCell::new(Constant::new(state)));
        self.constants.push(Rc::downgrade(&constant));
        constant
    }

    /// Creates a fresh gate. NULL gates are registered for Phase I removal.
    pub fn new_gate(&mut self, op: Operator) -> GatePtr {
        let gate = Rc::new(RefCell::new(Gate::new(op)));
        if op == Operator::Null {
            self.null_gates.push(Rc::downgrade(&gate));
        }
        gate
    }

    pub fn root(&self) -> &GatePtr {
        self.root.as_ref().expect("The graph root is not set")
    }

    pub fn set_root(&mut self, gate: GatePtr) {
        self.root = Some(gate);
    }

    /// True iff the graph has no complemented arguments and no non-monotone
    /// gate kinds.
    pub fn coherent(&self) -> bool {
        self.coherent
    }

    /// True iff only OR, AND, and NULL gates are present.
    pub fn normal(&self) -> bool {
        self.normal
    }

    pub(crate) fn set_normal(&mut self, normal: bool) {
        self.normal = normal;
    }

    pub fn constants(&self) -> &[Weak<RefCell<Constant>>] {
        &self.constants
    }

    pub fn null_gates(&self) -> &[GateWeak] {
        &self.null_gates
    }

    pub(crate) fn take_constants(&mut self) -> Vec<Weak<RefCell<Constant>>> {
        std::mem::take(&mut self.constants)
    }

    pub(crate) fn take_null_gates(&mut self) -> Vec<GateWeak> {
        std::mem::take(&mut self.null_gates)
    }

    pub fn variables(&self) -> &[VariablePtr] {
        &self.variables
    }

    pub fn num_variables(&self) -> usize {
        self.variables.len()
    }

    /// Recomputes the structure flags from the graph as built.
    pub(crate) fn update_structure_flags(&mut self) {
        let mut coherent = true;
        let mut normal = true;
        self.for_each_gate(|gate| {
            match gate.borrow().op() {
                Operator::And | Operator::Or | Operator::Null => {}
                Operator::Atleast => normal = false, // Monotone but not in normal form.
                Operator::Xor | Operator::Not | Operator::Nand | Operator::Nor => {
                    coherent = false;
                    normal = false;
                }
            }
            if gate.borrow().args().iter().any(|&arg| arg < 0) {
                coherent = false;
            }
        });
        self.coherent = coherent;
        self.normal = normal;
        trace!("Structure flags: coherent = {}, normal = {}", coherent, normal);
    }

    /// Applies an action to every gate reachable from the root, once each.
    fn for_each_gate(&self, mut action: impl FnMut(&GatePtr)) {
        let mut visited: HashSet<i32> = HashSet::new();
        let mut stack: Vec<GatePtr> = vec![self.root().clone()];
        while let Some(gate) = stack.pop() {
            if !visited.insert(gate.borrow().index()) {
                continue;
            }
            for child in gate.borrow().gate_args().values() {
                stack.push(child.clone());
            }
            action(&gate);
        }
    }

    /// Applies an action to every node reachable from the root, once each.
    fn for_each_node(&self, mut action: impl FnMut(&NodeRef)) {
        let mut visited: HashSet<i32> = HashSet::new();
        let mut stack: Vec<GatePtr> = vec![self.root().clone()];
        while let Some(gate) = stack.pop() {
            if !visited.insert(gate.borrow().index()) {
                continue;
            }
            {
                let g = gate.borrow();
                for child in g.gate_args().values() {
                    stack.push(child.clone());
                }
                for var in g.variable_args().values() {
                    if visited.insert(var.borrow().index()) {
                        action(&NodeRef::Variable(var.clone()));
                    }
                }
                for constant in g.constant_args().values() {
                    if visited.insert(constant.borrow().index()) {
                        action(&NodeRef::Constant(constant.clone()));
                    }
                }
            }
            action(&NodeRef::Gate(gate.clone()));
        }
    }

    /// Resets the traversal marks of all gates.
    pub fn clear_gate_marks(&self) {
        self.for_each_gate(|gate| gate.borrow_mut().set_mark(false));
    }

    /// Resets the visit times of all nodes.
    pub fn clear_node_visits(&self) {
        self.for_each_node(|node| match node {
            NodeRef::Gate(g) => g.borrow_mut().clear_visits(),
            NodeRef::Variable(v) => v.borrow_mut().clear_visits(),
            NodeRef::Constant(c) => c.borrow_mut().clear_visits(),
        });
    }

    /// Resets the optimization values (and failed-argument counters) of all
    /// nodes.
    pub fn clear_opti_values(&self) {
        self.for_each_node(|node| match node {
            NodeRef::Gate(g) => {
                let mut gate = g.borrow_mut();
                gate.set_opti_value(0);
                gate.clear_failed_args();
            }
            NodeRef::Variable(v) => v.borrow_mut().set_opti_value(0),
            NodeRef::Constant(c) => c.borrow_mut().set_opti_value(0),
        });
    }

    /// Resets the polarity counters of all nodes.
    pub fn clear_node_counts(&self) {
        self.for_each_node(|node| match node {
            NodeRef::Gate(g) => g.borrow_mut().clear_counts(),
            NodeRef::Variable(v) => v.borrow_mut().clear_counts(),
            NodeRef::Constant(c) => c.borrow_mut().clear_counts(),
        });
    }

    /// Counts the gates currently reachable from the root.
    pub fn gate_count(&self) -> usize {
        let mut count = 0;
        self.for_each_gate(|_| count += 1);
        count
    }

    /// Checks that every argument edge has a matching back-reference and
    /// that the graph is acyclic. Intended for debug assertions between
    /// phases.
    pub fn validate_links(&self) -> bool {
        let mut on_path: HashSet<i32> = HashSet::new();
        let mut done: HashSet<i32> = HashSet::new();
        fn visit(gate: &GatePtr, on_path: &mut HashSet<i32>, done: &mut HashSet<i32>) -> bool {
            let index = gate.borrow().index();
            if done.contains(&index) {
                return true;
            }
            if !on_path.insert(index) {
                return false; // Cycle.
            }
            {
                let g = gate.borrow();
                for (&arg, child) in g.gate_args() {
                    if !child.borrow().parents().contains_key(&index) {
                        return false;
                    }
                    if !g.args().contains(&arg) {
                        return false;
                    }
                    if !visit(child, on_path, done) {
                        return false;
                    }
                }
                for child in g.variable_args().values() {
                    if !child.borrow().parents().contains_key(&index) {
                        return false;
                    }
                }
                for child in g.constant_args().values() {
                    if !child.borrow().parents().contains_key(&index) {
                        return false;
                    }
                }
            }
            on_path.remove(&index);
            done.insert(index);
            true
        }
        visit(self.root(), &mut on_path, &mut done)
    }

    /// True if the root has collapsed into a constant state.
    pub fn root_constant(&self) -> bool {
        self.root().borrow().state() != State::Normal
    }
}
