//! Gates: the inner nodes of the Boolean graph.
//!
//! A gate pairs a logical [`Operator`] with a set of signed argument indices
//! (positive for plain, negative for complemented) and the owned references
//! to the child nodes behind them. Arguments are partitioned by child kind
//! into gate, variable, and constant maps; all containers iterate in signed
//! index order, which keeps every rewriting pass deterministic.
//!
//! The relational mutation primitives live in [`GateOps`], implemented on
//! the shared pointer so that child back-references can be installed. The
//! primitives never leave the parent/child links inconsistent: an argument
//! is present in `args` iff the child holds a back-reference keyed by this
//! gate's index.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::{Rc, Weak};

use crate::node::{ConstantPtr, Node, NodeBase, NodeRef, VariablePtr};

/// Shared pointer to a gate.
pub type GatePtr = Rc<RefCell<Gate>>;
/// Weak pointer to a gate, used by back-references and worklists.
pub type GateWeak = Weak<RefCell<Gate>>;

/// Logical connective of a gate.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Operator {
    And,
    Or,
    Nand,
    Nor,
    Not,
    /// Single-argument pass-through; always removed by propagation.
    Null,
    Xor,
    /// K-of-N voter; true iff at least `vote_number` arguments are true.
    Atleast,
}

/// Constant collapse state of a gate.
///
/// A gate whose state is not [`Normal`][State::Normal] has been absorbed
/// into a constant: `Null` is constant false, `Unity` constant true. Such a
/// gate holds no arguments and waits on the constant worklist for
/// propagation into its parents.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum State {
    Normal,
    Null,
    Unity,
}

/// Structural fingerprint for multiple-definition detection:
/// operator, vote number (zero unless ATLEAST), sorted signed arguments.
pub type Fingerprint = (Operator, i32, Vec<i32>);

/// An inner node of the Boolean graph.
#[derive(Debug)]
pub struct Gate {
    base: NodeBase,
    op: Operator,
    state: State,
    vote_number: i32,
    mark: bool,
    module: bool,
    num_failed_args: i32,
    args: BTreeSet<i32>,
    gate_args: BTreeMap<i32, GatePtr>,
    variable_args: BTreeMap<i32, VariablePtr>,
    constant_args: BTreeMap<i32, ConstantPtr>,
}

impl Gate {
    pub fn new(op: Operator) -> Self {
        Self {
            base: NodeBase::new(),
            op,
            state: State::Normal,
            vote_number: 0,
            mark: false,
            module: false,
            num_failed_args: 0,
            args: BTreeSet::new(),
            gate_args: BTreeMap::new(),
            variable_args: BTreeMap::new(),
            constant_args: BTreeMap::new(),
        }
    }

    /// Allocates a fresh shared gate.
    pub fn shared(op: Operator) -> GatePtr {
        Rc::new(RefCell::new(Gate::new(op)))
    }

    pub fn op(&self) -> Operator {
        self.op
    }

    /// Rewrites the gate kind in place. The caller is responsible for the
    /// argument-count invariants of the new kind.
    pub fn set_op(&mut self, op: Operator) {
        self.op = op;
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn vote_number(&self) -> i32 {
        self.vote_number
    }

    pub fn set_vote_number(&mut self, vote: i32) {
        self.vote_number = vote;
    }

    pub fn mark(&self) -> bool {
        self.mark
    }

    pub fn set_mark(&mut self, mark: bool) {
        self.mark = mark;
    }

    pub fn is_module(&self) -> bool {
        self.module
    }

    pub fn turn_module(&mut self) {
        self.module = true;
    }

    /// Signed argument indices in ascending order.
    pub fn args(&self) -> &BTreeSet<i32> {
        &self.args
    }

    pub fn gate_args(&self) -> &BTreeMap<i32, GatePtr> {
        &self.gate_args
    }

    pub fn variable_args(&self) -> &BTreeMap<i32, VariablePtr> {
        &self.variable_args
    }

    pub fn constant_args(&self) -> &BTreeMap<i32, ConstantPtr> {
        &self.constant_args
    }

    pub fn num_args(&self) -> usize {
        self.args.len()
    }

    /// Flips the sign of one argument in place. Back-references are keyed by
    /// parent index and stay untouched.
    pub fn invert_arg(&mut self, arg: i32) {
        assert!(self.args.remove(&arg), "Inverting a missing argument");
        assert!(!self.args.contains(&-arg), "Inversion would duplicate an argument");
        self.args.insert(-arg);
        if let Some(gate) = self.gate_args.remove(&arg) {
            self.gate_args.insert(-arg, gate);
        } else if let Some(var) = self.variable_args.remove(&arg) {
            self.variable_args.insert(-arg, var);
        } else if let Some(constant) = self.constant_args.remove(&arg) {
            self.constant_args.insert(-arg, constant);
        } else {
            unreachable!("Argument {} without a child reference", arg);
        }
    }

    /// Flips the signs of all arguments, used when a complement is pushed
    /// through the gate.
    pub fn invert_args(&mut self) {
        let negated: BTreeSet<i32> = self.args.iter().map(|a| -a).collect();
        self.args = negated;
        self.gate_args = std::mem::take(&mut self.gate_args)
            .into_iter()
            .map(|(a, g)| (-a, g))
            .collect();
        self.variable_args = std::mem::take(&mut self.variable_args)
            .into_iter()
            .map(|(a, v)| (-a, v))
            .collect();
        self.constant_args = std::mem::take(&mut self.constant_args)
            .into_iter()
            .map(|(a, c)| (-a, c))
            .collect();
    }

    /// Notification that one argument of this gate has failed during
    /// failure propagation. Sets the optimization value to 1 once enough
    /// arguments have failed for the gate kind.
    pub fn arg_failed(&mut self) {
        if self.opti_value() == 1 {
            return;
        }
        assert_eq!(self.opti_value(), 0);
        self.num_failed_args += 1;
        match self.op {
            Operator::Null | Operator::Or => self.set_opti_value(1),
            Operator::And => {
                if self.num_failed_args == self.args.len() as i32 {
                    self.set_opti_value(1);
                }
            }
            Operator::Atleast => {
                if self.num_failed_args == self.vote_number {
                    self.set_opti_value(1);
                }
            }
            _ => unreachable!("Failure propagation on a non-normalized gate"),
        }
    }

    pub fn clear_failed_args(&mut self) {
        self.num_failed_args = 0;
    }

    /// Structural fingerprint for duplicate detection.
    pub fn fingerprint(&self) -> Fingerprint {
        let vote = if self.op == Operator::Atleast { self.vote_number } else { 0 };
        (self.op, vote, self.args.iter().copied().collect())
    }
}

impl Node for Gate {
    fn base(&self) -> &NodeBase {
        &self.base
    }
    fn base_mut(&mut self) -> &mut NodeBase {
        &mut self.base
    }
}

impl Drop for Gate {
    fn drop(&mut self) {
        let index = self.index();
        for gate in self.gate_args.values() {
            gate.borrow_mut().erase_parent(index);
        }
        for var in self.variable_args.values() {
            var.borrow_mut().erase_parent(index);
        }
        for constant in self.constant_args.values() {
            constant.borrow_mut().erase_parent(index);
        }
    }
}

/// Relational mutation primitives on shared gates.
///
/// These operate through the shared pointer because inserting an argument
/// installs a weak back-reference to the parent into the child.
pub trait GateOps {
    /// Inserts a signed argument.
    ///
    /// An argument complementary to an existing one collapses the gate to
    /// its constant state (or absorbs the pair for ATLEAST). An exact
    /// duplicate is ignored by the idempotent kinds and specially rewritten
    /// for XOR and ATLEAST.
    fn add_arg(&self, arg: i32, node: &NodeRef);
    fn add_gate_arg(&self, arg: i32, gate: &GatePtr);
    fn add_variable_arg(&self, arg: i32, var: &VariablePtr);
    fn add_constant_arg(&self, arg: i32, constant: &ConstantPtr);

    /// Looks up the child node behind a signed argument.
    fn arg_node(&self, arg: i32) -> NodeRef;

    /// Removes an argument and the child's back-reference.
    fn erase_arg(&self, arg: i32);

    /// Removes all arguments.
    fn erase_all_args(&self);

    /// Copies an argument (same sign and child) into the recipient gate.
    fn share_arg(&self, arg: i32, recipient: &GatePtr);

    /// Moves an argument into the recipient gate.
    fn transfer_arg(&self, arg: i32, recipient: &GatePtr);

    /// Inlines the arguments of a same-logic child gate into this gate.
    /// May collapse this gate into a constant state.
    fn join_gate(&self, child: &GatePtr);

    /// Replaces the reference to a NULL child by the child's sole argument
    /// with the signs multiplied.
    fn join_null_gate(&self, arg: i32);

    /// Collapses the gate to constant true.
    fn make_unity(&self);

    /// Collapses the gate to constant false.
    fn nullify(&self);

    /// Creates a structurally identical gate with a fresh identity. The
    /// clone shares the children of the original and has no parents, no
    /// module flag, and clear scratch.
    fn clone_gate(&self) -> GatePtr;
}

impl GateOps for GatePtr {
    fn add_arg(&self, arg: i32, node: &NodeRef) {
        assert_ne!(arg, 0);
        debug_assert_eq!(arg.abs(), node.index());
        {
            let gate = self.borrow();
            assert_eq!(gate.state, State::Normal, "Adding an argument to a constant gate");
            if gate.args.contains(&arg) {
                drop(gate);
                process_duplicate_arg(self, arg);
                return;
            }
            if gate.args.contains(&-arg) {
                drop(gate);
                process_complement_arg(self, arg);
                return;
            }
        }
        let index = {
            let mut gate = self.borrow_mut();
            gate.args.insert(arg);
            match node {
                NodeRef::Gate(child) => {
                    gate.gate_args.insert(arg, child.clone());
                }
                NodeRef::Variable(child) => {
                    gate.variable_args.insert(arg, child.clone());
                }
                NodeRef::Constant(child) => {
                    gate.constant_args.insert(arg, child.clone());
                }
            }
            gate.index()
        };
        node.add_parent(index, Rc::downgrade(self));
    }

    fn add_gate_arg(&self, arg: i32, gate: &GatePtr) {
        self.add_arg(arg, &NodeRef::Gate(gate.clone()));
    }

    fn add_variable_arg(&self, arg: i32, var: &VariablePtr) {
        self.add_arg(arg, &NodeRef::Variable(var.clone()));
    }

    fn add_constant_arg(&self, arg: i32, constant: &ConstantPtr) {
        self.add_arg(arg, &NodeRef::Constant(constant.clone()));
    }

    fn arg_node(&self, arg: i32) -> NodeRef {
        let gate = self.borrow();
        if let Some(child) = gate.gate_args.get(&arg) {
            NodeRef::Gate(child.clone())
        } else if let Some(child) = gate.variable_args.get(&arg) {
            NodeRef::Variable(child.clone())
        } else if let Some(child) = gate.constant_args.get(&arg) {
            NodeRef::Constant(child.clone())
        } else {
            unreachable!("Argument {} is not in gate {}", arg, gate.index())
        }
    }

    fn erase_arg(&self, arg: i32) {
        let (index, child) = {
            let mut gate = self.borrow_mut();
            assert!(gate.args.remove(&arg), "Erasing a missing argument");
            let child = if let Some(g) = gate.gate_args.remove(&arg) {
                NodeRef::Gate(g)
            } else if let Some(v) = gate.variable_args.remove(&arg) {
                NodeRef::Variable(v)
            } else if let Some(c) = gate.constant_args.remove(&arg) {
                NodeRef::Constant(c)
            } else {
                unreachable!("Argument {} without a child reference", arg)
            };
            (gate.index(), child)
        };
        child.erase_parent(index);
        // The child dies here if this was its last owner.
    }

    fn erase_all_args(&self) {
        let (index, children) = {
            let mut gate = self.borrow_mut();
            gate.args.clear();
            let mut children: Vec<NodeRef> = Vec::new();
            children.extend(std::mem::take(&mut gate.gate_args).into_values().map(NodeRef::Gate));
            children
                .extend(std::mem::take(&mut gate.variable_args).into_values().map(NodeRef::Variable));
            children
                .extend(std::mem::take(&mut gate.constant_args).into_values().map(NodeRef::Constant));
            (gate.index(), children)
        };
        for child in &children {
            child.erase_parent(index);
        }
    }

    fn share_arg(&self, arg: i32, recipient: &GatePtr) {
        let node = self.arg_node(arg);
        recipient.add_arg(arg, &node);
    }

    fn transfer_arg(&self, arg: i32, recipient: &GatePtr) {
        let node = self.arg_node(arg);
        recipient.add_arg(arg, &node);
        self.erase_arg(arg);
    }

    fn join_gate(&self, child: &GatePtr) {
        let child_index = child.borrow().index();
        assert!(
            self.borrow().args.contains(&child_index),
            "Only a positive gate argument can be joined"
        );
        let child_args: Vec<(i32, NodeRef)> = {
            let c = child.borrow();
            c.args.iter().map(|&a| (a, child.arg_node(a))).collect()
        };
        for (arg, node) in &child_args {
            self.add_arg(*arg, node);
            if self.borrow().state != State::Normal {
                return; // Collapsed; the caller registers the constant.
            }
        }
        self.erase_arg(child_index);
    }

    fn join_null_gate(&self, arg: i32) {
        assert_ne!(arg, 0);
        let child = match self.arg_node(arg) {
            NodeRef::Gate(g) => g,
            _ => unreachable!("NULL gate argument expected"),
        };
        let (grandchild_arg, grandchild) = {
            let c = child.borrow();
            assert_eq!(c.op, Operator::Null);
            assert_eq!(c.num_args(), 1);
            let a = *c.args.iter().next().unwrap();
            (a, child.arg_node(a))
        };
        self.erase_arg(arg);
        let sign = if arg > 0 { 1 } else { -1 };
        self.add_arg(sign * grandchild_arg, &grandchild);
    }

    fn make_unity(&self) {
        {
            let mut gate = self.borrow_mut();
            assert_eq!(gate.state, State::Normal);
            gate.state = State::Unity;
        }
        self.erase_all_args();
    }

    fn nullify(&self) {
        {
            let mut gate = self.borrow_mut();
            assert_eq!(gate.state, State::Normal);
            gate.state = State::Null;
        }
        self.erase_all_args();
    }

    fn clone_gate(&self) -> GatePtr {
        let clone = Gate::shared(self.borrow().op());
        clone.borrow_mut().set_vote_number(self.borrow().vote_number());
        let args: Vec<i32> = self.borrow().args.iter().copied().collect();
        for arg in args {
            self.share_arg(arg, &clone);
        }
        clone
    }
}

/// Absorbs an argument complementary to one already present.
///
/// `p OP ¬p` is decided by the gate kind; ATLEAST drops the pair and lowers
/// its vote by one, because exactly one of the two is true.
fn process_complement_arg(gate: &GatePtr, arg: i32) {
    let op = gate.borrow().op;
    match op {
        Operator::Null | Operator::Or | Operator::Nand | Operator::Xor => gate.make_unity(),
        Operator::And | Operator::Nor => gate.nullify(),
        Operator::Not => unreachable!("NOT gates cannot take a second argument"),
        Operator::Atleast => {
            gate.erase_arg(-arg);
            let mut g = gate.borrow_mut();
            g.vote_number -= 1;
            assert!(g.vote_number >= 1);
            assert!(g.num_args() as i32 > g.vote_number);
            if g.vote_number == 1 {
                g.op = Operator::Or;
            }
        }
    }
}

/// Handles insertion of an argument the gate already holds.
///
/// Idempotent kinds ignore the duplicate. `x XOR x` is constant false. An
/// ATLEAST gate counts the argument twice and is rewritten accordingly.
fn process_duplicate_arg(gate: &GatePtr, arg: i32) {
    let op = gate.borrow().op;
    match op {
        Operator::And | Operator::Or | Operator::Nand | Operator::Nor => {
            // Idempotent kinds treat the duplicate as one argument; the gate
            // may shrink below two arguments and degrade into a pass-through.
            let mut g = gate.borrow_mut();
            if g.num_args() == 1 {
                match op {
                    Operator::And | Operator::Or => g.op = Operator::Null,
                    Operator::Nand | Operator::Nor => g.op = Operator::Not,
                    _ => unreachable!(),
                }
            }
        }
        Operator::Xor => gate.nullify(),
        Operator::Atleast => process_atleast_duplicate_arg(gate, arg),
        Operator::Not | Operator::Null => {
            unreachable!("Single-argument gates cannot take duplicates")
        }
    }
}

/// Rewrites an ATLEAST gate with a doubly-counted argument:
///
/// ```text
/// ATLEAST(k; x, x, R) == OR(AND(x, ATLEAST(k-2; R)), ATLEAST(k; R))
/// ```
///
/// with the degenerate vote numbers folded into AND/OR gates.
fn process_atleast_duplicate_arg(gate: &GatePtr, arg: i32) {
    let k = gate.borrow().vote_number;
    assert!(k >= 2);
    let x = gate.arg_node(arg);
    let rest: Vec<(i32, NodeRef)> = {
        let g = gate.borrow();
        g.args.iter().filter(|&&a| a != arg).map(|&a| (a, gate.arg_node(a))).collect()
    };
    let n = rest.len() as i32;
    assert!(n >= k, "Malformed ATLEAST duplicate argument");

    let second = if n == k {
        Gate::shared(Operator::And)
    } else {
        let g = Gate::shared(Operator::Atleast);
        g.borrow_mut().set_vote_number(k);
        g
    };
    for (a, node) in &rest {
        second.add_arg(*a, node);
    }

    gate.erase_all_args();
    {
        let mut g = gate.borrow_mut();
        g.set_op(Operator::Or);
        g.set_vote_number(0);
    }
    if k == 2 {
        gate.add_arg(arg, &x); // ATLEAST(0; R) is unity.
    } else {
        let first = Gate::shared(Operator::And);
        first.add_arg(arg, &x);
        let sub = if k - 2 == 1 {
            Gate::shared(Operator::Or)
        } else {
            let g = Gate::shared(Operator::Atleast);
            g.borrow_mut().set_vote_number(k - 2);
            g
        };
        for (a, node) in &rest {
            sub.add_arg(*a, node);
        }
        let sub_index = sub.borrow().index();
        first.add_gate_arg(sub_index, &sub);
        let first_index = first.borrow().index();
        gate.add_gate_arg(first_index, &first);
    }
    let second_index = second.borrow().index();
    gate.add_gate_arg(second_index, &second);
}
