//! Node identity and leaf types of the Boolean graph.
//!
//! Every vertex of the graph carries a [`NodeBase`]: a unique positive index,
//! a set of weak back-references to the gates that own it, and the mutable
//! scratch consumed by the preprocessing passes (visit times, optimization
//! value, polarity counters, subtree time range).
//!
//! Ownership flows strictly downward: a gate owns its arguments through
//! `Rc` forward edges, while the `parents` map holds `Weak` observers that
//! never extend a lifetime. A node dies when the last gate referencing it
//! unlinks it.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

use crate::gate::{Gate, GatePtr, GateWeak};

/// Shared pointer to a variable leaf.
pub type VariablePtr = Rc<RefCell<Variable>>;
/// Shared pointer to a constant leaf.
pub type ConstantPtr = Rc<RefCell<Constant>>;

thread_local! {
    /// Sequential index source for all nodes. The preprocessor relies on
    /// newer nodes having larger indices than the nodes they replace.
    static NEXT_INDEX: Cell<i32> = const { Cell::new(0) };
}

fn next_index() -> i32 {
    NEXT_INDEX.with(|counter| {
        let index = counter.get() + 1;
        counter.set(index);
        index
    })
}

/// Restarts node numbering from 1. Called when a new graph is started.
pub(crate) fn reset_index_allocator() {
    NEXT_INDEX.with(|counter| counter.set(0));
}

/// Common identity and per-node scratch shared by gates and leaves.
#[derive(Debug)]
pub struct NodeBase {
    index: i32,
    parents: BTreeMap<i32, GateWeak>,
    /// Enter, exit, and last visit times of the timing traversal.
    visits: [i32; 3],
    opti_value: i32,
    pos_count: i32,
    neg_count: i32,
    min_time: i32,
    max_time: i32,
}

impl NodeBase {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            index: next_index(),
            parents: BTreeMap::new(),
            visits: [0; 3],
            opti_value: 0,
            pos_count: 0,
            neg_count: 0,
            min_time: 0,
            max_time: 0,
        }
    }
}

/// Behavior shared by every vertex of the graph.
///
/// The default methods implement the visit-time protocol used by the timing
/// traversal: the first [`visit`][Node::visit] stamps the enter time, the
/// second stamps the exit time, and any further visit records the last
/// encounter and reports the node as already seen.
pub trait Node {
    fn base(&self) -> &NodeBase;
    fn base_mut(&mut self) -> &mut NodeBase;

    fn index(&self) -> i32 {
        self.base().index
    }

    fn parents(&self) -> &BTreeMap<i32, GateWeak> {
        &self.base().parents
    }

    fn add_parent(&mut self, index: i32, gate: GateWeak) {
        self.base_mut().parents.insert(index, gate);
    }

    fn erase_parent(&mut self, index: i32) {
        self.base_mut().parents.remove(&index);
    }

    /// Registers a visit at the given time.
    ///
    /// Returns true iff the node had already been entered and exited, i.e.
    /// this is a re-encounter through another parent.
    fn visit(&mut self, time: i32) -> bool {
        assert!(time > 0);
        let visits = &mut self.base_mut().visits;
        if visits[0] == 0 {
            visits[0] = time;
            false
        } else if visits[1] == 0 {
            visits[1] = time;
            false
        } else {
            visits[2] = time;
            true
        }
    }

    fn visited(&self) -> bool {
        self.base().visits[0] != 0
    }

    fn revisited(&self) -> bool {
        self.base().visits[2] != 0
    }

    fn enter_time(&self) -> i32 {
        self.base().visits[0]
    }

    fn exit_time(&self) -> i32 {
        self.base().visits[1]
    }

    /// The most recent visit time, whichever slot holds it.
    fn last_visit(&self) -> i32 {
        let visits = &self.base().visits;
        if visits[2] != 0 {
            visits[2]
        } else if visits[1] != 0 {
            visits[1]
        } else {
            visits[0]
        }
    }

    fn clear_visits(&mut self) {
        self.base_mut().visits = [0; 3];
    }

    fn opti_value(&self) -> i32 {
        self.base().opti_value
    }

    fn set_opti_value(&mut self, value: i32) {
        self.base_mut().opti_value = value;
    }

    /// Bumps the polarity counter for one more parent occurrence.
    fn add_count(&mut self, positive: bool) {
        if positive {
            self.base_mut().pos_count += 1;
        } else {
            self.base_mut().neg_count += 1;
        }
    }

    fn pos_count(&self) -> i32 {
        self.base().pos_count
    }

    fn neg_count(&self) -> i32 {
        self.base().neg_count
    }

    fn clear_counts(&mut self) {
        self.base_mut().pos_count = 0;
        self.base_mut().neg_count = 0;
    }

    fn min_time(&self) -> i32 {
        self.base().min_time
    }

    fn max_time(&self) -> i32 {
        self.base().max_time
    }

    fn set_min_time(&mut self, time: i32) {
        self.base_mut().min_time = time;
    }

    fn set_max_time(&mut self, time: i32) {
        self.base_mut().max_time = time;
    }
}

/// A leaf node standing for a basic event.
#[derive(Debug)]
pub struct Variable {
    base: NodeBase,
}

impl Variable {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self { base: NodeBase::new() }
    }
}

impl Node for Variable {
    fn base(&self) -> &NodeBase {
        &self.base
    }
    fn base_mut(&mut self) -> &mut NodeBase {
        &mut self.base
    }
}

/// A leaf node carrying a fixed truth value.
///
/// Constants survive only until Phase I; the propagator dissolves them into
/// the states of their parent gates and detaches them.
#[derive(Debug)]
pub struct Constant {
    base: NodeBase,
    state: bool,
}

impl Constant {
    pub fn new(state: bool) -> Self {
        Self { base: NodeBase::new(), state }
    }

    pub fn state(&self) -> bool {
        self.state
    }
}

impl Node for Constant {
    fn base(&self) -> &NodeBase {
        &self.base
    }
    fn base_mut(&mut self) -> &mut NodeBase {
        &mut self.base
    }
}

/// A strong, kind-tagged reference to any graph vertex.
#[derive(Clone)]
pub enum NodeRef {
    Gate(GatePtr),
    Variable(VariablePtr),
    Constant(ConstantPtr),
}

impl NodeRef {
    pub fn index(&self) -> i32 {
        match self {
            NodeRef::Gate(g) => g.borrow().index(),
            NodeRef::Variable(v) => v.borrow().index(),
            NodeRef::Constant(c) => c.borrow().index(),
        }
    }

    pub fn num_parents(&self) -> usize {
        match self {
            NodeRef::Gate(g) => g.borrow().parents().len(),
            NodeRef::Variable(v) => v.borrow().parents().len(),
            NodeRef::Constant(c) => c.borrow().parents().len(),
        }
    }

    /// Snapshot of the current parents, in index order.
    pub fn parent_gates(&self) -> Vec<GatePtr> {
        fn collect(parents: &BTreeMap<i32, GateWeak>) -> Vec<GatePtr> {
            parents
                .values()
                .map(|weak| weak.upgrade().expect("Dangling parent back-reference"))
                .collect()
        }
        match self {
            NodeRef::Gate(g) => collect(g.borrow().parents()),
            NodeRef::Variable(v) => collect(v.borrow().parents()),
            NodeRef::Constant(c) => collect(c.borrow().parents()),
        }
    }

    pub fn has_parent(&self, index: i32) -> bool {
        match self {
            NodeRef::Gate(g) => g.borrow().parents().contains_key(&index),
            NodeRef::Variable(v) => v.borrow().parents().contains_key(&index),
            NodeRef::Constant(c) => c.borrow().parents().contains_key(&index),
        }
    }

    pub fn add_parent(&self, index: i32, gate: GateWeak) {
        match self {
            NodeRef::Gate(g) => g.borrow_mut().add_parent(index, gate),
            NodeRef::Variable(v) => v.borrow_mut().add_parent(index, gate),
            NodeRef::Constant(c) => c.borrow_mut().add_parent(index, gate),
        }
    }

    pub fn erase_parent(&self, index: i32) {
        match self {
            NodeRef::Gate(g) => g.borrow_mut().erase_parent(index),
            NodeRef::Variable(v) => v.borrow_mut().erase_parent(index),
            NodeRef::Constant(c) => c.borrow_mut().erase_parent(index),
        }
    }

    pub fn opti_value(&self) -> i32 {
        match self {
            NodeRef::Gate(g) => g.borrow().opti_value(),
            NodeRef::Variable(v) => v.borrow().opti_value(),
            NodeRef::Constant(c) => c.borrow().opti_value(),
        }
    }

    pub fn set_opti_value(&self, value: i32) {
        match self {
            NodeRef::Gate(g) => g.borrow_mut().set_opti_value(value),
            NodeRef::Variable(v) => v.borrow_mut().set_opti_value(value),
            NodeRef::Constant(c) => c.borrow_mut().set_opti_value(value),
        }
    }

    pub fn min_time(&self) -> i32 {
        match self {
            NodeRef::Gate(g) => g.borrow().min_time(),
            NodeRef::Variable(v) => v.borrow().min_time(),
            NodeRef::Constant(c) => c.borrow().min_time(),
        }
    }

    pub fn max_time(&self) -> i32 {
        match self {
            NodeRef::Gate(g) => g.borrow().max_time(),
            NodeRef::Variable(v) => v.borrow().max_time(),
            NodeRef::Constant(c) => c.borrow().max_time(),
        }
    }

    pub fn as_gate(&self) -> Option<&GatePtr> {
        match self {
            NodeRef::Gate(g) => Some(g),
            _ => None,
        }
    }
}

/// A weak, kind-tagged reference used by worklists and common-node queues.
///
/// An entry whose referent has died upgrades to `None` and is skipped.
#[derive(Clone)]
pub enum NodeWeak {
    Gate(Weak<RefCell<Gate>>),
    Variable(Weak<RefCell<Variable>>),
}

impl NodeWeak {
    pub fn upgrade(&self) -> Option<NodeRef> {
        match self {
            NodeWeak::Gate(w) => w.upgrade().map(NodeRef::Gate),
            NodeWeak::Variable(w) => w.upgrade().map(NodeRef::Variable),
        }
    }
}
