//! The multi-phase structural preprocessor of the Boolean graph.
//!
//! The preprocessor rewrites a well-formed Boolean graph into a semantically
//! equivalent, structurally normalized graph ready for decision-diagram or
//! cut-set compilation. Processing is phase driven:
//!
//! - **Phase I** dissolves constants, partially normalizes the non-coherent
//!   structure (NOT/NAND/NOR become NULL/AND/OR with sign bookkeeping), and
//!   removes NULL pass-through gates.
//! - **Phase II** is the heavy simplifier loop: multiple-definition merging,
//!   module detection, common-argument merging, Boolean optimization,
//!   decomposition of common nodes, distributivity, and coalescence.
//! - **Phase III** escalates to full normalization (XOR and ATLEAST are
//!   expanded into AND/OR) and re-enters Phase II.
//! - **Phase IV** propagates complements of gates down the graph in
//!   non-coherent models and re-enters Phase II.
//! - **Phase V** runs layered coalescence around a final Phase II pass.
//!
//! After every phase the root is inspected: a root collapsed into a constant
//! state terminates processing early. All rewrites preserve the semantics of
//! the graph for every variable assignment.
//!
//! Every algorithm documents the node scratch it consumes (gate marks, visit
//! times, optimization values, polarity counters); the scratch is cleared
//! through the graph before use. The two worklists hold weak references, so
//! entries whose gates have died are silently skipped.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::{Rc, Weak};
use std::time::Instant;

use hashbrown::HashMap;
use log::{debug, trace};

use crate::gate::{Fingerprint, Gate, GateOps, GatePtr, GateWeak, Operator, State};
use crate::graph::BooleanGraph;
use crate::node::{Node, NodeRef, Variable, VariablePtr};

/// Sorted signed indices shared by a family of gates.
type CommonArgs = Vec<i32>;
/// Gates holding a common argument family, keyed by gate index.
type CommonParents = BTreeMap<i32, GatePtr>;
/// One merging opportunity: the arguments and the gates sharing them.
type MergeOption = (CommonArgs, CommonParents);
/// Options chained from subset to superset over the same parents.
type MergeGroup = Vec<MergeOption>;
/// All merging opportunities keyed by the common argument family.
type Collection = BTreeMap<CommonArgs, CommonParents>;

/// Runs the full preprocessing pipeline on the graph.
pub fn preprocess(graph: &mut BooleanGraph) {
    Preprocessor::new(graph).process();
}

/// The Boolean-graph preprocessor.
///
/// Owns the graph exclusively for the duration of [`process`]
/// [Preprocessor::process]; the instance is single use and non-reentrant.
pub struct Preprocessor<'a> {
    graph: &'a mut BooleanGraph,
    /// Top-level complement pulled out of the root gate.
    root_sign: i32,
    /// Gates that collapsed into a constant state, awaiting propagation.
    const_gates: Vec<GateWeak>,
    /// Single-argument pass-through gates awaiting removal.
    null_gates: Vec<GateWeak>,
}

impl<'a> Preprocessor<'a> {
    pub fn new(graph: &'a mut BooleanGraph) -> Self {
        Self { graph, root_sign: 1, const_gates: Vec::new(), null_gates: Vec::new() }
    }

    /// Preprocesses the graph in place.
    ///
    /// On return the graph contains only OR/AND gates (plus possibly a NULL
    /// or constant-state root), no constants, and tagged modules.
    pub fn process(&mut self) {
        assert!(self.graph.root().borrow().parents().is_empty());
        assert!(!self.graph.root().borrow().mark());
        self.graph.update_structure_flags();

        let time = Instant::now();
        debug!("Preprocessing Phase I...");
        self.phase_one();
        debug!("Finished Preprocessing Phase I in {:?}", time.elapsed());
        if self.check_root() {
            return;
        }

        let time = Instant::now();
        debug!("Preprocessing Phase II...");
        self.phase_two();
        debug!("Finished Preprocessing Phase II in {:?}", time.elapsed());
        if self.check_root() {
            return;
        }

        if !self.graph.normal() {
            let time = Instant::now();
            debug!("Preprocessing Phase III...");
            self.phase_three();
            debug!("Finished Preprocessing Phase III in {:?}", time.elapsed());
            self.graph.set_normal(true);
            if self.check_root() {
                return;
            }
        }

        if !self.graph.coherent() {
            let time = Instant::now();
            debug!("Preprocessing Phase IV...");
            self.phase_four();
            debug!("Finished Preprocessing Phase IV in {:?}", time.elapsed());
            if self.check_root() {
                return;
            }
        }

        let time = Instant::now();
        debug!("Preprocessing Phase V...");
        self.phase_five();
        debug!("Finished Preprocessing Phase V in {:?}", time.elapsed());

        self.check_root(); // Cleanup of a NULL or constant root.

        assert!(self.const_gates.is_empty());
        assert!(self.null_gates.is_empty());
        assert!(self.graph.normal());
        debug_assert!(self.graph.validate_links());
    }

    fn phase_one(&mut self) {
        if !self.graph.constants().is_empty() {
            trace!("Removing constants...");
            self.remove_constants();
            trace!("Constants are removed!");
        }
        if !self.graph.coherent() {
            trace!("Partial normalization of gates...");
            self.normalize_gates(false);
            trace!("Finished the partial normalization of gates!");
        }
        if !self.graph.null_gates().is_empty() {
            trace!("Removing NULL gates...");
            self.remove_null_gates();
            trace!("Finished cleaning NULL gates!");
        }
    }

    fn phase_two(&mut self) {
        let time = Instant::now();
        trace!("Detecting multiple definitions...");
        while self.process_multiple_definitions() {}
        trace!("Finished multi-definition detection in {:?}", time.elapsed());

        if self.check_root() {
            return;
        }

        trace!("Detecting modules...");
        self.detect_modules();
        trace!("Finished module detection!");

        let time = Instant::now();
        trace!("Merging common arguments...");
        self.merge_common_args();
        trace!("Finished merging common args in {:?}", time.elapsed());

        if self.graph.coherent() {
            let time = Instant::now();
            trace!("Boolean optimization...");
            self.boolean_optimization();
            trace!("Finished Boolean optimization in {:?}", time.elapsed());
        }

        if self.check_root() {
            return;
        }

        let time = Instant::now();
        trace!("Decomposition of common nodes...");
        self.decompose_common_nodes();
        trace!("Finished the decomposition in {:?}", time.elapsed());

        if self.check_root() {
            return;
        }

        trace!("Processing distributivity...");
        self.graph.clear_gate_marks();
        let root = self.graph.root().clone();
        self.detect_distributivity(&root);
        self.clear_const_gates();
        self.clear_null_gates();
        trace!("Distributivity detection is done!");

        trace!("Coalescing gates...");
        self.coalesce_gates(false);
        trace!("Gate coalescence is done!");

        if self.check_root() {
            return;
        }

        trace!("Detecting modules...");
        self.detect_modules();
        trace!("Finished module detection!");
    }

    fn phase_three(&mut self) {
        assert!(!self.graph.normal());
        trace!("Full normalization of gates...");
        self.normalize_gates(true);
        trace!("Finished the full normalization of gates!");

        if self.check_root() {
            return;
        }
        self.phase_two();
    }

    fn phase_four(&mut self) {
        assert!(!self.graph.coherent());
        trace!("Propagating complements...");
        if self.root_sign < 0 {
            let root = self.graph.root().clone();
            let op = root.borrow().op();
            assert!(matches!(op, Operator::Or | Operator::And | Operator::Null));
            match op {
                Operator::Or => root.borrow_mut().set_op(Operator::And),
                Operator::And => root.borrow_mut().set_op(Operator::Or),
                _ => {}
            }
            root.borrow_mut().invert_args();
            self.root_sign = 1;
        }
        let mut complements: HashMap<i32, GatePtr> = HashMap::new();
        self.graph.clear_gate_marks();
        let root = self.graph.root().clone();
        self.propagate_complements(&root, &mut complements);
        drop(complements);
        trace!("Complement propagation is done!");

        if self.check_root() {
            return;
        }
        self.phase_two();
    }

    fn phase_five(&mut self) {
        trace!("Coalescing gates...");
        self.coalesce_gates(true);
        trace!("Gate coalescence is done!");

        if self.check_root() {
            return;
        }
        self.phase_two();
        if self.check_root() {
            return;
        }

        trace!("Coalescing gates...");
        self.coalesce_gates(true);
        trace!("Gate coalescence is done!");
    }

    /// Coalesces same-kind gates until no more constants appear.
    ///
    /// In common (layered) mode shared children are merged as well.
    fn coalesce_gates(&mut self, common: bool) {
        let mut changed = true;
        while changed {
            assert!(self.const_gates.is_empty());
            assert!(self.null_gates.is_empty());

            changed = false;
            self.graph.clear_gate_marks();
            if self.graph.root().borrow().state() == State::Normal {
                let root = self.graph.root().clone();
                self.join_gates(&root, common); // Registers constant gates.
            }

            if !self.const_gates.is_empty() {
                self.clear_const_gates();
                changed = true;
            }
        }
    }

    /// Inspects the root for the terminal special cases.
    ///
    /// Returns true if no further processing is possible: the root has
    /// collapsed into a constant, or it is a NULL wrapper over a single
    /// variable. A NULL root over a gate is unwrapped with the edge sign
    /// folded into the root sign.
    fn check_root(&mut self) -> bool {
        let root = self.graph.root().clone();
        if root.borrow().state() != State::Normal {
            // The root gate has become constant.
            if self.root_sign < 0 {
                let orig_state = root.borrow().state();
                drop(root);
                let new_root = self.graph.new_gate(Operator::Null);
                match orig_state {
                    State::Null => new_root.make_unity(),
                    State::Unity => new_root.nullify(),
                    State::Normal => unreachable!(),
                }
                self.graph.set_root(new_root);
                self.root_sign = 1;
            }
            return true;
        }
        if root.borrow().op() == Operator::Null {
            // Special case of preprocessing.
            assert_eq!(root.borrow().num_args(), 1);
            let gate_child: Option<(i32, GatePtr)> = {
                let r = root.borrow();
                r.gate_args().iter().next().map(|(&arg, child)| (arg, child.clone()))
            };
            if let Some((signed_index, child)) = gate_child {
                self.graph.set_root(child.clone());
                drop(root); // Destroys the previous root.
                assert!(child.borrow().parents().is_empty());
                self.root_sign *= if signed_index > 0 { 1 } else { -1 };
            } else {
                assert_eq!(root.borrow().variable_args().len(), 1);
                if self.root_sign < 0 {
                    root.borrow_mut().invert_args();
                }
                self.root_sign = 1;
                return true; // Only one variable argument.
            }
        }
        false
    }

    /// Removes the NULL gates registered by the model builder.
    ///
    /// A single NULL gate that is the root itself is left for
    /// [`check_root`][Self::check_root].
    fn remove_null_gates(&mut self) {
        assert!(self.null_gates.is_empty());
        assert!(!self.graph.null_gates().is_empty());
        self.null_gates = self.graph.take_null_gates();

        let root = self.graph.root().clone();
        if self.null_gates.len() == 1 {
            if let Some(gate) = self.null_gates[0].upgrade() {
                if Rc::ptr_eq(&gate, &root) {
                    self.null_gates.clear();
                    return;
                }
            }
        }

        self.clear_null_gates();
        assert!(self.null_gates.is_empty());
    }

    /// Dissolves all registered constants into the states of their parents.
    fn remove_constants(&mut self) {
        assert!(self.const_gates.is_empty());
        assert!(!self.graph.constants().is_empty());
        for weak in self.graph.take_constants() {
            if let Some(constant) = weak.upgrade() {
                self.propagate_constant(&constant);
                drop(constant);
                debug_assert!(weak.upgrade().is_none());
            }
        }
        assert!(self.const_gates.is_empty());
    }

    /// Walks the parents of a constant, absorbing its value one by one.
    fn propagate_constant(&mut self, constant: &crate::node::ConstantPtr) {
        while let Some(parent) = first_parent(constant) {
            let index = constant.borrow().index();
            let sign = if parent.borrow().args().contains(&index) { 1 } else { -1 };
            let state = constant.borrow().state();
            self.process_constant_arg(&parent, sign * index, state);

            if parent.borrow().state() != State::Normal {
                self.propagate_const_gate(&parent);
            } else if parent.borrow().op() == Operator::Null {
                self.propagate_null_gate(&parent);
            }
        }
    }

    /// Absorbs a constant-valued argument into the gate.
    ///
    /// The sign of the argument is applied to the value first.
    fn process_constant_arg(&mut self, gate: &GatePtr, arg: i32, state: bool) {
        let state = if arg < 0 { !state } else { state };
        if state {
            self.process_true_arg(gate, arg);
        } else {
            self.process_false_arg(gate, arg);
        }
    }

    fn process_true_arg(&mut self, gate: &GatePtr, arg: i32) {
        let op = gate.borrow().op();
        match op {
            Operator::Null | Operator::Or => gate.make_unity(),
            Operator::Nand | Operator::And => self.remove_constant_arg(gate, arg),
            Operator::Nor | Operator::Not => gate.nullify(),
            Operator::Xor => {
                // Special handling due to the internal negation.
                assert_eq!(gate.borrow().num_args(), 2);
                gate.erase_arg(arg);
                assert_eq!(gate.borrow().num_args(), 1);
                gate.borrow_mut().set_op(Operator::Not);
            }
            Operator::Atleast => {
                // (K - 1) / (N - 1).
                assert!(gate.borrow().num_args() > 2);
                gate.erase_arg(arg);
                let mut g = gate.borrow_mut();
                let vote = g.vote_number() - 1;
                g.set_vote_number(vote);
                if vote == 1 {
                    g.set_op(Operator::Or);
                }
            }
        }
    }

    fn process_false_arg(&mut self, gate: &GatePtr, arg: i32) {
        let op = gate.borrow().op();
        match op {
            Operator::Nor | Operator::Xor | Operator::Or => self.remove_constant_arg(gate, arg),
            Operator::Null | Operator::And => gate.nullify(),
            Operator::Nand | Operator::Not => gate.make_unity(),
            Operator::Atleast => {
                // K / (N - 1).
                assert!(gate.borrow().num_args() > 2);
                gate.erase_arg(arg);
                let mut g = gate.borrow_mut();
                if g.vote_number() == g.num_args() as i32 {
                    g.set_op(Operator::And);
                }
            }
        }
    }

    /// Erases a neutral constant argument and degrades the gate if only one
    /// argument remains.
    fn remove_constant_arg(&mut self, gate: &GatePtr, arg: i32) {
        assert!(gate.borrow().num_args() > 1, "One-argument gates must have become constant");
        gate.erase_arg(arg);
        if gate.borrow().num_args() == 1 {
            let op = gate.borrow().op();
            match op {
                Operator::Xor | Operator::Or | Operator::And => {
                    gate.borrow_mut().set_op(Operator::Null)
                }
                Operator::Nor | Operator::Nand => gate.borrow_mut().set_op(Operator::Not),
                _ => unreachable!("Other one-argument gates must not happen"),
            }
        }
    }

    /// Propagates a constant-state gate into its parents and detaches it.
    fn propagate_const_gate(&mut self, gate: &GatePtr) {
        assert_ne!(gate.borrow().state(), State::Normal);

        while let Some(parent) = first_parent(gate) {
            let index = gate.borrow().index();
            let sign = if parent.borrow().args().contains(&index) { 1 } else { -1 };
            let state = gate.borrow().state() == State::Unity;
            self.process_constant_arg(&parent, sign * index, state);

            if parent.borrow().state() != State::Normal {
                self.propagate_const_gate(&parent);
            } else if parent.borrow().op() == Operator::Null {
                self.propagate_null_gate(&parent);
            }
        }
    }

    /// Splices a NULL gate out: every parent re-references the single
    /// argument with the signs multiplied.
    fn propagate_null_gate(&mut self, gate: &GatePtr) {
        assert_eq!(gate.borrow().op(), Operator::Null);

        while let Some(parent) = first_parent(gate) {
            let index = gate.borrow().index();
            let sign = if parent.borrow().args().contains(&index) { 1 } else { -1 };
            parent.join_null_gate(sign * index);

            if parent.borrow().state() != State::Normal {
                self.propagate_const_gate(&parent);
            } else if parent.borrow().op() == Operator::Null {
                self.propagate_null_gate(&parent);
            }
        }
    }

    /// Drains the constant-gate worklist.
    fn clear_const_gates(&mut self) {
        self.graph.clear_gate_marks(); // New gates may be created without marks.
        for weak in std::mem::take(&mut self.const_gates) {
            if let Some(gate) = weak.upgrade() {
                self.propagate_const_gate(&gate);
            }
        }
    }

    /// Drains the NULL-gate worklist.
    fn clear_null_gates(&mut self) {
        self.graph.clear_gate_marks(); // New gates may be created without marks.
        for weak in std::mem::take(&mut self.null_gates) {
            if let Some(gate) = weak.upgrade() {
                self.propagate_null_gate(&gate);
            }
        }
    }

    /// Rewrites gate kinds into the restricted normal set.
    ///
    /// Partial normalization (`full == false`) only pushes negations into
    /// edge signs: NOT becomes NULL, NOR/NAND become OR/AND. Full
    /// normalization additionally expands XOR and ATLEAST. The root's own
    /// negativity is absorbed into the root sign.
    ///
    /// Consumes gate marks; registers NULL gates.
    fn normalize_gates(&mut self, full: bool) {
        assert!(self.const_gates.is_empty());
        assert!(self.null_gates.is_empty());
        // Handle the special case of the root gate.
        let root = self.graph.root().clone();
        match root.borrow().op() {
            Operator::Nor | Operator::Nand | Operator::Not => self.root_sign = -self.root_sign,
            _ => {}
        }
        // Note that the root's negative gate is processed above.
        self.graph.clear_gate_marks();
        self.notify_parents_of_negative_gates(&root);

        self.graph.clear_gate_marks();
        self.normalize_gate(&root, full); // Registers NULL gates only.

        assert!(self.const_gates.is_empty());
        self.clear_null_gates();
    }

    /// Flips the edge sign of every argument gate of a negative kind, depth
    /// first. The kinds themselves are rewritten in
    /// [`normalize_gate`][Self::normalize_gate].
    fn notify_parents_of_negative_gates(&mut self, gate: &GatePtr) {
        if gate.borrow().mark() {
            return;
        }
        gate.borrow_mut().set_mark(true);
        let mut to_negate: Vec<i32> = Vec::new();
        for (arg, child) in gate_arg_snapshot(gate) {
            self.notify_parents_of_negative_gates(&child);
            match child.borrow().op() {
                Operator::Nor | Operator::Nand | Operator::Not => to_negate.push(arg),
                _ => {}
            }
        }
        for arg in to_negate {
            gate.borrow_mut().invert_arg(arg); // Does not produce constants or duplicates.
        }
    }

    fn normalize_gate(&mut self, gate: &GatePtr, full: bool) {
        if gate.borrow().mark() {
            return;
        }
        gate.borrow_mut().set_mark(true);
        assert_eq!(gate.borrow().state(), State::Normal);
        assert!(!gate.borrow().args().is_empty());
        // Depth-first traversal before the arguments may get changed.
        for (_, child) in gate_arg_snapshot(gate) {
            self.normalize_gate(&child, full);
        }

        let op = gate.borrow().op();
        match op {
            // Negation is already pushed into the edge signs.
            Operator::Not => {
                assert_eq!(gate.borrow().num_args(), 1);
                gate.borrow_mut().set_op(Operator::Null);
                self.null_gates.push(Rc::downgrade(gate)); // Register for removal.
            }
            Operator::Nor | Operator::Or => {
                assert!(gate.borrow().num_args() > 1);
                gate.borrow_mut().set_op(Operator::Or);
            }
            Operator::Nand | Operator::And => {
                assert!(gate.borrow().num_args() > 1);
                gate.borrow_mut().set_op(Operator::And);
            }
            Operator::Xor => {
                assert_eq!(gate.borrow().num_args(), 2);
                if full {
                    self.normalize_xor_gate(gate);
                }
            }
            Operator::Atleast => {
                assert!(gate.borrow().num_args() > 2);
                assert!(gate.borrow().vote_number() > 1);
                if full {
                    self.normalize_atleast_gate(gate);
                }
            }
            Operator::Null => {
                self.null_gates.push(Rc::downgrade(gate)); // Register for removal.
            }
        }
    }

    /// `XOR(a, b)` becomes `OR(AND(a, ¬b), AND(¬a, b))`.
    fn normalize_xor_gate(&mut self, gate: &GatePtr) {
        assert_eq!(gate.borrow().num_args(), 2);
        let gate_one = Gate::shared(Operator::And);
        let gate_two = Gate::shared(Operator::And);
        gate_one.borrow_mut().set_mark(true);
        gate_two.borrow_mut().set_mark(true);

        gate.borrow_mut().set_op(Operator::Or);
        let args: Vec<i32> = gate.borrow().args().iter().copied().collect();
        let (first, second) = (args[0], args[1]);

        gate.share_arg(first, &gate_one);
        gate.share_arg(first, &gate_two);
        gate_two.borrow_mut().invert_arg(first);

        gate.share_arg(second, &gate_one);
        gate_one.borrow_mut().invert_arg(second);
        gate.share_arg(second, &gate_two);

        gate.erase_all_args();
        let one_index = gate_one.borrow().index();
        gate.add_gate_arg(one_index, &gate_one);
        let two_index = gate_two.borrow().index();
        gate.add_gate_arg(two_index, &gate_two);
    }

    /// Expands an ATLEAST gate recursively:
    ///
    /// ```text
    /// ATLEAST(k; x1, …, xn) == OR(AND(x1, ATLEAST(k-1; x2..xn)),
    ///                             ATLEAST(k; x2..xn))
    /// ```
    ///
    /// with `k == 1` as OR and `k == n` as AND base cases.
    fn normalize_atleast_gate(&mut self, gate: &GatePtr) {
        assert_eq!(gate.borrow().op(), Operator::Atleast);
        let vote = gate.borrow().vote_number();

        assert!(vote > 0); // The vote number may be 1 for degraded gates.
        assert!(gate.borrow().num_args() > 1);
        if gate.borrow().num_args() as i32 == vote {
            gate.borrow_mut().set_op(Operator::And);
            return;
        }
        if vote == 1 {
            gate.borrow_mut().set_op(Operator::Or);
            return;
        }

        let args: Vec<i32> = gate.borrow().args().iter().copied().collect();
        let first_index = args[0];

        let first_arg = Gate::shared(Operator::And);
        gate.share_arg(first_index, &first_arg);

        let grand_arg = Gate::shared(Operator::Atleast);
        grand_arg.borrow_mut().set_vote_number(vote - 1);
        let grand_index = grand_arg.borrow().index();
        first_arg.add_gate_arg(grand_index, &grand_arg);

        let second_arg = Gate::shared(Operator::Atleast);
        second_arg.borrow_mut().set_vote_number(vote);

        for &arg in &args[1..] {
            gate.share_arg(arg, &grand_arg);
            gate.share_arg(arg, &second_arg);
        }

        first_arg.borrow_mut().set_mark(true);
        second_arg.borrow_mut().set_mark(true);
        grand_arg.borrow_mut().set_mark(true);

        gate.borrow_mut().set_op(Operator::Or);
        gate.erase_all_args();
        let first_gate_index = first_arg.borrow().index();
        gate.add_gate_arg(first_gate_index, &first_arg);
        let second_gate_index = second_arg.borrow().index();
        gate.add_gate_arg(second_gate_index, &second_arg);

        self.normalize_atleast_gate(&grand_arg);
        self.normalize_atleast_gate(&second_arg);
    }

    /// Pushes complements of argument gates down to variables.
    ///
    /// A complemented gate argument is replaced by a positive gate of the
    /// dual kind with inverted arguments. Single-parent gates are dualized
    /// in place; shared gates are cloned, memoized per original in
    /// `complements`. Works on fully normalized graphs (AND/OR only).
    ///
    /// Consumes gate marks.
    fn propagate_complements(&mut self, gate: &GatePtr, complements: &mut HashMap<i32, GatePtr>) {
        if gate.borrow().mark() {
            return;
        }
        gate.borrow_mut().set_mark(true);
        let mut to_swap: Vec<i32> = Vec::new(); // Arguments with negation to be swapped.
        for (arg, child) in gate_arg_snapshot(gate) {
            if arg < 0 {
                to_swap.push(arg);
                let child_index = child.borrow().index();
                if complements.contains_key(&child_index) {
                    continue;
                }
                let op = child.borrow().op();
                assert!(op == Operator::And || op == Operator::Or);
                let complement_op =
                    if op == Operator::Or { Operator::And } else { Operator::Or };
                let complement = if child.borrow().parents().len() == 1 {
                    // Reuse the gate in place.
                    child.borrow_mut().set_op(complement_op);
                    child.borrow_mut().invert_args();
                    child.clone()
                } else {
                    let complement = child.clone_gate();
                    complement.borrow_mut().set_op(complement_op);
                    complement.borrow_mut().invert_args();
                    complement
                };
                complements.insert(child_index, complement.clone());
                self.propagate_complements(&complement, complements);
            } else {
                self.propagate_complements(&child, complements);
            }
        }

        for arg in to_swap {
            assert!(arg < 0);
            gate.erase_arg(arg);
            let complement = complements.get(&-arg).expect("Missing complement").clone();
            let complement_index = complement.borrow().index();
            gate.add_gate_arg(complement_index, &complement);
            assert_eq!(gate.borrow().state(), State::Normal); // No duplicates.
        }
    }

    /// Coalesces positive same-logic argument gates into their parents.
    ///
    /// Modules are preserved. In non-common mode only single-parent
    /// arguments are joined. Collapses are registered on the constant
    /// worklist. Consumes gate marks.
    fn join_gates(&mut self, gate: &GatePtr, common: bool) -> bool {
        if gate.borrow().mark() {
            return false;
        }
        gate.borrow_mut().set_mark(true);
        let target = match gate.borrow().op() {
            Operator::Nand | Operator::And => Some(Operator::And),
            Operator::Nor | Operator::Or => Some(Operator::Or),
            _ => None,
        };
        if target.is_some() {
            assert!(gate.borrow().num_args() > 1);
        }
        assert!(!gate.borrow().args().is_empty());
        let mut to_join: Vec<GatePtr> = Vec::new();
        let mut changed = false;
        for (arg, child) in gate_arg_snapshot(gate) {
            if self.join_gates(&child, common) {
                changed = true;
            }
            let Some(target) = target else { continue }; // Joining is impossible.
            if arg < 0 {
                continue; // Cannot join a negative argument gate.
            }
            if child.borrow().is_module() {
                continue; // Preserve modules.
            }
            if !common && child.borrow().parents().len() > 1 {
                continue;
            }
            if child.borrow().op() == target {
                to_join.push(child);
            }
        }

        for child in &to_join {
            gate.join_gate(child);
            changed = true;
            if gate.borrow().state() != State::Normal {
                self.const_gates.push(Rc::downgrade(gate)); // Register for processing.
                break; // The parent is constant. No need to join the rest.
            }
            assert!(gate.borrow().num_args() > 1); // Does not produce NULL gates.
        }
        changed
    }

    /// One round of multiple-definition detection and replacement.
    ///
    /// Gates with identical fingerprints (kind, vote, signed arguments) are
    /// merged into the first definition found. Returns true if the graph
    /// changed; callers loop until fixpoint because replacements can create
    /// new duplicates upstream. Consumes gate marks.
    fn process_multiple_definitions(&mut self) -> bool {
        assert!(self.null_gates.is_empty());
        assert!(self.const_gates.is_empty());

        self.graph.clear_gate_marks();
        // The original gate and its multiple definitions.
        let mut multi_def: Vec<(GatePtr, Vec<GateWeak>)> = Vec::new();
        let mut def_slots: HashMap<i32, usize> = HashMap::new();
        let mut unique_gates: HashMap<Fingerprint, GatePtr> = HashMap::new();
        let root = self.graph.root().clone();
        self.detect_multiple_definitions(&root, &mut multi_def, &mut def_slots, &mut unique_gates);
        drop(unique_gates); // Removes the extra reference counts.
        self.graph.clear_gate_marks();

        if multi_def.is_empty() {
            return false;
        }
        trace!("{} gates are multiply defined", multi_def.len());
        for (original, duplicates) in &multi_def {
            trace!("Gate {}: {} times", original.borrow().index(), duplicates.len());
            for duplicate in duplicates {
                if let Some(duplicate) = duplicate.upgrade() {
                    self.replace_gate(&duplicate, original);
                }
            }
        }
        self.clear_const_gates();
        self.clear_null_gates();
        true
    }

    fn detect_multiple_definitions(
        &mut self,
        gate: &GatePtr,
        multi_def: &mut Vec<(GatePtr, Vec<GateWeak>)>,
        def_slots: &mut HashMap<i32, usize>,
        unique_gates: &mut HashMap<Fingerprint, GatePtr>,
    ) {
        if gate.borrow().mark() {
            return;
        }
        gate.borrow_mut().set_mark(true);
        assert_eq!(gate.borrow().state(), State::Normal);

        if !gate.borrow().is_module() {
            // Modules are unique by definition.
            let fingerprint = gate.borrow().fingerprint();
            match unique_gates.entry(fingerprint) {
                hashbrown::hash_map::Entry::Occupied(entry) => {
                    // The gate is a duplicate.
                    let original = entry.get().clone();
                    assert!(original.borrow().mark());
                    let slot = *def_slots.entry(original.borrow().index()).or_insert_with(|| {
                        multi_def.push((original.clone(), Vec::new()));
                        multi_def.len() - 1
                    });
                    multi_def[slot].1.push(Rc::downgrade(gate));
                    return;
                }
                hashbrown::hash_map::Entry::Vacant(entry) => {
                    entry.insert(gate.clone());
                }
            }
        }
        // No redefinition is found for this gate.
        for (_, child) in gate_arg_snapshot(gate) {
            self.detect_multiple_definitions(&child, multi_def, def_slots, unique_gates);
        }
    }

    /// Tags modules of the graph.
    ///
    /// Consumes node visit times and gate marks; stores subtree time ranges
    /// in the node min/max times.
    fn detect_modules(&mut self) {
        assert!(self.const_gates.is_empty());
        assert!(self.null_gates.is_empty());
        self.graph.clear_node_visits();

        trace!("Assigning timings to nodes...");
        let root = self.graph.root().clone();
        self.assign_timing(0, &root);
        trace!("Timings are assigned to nodes");

        self.graph.clear_gate_marks();
        self.find_modules(&root);

        debug_assert!(!root.borrow().revisited());
        debug_assert_eq!(root.borrow().min_time(), 1);
        debug_assert_eq!(root.borrow().max_time(), root.borrow().exit_time());
    }

    /// Stamps enter and exit times depth first; variables enter and exit at
    /// the same time.
    fn assign_timing(&mut self, mut time: i32, gate: &GatePtr) -> i32 {
        time += 1;
        if gate.borrow_mut().visit(time) {
            return time; // Revisited gate.
        }
        assert!(gate.borrow().constant_args().is_empty());

        for (_, child) in gate_arg_snapshot(gate) {
            time = self.assign_timing(time, &child);
        }
        for (_, var) in variable_arg_snapshot(gate) {
            time += 1;
            var.borrow_mut().visit(time); // Enter the leaf.
            var.borrow_mut().visit(time); // Exit at the same time.
        }
        time += 1;
        let revisited = gate.borrow_mut().visit(time); // Exiting the gate.
        assert!(!revisited, "Cyclic graph"); // No cyclic visiting.
        time
    }

    /// Post-order module discovery over the timed graph.
    ///
    /// A gate is a module iff every reachable descendant's visit range lies
    /// strictly within the gate's enter and exit times. For AND/OR kinds the
    /// arguments are additionally regrouped into synthesized sub-modules.
    fn find_modules(&mut self, gate: &GatePtr) {
        if gate.borrow().mark() {
            return;
        }
        gate.borrow_mut().set_mark(true);
        let enter_time = gate.borrow().enter_time();
        let exit_time = gate.borrow().exit_time();
        let mut min_time = enter_time;
        let mut max_time = exit_time;

        let mut non_shared_args: Vec<(i32, NodeRef)> = Vec::new();
        let mut modular_args: Vec<(i32, NodeRef)> = Vec::new();
        let mut non_modular_args: Vec<(i32, NodeRef)> = Vec::new();

        for (arg, child) in gate_arg_snapshot(gate) {
            self.find_modules(&child);
            if child.borrow().is_module() && !child.borrow().revisited() {
                debug_assert_eq!(child.borrow().parents().len(), 1);
                debug_assert!(child.borrow().parents().contains_key(&gate.borrow().index()));
                // The sub-graph's visit times are within the enter and exit times.
                non_shared_args.push((arg, NodeRef::Gate(child)));
                continue;
            }
            let min = child.borrow().min_time();
            let max = child.borrow().max_time();
            assert!(min > 0);
            assert!(max > 0);
            assert!(max > min);
            if min > enter_time && max < exit_time {
                modular_args.push((arg, NodeRef::Gate(child)));
            } else {
                non_modular_args.push((arg, NodeRef::Gate(child)));
            }
            min_time = min_time.min(min);
            max_time = max_time.max(max);
        }

        for (arg, var) in variable_arg_snapshot(gate) {
            let min = var.borrow().enter_time();
            let max = var.borrow().last_visit();
            assert!(min > 0);
            assert!(max > 0);
            var.borrow_mut().set_min_time(min);
            var.borrow_mut().set_max_time(max);
            if min == max {
                // The single-parent argument.
                assert!(min > enter_time && max < exit_time);
                debug_assert_eq!(var.borrow().parents().len(), 1);
                non_shared_args.push((arg, NodeRef::Variable(var)));
                continue;
            }
            assert!(max > min);
            if min > enter_time && max < exit_time {
                modular_args.push((arg, NodeRef::Variable(var)));
            } else {
                non_modular_args.push((arg, NodeRef::Variable(var)));
            }
            min_time = min_time.min(min);
            max_time = max_time.max(max);
        }

        // Determine if this gate is a module itself.
        if !gate.borrow().is_module() && min_time == enter_time && max_time == exit_time {
            trace!("Found original module: {}", gate.borrow().index());
            debug_assert!(non_modular_args.is_empty());
            gate.borrow_mut().turn_module();
        }

        max_time = max_time.max(gate.borrow().last_visit());
        gate.borrow_mut().set_min_time(min_time);
        gate.borrow_mut().set_max_time(max_time);

        self.process_modular_args(gate, &non_shared_args, &mut modular_args, &mut non_modular_args);
    }

    /// Attempts to synthesize sub-modules from the classified arguments of
    /// AND/OR family gates.
    fn process_modular_args(
        &mut self,
        gate: &GatePtr,
        non_shared_args: &[(i32, NodeRef)],
        modular_args: &mut Vec<(i32, NodeRef)>,
        non_modular_args: &mut Vec<(i32, NodeRef)>,
    ) {
        assert_eq!(
            gate.borrow().num_args(),
            non_shared_args.len() + modular_args.len() + non_modular_args.len()
        );
        match gate.borrow().op() {
            Operator::Nor | Operator::Or | Operator::Nand | Operator::And => {}
            _ => return, // Cannot create sub-modules for other types.
        }
        self.create_new_module(gate, non_shared_args);

        Self::filter_modular_args(modular_args, non_modular_args);
        debug_assert_ne!(modular_args.len(), 1); // One modular arg is non-shared.
        let mut groups: Vec<Vec<(i32, NodeRef)>> = Vec::new();
        Self::group_modular_args(modular_args, &mut groups);
        self.create_new_modules(gate, modular_args, &groups);
    }

    /// Creates a new module gate of the parent's base kind holding the given
    /// arguments, when that forms a strict, non-trivial subset.
    fn create_new_module(&mut self, gate: &GatePtr, args: &[(i32, NodeRef)]) -> Option<GatePtr> {
        if args.is_empty() || args.len() == 1 {
            return None;
        }
        if args.len() == gate.borrow().num_args() {
            assert!(gate.borrow().is_module());
            return None;
        }
        assert!(args.len() < gate.borrow().num_args());
        let op = match gate.borrow().op() {
            Operator::Nand | Operator::And => Operator::And,
            Operator::Nor | Operator::Or => Operator::Or,
            _ => return None,
        };
        let module = Gate::shared(op);
        module.borrow_mut().turn_module();
        module.borrow_mut().set_mark(true);
        for (arg, _) in args {
            gate.transfer_arg(*arg, &module);
        }
        let module_index = module.borrow().index();
        gate.add_gate_arg(module_index, &module);
        assert!(gate.borrow().num_args() > 1);
        trace!(
            "Created a module for gate {}: gate {} with {} arguments",
            gate.borrow().index(),
            module_index,
            args.len()
        );
        Some(module)
    }

    /// Moves modular arguments that overlap non-modular ones into the
    /// non-modular set, repeating until a fixpoint.
    fn filter_modular_args(
        modular_args: &mut Vec<(i32, NodeRef)>,
        non_modular_args: &mut Vec<(i32, NodeRef)>,
    ) {
        if modular_args.is_empty() || non_modular_args.is_empty() {
            return;
        }
        let mut still_modular: Vec<(i32, NodeRef)> = Vec::new();
        let mut new_non_modular: Vec<(i32, NodeRef)> = Vec::new();
        for entry in modular_args.drain(..) {
            let min = entry.1.min_time();
            let max = entry.1.max_time();
            let overlaps = non_modular_args
                .iter()
                .any(|other| detect_overlap(min, max, other.1.min_time(), other.1.max_time()));
            if overlaps {
                new_non_modular.push(entry);
            } else {
                still_modular.push(entry);
            }
        }
        Self::filter_modular_args(&mut still_modular, &mut new_non_modular);
        *modular_args = still_modular;
        non_modular_args.append(&mut new_non_modular);
    }

    /// Clusters modular arguments into groups connected by visit-range
    /// overlap.
    fn group_modular_args(
        modular_args: &[(i32, NodeRef)],
        groups: &mut Vec<Vec<(i32, NodeRef)>>,
    ) {
        if modular_args.is_empty() {
            return;
        }
        assert!(modular_args.len() > 1);
        assert!(groups.is_empty());
        let mut members: VecDeque<(i32, NodeRef)> = modular_args.iter().cloned().collect();
        while let Some(first) = members.pop_front() {
            let mut low = first.1.min_time();
            let mut high = first.1.max_time();
            let mut group = vec![first];

            let mut prev_size = 0;
            while prev_size < group.len() {
                prev_size = group.len();
                let mut i = 0;
                while i < members.len() {
                    let min = members[i].1.min_time();
                    let max = members[i].1.max_time();
                    if detect_overlap(min, max, low, high) {
                        low = low.min(min);
                        high = high.max(max);
                        group.push(members.remove(i).unwrap());
                    } else {
                        i += 1;
                    }
                }
            }
            assert!(group.len() > 1);
            groups.push(group);
        }
        trace!("Grouped modular args into {} group(s)", groups.len());
        assert!(!groups.is_empty());
    }

    /// Splits the modular arguments into a main sub-module and per-group
    /// sub-modules.
    fn create_new_modules(
        &mut self,
        gate: &GatePtr,
        modular_args: &[(i32, NodeRef)],
        groups: &[Vec<(i32, NodeRef)>],
    ) {
        if modular_args.is_empty() {
            return;
        }
        assert!(modular_args.len() > 1);
        assert!(!groups.is_empty());
        if modular_args.len() == gate.borrow().num_args() && groups.len() == 1 {
            assert!(gate.borrow().is_module());
            return;
        }
        let main_arg: GatePtr = if modular_args.len() == gate.borrow().num_args() {
            assert!(groups.len() > 1);
            assert!(gate.borrow().is_module());
            gate.clone()
        } else {
            self.create_new_module(gate, modular_args)
                .expect("Failed to create a module of modular arguments")
        };
        for group in groups {
            self.create_new_module(&main_arg, group);
        }
    }

    /// Merges common argument families of AND and then OR gates.
    ///
    /// Consumes node counts, gate marks, and optimization values; registers
    /// NULL gates.
    fn merge_common_args(&mut self) -> bool {
        assert!(self.null_gates.is_empty());
        assert!(self.const_gates.is_empty());
        let mut changed = false;

        trace!("Merging common arguments for AND gates...");
        if self.merge_common_args_for(Operator::And) {
            changed = true;
        }
        trace!("Finished merging for AND gates!");

        trace!("Merging common arguments for OR gates...");
        if self.merge_common_args_for(Operator::Or) {
            changed = true;
        }
        trace!("Finished merging for OR gates!");

        assert!(self.null_gates.is_empty());
        assert!(self.const_gates.is_empty());
        changed
    }

    fn merge_common_args_for(&mut self, op: Operator) -> bool {
        assert!(op == Operator::And || op == Operator::Or);
        self.graph.clear_node_counts();
        self.graph.clear_gate_marks();
        // Gather and group gates by their operators and common arguments.
        let root = self.graph.root().clone();
        self.mark_common_args(&root, op);
        self.graph.clear_gate_marks();
        let mut group: Vec<(GatePtr, Vec<i32>)> = Vec::new();
        self.gather_common_args(&root, op, &mut group);
        // Finding common parents for the common arguments.
        let mut parents: Collection = BTreeMap::new();
        Self::group_common_parents(2, &group, &mut parents);
        if parents.is_empty() {
            return false; // No candidates for merging.
        }

        trace!("Merging {} groups...", parents.len());
        // The common elements among the groups of common parents and common
        // arguments are the challenge: the smallest families are merged
        // first, and the supersets are rewritten in terms of the new gates.
        self.graph.clear_opti_values();
        let mut table: Vec<MergeOption> = parents.into_iter().collect();
        // Sorting in descending order for more efficient pop.
        table.sort_by(|lhs, rhs| rhs.0.len().cmp(&lhs.0.len()));
        while let Some((common_args, common_parents)) = table.pop() {
            let mut useful_parents: Vec<GatePtr> = Vec::new(); // With the full set of args.
            for parent in common_parents.values() {
                if parent.borrow().opti_value() != 0 {
                    // A modified parent.
                    assert_eq!(parent.borrow().opti_value(), 1);
                    let have_args =
                        common_args.iter().all(|arg| parent.borrow().args().contains(arg));
                    if !have_args {
                        continue; // Erased or optimized common arguments.
                    }
                }
                useful_parents.push(parent.clone());
            }

            if useful_parents.len() < 2 {
                continue; // No point in merging the arguments.
            }
            trace!("Merging {} args into a new gate", common_args.len());
            let merge_gate = Gate::shared(op);
            for &index in &common_args {
                useful_parents[0].share_arg(index, &merge_gate);
                for parent in &useful_parents {
                    parent.erase_arg(index);
                }
            }
            let merge_index = merge_gate.borrow().index();
            for parent in &useful_parents {
                parent.add_gate_arg(merge_index, &merge_gate);
                parent.borrow_mut().set_opti_value(1); // Mark as processed.
                if parent.borrow().num_args() == 1 {
                    parent.borrow_mut().set_op(Operator::Null);
                    self.null_gates.push(Rc::downgrade(parent));
                }
                assert_eq!(parent.borrow().state(), State::Normal);
            }
            // Substitute the consumed arguments in the remaining supersets.
            for entry in table.iter_mut() {
                if entry.0.len() <= common_args.len() {
                    continue;
                }
                let superset =
                    common_args.iter().all(|arg| entry.0.binary_search(arg).is_ok());
                if !superset {
                    continue;
                }
                entry.0.retain(|arg| common_args.binary_search(arg).is_err());
                assert!(merge_index > *entry.0.last().unwrap()); // Sequential indexing.
                entry.0.push(merge_index);
            }
        }
        self.clear_null_gates();
        true
    }

    /// Counts, per node, the op-parent references of each polarity.
    ///
    /// Consumes gate marks and node counts.
    fn mark_common_args(&mut self, gate: &GatePtr, op: Operator) {
        if gate.borrow().mark() {
            return;
        }
        gate.borrow_mut().set_mark(true);

        let in_group = gate.borrow().op() == op;

        for (arg, child) in gate_arg_snapshot(gate) {
            assert_eq!(child.borrow().state(), State::Normal);
            self.mark_common_args(&child, op);
            if in_group {
                child.borrow_mut().add_count(arg > 0);
            }
        }

        if !in_group {
            return; // No need to visit the leaf variables.
        }
        for (arg, var) in variable_arg_snapshot(gate) {
            var.borrow_mut().add_count(arg > 0);
        }
        assert!(gate.borrow().constant_args().is_empty());
    }

    /// Collects, per op-gate, the sorted arguments referenced by two or more
    /// op-parents of the same polarity.
    fn gather_common_args(
        &mut self,
        gate: &GatePtr,
        op: Operator,
        group: &mut Vec<(GatePtr, Vec<i32>)>,
    ) {
        if gate.borrow().mark() {
            return;
        }
        gate.borrow_mut().set_mark(true);

        let in_group = gate.borrow().op() == op;

        let mut common_args: Vec<i32> = Vec::new();
        for (arg, child) in gate_arg_snapshot(gate) {
            assert_eq!(child.borrow().state(), State::Normal);
            self.gather_common_args(&child, op, group);
            if !in_group {
                continue;
            }
            let count =
                if arg > 0 { child.borrow().pos_count() } else { child.borrow().neg_count() };
            if count > 1 {
                common_args.push(arg);
            }
        }

        if !in_group {
            return;
        }
        for (arg, var) in variable_arg_snapshot(gate) {
            let count = if arg > 0 { var.borrow().pos_count() } else { var.borrow().neg_count() };
            if count > 1 {
                common_args.push(arg);
            }
        }
        assert!(gate.borrow().constant_args().is_empty());

        if common_args.len() < 2 {
            return; // Can't be merged anyway.
        }
        common_args.sort_unstable();
        group.push((gate.clone(), common_args));
    }

    /// Pairwise-intersects the argument families and keys the collection by
    /// the intersections of at least `num_common_args` arguments.
    fn group_common_parents(
        num_common_args: usize,
        group: &[(GatePtr, Vec<i32>)],
        parents: &mut Collection,
    ) {
        for i in 0..group.len() {
            let args_i = &group[i].1;
            assert!(args_i.len() > 1);
            for j in (i + 1)..group.len() {
                let args_j = &group[j].1;
                assert!(args_j.len() > 1);

                let common = intersect_sorted(args_i, args_j);
                if common.len() < num_common_args {
                    continue; // Doesn't satisfy the threshold.
                }
                let common_parents = parents.entry(common).or_default();
                common_parents.insert(group[i].0.borrow().index(), group[i].0.clone());
                common_parents.insert(group[j].0.borrow().index(), group[j].0.clone());
            }
        }
    }

    /// Finds factoring opportunities below AND/NAND (over OR children) and
    /// OR/NOR (over AND children) gates, depth first.
    ///
    /// Consumes gate marks; registers constant and NULL gates.
    fn detect_distributivity(&mut self, gate: &GatePtr) -> bool {
        if gate.borrow().mark() {
            return false;
        }
        gate.borrow_mut().set_mark(true);
        assert_eq!(gate.borrow().state(), State::Normal);
        let distr_op = match gate.borrow().op() {
            Operator::And | Operator::Nand => Some(Operator::Or),
            Operator::Or | Operator::Nor => Some(Operator::And),
            _ => None,
        };
        let mut changed = false;
        let mut candidates: Vec<GatePtr> = Vec::new();
        // Collect child gates of the distributivity type.
        for (arg, child) in gate_arg_snapshot(gate) {
            if self.detect_distributivity(&child) {
                changed = true;
            }
            let Some(distr_op) = distr_op else { continue };
            if arg < 0 {
                continue; // Does not work on negation.
            }
            if child.borrow().state() != State::Normal {
                continue; // No arguments.
            }
            if child.borrow().is_module() {
                continue; // Can't have common arguments.
            }
            if child.borrow().op() == distr_op {
                candidates.push(child);
            }
        }
        if let Some(distr_op) = distr_op {
            if self.handle_distributive_args(gate, distr_op, &candidates) {
                changed = true;
            }
        }
        changed
    }

    /// Groups the candidates by shared sub-arguments and factors each group.
    fn handle_distributive_args(
        &mut self,
        gate: &GatePtr,
        distr_op: Operator,
        candidates: &[GatePtr],
    ) -> bool {
        if candidates.len() < 2 {
            return false;
        }
        // The problem is similar to merging common arguments of gates.
        let group: Vec<(GatePtr, Vec<i32>)> = candidates
            .iter()
            .map(|candidate| {
                (candidate.clone(), candidate.borrow().args().iter().copied().collect())
            })
            .collect();
        trace!("Considering {} candidates...", group.len());
        let mut options: Collection = BTreeMap::new();
        Self::group_common_parents(1, &group, &mut options);
        if options.is_empty() {
            return false;
        }
        trace!("Got {} distributive option(s)", options.len());

        let mut table: Vec<MergeGroup> = Vec::new();
        Self::group_distributive_args(options, &mut table);
        assert!(!table.is_empty());
        trace!("Found {} distributive group(s)", table.len());
        // Sanitize the groups to have only single-parent candidates.
        for merge_group in table.iter_mut() {
            let base_members: Vec<GatePtr> = merge_group[0].1.values().cloned().collect();
            let mut to_swap: Vec<(GatePtr, GatePtr)> = Vec::new();
            for member in &base_members {
                assert!(!member.borrow().parents().is_empty());
                if member.borrow().parents().len() > 1 {
                    let clone = member.clone_gate();
                    clone.borrow_mut().set_mark(true);
                    to_swap.push((member.clone(), clone));
                }
            }
            for (member, clone) in &to_swap {
                let member_index = member.borrow().index();
                gate.erase_arg(member_index);
                let clone_index = clone.borrow().index();
                gate.add_gate_arg(clone_index, clone);
                for option in merge_group.iter_mut() {
                    if option.1.remove(&member_index).is_some() {
                        option.1.insert(clone_index, clone.clone());
                    }
                }
            }
        }

        for merge_group in table.iter_mut() {
            self.transform_distributive_args(gate, distr_op, merge_group);
        }
        assert!(!gate.borrow().args().is_empty());
        true
    }

    /// Selects the best subset-to-superset chains of options and isolates
    /// them into merge groups.
    fn group_distributive_args(options: Collection, groups: &mut Vec<MergeGroup>) {
        assert!(!options.is_empty());
        let mut all_options: Vec<MergeOption> = options.into_iter().collect();
        // Sorting in ascending size of common arguments.
        all_options.sort_by_key(|option| option.0.len());

        while !all_options.is_empty() {
            let mut best_group: Vec<usize> = Vec::new();
            for i in 0..all_options.len() {
                let mut chain = vec![i];
                for j in (i + 1)..all_options.len() {
                    let last = &all_options[*chain.last().unwrap()];
                    let candidate = &all_options[j];
                    let superset = last.0.iter().all(|arg| candidate.0.binary_search(arg).is_ok());
                    if !superset {
                        continue; // Does not include all the arguments.
                    }
                    let parents_match = candidate.1.keys().all(|key| last.1.contains_key(key));
                    if !parents_match {
                        continue; // Parents do not match.
                    }
                    chain.push(j);
                }
                if chain.len() > best_group.len() {
                    // The more members, the merrier.
                    best_group = chain;
                } else if chain.len() == best_group.len()
                    && all_options[chain[0]].1.len() < all_options[best_group[0]].1.len()
                {
                    // The fewer parents, the more room for others.
                    best_group = chain;
                }
            }
            let mut merge_group: MergeGroup = Vec::new();
            for &i in &best_group {
                merge_group.push((all_options[i].0.clone(), all_options[i].1.clone()));
                all_options[i].1.clear(); // Removes the best group from the options.
            }
            let base_parents: Vec<i32> = merge_group[0].1.keys().copied().collect();
            groups.push(merge_group);

            for option in all_options.iter_mut() {
                for key in &base_parents {
                    option.1.remove(key);
                }
            }
            all_options.retain(|option| option.1.len() > 1);
        }
    }

    /// Factors the common part out of one option chain:
    ///
    /// ```text
    /// AND(OR(a, x), OR(a, y)) => OR(a, AND(OR(x), OR(y)))
    /// ```
    ///
    /// then recurses into the sub-gate with the remaining chain.
    fn transform_distributive_args(
        &mut self,
        gate: &GatePtr,
        distr_op: Operator,
        group: &mut MergeGroup,
    ) {
        if group.is_empty() {
            return;
        }
        let (args, gates) = group.remove(0);

        let new_parent: GatePtr = if gate.borrow().num_args() == gates.len() {
            // Reuse the gate to avoid extra merging operations.
            let op = gate.borrow().op();
            match op {
                Operator::And | Operator::Or => gate.borrow_mut().set_op(distr_op),
                Operator::Nand => gate.borrow_mut().set_op(Operator::Nor),
                Operator::Nor => gate.borrow_mut().set_op(Operator::Nand),
                _ => unreachable!(),
            }
            gate.clone()
        } else {
            let new_parent = Gate::shared(distr_op);
            new_parent.borrow_mut().set_mark(true);
            let new_parent_index = new_parent.borrow().index();
            gate.add_gate_arg(new_parent_index, &new_parent);
            new_parent
        };

        let sub_parent = Gate::shared(if distr_op == Operator::And {
            Operator::Or
        } else {
            Operator::And
        });
        sub_parent.borrow_mut().set_mark(true);
        let sub_parent_index = sub_parent.borrow().index();
        new_parent.add_gate_arg(sub_parent_index, &sub_parent);

        // The common part of the distributive equation.
        let representative = gates.values().next().unwrap().clone();
        for &index in &args {
            // The argument may be negative.
            let node = representative.arg_node(index);
            new_parent.add_arg(index, &node);
        }

        // Removing the common part from the sub-equations.
        for member in gates.values() {
            debug_assert_eq!(member.borrow().parents().len(), 1);
            let member_index = member.borrow().index();
            gate.erase_arg(member_index);

            sub_parent.add_gate_arg(member_index, member);
            for &index in &args {
                member.erase_arg(index);
            }
            if member.borrow().num_args() == 1 {
                member.borrow_mut().set_op(Operator::Null);
                self.null_gates.push(Rc::downgrade(member));
            } else if member.borrow().num_args() == 0 {
                if member.borrow().op() == Operator::And {
                    member.make_unity();
                } else {
                    assert_eq!(member.borrow().op(), Operator::Or);
                    member.nullify();
                }
                self.const_gates.push(Rc::downgrade(member));
            }
        }
        // Cleaning the consumed arguments from the remaining options.
        for option in group.iter_mut() {
            for index in &args {
                let position =
                    option.0.binary_search(index).expect("Superset option lost an argument");
                option.0.remove(position);
            }
        }
        self.transform_distributive_args(&sub_parent, distr_op, group);
    }

    /// Redundancy analysis of shared nodes in coherent graphs.
    ///
    /// Consumes node visits, gate marks, and optimization values.
    fn boolean_optimization(&mut self) {
        assert!(self.const_gates.is_empty());
        assert!(self.null_gates.is_empty());
        self.graph.clear_node_visits();
        self.graph.clear_gate_marks();

        let mut common_gates: Vec<GateWeak> = Vec::new();
        let mut common_variables: Vec<Weak<RefCell<Variable>>> = Vec::new();
        self.gather_common_nodes(&mut common_gates, &mut common_variables);

        for weak in &common_gates {
            if let Some(gate) = weak.upgrade() {
                self.process_common_node(&NodeRef::Gate(gate));
            }
        }
        for weak in &common_variables {
            if let Some(var) = weak.upgrade() {
                self.process_common_node(&NodeRef::Variable(var));
            }
        }
    }

    /// Collects nodes with more than one parent, breadth first from the
    /// root. Consumes node visit times as markers.
    fn gather_common_nodes(
        &mut self,
        common_gates: &mut Vec<GateWeak>,
        common_variables: &mut Vec<Weak<RefCell<Variable>>>,
    ) {
        let mut queue: VecDeque<GatePtr> = VecDeque::new();
        queue.push_back(self.graph.root().clone());
        while let Some(gate) = queue.pop_front() {
            for (_, child) in gate_arg_snapshot(&gate) {
                assert_eq!(child.borrow().state(), State::Normal);
                if child.borrow().visited() {
                    continue;
                }
                child.borrow_mut().visit(1);
                if child.borrow().parents().len() > 1 {
                    common_gates.push(Rc::downgrade(&child));
                }
                queue.push_back(child);
            }
            for (_, var) in variable_arg_snapshot(&gate) {
                if var.borrow().visited() {
                    continue;
                }
                var.borrow_mut().visit(1);
                if var.borrow().parents().len() > 1 {
                    common_variables.push(Rc::downgrade(&var));
                }
            }
        }
    }

    /// Analyzes one shared node for redundant parents.
    ///
    /// The node is assumed failed; the failure is propagated upward, the
    /// failure destinations are collected from the root, and parents that
    /// do not feed any destination see the node as constant false, while
    /// every destination absorbs the node through an OR.
    fn process_common_node(&mut self, node: &NodeRef) {
        assert!(self.const_gates.is_empty());
        assert!(self.null_gates.is_empty());

        if node.num_parents() == 1 {
            return; // The parent is deleted.
        }

        let root = self.graph.root().clone();
        self.graph.clear_opti_values();

        assert_eq!(node.opti_value(), 0);
        node.set_opti_value(1);
        let mut mult_tot = node.num_parents() as i32; // Total multiplicity.
        assert!(mult_tot > 1);
        mult_tot += self.propagate_failure(node);

        // The results of the failure propagation.
        let mut destinations: BTreeMap<i32, GateWeak> = BTreeMap::new();
        let num_dest; // Not the same as the size of destinations.
        if root.borrow().opti_value() == 1 {
            // The root gate failed.
            destinations.insert(root.borrow().index(), Rc::downgrade(&root));
            num_dest = 1;
        } else {
            assert_eq!(root.borrow().opti_value(), 0);
            num_dest = self.collect_failure_destinations(&root, node.index(), &mut destinations);
        }

        if num_dest == 0 {
            return; // No failure destination detected.
        }
        assert!(!destinations.is_empty());
        if num_dest < mult_tot {
            // Redundancy detection.
            self.process_redundant_parents(node, &mut destinations);
            self.process_failure_destinations(node, &destinations);
            self.clear_const_gates();
            self.clear_null_gates();
        }
    }

    /// Notifies the parents of a failed node, recursively; returns the total
    /// multiplicity accumulated at shared failure sites.
    fn propagate_failure(&mut self, node: &NodeRef) -> i32 {
        assert_eq!(node.opti_value(), 1);
        let mut mult_tot = 0;
        for parent in node.parent_gates() {
            if parent.borrow().opti_value() == 1 {
                continue;
            }
            parent.borrow_mut().arg_failed(); // Send a notification.
            if parent.borrow().opti_value() == 1 {
                // The parent failed.
                let mult = parent.borrow().parents().len() as i32; // Multiplicity.
                if mult > 1 {
                    mult_tot += mult;
                }
                mult_tot += self.propagate_failure(&NodeRef::Gate(parent));
            }
        }
        mult_tot
    }

    /// Marks the ancestors of the failure from the root down and collects
    /// the first failed gates on every path. Optimization values: 1 failed,
    /// 3 direct parent of the node, 2 ordinary ancestor.
    fn collect_failure_destinations(
        &mut self,
        gate: &GatePtr,
        index: i32,
        destinations: &mut BTreeMap<i32, GateWeak>,
    ) -> i32 {
        assert_eq!(gate.borrow().opti_value(), 0);
        if gate.borrow().args().contains(&index) {
            // The argument may be non-gate.
            gate.borrow_mut().set_opti_value(3);
        } else {
            gate.borrow_mut().set_opti_value(2);
        }
        let mut num_dest = 0;
        for (_, child) in gate_arg_snapshot(gate) {
            let opti = child.borrow().opti_value();
            if opti == 0 {
                num_dest += self.collect_failure_destinations(&child, index, destinations);
            } else if opti == 1 && child.borrow().index() != index {
                num_dest += 1;
                destinations.insert(child.borrow().index(), Rc::downgrade(&child));
            } // Ignore gates with optimization values of 2 or 3.
        }
        num_dest
    }

    /// Substitutes constant false for the node at its redundant parents.
    /// An OR parent that is itself a destination absorbs the node instead.
    fn process_redundant_parents(
        &mut self,
        node: &NodeRef,
        destinations: &mut BTreeMap<i32, GateWeak>,
    ) {
        let mut redundant_parents: Vec<GateWeak> = Vec::new();
        for parent in node.parent_gates() {
            if parent.borrow().opti_value() < 3 {
                // Special case of the redundant parent as the destination.
                if parent.borrow().op() == Operator::Or
                    && destinations.remove(&parent.borrow().index()).is_some()
                {
                    continue; // No need to add to the redundancy list.
                }
                redundant_parents.push(Rc::downgrade(&parent));
            }
        }
        // The node behaves like constant False for the redundant parents.
        for weak in redundant_parents {
            let Some(parent) = weak.upgrade() else { continue };
            self.process_constant_arg(&parent, node.index(), false);
            if parent.borrow().state() != State::Normal {
                self.const_gates.push(Rc::downgrade(&parent));
            } else if parent.borrow().op() == Operator::Null {
                self.null_gates.push(Rc::downgrade(&parent));
            }
        }
    }

    /// Adds the node to every failure destination: OR destinations take it
    /// as an argument; AND/ATLEAST destinations are wrapped in a new OR.
    fn process_failure_destinations(
        &mut self,
        node: &NodeRef,
        destinations: &BTreeMap<i32, GateWeak>,
    ) {
        for weak in destinations.values() {
            let Some(target) = weak.upgrade() else { continue };
            let op = target.borrow().op();
            assert_ne!(op, Operator::Null);
            match op {
                Operator::Or => {
                    target.add_arg(node.index(), node);
                }
                Operator::And | Operator::Atleast => {
                    let new_gate = Gate::shared(Operator::Or);
                    if Rc::ptr_eq(&target, self.graph.root()) {
                        self.graph.set_root(new_gate.clone());
                    } else {
                        self.replace_gate(&target, &new_gate);
                    }
                    let target_index = target.borrow().index();
                    new_gate.add_gate_arg(target_index, &target);
                    new_gate.add_arg(node.index(), node);
                }
                _ => unreachable!("Destinations exist only in coherent graphs"),
            }
        }
    }

    /// Decomposition of common nodes: at every AND/NAND/OR/NOR ancestor that
    /// is a parent of a shared node, the node is a known constant in the
    /// sub-graph below, so the sub-graph is cloned where shared and the
    /// constant is propagated locally.
    ///
    /// Consumes node visit times (as ancestor tags keyed by node index).
    fn decompose_common_nodes(&mut self) -> bool {
        assert!(self.const_gates.is_empty());
        assert!(self.null_gates.is_empty());

        self.graph.clear_node_visits();
        let mut common_gates: Vec<GateWeak> = Vec::new();
        let mut common_variables: Vec<Weak<RefCell<Variable>>> = Vec::new();
        self.gather_common_nodes(&mut common_gates, &mut common_variables);
        self.graph.clear_node_visits();

        let mut changed = false;
        // Deepest-layer-first processing avoids generating extra parents
        // for the nodes deep in the graph.
        for weak in common_gates.iter().rev() {
            if let Some(gate) = weak.upgrade() {
                if self.process_decomposition_common_node(&NodeRef::Gate(gate)) {
                    changed = true;
                }
            }
        }
        // Variables are processed after gates: with parent gates removed,
        // there may be no need to process these variables at all.
        for weak in common_variables.iter().rev() {
            if let Some(var) = weak.upgrade() {
                if self.process_decomposition_common_node(&NodeRef::Variable(var)) {
                    changed = true;
                }
            }
        }
        changed
    }

    fn process_decomposition_common_node(&mut self, node: &NodeRef) -> bool {
        assert!(self.const_gates.is_empty());
        assert!(self.null_gates.is_empty());

        if node.num_parents() < 2 {
            return false;
        }
        let index = node.index();

        // Determine whether the decomposition setups are possible.
        let mut possible = false;
        for parent in node.parent_gates() {
            debug_assert_ne!(parent.borrow().last_visit(), index);
            match parent.borrow().op() {
                Operator::And | Operator::Nand | Operator::Or | Operator::Nor => possible = true,
                _ => {}
            }
            if possible {
                break;
            }
        }
        if !possible {
            return false;
        }

        // Mark the parents and ancestors.
        for parent in node.parent_gates() {
            self.mark_decomposition_destinations(&parent, index);
        }
        // A parent that got marked during the ancestor search is itself in
        // the sub-graph of another parent, i.e. a destination.
        let mut dest: Vec<GateWeak> = Vec::new();
        for parent in node.parent_gates() {
            if parent.borrow().last_visit() == index {
                match parent.borrow().op() {
                    Operator::And | Operator::Nand | Operator::Or | Operator::Nor => {
                        dest.push(Rc::downgrade(&parent))
                    }
                    _ => {}
                }
            } else {
                parent.borrow_mut().visit(index); // Mark for the destinations.
            }
        }
        if dest.is_empty() {
            return false; // No setups are found.
        }

        trace!("Processing decomposition for node {}", index);
        self.process_decomposition_destinations(node, &dest);
        trace!("Finished the decomposition for node {}", index);
        true
    }

    /// Tags the transitive ancestors of a parent with the node index,
    /// stopping at module boundaries.
    fn mark_decomposition_destinations(&mut self, parent: &GatePtr, index: i32) {
        for ancestor in gate_parents(parent) {
            if ancestor.borrow().last_visit() == index {
                continue;
            }
            ancestor.borrow_mut().visit(index);
            if ancestor.borrow().is_module() {
                continue; // Limited to the sub-graph.
            }
            self.mark_decomposition_destinations(&ancestor, index);
        }
    }

    fn process_decomposition_destinations(&mut self, node: &NodeRef, dest: &[GateWeak]) {
        let mut clones_true: HashMap<i32, GatePtr> = HashMap::new(); // True-state propagation.
        let mut clones_false: HashMap<i32, GatePtr> = HashMap::new(); // False-state propagation.
        for weak in dest {
            let Some(parent) = weak.upgrade() else { continue }; // Removed by propagation.

            // The destination may already be processed in the link of ancestors.
            if !node.has_parent(parent.borrow().index()) {
                continue;
            }

            let op = parent.borrow().op();
            let mut state = match op {
                Operator::And | Operator::Nand => true,
                Operator::Or | Operator::Nor => false,
                _ => unreachable!(),
            };
            let sign = if parent.borrow().args().contains(&node.index()) { 1 } else { -1 };
            if sign < 0 {
                state = !state;
            }
            let clones = if state { &mut clones_true } else { &mut clones_false };
            trace!("Processing decomposition ancestor gate {}", parent.borrow().index());
            self.process_decomposition_ancestors(&parent, node, state, true, clones);
            trace!("Finished processing ancestor gate {}", parent.borrow().index());
        }
        self.clear_const_gates(); // Actual propagation of the constants.
        self.clear_null_gates();
    }

    /// Walks the tagged ancestors below a destination, cloning shared gates
    /// so the constant substitution of the node stays local.
    fn process_decomposition_ancestors(
        &mut self,
        ancestor: &GatePtr,
        node: &NodeRef,
        state: bool,
        destination: bool,
        clones: &mut HashMap<i32, GatePtr>,
    ) {
        if !destination && node.has_parent(ancestor.borrow().index()) {
            trace!("Reached decomposition sub-parent gate {}", ancestor.borrow().index());
            let sign = if ancestor.borrow().args().contains(&node.index()) { 1 } else { -1 };
            self.process_constant_arg(ancestor, sign * node.index(), state);

            if ancestor.borrow().state() != State::Normal {
                self.const_gates.push(Rc::downgrade(ancestor));
                return;
            } else if ancestor.borrow().op() == Operator::Null {
                self.null_gates.push(Rc::downgrade(ancestor));
            }
        }

        let mut to_swap: Vec<(i32, GatePtr)> = Vec::new(); // For the common gates.
        let mut ancestors: Vec<GatePtr> = Vec::new(); // Ancestors to work on.
        for (arg, child) in gate_arg_snapshot(ancestor) {
            if child.borrow().last_visit() != node.index() {
                continue;
            }
            let child_index = child.borrow().index();
            if let Some(copy) = clones.get(&child_index) {
                // Already processed gate.
                to_swap.push((arg, copy.clone()));
            } else if child.borrow().parents().len() == 1 {
                child.borrow_mut().clear_visits(); // Avoid revisiting in linking.
                ancestors.push(child); // Unprocessed gate.
            } else {
                assert!(child.borrow().parents().len() > 1);
                let copy = child.clone_gate();
                clones.insert(child_index, copy.clone());
                to_swap.push((arg, copy.clone()));
                ancestors.push(copy); // Process only the new clones.
            }
        }
        // Swapping first reduces the number of common nodes in the sub-graph.
        for (arg, copy) in &to_swap {
            ancestor.erase_arg(*arg);
            let sign = if *arg > 0 { 1 } else { -1 };
            let copy_index = copy.borrow().index();
            ancestor.add_gate_arg(sign * copy_index, copy);
        }
        for next in &ancestors {
            self.process_decomposition_ancestors(next, node, state, false, clones);
        }
    }

    /// Redirects all parents of a gate to the replacement, keeping the edge
    /// signs. Collapses and NULL degradations are queued.
    fn replace_gate(&mut self, gate: &GatePtr, replacement: &GatePtr) {
        assert!(!gate.borrow().parents().is_empty());
        while let Some(parent) = first_parent(gate) {
            let index = gate.borrow().index();
            let sign = if parent.borrow().args().contains(&index) { 1 } else { -1 };
            parent.erase_arg(sign * index);
            let replacement_index = replacement.borrow().index();
            parent.add_gate_arg(sign * replacement_index, replacement);

            if parent.borrow().state() != State::Normal {
                self.const_gates.push(Rc::downgrade(&parent));
            } else if parent.borrow().op() == Operator::Null {
                self.null_gates.push(Rc::downgrade(&parent));
            }
        }
    }
}

/// The first live parent of a node, in index order.
fn first_parent<N: Node>(node: &Rc<RefCell<N>>) -> Option<GatePtr> {
    node.borrow()
        .parents()
        .values()
        .next()
        .map(|weak| weak.upgrade().expect("Dangling parent back-reference"))
}

/// Snapshot of the live parents of a gate, in index order.
fn gate_parents(gate: &GatePtr) -> Vec<GatePtr> {
    gate.borrow()
        .parents()
        .values()
        .map(|weak| weak.upgrade().expect("Dangling parent back-reference"))
        .collect()
}

/// Snapshot of the gate arguments for iteration under mutation.
fn gate_arg_snapshot(gate: &GatePtr) -> Vec<(i32, GatePtr)> {
    gate.borrow().gate_args().iter().map(|(&arg, child)| (arg, child.clone())).collect()
}

/// Snapshot of the variable arguments for iteration under mutation.
fn variable_arg_snapshot(gate: &GatePtr) -> Vec<(i32, VariablePtr)> {
    gate.borrow().variable_args().iter().map(|(&arg, var)| (arg, var.clone())).collect()
}

/// Detects overlap of two closed ranges.
fn detect_overlap(a_min: i32, a_max: i32, b_min: i32, b_max: i32) -> bool {
    debug_assert!(a_min < a_max);
    debug_assert!(b_min < b_max);
    a_min.max(b_min) <= a_max.min(b_max)
}

/// Intersection of two sorted index vectors.
fn intersect_sorted(lhs: &[i32], rhs: &[i32]) -> Vec<i32> {
    let mut common = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < lhs.len() && j < rhs.len() {
        match lhs[i].cmp(&rhs[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                common.push(lhs[i]);
                i += 1;
                j += 1;
            }
        }
    }
    common
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::BooleanGraph;
    use test_log::test;

    fn var_arg(graph: &mut BooleanGraph, gate: &GatePtr) -> (VariablePtr, i32) {
        let var = graph.new_variable();
        let index = var.borrow().index();
        gate.add_variable_arg(index, &var);
        (var, index)
    }

    #[test]
    fn test_true_arg_in_or_makes_unity() {
        let mut graph = BooleanGraph::new();
        let gate = graph.new_gate(Operator::Or);
        var_arg(&mut graph, &gate);
        let constant = graph.new_constant(true);
        let ci = constant.borrow().index();
        gate.add_constant_arg(ci, &constant);
        graph.set_root(gate.clone());
        let mut preprocessor = Preprocessor::new(&mut graph);
        preprocessor.process_constant_arg(&gate, ci, true);
        assert_eq!(gate.borrow().state(), State::Unity);
    }

    #[test]
    fn test_true_arg_in_and_is_removed() {
        let mut graph = BooleanGraph::new();
        let gate = graph.new_gate(Operator::And);
        let (_x, xi) = var_arg(&mut graph, &gate);
        var_arg(&mut graph, &gate);
        let constant = graph.new_constant(true);
        let ci = constant.borrow().index();
        gate.add_constant_arg(ci, &constant);
        graph.set_root(gate.clone());
        let mut preprocessor = Preprocessor::new(&mut graph);
        preprocessor.process_constant_arg(&gate, ci, true);
        assert_eq!(gate.borrow().state(), State::Normal);
        assert_eq!(gate.borrow().num_args(), 2);
        assert!(gate.borrow().args().contains(&xi));
    }

    #[test]
    fn test_true_arg_in_xor_becomes_not() {
        let mut graph = BooleanGraph::new();
        let gate = graph.new_gate(Operator::Xor);
        var_arg(&mut graph, &gate);
        let constant = graph.new_constant(true);
        let ci = constant.borrow().index();
        gate.add_constant_arg(ci, &constant);
        graph.set_root(gate.clone());
        let mut preprocessor = Preprocessor::new(&mut graph);
        preprocessor.process_constant_arg(&gate, ci, true);
        assert_eq!(gate.borrow().op(), Operator::Not);
        assert_eq!(gate.borrow().num_args(), 1);
    }

    #[test]
    fn test_false_arg_in_atleast_k_equals_n_becomes_and() {
        let mut graph = BooleanGraph::new();
        let gate = graph.new_gate(Operator::Atleast);
        gate.borrow_mut().set_vote_number(2);
        var_arg(&mut graph, &gate);
        var_arg(&mut graph, &gate);
        let constant = graph.new_constant(false);
        let ci = constant.borrow().index();
        gate.add_constant_arg(ci, &constant);
        graph.set_root(gate.clone());
        let mut preprocessor = Preprocessor::new(&mut graph);
        preprocessor.process_constant_arg(&gate, ci, false);
        assert_eq!(gate.borrow().op(), Operator::And);
        assert_eq!(gate.borrow().num_args(), 2);
    }

    #[test]
    fn test_true_arg_in_atleast_decrements_vote() {
        let mut graph = BooleanGraph::new();
        let gate = graph.new_gate(Operator::Atleast);
        gate.borrow_mut().set_vote_number(2);
        var_arg(&mut graph, &gate);
        var_arg(&mut graph, &gate);
        let constant = graph.new_constant(true);
        let ci = constant.borrow().index();
        gate.add_constant_arg(ci, &constant);
        graph.set_root(gate.clone());
        let mut preprocessor = Preprocessor::new(&mut graph);
        preprocessor.process_constant_arg(&gate, ci, true);
        assert_eq!(gate.borrow().op(), Operator::Or);
        assert_eq!(gate.borrow().num_args(), 2);
    }

    #[test]
    fn test_remove_constant_arg_degrades_or_to_null() {
        let mut graph = BooleanGraph::new();
        let gate = graph.new_gate(Operator::Or);
        var_arg(&mut graph, &gate);
        let constant = graph.new_constant(false);
        let ci = constant.borrow().index();
        gate.add_constant_arg(ci, &constant);
        graph.set_root(gate.clone());
        let mut preprocessor = Preprocessor::new(&mut graph);
        preprocessor.process_constant_arg(&gate, ci, false);
        assert_eq!(gate.borrow().op(), Operator::Null);
        assert_eq!(gate.borrow().num_args(), 1);
    }

    #[test]
    fn test_partial_normalization_pushes_signs() {
        // NOT(NOT(x)) with partial normalization becomes NULL(-NULL(-x))
        // before splicing; the root ends up as NULL(x) with sign +1.
        let mut graph = BooleanGraph::new();
        let x = graph.new_variable();
        let xi = x.borrow().index();
        let inner = graph.new_gate(Operator::Not);
        inner.add_variable_arg(xi, &x);
        let root = graph.new_gate(Operator::Not);
        let inner_index = inner.borrow().index();
        root.add_gate_arg(inner_index, &inner);
        graph.set_root(root.clone());
        graph.update_structure_flags();

        let mut preprocessor = Preprocessor::new(&mut graph);
        preprocessor.normalize_gates(false);
        assert_eq!(preprocessor.root_sign, -1);
        assert_eq!(root.borrow().op(), Operator::Null);
        // The inner NOT is spliced away with its sign on the root's edge.
        assert!(root.borrow().gate_args().is_empty());
        assert!(root.borrow().args().contains(&-xi));
        assert!(preprocessor.check_root());
        assert_eq!(preprocessor.root_sign, 1);
        assert!(root.borrow().args().contains(&xi));
    }

    #[test]
    fn test_full_normalization_expands_xor() {
        let mut graph = BooleanGraph::new();
        let root = graph.new_gate(Operator::Xor);
        var_arg(&mut graph, &root);
        var_arg(&mut graph, &root);
        graph.set_root(root.clone());
        graph.update_structure_flags();

        let mut preprocessor = Preprocessor::new(&mut graph);
        preprocessor.normalize_gates(true);
        assert_eq!(root.borrow().op(), Operator::Or);
        assert_eq!(root.borrow().gate_args().len(), 2);
        for child in root.borrow().gate_args().values() {
            assert_eq!(child.borrow().op(), Operator::And);
            assert_eq!(child.borrow().num_args(), 2);
        }
    }

    #[test]
    fn test_full_normalization_expands_atleast() {
        let mut graph = BooleanGraph::new();
        let root = graph.new_gate(Operator::Atleast);
        root.borrow_mut().set_vote_number(2);
        var_arg(&mut graph, &root);
        var_arg(&mut graph, &root);
        var_arg(&mut graph, &root);
        graph.set_root(root.clone());
        graph.update_structure_flags();

        let mut preprocessor = Preprocessor::new(&mut graph);
        preprocessor.normalize_gates(true);
        // ATLEAST(2; a, b, c) == OR(AND(a, OR(b, c)), AND(b, c)).
        assert_eq!(root.borrow().op(), Operator::Or);
        assert_eq!(root.borrow().gate_args().len(), 2);
        for child in root.borrow().gate_args().values() {
            assert_eq!(child.borrow().op(), Operator::And);
        }
    }

    #[test]
    fn test_multiple_definitions_are_merged() {
        let mut graph = BooleanGraph::new();
        let x = graph.new_variable();
        let xi = x.borrow().index();
        let y = graph.new_variable();
        let yi = y.borrow().index();
        let def_one = graph.new_gate(Operator::And);
        def_one.add_variable_arg(xi, &x);
        def_one.add_variable_arg(yi, &y);
        let def_two = graph.new_gate(Operator::And);
        def_two.add_variable_arg(xi, &x);
        def_two.add_variable_arg(yi, &y);
        let root = graph.new_gate(Operator::Or);
        let one_index = def_one.borrow().index();
        root.add_gate_arg(one_index, &def_one);
        let two_index = def_two.borrow().index();
        root.add_gate_arg(two_index, &def_two);
        graph.set_root(root.clone());
        graph.update_structure_flags();

        let mut preprocessor = Preprocessor::new(&mut graph);
        assert!(preprocessor.process_multiple_definitions());
        // OR(AND(x, y), AND(x, y)) collapses to a single definition; the
        // duplicate reference is idempotent, leaving OR with one argument,
        // which degrades to a NULL pass-through.
        assert!(!preprocessor.process_multiple_definitions());
        assert_eq!(root.borrow().gate_args().len(), 1);
    }

    #[test]
    fn test_join_gates_coalesces_same_kind() {
        let mut graph = BooleanGraph::new();
        let x = graph.new_variable();
        let xi = x.borrow().index();
        let child = graph.new_gate(Operator::And);
        var_arg(&mut graph, &child);
        var_arg(&mut graph, &child);
        let root = graph.new_gate(Operator::And);
        root.add_variable_arg(xi, &x);
        let child_index = child.borrow().index();
        root.add_gate_arg(child_index, &child);
        graph.set_root(root.clone());

        let mut preprocessor = Preprocessor::new(&mut graph);
        preprocessor.coalesce_gates(false);
        assert_eq!(root.borrow().num_args(), 3);
        assert!(root.borrow().gate_args().is_empty());
    }

    #[test]
    fn test_coalescing_complement_collapses_root() {
        // AND(x, AND-child(-x, y)) == false.
        let mut graph = BooleanGraph::new();
        let x = graph.new_variable();
        let xi = x.borrow().index();
        let child = graph.new_gate(Operator::And);
        child.add_variable_arg(-xi, &x);
        var_arg(&mut graph, &child);
        let root = graph.new_gate(Operator::And);
        root.add_variable_arg(xi, &x);
        let child_index = child.borrow().index();
        root.add_gate_arg(child_index, &child);
        graph.set_root(root.clone());

        let mut preprocessor = Preprocessor::new(&mut graph);
        preprocessor.coalesce_gates(false);
        assert_eq!(root.borrow().state(), State::Null);
    }

    #[test]
    fn test_merge_common_args_creates_shared_gate() {
        let mut graph = BooleanGraph::new();
        let x = graph.new_variable();
        let xi = x.borrow().index();
        let y = graph.new_variable();
        let yi = y.borrow().index();
        let first = graph.new_gate(Operator::And);
        first.add_variable_arg(xi, &x);
        first.add_variable_arg(yi, &y);
        var_arg(&mut graph, &first);
        let second = graph.new_gate(Operator::And);
        second.add_variable_arg(xi, &x);
        second.add_variable_arg(yi, &y);
        var_arg(&mut graph, &second);
        let root = graph.new_gate(Operator::Or);
        let first_index = first.borrow().index();
        root.add_gate_arg(first_index, &first);
        let second_index = second.borrow().index();
        root.add_gate_arg(second_index, &second);
        graph.set_root(root.clone());

        let mut preprocessor = Preprocessor::new(&mut graph);
        assert!(preprocessor.merge_common_args());
        // Both AND parents now reference one new AND(x, y) gate.
        let first_gates = first.borrow().gate_args().len();
        assert_eq!(first_gates, 1);
        let shared = first.borrow().gate_args().values().next().unwrap().clone();
        assert!(second.borrow().gate_args().values().any(|g| Rc::ptr_eq(g, &shared)));
        assert_eq!(shared.borrow().num_args(), 2);
    }

    #[test]
    fn test_detect_modules_marks_exclusive_subtree() {
        let mut graph = BooleanGraph::new();
        let shared = graph.new_variable();
        let si = shared.borrow().index();
        let module = graph.new_gate(Operator::And);
        var_arg(&mut graph, &module);
        var_arg(&mut graph, &module);
        let left = graph.new_gate(Operator::Or);
        left.add_variable_arg(si, &shared);
        let module_index = module.borrow().index();
        left.add_gate_arg(module_index, &module);
        let root = graph.new_gate(Operator::And);
        root.add_variable_arg(si, &shared);
        let left_index = left.borrow().index();
        root.add_gate_arg(left_index, &left);
        graph.set_root(root.clone());

        let mut preprocessor = Preprocessor::new(&mut graph);
        preprocessor.detect_modules();
        assert!(module.borrow().is_module());
        assert!(root.borrow().is_module()); // The root is always a module.
        assert!(!left.borrow().is_module()); // Shares a variable with the root.
    }

    #[test]
    fn test_check_root_unwraps_null_gate_root() {
        let mut graph = BooleanGraph::new();
        let child = graph.new_gate(Operator::And);
        var_arg(&mut graph, &child);
        var_arg(&mut graph, &child);
        let root = graph.new_gate(Operator::Null);
        let child_index = child.borrow().index();
        root.add_gate_arg(-child_index, &child);
        graph.set_root(root);

        let mut preprocessor = Preprocessor::new(&mut graph);
        assert!(!preprocessor.check_root());
        assert_eq!(preprocessor.root_sign, -1);
        assert!(Rc::ptr_eq(graph.root(), &child));
        assert!(child.borrow().parents().is_empty());
    }

    #[test]
    fn test_check_root_constant_with_negative_sign() {
        let mut graph = BooleanGraph::new();
        let root = graph.new_gate(Operator::And);
        var_arg(&mut graph, &root);
        var_arg(&mut graph, &root);
        root.nullify();
        graph.set_root(root);

        let mut preprocessor = Preprocessor::new(&mut graph);
        preprocessor.root_sign = -1;
        assert!(preprocessor.check_root());
        assert_eq!(preprocessor.root_sign, 1);
        // The new root carries the inverted constant.
        assert_eq!(graph.root().borrow().state(), State::Unity);
    }

    #[test]
    fn test_intersect_sorted() {
        assert_eq!(intersect_sorted(&[1, 3, 5, 7], &[2, 3, 4, 7]), vec![3, 7]);
        assert_eq!(intersect_sorted(&[-5, 1, 2], &[-5, 2, 8]), vec![-5, 2]);
        assert!(intersect_sorted(&[1, 2], &[3, 4]).is_empty());
    }

    #[test]
    fn test_detect_overlap() {
        assert!(detect_overlap(1, 5, 4, 9));
        assert!(detect_overlap(4, 9, 1, 5));
        assert!(detect_overlap(1, 9, 3, 4));
        assert!(!detect_overlap(1, 3, 4, 9));
    }
}
