//! Preprocessing throughput on layered fault-tree-like graphs.
//!
//! The workload is a deterministic two-level tree: sub-systems are ORs of
//! AND pairs over a shared variable pool, combined by a 2-of-N vote at the
//! root. Sharing between neighboring sub-systems exercises the common-node
//! passes (merging, Boolean optimization, decomposition).
//!
//! Run with:
//! ```bash
//! cargo bench --bench preprocess
//! ```

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};

use pdag_rs::gate::{GateOps, Operator};
use pdag_rs::graph::BooleanGraph;
use pdag_rs::node::Node;
use pdag_rs::preprocessor::preprocess;

/// Builds a vote over `subsystems` ORs of AND pairs with overlapping
/// variable use between neighbors.
fn build_tree(subsystems: usize) -> BooleanGraph {
    let mut graph = BooleanGraph::new();
    let num_vars = subsystems * 2;
    let vars: Vec<_> = (0..num_vars).map(|_| graph.new_variable()).collect();
    let var_index = |i: usize| -> i32 { (i % num_vars + 1) as i32 };

    let mut branches = Vec::new();
    for s in 0..subsystems {
        let or = graph.new_gate(Operator::Or);
        for pair in 0..2 {
            let and = graph.new_gate(Operator::And);
            // Neighboring sub-systems overlap on one variable.
            let first = 2 * s + pair;
            let second = 2 * s + pair + 1;
            and.add_variable_arg(var_index(first), &vars[first % num_vars]);
            and.add_variable_arg(var_index(second), &vars[second % num_vars]);
            let and_index = and.borrow().index();
            or.add_gate_arg(and_index, &and);
        }
        branches.push(or);
    }

    let root = graph.new_gate(Operator::Atleast);
    root.borrow_mut().set_vote_number(2);
    for branch in &branches {
        let index = branch.borrow().index();
        root.add_gate_arg(index, branch);
    }
    graph.set_root(root);
    graph
}

fn bench_preprocess(c: &mut Criterion) {
    let mut group = c.benchmark_group("preprocess");
    for &subsystems in &[4usize, 8, 16] {
        group.bench_with_input(
            BenchmarkId::from_parameter(subsystems),
            &subsystems,
            |b, &subsystems| {
                b.iter_batched(
                    || build_tree(subsystems),
                    |mut graph| preprocess(&mut graph),
                    BatchSize::SmallInput,
                );
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_preprocess);
criterion_main!(benches);
