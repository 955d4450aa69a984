//! Benchmarks for the tree differ and the re-render path.

use std::rc::Rc;

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use serde_json::json;

use trellis_core::vdom::{Backend, MemoryBackend, Patcher, VNode};
use trellis_core::{run_microtasks, Component, ComponentOptions};

fn list(keys: impl Iterator<Item = usize>) -> VNode {
    VNode::element(
        "ul",
        keys.map(|k| VNode::element("li", vec![VNode::text(k.to_string())]).with_key(k))
            .collect(),
    )
}

/// A mounted list plus the tree to patch it into.
fn mounted(size: usize, next: impl Fn(usize) -> VNode) -> (Rc<Patcher>, VNode, VNode) {
    let backend = Rc::new(MemoryBackend::new());
    let patcher = Patcher::new(backend.clone());
    let root = backend.create_element("root");
    let old = list(0..size);
    patcher.create(&old, Some(root), None);
    (patcher, old, next(size))
}

fn bench_keyed_patch(c: &mut Criterion) {
    let mut group = c.benchmark_group("patch/keyed");

    for size in [10, 100, 1000] {
        group.bench_with_input(BenchmarkId::new("unchanged", size), &size, |b, &size| {
            b.iter_batched(
                || mounted(size, |n| list(0..n)),
                |(patcher, old, new)| patcher.patch(Some(&old), black_box(&new)),
                BatchSize::SmallInput,
            )
        });

        group.bench_with_input(BenchmarkId::new("reverse", size), &size, |b, &size| {
            b.iter_batched(
                || mounted(size, |n| list((0..n).rev())),
                |(patcher, old, new)| patcher.patch(Some(&old), black_box(&new)),
                BatchSize::SmallInput,
            )
        });

        group.bench_with_input(BenchmarkId::new("shuffle", size), &size, |b, &size| {
            // Deterministic interleave: evens then odds.
            b.iter_batched(
                || mounted(size, |n| list((0..n).step_by(2).chain((1..n).step_by(2)))),
                |(patcher, old, new)| patcher.patch(Some(&old), black_box(&new)),
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

fn bench_component_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("component");

    group.bench_function("rerender_100_rows", |b| {
        let options = ComponentOptions::builder("Rows")
            .data(|_| Ok(json!({ "offset": 0 }).into()))
            .render(|vm| {
                let offset = vm.get("offset").as_f64().unwrap_or(0.0) as usize;
                Ok(list(offset..offset + 100))
            })
            .build();
        let backend = Rc::new(MemoryBackend::new());
        let patcher = Patcher::new(backend.clone());
        let root = backend.create_element("root");
        let vm = Component::new(options);
        let _ = vm.mount(&patcher, root);

        let mut offset = 0.0;
        b.iter(|| {
            offset += 1.0;
            vm.set("offset", offset);
            let _ = run_microtasks();
            backend.clear_ops();
        })
    });

    group.finish();
}

criterion_group!(benches, bench_keyed_patch, bench_component_update);
criterion_main!(benches);
