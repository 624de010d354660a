//! Benchmark initial rendering and revalidation time.

use std::rc::Rc;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};

use benches::{context, program, render};

criterion_main! { benches }
criterion_group! { benches, bench_render, bench_rerender }

/// Benchmarks the initial render of a list.
fn bench_render(c: &mut Criterion) {
    let mut g = c.benchmark_group("render");
    let (program, main) = program();
    let program = Rc::new(program);

    for n in [10, 150, 1000] {
        let users = context::users(n);
        g.bench_function(n.to_string(), |b| {
            b.iter(|| render(program.clone(), main, users.clone()));
        });
    }
}

/// Benchmarks revalidation, both when nothing changed and after the list
/// was shuffled.
fn bench_rerender(c: &mut Criterion) {
    let mut g = c.benchmark_group("rerender");
    let (program, main) = program();
    let program = Rc::new(program);
    let users = context::users(150);

    g.bench_function("unchanged", |b| {
        let mut page = render(program.clone(), main, users.clone());
        b.iter(|| page.result.rerender().unwrap());
    });

    g.bench_function("shuffled", |b| {
        b.iter_batched(
            || {
                let page = render(program.clone(), main, users.clone());
                (page, context::shuffle(&users))
            },
            |(mut page, shuffled)| {
                page.users.set(shuffled);
                page.result.rerender().unwrap()
            },
            BatchSize::SmallInput,
        );
    });
}
