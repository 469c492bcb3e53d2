use criterion::{black_box, criterion_group, criterion_main, Criterion};
use sam_local_gateway::RouteTable;
use sam_local_shared::FunctionDescriptor;
use std::sync::Arc;

fn table(functions: usize) -> RouteTable {
    let descriptors: Vec<_> = (0..functions)
        .map(|i| {
            Arc::new(
                FunctionDescriptor::new(format!("Fn{}", i), "nodejs8.10", "index.handler")
                    .with_event("GET", format!("/svc{}/items", i))
                    .with_event("GET", format!("/svc{}/items/{{id}}", i))
                    .with_event("ANY", format!("/svc{}/{{proxy+}}", i)),
            )
        })
        .collect();
    RouteTable::build(&descriptors).unwrap()
}

fn benchmark_match(c: &mut Criterion) {
    let table = table(100);

    c.bench_function("route_match_literal", |b| {
        b.iter(|| table.match_route(black_box("GET"), black_box("/svc50/items")).is_ok())
    });

    c.bench_function("route_match_param", |b| {
        b.iter(|| table.match_route(black_box("GET"), black_box("/svc99/items/1234")).is_ok())
    });

    c.bench_function("route_match_greedy", |b| {
        b.iter(|| table.match_route(black_box("DELETE"), black_box("/svc0/a/b/c/d")).is_ok())
    });

    c.bench_function("route_match_miss", |b| {
        b.iter(|| table.match_route(black_box("GET"), black_box("/unknown/path")).is_err())
    });
}

fn benchmark_build(c: &mut Criterion) {
    c.bench_function("route_table_build_100", |b| b.iter(|| table(black_box(100))));
}

criterion_group!(benches, benchmark_match, benchmark_build);
criterion_main!(benches);
