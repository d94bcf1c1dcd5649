//! Benchmark suite for the hot path algorithms.
//!
//! Covers the operations that run every interaction cycle:
//! - path string digestion and registration
//! - expand (root -> leaves) and collapse (leaves -> shallowest ancestors)
//! - redraw over a populated view
//!
//! Run: cargo bench --bench path_ops

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use scenedb::{
    DrawMode, DrawSettings, MemoryDb, RecordingRenderer, SceneDb, ViewId,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Three-level tree: top -> `groups` combs -> `leaves` solids each.
fn grid_scene(groups: usize, leaves: usize) -> SceneDb {
    let mut db = MemoryDb::new();
    let mut group_names = Vec::new();
    for g in 0..groups {
        let mut children = Vec::new();
        for l in 0..leaves {
            let name = format!("g{}_l{}", g, l);
            db.add_solid(&name);
            children.push(name);
        }
        let gname = format!("g{}", g);
        let refs: Vec<&str> = children.iter().map(|s| s.as_str()).collect();
        db.add_union_comb(&gname, &refs);
        group_names.push(gname);
    }
    let refs: Vec<&str> = group_names.iter().map(|s| s.as_str()).collect();
    db.add_union_comb("top", &refs);
    SceneDb::open(Box::new(db), Box::new(RecordingRenderer::new()))
}

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

fn bench_get_path(c: &mut Criterion) {
    let mut s = grid_scene(32, 32);
    c.bench_function("get_path_registered", |b| {
        let h = s.get_path("top/g7/g7_l7").unwrap();
        black_box(h);
        b.iter(|| black_box(s.get_path("top/g7/g7_l7")));
    });
}

fn bench_expand(c: &mut Criterion) {
    let mut group = c.benchmark_group("expand_paths");
    for size in [8usize, 32, 128] {
        let mut s = grid_scene(size, 32);
        let root = s.get_path("top").unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| black_box(s.expand_paths(&[root], false)));
        });
    }
    group.finish();
}

fn bench_collapse(c: &mut Criterion) {
    let mut group = c.benchmark_group("collapse_paths");
    for size in [8usize, 32, 128] {
        let mut s = grid_scene(size, 32);
        let root = s.get_path("top").unwrap();
        let leaves = s.expand_paths(&[root], true);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| black_box(s.collapse_paths(&leaves, false)));
        });
    }
    group.finish();
}

fn bench_redraw(c: &mut Criterion) {
    let mut s = grid_scene(64, 16);
    s.add_path(
        &ViewId::Default,
        "top",
        DrawMode::Wireframe,
        DrawSettings::default(),
    );
    s.redraw(None, true);
    c.bench_function("redraw_steady_state", |b| {
        b.iter(|| s.redraw(None, false));
    });
}

criterion_group!(
    benches,
    bench_get_path,
    bench_expand,
    bench_collapse,
    bench_redraw
);
criterion_main!(benches);
