use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use csgtrack::{CellSpec, Geometry, GeometryConfig, GeometrySettings, Location, SurfaceKind, SurfaceSpec};
use rand::prelude::*;
use rand::rngs::StdRng;
use rayon::prelude::*;

/// An n x n x n grid of boxes plus the space around it.
fn grid(n: usize, settings: GeometrySettings) -> Geometry {
    let mut surfaces = Vec::new();
    for k in 0..=n {
        let x = k as f64;
        let id = k as i32;
        surfaces.push(SurfaceSpec::new(1000 + id, SurfaceKind::XPlane { x0: x }));
        surfaces.push(SurfaceSpec::new(2000 + id, SurfaceKind::YPlane { y0: x }));
        surfaces.push(SurfaceSpec::new(3000 + id, SurfaceKind::ZPlane { z0: x }));
    }

    let mut cells = Vec::new();
    for i in 0..n as i32 {
        for j in 0..n as i32 {
            for k in 0..n as i32 {
                let region = format!(
                    "{} -{} {} -{} {} -{}",
                    1000 + i,
                    1001 + i,
                    2000 + j,
                    2001 + j,
                    3000 + k,
                    3001 + k
                );
                let id = 1 + i + (n as i32) * (j + (n as i32) * k);
                cells.push(CellSpec::material(id, &region, Some(0)));
            }
        }
    }
    let n = n as i32;
    let outside = format!("~(1000 -{} 2000 -{} 3000 -{})", 1000 + n, 2000 + n, 3000 + n);
    cells.push(CellSpec::material(0, &outside, None));

    GeometryConfig { surfaces, cells, settings, ..Default::default() }.build().unwrap()
}

fn points(n: usize, size: f64) -> Vec<[f64; 3]> {
    let mut rng = StdRng::seed_from_u64(3);
    (0..n)
        .map(|_| [rng.gen_range(0.0..size), rng.gen_range(0.0..size), rng.gen_range(0.0..size)])
        .collect()
}

fn benchmark_search_paths(c: &mut Criterion) {
    let mut group = c.benchmark_group("find_cell_search");
    let n = 10;
    let pts = points(10000, n as f64);
    let u = [0.0, 0.0, 1.0];

    for (name, partitioner_min_cells) in [("linear", usize::MAX), ("partitioned", 2)] {
        let settings = GeometrySettings { partitioner_min_cells, neighbor_lists: false, ..Default::default() };
        let geometry = grid(n, settings);
        group.bench_function(BenchmarkId::new(name, pts.len()), |b| {
            b.iter(|| {
                for r in &pts {
                    black_box(geometry.find_cell(r, &u, 0, None).ok());
                }
            })
        });
    }
    group.finish();
}

fn benchmark_neighbor_lists(c: &mut Criterion) {
    let mut group = c.benchmark_group("find_cell_neighbors");
    let n = 10;
    let u = [1.0, 0.0, 0.0];
    // Walk along x through every row, so each search starts next to the previous cell.
    let rows: Vec<Vec<[f64; 3]>> = (0..n * n)
        .map(|row| {
            let y = (row % n) as f64 + 0.5;
            let z = (row / n) as f64 + 0.5;
            (0..n).map(|i| [i as f64 + 0.5, y, z]).collect()
        })
        .collect();

    for neighbor_lists in [false, true] {
        let settings = GeometrySettings { neighbor_lists, partitioner_min_cells: usize::MAX, ..Default::default() };
        let geometry = grid(n, settings);
        group.bench_with_input(BenchmarkId::new("neighbor_lists", neighbor_lists), &rows, |b, rows| {
            b.iter(|| {
                for row in rows {
                    let mut previous: Option<Location> = None;
                    for r in row {
                        let loc = geometry.find_cell(r, &u, 0, previous.as_ref()).ok();
                        previous = black_box(loc);
                    }
                }
            })
        });
    }
    group.finish();
}

fn benchmark_parallel(c: &mut Criterion) {
    let geometry = grid(10, GeometrySettings::default());
    let pts = points(100000, 10.0);
    let u = [0.0, 0.0, 1.0];

    c.bench_function("find_cell_parallel_100000", |b| {
        b.iter(|| {
            let found: usize = pts
                .par_iter()
                .filter_map(|r| geometry.find_cell(r, &u, 0, None).ok())
                .map(|loc| loc.cell)
                .sum();
            black_box(found)
        })
    });
}

criterion_group!(benches, benchmark_search_paths, benchmark_neighbor_lists, benchmark_parallel);
criterion_main!(benches);
