use csgtrack::position::advance;
use csgtrack::{CellSpec, Geometry, GeometryConfig, Location, SurfaceKind, SurfaceSpec, INFTY};
use rand::prelude::*;
use rand::rngs::StdRng;
use rayon::prelude::*;

/// A 4x4x4 grid of boxes along the axes, so that tracks cross many cells.
fn grid() -> Geometry {
    let mut surfaces = Vec::new();
    let kinds: [fn(f64) -> SurfaceKind; 3] = [
        |x0| SurfaceKind::XPlane { x0 },
        |y0| SurfaceKind::YPlane { y0 },
        |z0| SurfaceKind::ZPlane { z0 },
    ];
    for (axis, kind) in kinds.iter().enumerate() {
        for k in 0..5 {
            let id = (axis * 10 + k + 1) as i32;
            surfaces.push(SurfaceSpec::new(id, kind(k as f64 - 2.0)));
        }
    }

    let mut cells = Vec::new();
    for i in 0..4 {
        for j in 0..4 {
            for k in 0..4 {
                let region = format!("{} -{} {} -{} {} -{}", i + 1, i + 2, j + 11, j + 12, k + 21, k + 22);
                let id = (1 + i + 4 * j + 16 * k) as i32;
                cells.push(CellSpec::material(id, &region, Some(id as usize)));
            }
        }
    }
    cells.push(CellSpec::material(100, "~(1 -5 11 -15 21 -25)", None));

    GeometryConfig { surfaces, cells, ..Default::default() }.build().unwrap()
}

/// Follows a particle from cell to cell until it leaves the grid, recording the cells visited.
fn track(geometry: &Geometry, seed: u64) -> Vec<usize> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut r = [rng.gen_range(-1.9..1.9), rng.gen_range(-1.9..1.9), rng.gen_range(-1.9..1.9)];
    let mu: f64 = rng.gen_range(-1.0..1.0);
    let phi: f64 = rng.gen_range(0.0..std::f64::consts::TAU);
    let s = (1.0 - mu * mu).sqrt();
    let u = [s * phi.cos(), s * phi.sin(), mu];

    let mut visited = Vec::new();
    let mut location: Option<Location> = None;
    let mut on_surface = 0;
    loop {
        let loc = geometry.find_cell(&r, &u, on_surface, location.as_ref()).unwrap();
        visited.push(loc.cell);
        if geometry.cell(loc.cell).id() == 100 {
            break;
        }
        let boundary = geometry.next_boundary(&loc, on_surface).unwrap();
        assert!(boundary.distance < INFTY);
        r = advance(&r, &u, boundary.distance);
        on_surface = boundary.surface;
        location = Some(loc);
    }
    visited
}

#[test]
fn test_parallel_tracking_matches_serial() {
    let serial = grid();
    let expected: Vec<Vec<usize>> = (0..200).map(|seed| track(&serial, seed)).collect();

    // A fresh geometry whose neighbor lists are filled from many threads at once.
    let shared = grid();
    let tracks: Vec<Vec<usize>> = (0..200u64).into_par_iter().map(|seed| track(&shared, seed)).collect();
    assert_eq!(tracks, expected);

    for cell in shared.cells() {
        // Concurrent appends may repeat an entry, but only real neighbors are ever added:
        // boxes touch their face neighbors and the outside.
        let mut neighbors: Vec<usize> = cell.neighbors().iter().collect();
        neighbors.sort_unstable();
        neighbors.dedup();
        assert!(neighbors.len() <= 7, "cell {} has neighbors {:?}", cell.id(), neighbors);
    }
    let learned: usize = shared.cells().iter().map(|c| c.neighbors().len()).sum();
    assert!(learned > 0);
}

#[test]
fn test_parallel_find_cell() {
    let geometry = grid();
    let points: Vec<[f64; 3]> = {
        let mut rng = StdRng::seed_from_u64(99);
        (0..5000)
            .map(|_| [rng.gen_range(-3.0..3.0), rng.gen_range(-3.0..3.0), rng.gen_range(-3.0..3.0)])
            .collect()
    };
    let u = [0.0, 0.0, 1.0];

    let found: Vec<i32> = points
        .par_iter()
        .map(|r| geometry.cell(geometry.find_cell(r, &u, 0, None).unwrap().cell).id())
        .collect();

    for (r, id) in points.iter().zip(found) {
        let inside = r.iter().all(|x| x.abs() < 2.0);
        if inside {
            let index = |x: f64| (x + 2.0).floor() as i32;
            let expected = 1 + index(r[0]) + 4 * index(r[1]) + 16 * index(r[2]);
            assert_eq!(id, expected, "at {:?}", r);
        } else {
            assert_eq!(id, 100, "at {:?}", r);
        }
    }
}
