//! Implicit curves `F(x, y) = 0` by marching squares and implicit surfaces
//! `F(x, y, z) = 0` by marching cubes.

use crate::context::EngineContext;
use crate::equation_engine::{Binding, Evaluator};
use crate::error::{EngineError, EngineResult};
use crate::text::find_top_level;
use marching_cubes::tables::{EDGE_TABLE, TRI_TABLE};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::rc::Rc;

/// Stand-in for samples where `F` is undefined, treated as "outside".
const NON_FINITE_SAMPLE: f64 = 1e10;
const MIN_GRID: usize = 16;
const MAX_GRID: usize = 256;
const MAX_SURFACE_GRID: usize = 128;
const REFERENCE_SPAN: f64 = 20.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Viewport {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
}

impl Viewport {
    pub fn new(x_min: f64, x_max: f64, y_min: f64, y_max: f64) -> Self {
        Self {
            x_min,
            x_max,
            y_min,
            y_max,
        }
    }

    pub fn is_valid(&self) -> bool {
        [self.x_min, self.x_max, self.y_min, self.y_max]
            .iter()
            .all(|v| v.is_finite())
            && self.x_max > self.x_min
            && self.y_max > self.y_min
    }

    fn bits(&self) -> [u64; 4] {
        [
            self.x_min.to_bits(),
            self.x_max.to_bits(),
            self.y_min.to_bits(),
            self.y_max.to_bits(),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContourSegment {
    pub a: (f64, f64),
    pub b: (f64, f64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContourRing {
    pub points: Vec<(f64, f64)>,
    pub closed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContourKey {
    expression: String,
    viewport: [u64; 4],
    grid: usize,
    registry_version: u64,
}

/// `lhs = rhs` becomes `(lhs) - (rhs)`; bare expressions pass through.
pub fn implicit_form(expression: &str) -> String {
    match find_top_level(expression, '=') {
        Some(eq) => format!(
            "({}) - ({})",
            expression[..eq].trim(),
            expression[eq + 1..].trim()
        ),
        None => expression.trim().to_string(),
    }
}

fn compile_field(
    ctx: &mut EngineContext,
    expression: &str,
    axes: &[&str],
) -> EngineResult<Rc<Evaluator>> {
    let text = implicit_form(expression);
    let evaluator = ctx
        .compile_plain(&text)
        .ok_or_else(|| EngineError::Parse(format!("cannot compile '{expression}'")))?;
    if let Some(extra) = evaluator
        .variables()
        .iter()
        .find(|v| !axes.contains(&v.as_str()))
    {
        return Err(EngineError::InvalidInput(format!(
            "unexpected variable '{extra}' in implicit equation"
        )));
    }
    Ok(evaluator)
}

/// Cell count per axis for a viewport: zooming in refines the grid, zooming
/// out coarsens it, always within `[16, 256]`.
pub fn grid_size_for_viewport(viewport: &Viewport, base: usize) -> usize {
    let span = (viewport.x_max - viewport.x_min).max(viewport.y_max - viewport.y_min);
    if !span.is_finite() || span <= 0.0 {
        return base.clamp(MIN_GRID, MAX_GRID);
    }
    let scaled = base as f64 * (REFERENCE_SPAN / span).sqrt();
    (scaled.round() as usize).clamp(MIN_GRID, MAX_GRID)
}

/// Samples `F` row by row so long-running callers can stop between rows.
pub struct ContourSampler {
    evaluator: Rc<Evaluator>,
    binding: Binding,
    viewport: Viewport,
    grid: usize,
    values: Vec<f64>,
    next_row: usize,
}

impl ContourSampler {
    pub fn new(
        ctx: &mut EngineContext,
        expression: &str,
        viewport: Viewport,
        grid: usize,
    ) -> EngineResult<Self> {
        if !viewport.is_valid() {
            return Err(EngineError::InvalidInput(
                "viewport bounds must be finite with max > min".to_string(),
            ));
        }
        if grid == 0 {
            return Err(EngineError::InvalidInput("grid size must be positive".to_string()));
        }
        let grid = capped_grid(grid, MAX_GRID);
        let evaluator = compile_field(ctx, expression, &["x", "y"])?;
        let binding = evaluator.bind(&["x", "y"]);
        Ok(Self {
            evaluator,
            binding,
            viewport,
            grid,
            values: Vec::with_capacity((grid + 1) * (grid + 1)),
            next_row: 0,
        })
    }

    pub fn total_rows(&self) -> usize {
        self.grid + 1
    }

    pub fn rows_done(&self) -> usize {
        self.next_row
    }

    pub fn is_done(&self) -> bool {
        self.next_row > self.grid
    }

    /// Samples up to `batch` more rows; returns how many were taken.
    pub fn sample_rows(&mut self, batch: usize) -> usize {
        let n = self.grid;
        let step_x = (self.viewport.x_max - self.viewport.x_min) / n as f64;
        let step_y = (self.viewport.y_max - self.viewport.y_min) / n as f64;
        let mut taken = 0;
        while taken < batch && !self.is_done() {
            let y = self.viewport.y_min + step_y * self.next_row as f64;
            for ix in 0..=n {
                let x = self.viewport.x_min + step_x * ix as f64;
                let value = self.evaluator.eval_bound(&self.binding, &[x, y]);
                self.values
                    .push(if value.is_finite() { value } else { NON_FINITE_SAMPLE });
            }
            self.next_row += 1;
            taken += 1;
        }
        taken
    }

    /// Samples whatever is left and extracts the segments.
    pub fn finish(mut self) -> Vec<ContourSegment> {
        self.sample_rows(usize::MAX);
        march(&self.values, &self.viewport, self.grid)
    }
}

/// Edge pairs per corner code. Corners run `(x0,y0) (x1,y0) (x1,y1) (x0,y1)`
/// and edges bottom, right, top, left. `center_positive` picks the saddle
/// connection for codes 5 and 10.
fn edge_pairs(case_index: u8, center_positive: bool) -> &'static [(u8, u8)] {
    match case_index {
        0 | 15 => &[],
        1 => &[(3, 0)],
        2 => &[(0, 1)],
        3 => &[(3, 1)],
        4 => &[(1, 2)],
        5 if center_positive => &[(3, 2), (0, 1)],
        5 => &[(3, 0), (1, 2)],
        6 => &[(0, 2)],
        7 => &[(3, 2)],
        8 => &[(2, 3)],
        9 => &[(0, 2)],
        10 if center_positive => &[(0, 3), (1, 2)],
        10 => &[(0, 1), (2, 3)],
        11 => &[(1, 2)],
        12 => &[(1, 3)],
        13 => &[(0, 1)],
        14 => &[(3, 0)],
        _ => &[],
    }
}

fn interpolate_factor(v0: f64, v1: f64) -> f64 {
    let denominator = v0 - v1;
    if denominator.abs() <= 1e-12 {
        0.5
    } else {
        (v0 / denominator).clamp(0.0, 1.0)
    }
}

fn square_edge(edge: u8, corners: &[(f64, f64); 4], values: &[f64; 4]) -> (f64, f64) {
    let (from, to) = match edge {
        0 => (0, 1),
        1 => (1, 2),
        2 => (2, 3),
        _ => (3, 0),
    };
    let t = interpolate_factor(values[from], values[to]);
    let (ax, ay) = corners[from];
    let (bx, by) = corners[to];
    (ax + (bx - ax) * t, ay + (by - ay) * t)
}

fn march(values: &[f64], viewport: &Viewport, grid: usize) -> Vec<ContourSegment> {
    let n = grid;
    let step_x = (viewport.x_max - viewport.x_min) / n as f64;
    let step_y = (viewport.y_max - viewport.y_min) / n as f64;
    let index = |ix: usize, iy: usize| ix + iy * (n + 1);
    let mut segments = Vec::new();
    for iy in 0..n {
        let y0 = viewport.y_min + step_y * iy as f64;
        let y1 = viewport.y_min + step_y * (iy + 1) as f64;
        for ix in 0..n {
            let x0 = viewport.x_min + step_x * ix as f64;
            let x1 = viewport.x_min + step_x * (ix + 1) as f64;
            let v = [
                values[index(ix, iy)],
                values[index(ix + 1, iy)],
                values[index(ix + 1, iy + 1)],
                values[index(ix, iy + 1)],
            ];
            let case_index = v
                .iter()
                .enumerate()
                .fold(0u8, |acc, (bit, value)| if *value >= 0.0 { acc | 1 << bit } else { acc });
            let center_positive = v.iter().sum::<f64>() / 4.0 >= 0.0;
            let corners = [(x0, y0), (x1, y0), (x1, y1), (x0, y1)];
            for (edge_a, edge_b) in edge_pairs(case_index, center_positive) {
                let a = square_edge(*edge_a, &corners, &v);
                let b = square_edge(*edge_b, &corners, &v);
                // Zero corners can collapse a segment to a point.
                if !close(a, b, 1e-12) {
                    segments.push(ContourSegment { a, b });
                }
            }
        }
    }
    segments
}

fn capped_grid(grid: usize, max: usize) -> usize {
    if grid > max {
        log::debug!("grid {grid} capped to {max}");
    }
    grid.min(max)
}

/// Contour segments of `expression = 0` (or `lhs = rhs`) over `viewport`,
/// served from the context's contour cache when possible.
pub fn marching_squares(
    ctx: &mut EngineContext,
    expression: &str,
    viewport: Viewport,
    grid: usize,
) -> Option<Rc<Vec<ContourSegment>>> {
    let grid = capped_grid(grid, MAX_GRID);
    let key = ContourKey {
        expression: expression.trim().to_string(),
        viewport: viewport.bits(),
        grid,
        registry_version: ctx.registry().version(),
    };
    if let Some(hit) = ctx.contour_cache.get(&key) {
        log::debug!("contour cache hit for '{}'", key.expression);
        return Some(hit.clone());
    }
    let sampler = match ContourSampler::new(ctx, expression, viewport, grid) {
        Ok(sampler) => sampler,
        Err(err) => {
            log::debug!("contour skipped for '{expression}': {err}");
            return None;
        }
    };
    let segments = Rc::new(sampler.finish());
    for evicted in ctx.contour_cache.insert(key, segments.clone()) {
        log::debug!("contour cache evicted '{}'", evicted.expression);
    }
    Some(segments)
}

type PointKey = (i64, i64);

fn point_key(p: (f64, f64), tolerance: f64) -> PointKey {
    ((p.0 / tolerance).round() as i64, (p.1 / tolerance).round() as i64)
}

fn close(a: (f64, f64), b: (f64, f64), tolerance: f64) -> bool {
    (a.0 - b.0).abs() <= tolerance && (a.1 - b.1).abs() <= tolerance
}

struct EndpointIndex {
    tolerance: f64,
    buckets: HashMap<PointKey, Vec<usize>>,
}

impl EndpointIndex {
    fn new(segments: &[ContourSegment], tolerance: f64) -> Self {
        let mut buckets: HashMap<PointKey, Vec<usize>> = HashMap::new();
        for (i, segment) in segments.iter().enumerate() {
            buckets.entry(point_key(segment.a, tolerance)).or_default().push(i);
            buckets.entry(point_key(segment.b, tolerance)).or_default().push(i);
        }
        Self { tolerance, buckets }
    }

    /// An unused segment touching `p`, and its far endpoint.
    fn next(
        &self,
        p: (f64, f64),
        segments: &[ContourSegment],
        used: &[bool],
    ) -> Option<(usize, (f64, f64))> {
        let (kx, ky) = point_key(p, self.tolerance);
        for dx in -1..=1 {
            for dy in -1..=1 {
                let Some(candidates) = self.buckets.get(&(kx + dx, ky + dy)) else {
                    continue;
                };
                for &i in candidates {
                    if used[i] {
                        continue;
                    }
                    let s = segments[i];
                    if close(s.a, p, self.tolerance) {
                        return Some((i, s.b));
                    }
                    if close(s.b, p, self.tolerance) {
                        return Some((i, s.a));
                    }
                }
            }
        }
        None
    }
}

/// Chains segments whose endpoints agree within `tolerance` into polylines.
/// Closed rings do not repeat their first point.
pub fn assemble_rings(segments: &[ContourSegment], tolerance: f64) -> Vec<ContourRing> {
    let tolerance = if tolerance > 0.0 { tolerance } else { 1e-9 };
    let index = EndpointIndex::new(segments, tolerance);
    let mut used = vec![false; segments.len()];
    let mut rings = Vec::new();

    for start in 0..segments.len() {
        if used[start] {
            continue;
        }
        used[start] = true;
        let mut points = std::collections::VecDeque::from([segments[start].a, segments[start].b]);

        while let Some(tail) = points.back().copied() {
            let Some((i, far)) = index.next(tail, segments, &used) else {
                break;
            };
            used[i] = true;
            points.push_back(far);
        }
        while let Some(head) = points.front().copied() {
            let Some((i, far)) = index.next(head, segments, &used) else {
                break;
            };
            used[i] = true;
            points.push_front(far);
        }

        let mut points: Vec<(f64, f64)> = points.into();
        let closed = points.len() > 3
            && matches!((points.first(), points.last()), (Some(&a), Some(&b)) if close(a, b, tolerance));
        if closed {
            points.pop();
        }
        rings.push(ContourRing { points, closed });
    }
    rings
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurfaceBounds {
    pub min: [f64; 3],
    pub max: [f64; 3],
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurfaceMesh {
    pub vertices: Vec<[f64; 3]>,
    pub triangles: Vec<[u32; 3]>,
    /// The time budget ran out; the mesh covers the slices finished so far.
    pub timed_out: bool,
}

const CUBE_EDGE_CORNERS: [(usize, usize); 12] = [
    (0, 1),
    (1, 2),
    (2, 3),
    (3, 0),
    (4, 5),
    (5, 6),
    (6, 7),
    (7, 4),
    (0, 4),
    (1, 5),
    (2, 6),
    (3, 7),
];

/// Milliseconds since an arbitrary origin.
#[cfg(not(target_arch = "wasm32"))]
pub fn monotonic_clock() -> impl Fn() -> f64 {
    let origin = std::time::Instant::now();
    move || origin.elapsed().as_secs_f64() * 1000.0
}

/// Triangulates `expression = 0` over `bounds` with `grid` cells per axis.
/// The clock is polled once per z-slice; running past `timeout_ms` returns the
/// partial mesh with `timed_out` set.
pub fn extract_surface(
    ctx: &mut EngineContext,
    expression: &str,
    bounds: SurfaceBounds,
    grid: usize,
    timeout_ms: f64,
    now_ms: impl Fn() -> f64,
) -> EngineResult<SurfaceMesh> {
    let valid = (0..3).all(|k| {
        bounds.min[k].is_finite() && bounds.max[k].is_finite() && bounds.max[k] > bounds.min[k]
    });
    if !valid || grid == 0 {
        return Err(EngineError::InvalidInput(
            "surface bounds must be finite with max > min".to_string(),
        ));
    }
    let evaluator = compile_field(ctx, expression, &["x", "y", "z"])?;
    let binding = evaluator.bind(&["x", "y", "z"]);
    let started = now_ms();

    let n = capped_grid(grid, MAX_SURFACE_GRID);
    let step: Vec<f64> = (0..3).map(|k| (bounds.max[k] - bounds.min[k]) / n as f64).collect();
    let coord = |k: usize, i: usize| bounds.min[k] + step[k] * i as f64;
    let sample_slice = |iz: usize| -> Vec<f64> {
        let z = coord(2, iz);
        let mut slice = Vec::with_capacity((n + 1) * (n + 1));
        for iy in 0..=n {
            for ix in 0..=n {
                let value = evaluator.eval_bound(&binding, &[coord(0, ix), coord(1, iy), z]);
                slice.push(if value.is_finite() { value } else { NON_FINITE_SAMPLE });
            }
        }
        slice
    };
    let at = |slice: &[f64], ix: usize, iy: usize| slice[ix + iy * (n + 1)];

    let mut mesh = SurfaceMesh::default();
    let mut lower = sample_slice(0);
    for iz in 0..n {
        if now_ms() - started > timeout_ms {
            log::warn!("surface extraction for '{expression}' timed out at slice {iz}/{n}");
            mesh.timed_out = true;
            break;
        }
        let upper = sample_slice(iz + 1);
        let (z0, z1) = (coord(2, iz), coord(2, iz + 1));
        for iy in 0..n {
            let (y0, y1) = (coord(1, iy), coord(1, iy + 1));
            for ix in 0..n {
                let (x0, x1) = (coord(0, ix), coord(0, ix + 1));
                let corner_points = [
                    [x0, y0, z0],
                    [x1, y0, z0],
                    [x1, y1, z0],
                    [x0, y1, z0],
                    [x0, y0, z1],
                    [x1, y0, z1],
                    [x1, y1, z1],
                    [x0, y1, z1],
                ];
                let corner_values = [
                    at(&lower, ix, iy),
                    at(&lower, ix + 1, iy),
                    at(&lower, ix + 1, iy + 1),
                    at(&lower, ix, iy + 1),
                    at(&upper, ix, iy),
                    at(&upper, ix + 1, iy),
                    at(&upper, ix + 1, iy + 1),
                    at(&upper, ix, iy + 1),
                ];
                let cube_index = corner_values
                    .iter()
                    .enumerate()
                    .fold(0usize, |acc, (corner, v)| if *v < 0.0 { acc | 1 << corner } else { acc });
                let edge_mask = EDGE_TABLE[cube_index] as i32;
                if edge_mask == 0 {
                    continue;
                }

                let mut edge_vertices = [[0.0; 3]; 12];
                for (edge, vertex) in edge_vertices.iter_mut().enumerate() {
                    if edge_mask & (1 << edge) == 0 {
                        continue;
                    }
                    let (ca, cb) = CUBE_EDGE_CORNERS[edge];
                    let t = interpolate_factor(corner_values[ca], corner_values[cb]);
                    for k in 0..3 {
                        let (a, b) = (corner_points[ca][k], corner_points[cb][k]);
                        vertex[k] = a + (b - a) * t;
                    }
                }

                let tri_row = TRI_TABLE[cube_index];
                let mut offset = 0usize;
                while offset + 2 < tri_row.len() && tri_row[offset] != -1 {
                    let base = mesh.vertices.len() as u32;
                    for e in &tri_row[offset..offset + 3] {
                        mesh.vertices.push(edge_vertices[*e as usize]);
                    }
                    mesh.triangles.push([base, base + 1, base + 2]);
                    offset += 3;
                }
            }
        }
        lower = upper;
    }
    Ok(mesh)
}

#[cfg(test)]
mod tests {
    use super::{
        assemble_rings, extract_surface, grid_size_for_viewport, marching_squares,
        monotonic_clock, ContourSampler, ContourSegment, SurfaceBounds, Viewport,
    };
    use crate::context::EngineContext;
    use std::rc::Rc;

    fn square(half: f64) -> Viewport {
        Viewport::new(-half, half, -half, half)
    }

    #[test]
    fn circle_becomes_one_closed_ring() {
        let mut ctx = EngineContext::default();
        let segments = marching_squares(&mut ctx, "x^2+y^2-4", square(5.0), 64).expect("segments");
        assert!(!segments.is_empty());
        for s in segments.iter() {
            for (x, y) in [s.a, s.b] {
                assert!(((x * x + y * y).sqrt() - 2.0).abs() < 0.1);
            }
        }
        let rings = assemble_rings(&segments, 1e-9);
        assert_eq!(rings.len(), 1);
        assert!(rings[0].closed);
        assert!(rings[0].points.len() > 20);
    }

    #[test]
    fn equations_and_cache() {
        let mut ctx = EngineContext::default();
        let first = marching_squares(&mut ctx, "x^2 + y^2 = 4", square(3.0), 32).expect("segments");
        let second = marching_squares(&mut ctx, "x^2 + y^2 = 4", square(3.0), 32).expect("segments");
        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(ctx.contour_cache_len(), 1);
        marching_squares(&mut ctx, "x^2 + y^2 = 4", square(3.0), 48).expect("segments");
        assert_eq!(ctx.contour_cache_len(), 2);
    }

    #[test]
    fn invalid_requests_are_none() {
        let mut ctx = EngineContext::default();
        assert!(marching_squares(&mut ctx, "x^2 +", square(1.0), 16).is_none());
        assert!(marching_squares(&mut ctx, "x + y + q", square(1.0), 16).is_none());
        assert!(marching_squares(&mut ctx, "x - y", Viewport::new(1.0, -1.0, 0.0, 1.0), 16).is_none());
        assert!(marching_squares(&mut ctx, "x - y", square(1.0), 0).is_none());
    }

    #[test]
    fn undefined_regions_do_not_produce_segments() {
        let mut ctx = EngineContext::default();
        // sqrt is NaN for x < 0, which is sampled as far outside; the only
        // other crossing hugs the edge of the domain.
        let segments = marching_squares(&mut ctx, "sqrt(x) - 1", square(2.0), 40).expect("segments");
        assert!(segments.iter().any(|s| (s.a.0 - 1.0).abs() < 0.05));
        assert!(segments.iter().all(|s| s.a.0 > -1e-6 && s.b.0 > -1e-6));
    }

    #[test]
    fn saddle_cells_use_the_center_value() {
        let mut ctx = EngineContext::default();
        // Hyperbola pair crossing a single cell: both saddle choices yield two segments.
        let segments = marching_squares(&mut ctx, "x*y - 0.01", square(1.0), 1).expect("segments");
        assert_eq!(segments.len(), 2);
    }

    #[test]
    fn sampler_steps_row_by_row() {
        let mut ctx = EngineContext::default();
        let mut sampler = ContourSampler::new(&mut ctx, "x - y", square(1.0), 10).expect("sampler");
        assert_eq!(sampler.total_rows(), 11);
        assert_eq!(sampler.sample_rows(4), 4);
        assert_eq!(sampler.rows_done(), 4);
        assert!(!sampler.is_done());
        assert_eq!(sampler.sample_rows(100), 7);
        assert!(sampler.is_done());
        let rings = assemble_rings(&sampler.finish(), 1e-9);
        assert_eq!(rings.len(), 1);
        assert!(!rings[0].closed);
    }

    #[test]
    fn grid_scales_with_zoom() {
        let wide = grid_size_for_viewport(&square(100.0), 64);
        let normal = grid_size_for_viewport(&square(10.0), 64);
        let narrow = grid_size_for_viewport(&square(1.0), 64);
        assert!(wide < normal && normal < narrow);
        assert_eq!(normal, 64);
        assert!(narrow <= 256 && wide >= 16);
    }

    #[test]
    fn open_chains_stay_open() {
        let segments = [
            ContourSegment { a: (0.0, 0.0), b: (1.0, 0.0) },
            ContourSegment { a: (2.0, 0.0), b: (1.0, 0.0) },
            ContourSegment { a: (5.0, 5.0), b: (6.0, 6.0) },
        ];
        let rings = assemble_rings(&segments, 1e-9);
        assert_eq!(rings.len(), 2);
        assert_eq!(rings[0].points.len(), 3);
        assert!(!rings[0].closed);
    }

    #[test]
    fn sphere_surface() {
        let mut ctx = EngineContext::default();
        let bounds = SurfaceBounds { min: [-2.0; 3], max: [2.0; 3] };
        let mesh = extract_surface(&mut ctx, "x^2 + y^2 + z^2 = 1", bounds, 12, 10_000.0, monotonic_clock())
            .expect("mesh");
        assert!(!mesh.timed_out);
        assert!(!mesh.triangles.is_empty());
        assert_eq!(mesh.vertices.len(), mesh.triangles.len() * 3);
        for v in &mesh.vertices {
            let r = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
            assert!((r - 1.0).abs() < 0.2, "vertex off sphere: {v:?}");
        }
    }

    #[test]
    fn oversized_grids_are_capped() {
        let mut ctx = EngineContext::default();
        let sampler = ContourSampler::new(&mut ctx, "x^2 + y^2 = 4", square(3.0), 5000).expect("sampler");
        assert_eq!(sampler.total_rows(), 257);
        assert!(marching_squares(&mut ctx, "x^2 + y^2 = 4", square(3.0), usize::MAX).is_some());
    }

    #[test]
    fn oversized_surface_grids_are_capped() {
        let mut ctx = EngineContext::default();
        let bounds = SurfaceBounds { min: [-2.0; 3], max: [2.0; 3] };
        let ticks = std::cell::Cell::new(0.0);
        let clock = || {
            ticks.set(ticks.get() + 10.0);
            ticks.get()
        };
        let mesh =
            extract_surface(&mut ctx, "x^2 + y^2 + z^2 - 1", bounds, usize::MAX, 25.0, clock).expect("mesh");
        assert!(mesh.timed_out);
    }

    #[test]
    fn surface_timeout_is_reported() {
        let mut ctx = EngineContext::default();
        let bounds = SurfaceBounds { min: [-2.0; 3], max: [2.0; 3] };
        let ticks = std::cell::Cell::new(0.0);
        let clock = || {
            ticks.set(ticks.get() + 10.0);
            ticks.get()
        };
        let mesh = extract_surface(&mut ctx, "x^2 + y^2 + z^2 - 1", bounds, 12, 25.0, clock).expect("mesh");
        assert!(mesh.timed_out);
    }
}
