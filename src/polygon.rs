//! Convex polygon clipping in homogeneous coordinates.
//!
//! A 2-D point `(x, y)` is the vector `(x, y, 1)` and a directed line is the
//! vector `(a, b, c)` with `a·x + b·y + c = 0`. A point lies to the left of an
//! edge when `a·x + b·y + c > 0`. The line through two points and the point
//! where two lines meet are both cross products, so every clip reduces to a
//! handful of multiplies.
//!
//! Polygons are convex with vertices in clockwise order, so the interior is to
//! the right of every edge. They live in a [`PolygonArena`]: vertex/edge
//! records and polygon descriptors come from free lists, and callers hold
//! [`PolygonId`] handles. An arena is owned by one worker and reset between
//! point evaluations, so no handle outlives the computation it belongs to.

use geo_types::Coord;

use crate::config;
use crate::error::{Result, ViewError};

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn square_cw(x0: f64, y0: f64, side: f64) -> Vec<Coord<f64>> {
        vec![
            Coord { x: x0, y: y0 },
            Coord { x: x0, y: y0 + side },
            Coord { x: x0 + side, y: y0 + side },
            Coord { x: x0 + side, y: y0 },
        ]
    }

    fn arena() -> PolygonArena {
        PolygonArena::new(1e-9, 1e-12)
    }

    #[test]
    fn clockwise_area_is_positive() {
        let mut arena = arena();
        let p = arena.insert(&square_cw(0.0, 0.0, 2.0), 1.0).unwrap().unwrap();
        assert_relative_eq!(arena.area(p), 4.0, epsilon = 1e-12);

        let mut ccw = square_cw(0.0, 0.0, 2.0);
        ccw.reverse();
        assert!(arena.insert(&ccw, 1.0).unwrap().is_none());
    }

    #[test]
    fn partial_overlap_splits_area() {
        let mut arena = arena();
        let p1 = arena.insert(&square_cw(0.0, 0.0, 1.0), 1.0).unwrap().unwrap();
        let p2 = arena.insert(&square_cw(0.5, 0.5, 1.0), 1.0).unwrap().unwrap();
        let result = arena.overlap(p1, p2, OverlapMode::Both).unwrap();
        assert_eq!(result.kind, OverlapKind::Partial);
        let inside = result.inside.unwrap();
        assert_relative_eq!(arena.area(inside), 0.25, epsilon = 1e-12);
        let outside: f64 = result.outside.iter().map(|&id| arena.area(id)).sum();
        assert_relative_eq!(outside, 0.75, epsilon = 1e-12);
    }

    #[test]
    fn disjoint_and_enclosed() {
        let mut arena = arena();
        let big = arena.insert(&square_cw(0.0, 0.0, 4.0), 0.5).unwrap().unwrap();
        let small = arena.insert(&square_cw(1.0, 1.0, 1.0), 0.5).unwrap().unwrap();
        let far = arena.insert(&square_cw(10.0, 0.0, 1.0), 1.0).unwrap().unwrap();

        let inner = arena.overlap(big, small, OverlapMode::Both).unwrap();
        assert_eq!(inner.kind, OverlapKind::Inside);
        assert!(inner.outside.is_empty());
        let inside = inner.inside.unwrap();
        assert_relative_eq!(arena.area(inside), 1.0, epsilon = 1e-12);
        assert_relative_eq!(arena.trns(inside), 0.25, epsilon = 1e-12);

        let apart = arena.overlap(big, far, OverlapMode::Both).unwrap();
        assert_eq!(apart.kind, OverlapKind::Outside);
        assert!(apart.inside.is_none());
        assert_eq!(apart.outside.len(), 1);
        assert_relative_eq!(arena.area(apart.outside[0]), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn clipping_twice_changes_nothing() {
        let mut arena = arena();
        let p1 = arena.insert(&square_cw(0.0, 0.0, 1.0), 1.0).unwrap().unwrap();
        let tri = vec![
            Coord { x: -0.5, y: 0.2 },
            Coord { x: 0.6, y: 1.7 },
            Coord { x: 1.4, y: -0.3 },
        ];
        let p2 = arena.insert(&tri, 1.0).unwrap().unwrap();
        let once = arena.overlap(p1, p2, OverlapMode::Inside).unwrap();
        let once = once.inside.unwrap();
        let twice = arena.overlap(p1, once, OverlapMode::Inside).unwrap();
        assert_relative_eq!(
            arena.area(twice.inside.unwrap()),
            arena.area(once),
            epsilon = 1e-12
        );
    }

    #[test]
    fn free_list_reuses_records() {
        let mut arena = arena();
        let p = arena.insert(&square_cw(0.0, 0.0, 1.0), 1.0).unwrap().unwrap();
        let used = arena.edges_in_use();
        arena.free(p);
        assert_eq!(arena.edges_in_use(), 0);
        let q = arena.insert(&square_cw(0.0, 0.0, 1.0), 1.0).unwrap().unwrap();
        assert_eq!(arena.edges_in_use(), used);
        assert_eq!(p, q);
    }

    #[test]
    fn limit_to_window() {
        let poly = vec![
            Coord { x: -1.0, y: -1.0 },
            Coord { x: -1.0, y: 1.0 },
            Coord { x: 1.0, y: 1.0 },
            Coord { x: 1.0, y: -1.0 },
        ];
        let limited = limit_polygon(&poly, 0.0, 2.0, 0.0, 2.0);
        assert_eq!(limited.len(), 4);
        assert!(limited.iter().all(|c| c.x >= 0.0 && c.y >= 0.0));
    }
}

/// Handle to a polygon in a [`PolygonArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PolygonId(usize);

/// Which parts of P2 an overlap computation keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlapMode {
    /// The part of P2 inside P1.
    Inside,
    /// Both the inside part and the outside fragments.
    Both,
    /// Only the parts of P2 outside P1.
    Outside,
}

/// Position of P2 relative to P1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlapKind {
    Outside,
    Inside,
    Partial,
}

#[derive(Debug, Clone)]
pub struct Overlap {
    pub kind: OverlapKind,
    pub inside: Option<PolygonId>,
    pub outside: Vec<PolygonId>,
}

#[derive(Debug, Clone, Copy, Default)]
struct VertexEdge {
    x: f64,
    y: f64,
    a: f64,
    b: f64,
    c: f64,
    next: usize,
}

#[derive(Debug, Clone, Default)]
struct PolygonRecord {
    first: usize,
    nv: usize,
    area: f64,
    trns: f64,
    live: bool,
}

/// Pool of polygon records with free lists.
#[derive(Debug, Clone)]
pub struct PolygonArena {
    edges: Vec<VertexEdge>,
    free_edges: Vec<usize>,
    polygons: Vec<PolygonRecord>,
    free_polygons: Vec<usize>,
    eps_dist: f64,
    eps_area: f64,
    capacity: usize,
    left: Vec<Coord<f64>>,
    right: Vec<Coord<f64>>,
    temp: Vec<Coord<f64>>,
    side: Vec<i8>,
}

impl PolygonArena {
    pub fn new(eps_dist: f64, eps_area: f64) -> Self {
        Self::with_capacity(eps_dist, eps_area, config::ARENA_CAPACITY)
    }

    pub fn with_capacity(eps_dist: f64, eps_area: f64, capacity: usize) -> Self {
        Self {
            edges: Vec::new(),
            free_edges: Vec::new(),
            polygons: Vec::new(),
            free_polygons: Vec::new(),
            eps_dist,
            eps_area,
            capacity,
            left: Vec::with_capacity(config::MAX_POLYGON_VERTICES),
            right: Vec::with_capacity(config::MAX_POLYGON_VERTICES),
            temp: Vec::with_capacity(config::MAX_POLYGON_VERTICES),
            side: Vec::with_capacity(config::MAX_POLYGON_VERTICES),
        }
    }

    /// Changes the vertex-merge distance and minimum area.
    pub fn set_tolerances(&mut self, eps_dist: f64, eps_area: f64) {
        self.eps_dist = eps_dist;
        self.eps_area = eps_area;
    }

    /// Returns every record to the free lists.
    pub fn reset(&mut self) {
        self.free_edges.clear();
        self.free_edges.extend((0..self.edges.len()).rev());
        self.free_polygons.clear();
        self.free_polygons.extend((0..self.polygons.len()).rev());
        for p in self.polygons.iter_mut() {
            p.live = false;
        }
    }

    pub fn edges_in_use(&self) -> usize {
        self.edges.len() - self.free_edges.len()
    }

    fn alloc_edge(&mut self) -> Result<usize> {
        if let Some(i) = self.free_edges.pop() {
            return Ok(i);
        }
        if self.edges.len() >= self.capacity {
            return Err(ViewError::ArenaExhausted(format!(
                "more than {} vertex records",
                self.capacity
            )));
        }
        self.edges.push(VertexEdge::default());
        Ok(self.edges.len() - 1)
    }

    fn alloc_polygon(&mut self) -> usize {
        if let Some(i) = self.free_polygons.pop() {
            return i;
        }
        self.polygons.push(PolygonRecord::default());
        self.polygons.len() - 1
    }

    /// Stores a clockwise polygon with its edge lines.
    /// Returns `None` when its area is below the arena's minimum.
    pub fn insert(&mut self, vertices: &[Coord<f64>], trns: f64) -> Result<Option<PolygonId>> {
        let nv = vertices.len();
        if nv < 3 {
            return Ok(None);
        }
        let mut area = 0.0;
        let mut jm1 = nv - 1;
        for j in 0..nv {
            let (p, q) = (vertices[jm1], vertices[j]);
            area -= q.y * p.x - q.x * p.y;
            jm1 = j;
        }
        area *= 0.5;
        if area < self.eps_area {
            return Ok(None);
        }

        let mut first = usize::MAX;
        let mut prev = usize::MAX;
        let mut jm1 = nv - 1;
        for j in 0..nv {
            let (p, q) = (vertices[jm1], vertices[j]);
            let e = self.alloc_edge()?;
            self.edges[e] = VertexEdge {
                x: q.x,
                y: q.y,
                a: p.y - q.y,
                b: q.x - p.x,
                c: q.y * p.x - q.x * p.y,
                next: usize::MAX,
            };
            if prev == usize::MAX {
                first = e;
            } else {
                self.edges[prev].next = e;
            }
            prev = e;
            jm1 = j;
        }
        self.edges[prev].next = first;

        let id = self.alloc_polygon();
        self.polygons[id] = PolygonRecord {
            first,
            nv,
            area,
            trns,
            live: true,
        };
        Ok(Some(PolygonId(id)))
    }

    /// Returns a polygon's records to the free lists.
    pub fn free(&mut self, id: PolygonId) {
        let rec = &mut self.polygons[id.0];
        if !rec.live {
            return;
        }
        rec.live = false;
        let (first, nv) = (rec.first, rec.nv);
        let mut e = first;
        for _ in 0..nv {
            self.free_edges.push(e);
            e = self.edges[e].next;
        }
        self.free_polygons.push(id.0);
    }

    pub fn area(&self, id: PolygonId) -> f64 {
        self.polygons[id.0].area
    }

    pub fn trns(&self, id: PolygonId) -> f64 {
        self.polygons[id.0].trns
    }

    /// Vertices of a polygon in clockwise order.
    pub fn vertices(&self, id: PolygonId) -> Vec<Coord<f64>> {
        let mut out = Vec::with_capacity(self.polygons[id.0].nv);
        self.copy_vertices(id, &mut out);
        out
    }

    fn copy_vertices(&self, id: PolygonId, out: &mut Vec<Coord<f64>>) {
        let rec = &self.polygons[id.0];
        out.clear();
        let mut e = rec.first;
        for _ in 0..rec.nv {
            let ve = &self.edges[e];
            out.push(Coord { x: ve.x, y: ve.y });
            e = ve.next;
        }
    }

    /// Clips P2 against every edge of P1.
    ///
    /// The inside part carries `trns(P1) * trns(P2)`; outside fragments keep
    /// `trns(P2)`. Fragments below the minimum area are dropped. P1 and P2
    /// themselves are left untouched.
    pub fn overlap(&mut self, p1: PolygonId, p2: PolygonId, mode: OverlapMode) -> Result<Overlap> {
        let mut temp = std::mem::take(&mut self.temp);
        let mut left = std::mem::take(&mut self.left);
        let mut right = std::mem::take(&mut self.right);
        let mut side = std::mem::take(&mut self.side);

        let result = self.clip(p1, p2, mode, &mut temp, &mut left, &mut right, &mut side);

        self.temp = temp;
        self.left = left;
        self.right = right;
        self.side = side;
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn clip(
        &mut self,
        p1: PolygonId,
        p2: PolygonId,
        mode: OverlapMode,
        temp: &mut Vec<Coord<f64>>,
        left: &mut Vec<Coord<f64>>,
        right: &mut Vec<Coord<f64>>,
        side: &mut Vec<i8>,
    ) -> Result<Overlap> {
        let keep_outside = mode != OverlapMode::Inside;
        let trns1 = self.polygons[p1.0].trns;
        let trns2 = self.polygons[p2.0].trns;
        let mut outside = Vec::new();
        self.copy_vertices(p2, temp);

        let rec = self.polygons[p1.0].clone();
        let mut e = rec.first;
        let mut disjoint = false;
        for _ in 0..rec.nv {
            let VertexEdge { a: a1, b: b1, c: c1, next, .. } = self.edges[e];
            e = next;

            side.clear();
            let (mut all_left, mut all_right) = (true, true);
            for v in temp.iter() {
                let dot = v.x * a1 + v.y * b1 + c1;
                if dot > self.eps_area {
                    side.push(1);
                    all_right = false;
                } else if dot < -self.eps_area {
                    side.push(-1);
                    all_left = false;
                } else {
                    side.push(0);
                }
            }
            if all_right {
                continue;
            }
            if all_left {
                disjoint = true;
                break;
            }

            left.clear();
            right.clear();
            let n = temp.len();
            let mut jm1 = n - 1;
            for j in 0..n {
                if side[jm1] * side[j] < 0 {
                    let (p, q) = (temp[jm1], temp[j]);
                    let a = p.y - q.y;
                    let b = q.x - p.x;
                    let c = q.y * p.x - p.y * q.x;
                    let w = b * a1 - a * b1;
                    let cross = Coord {
                        x: (c * b1 - b * c1) / w,
                        y: (a * c1 - c * a1) / w,
                    };
                    left.push(cross);
                    right.push(cross);
                }
                if side[j] >= 0 {
                    left.push(temp[j]);
                }
                if side[j] <= 0 {
                    right.push(temp[j]);
                }
                jm1 = j;
            }
            if left.len() >= config::MAX_POLYGON_VERTICES
                || right.len() >= config::MAX_POLYGON_VERTICES
            {
                for id in outside {
                    self.free(id);
                }
                return Err(ViewError::ArenaExhausted(format!(
                    "clipped polygon exceeds {} vertices",
                    config::MAX_POLYGON_VERTICES
                )));
            }

            if keep_outside {
                transfer_vertices(temp, left, self.eps_dist);
                if temp.len() > 2 {
                    if let Some(id) = self.insert(temp, trns2)? {
                        outside.push(id);
                    }
                }
            }

            transfer_vertices(temp, right, self.eps_dist);
            if temp.len() < 3 {
                disjoint = true;
                break;
            }
        }

        if !disjoint {
            let inside = if mode != OverlapMode::Outside {
                let inside = self.insert(temp, trns1 * trns2)?;
                if inside.is_none() && mode == OverlapMode::Both {
                    None
                } else {
                    Some(inside)
                }
            } else {
                Some(None)
            };
            if let Some(inside) = inside {
                let kind = if outside.is_empty() {
                    OverlapKind::Inside
                } else {
                    OverlapKind::Partial
                };
                return Ok(Overlap { kind, inside, outside });
            }
        }

        // P2 lies outside P1: the only outside fragment is P2 itself
        for id in outside.drain(..) {
            self.free(id);
        }
        if keep_outside {
            self.copy_vertices(p2, temp);
            let area = self.polygons[p2.0].area;
            let copy = self.insert(temp, trns2)?;
            if let Some(id) = copy {
                self.polygons[id.0].area = area;
                outside.push(id);
            }
        }
        Ok(Overlap {
            kind: OverlapKind::Outside,
            inside: None,
            outside,
        })
    }
}

/// Copies vertices, merging neighbours closer than `eps_dist`.
fn transfer_vertices(to: &mut Vec<Coord<f64>>, from: &[Coord<f64>], eps_dist: f64) {
    to.clear();
    let mut n_from = from.len();
    if n_from == 0 {
        return;
    }
    let mut jm1 = n_from - 1;
    let mut j = 0;
    while j < n_from {
        let (p, q) = (from[jm1], from[j]);
        if (q.x - p.x).abs() > eps_dist || (q.y - p.y).abs() > eps_dist {
            to.push(q);
        } else if let Some(last) = to.last_mut() {
            last.x = 0.5 * (last.x + q.x);
            last.y = 0.5 * (last.y + q.y);
        } else {
            to.push(Coord {
                x: 0.5 * (p.x + q.x),
                y: 0.5 * (p.y + q.y),
            });
            // the last vertex is already merged into the first
            n_from -= 1;
        }
        jm1 = j;
        j += 1;
    }
}

/// Clips a polygon to the rectangle `[xmin, xmax] × [ymin, ymax]`.
pub fn limit_polygon(
    vertices: &[Coord<f64>],
    xmin: f64,
    xmax: f64,
    ymin: f64,
    ymax: f64,
) -> Vec<Coord<f64>> {
    let bounds: [(f64, f64, f64); 4] = [
        (1.0, 0.0, -xmin),
        (-1.0, 0.0, xmax),
        (0.0, 1.0, -ymin),
        (0.0, -1.0, ymax),
    ];
    let mut current = vertices.to_vec();
    for (a, b, c) in bounds {
        if current.is_empty() {
            break;
        }
        let dist: Vec<f64> = current.iter().map(|v| a * v.x + b * v.y + c).collect();
        let n = current.len();
        let mut next = Vec::with_capacity(n + 1);
        let mut jm1 = n - 1;
        for j in 0..n {
            if dist[jm1] * dist[j] < 0.0 {
                let h = dist[jm1] / (dist[jm1] - dist[j]);
                next.push(Coord {
                    x: current[jm1].x + h * (current[j].x - current[jm1].x),
                    y: current[jm1].y + h * (current[j].y - current[jm1].y),
                });
            }
            if dist[j] >= 0.0 {
                next.push(current[j]);
            }
            jm1 = j;
        }
        current = next;
    }
    current
}

/// Signed area of a vertex ring, positive when clockwise.
pub fn clockwise_area(vertices: &[Coord<f64>]) -> f64 {
    let n = vertices.len();
    if n < 3 {
        return 0.0;
    }
    let mut sum = 0.0;
    let mut jm1 = n - 1;
    for j in 0..n {
        sum += vertices[j].x * vertices[jm1].y - vertices[j].y * vertices[jm1].x;
        jm1 = j;
    }
    0.5 * sum
}
