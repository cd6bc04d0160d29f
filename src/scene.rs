//! Input geometry: TOML scene files and Wavefront OBJ meshes.
//!
//! Surfaces are numbered from 1 in the input. Internally they are zero-based
//! and reordered so that obstruction-only surfaces follow every surface that
//! is a row of the matrix; [`Scene::numbers`] maps internal indices back to
//! input numbers. Base and combine references are resolved and checked here,
//! and subsurfaces, masks and nulls are checked to lie inside their base.

use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context};
use geo_types::Coord;
use nalgebra::{Point2, Point3};
use serde::Deserialize;

use crate::config;
use crate::error::{Result, ViewError};
use crate::geom::{Facet, Role, Surface};
use crate::matrix::SurfaceInfo;
use crate::polygon::{OverlapMode, PolygonArena};
use crate::view2d::{Segment, Surface2D};


/// One `[[surface]]` table of a scene file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SurfaceRecord {
    pub name: Option<String>,
    pub vertices: Vec<Vec<f64>>,
    #[serde(default)]
    pub role: Role,
    /// 1-based number of the base surface.
    pub base: Option<usize>,
    /// 1-based number of the surface this one is merged into.
    pub cmbn: Option<usize>,
    pub emit: Option<f64>,
    pub trns: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct SceneFile {
    title: Option<String>,
    #[serde(default = "default_dimension")]
    dimension: usize,
    #[serde(default)]
    encl: bool,
    #[serde(rename = "surface", default)]
    surfaces: Vec<SurfaceRecord>,
}

fn default_dimension() -> usize {
    3
}

#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    ThreeD(Vec<Surface>),
    TwoD(Vec<Surface2D>),
}

/// Validated geometry ready for the assembler.
#[derive(Debug, Clone, PartialEq)]
pub struct Scene {
    pub title: String,
    pub enclosure: bool,
    pub geometry: Geometry,
    /// Input number of each internal surface.
    pub numbers: Vec<usize>,
    /// Surfaces that are rows and columns of the matrix; they come first.
    pub n_rad: usize,
}

impl Scene {
    /// Loads a `.obj` mesh or a TOML scene, chosen by extension.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("obj") => Self::from_obj(path),
            _ => {
                let text = fs::read_to_string(path)
                    .with_context(|| format!("failed to read scene file {}", path.display()))?;
                Self::from_toml_str(&text).with_context(|| format!("in scene file {}", path.display()))
            }
        }
    }

    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        let file: SceneFile = toml::from_str(text)?;
        let title = file.title.unwrap_or_default();
        Ok(Self::from_records(&title, file.dimension, file.encl, file.surfaces)?)
    }

    /// Every face of every model becomes a radiating surface. Faces with
    /// more than four vertices are fanned into triangles.
    pub fn from_obj(path: &Path) -> anyhow::Result<Self> {
        let (models, _) = tobj::load_obj(path, &tobj::LoadOptions::default())
            .map_err(|e| anyhow!("failed to load OBJ file {}: {}", path.display(), e))?;

        let mut records = Vec::new();
        for model in &models {
            let mesh = &model.mesh;
            let position = |i: u32| {
                let i = 3 * i as usize;
                (0..3).map(|k| mesh.positions[i + k] as f64).collect::<Vec<f64>>()
            };
            let arities: Vec<usize> = if mesh.face_arities.is_empty() {
                vec![3; mesh.indices.len() / 3]
            } else {
                mesh.face_arities.iter().map(|&a| a as usize).collect()
            };

            let mut next = 0;
            for arity in arities {
                let face = &mesh.indices[next..next + arity];
                next += arity;
                if arity <= config::MAX_INPUT_VERTICES {
                    records.push(SurfaceRecord {
                        name: Some(format!("{}:{}", model.name, records.len() + 1)),
                        vertices: face.iter().map(|&i| position(i)).collect(),
                        role: Role::Rad,
                        base: None,
                        cmbn: None,
                        emit: None,
                        trns: None,
                    });
                    continue;
                }
                for k in 1..arity - 1 {
                    records.push(SurfaceRecord {
                        name: Some(format!("{}:{}", model.name, records.len() + 1)),
                        vertices: [face[0], face[k], face[k + 1]].iter().map(|&i| position(i)).collect(),
                        role: Role::Rad,
                        base: None,
                        cmbn: None,
                        emit: None,
                        trns: None,
                    });
                }
            }
        }

        let title = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        Ok(Self::from_records(&title, 3, false, records)?)
    }

    /// Validates surface records and builds the internal ordering.
    pub fn from_records(
        title: &str,
        dimension: usize,
        enclosure: bool,
        records: Vec<SurfaceRecord>,
    ) -> Result<Self> {
        if records.is_empty() {
            return Err(ViewError::InvalidInput("no surfaces".to_string()));
        }
        if dimension != 2 && dimension != 3 {
            return Err(ViewError::InvalidInput(format!("dimension {} is not 2 or 3", dimension)));
        }

        // radiating surfaces first, obstructions after, input order kept within each
        let order: Vec<usize> = (0..records.len())
            .filter(|&i| records[i].role != Role::Obso)
            .chain((0..records.len()).filter(|&i| records[i].role == Role::Obso))
            .collect();
        let mut internal = vec![0; records.len()];
        for (i, &k) in order.iter().enumerate() {
            internal[k] = i;
        }
        let n_rad = records.iter().filter(|r| r.role != Role::Obso).count();

        let links = records
            .iter()
            .enumerate()
            .map(|(i, r)| resolve_links(i, r, &records))
            .collect::<Result<Vec<_>>>()?;

        let numbers: Vec<usize> = order.iter().map(|&k| k + 1).collect();
        let geometry = if dimension == 3 {
            let mut surfaces = Vec::with_capacity(records.len());
            for &k in &order {
                let r = &records[k];
                let vertices = r
                    .vertices
                    .iter()
                    .map(|v| match v.as_slice() {
                        [x, y, z] => Ok(Point3::new(*x, *y, *z)),
                        _ => Err(coordinate_error(k, 3)),
                    })
                    .collect::<Result<Vec<_>>>()?;
                let mut s = Surface::new(k, surface_name(k, r), vertices, r.role)?;
                s.base = links[k].0.map(|b| internal[b]);
                s.cmbn = links[k].1.map(|c| internal[c]);
                s.emit = emittance(k, r)?;
                s.trns = transmittance(k, r)?;
                surfaces.push(s);
            }
            for (i, s) in surfaces.iter().enumerate() {
                if let Some(b) = s.base {
                    check_within_base(numbers[i], numbers[b], &s.facet, &surfaces[b].facet)?;
                }
            }
            Geometry::ThreeD(surfaces)
        } else {
            let mut surfaces = Vec::with_capacity(records.len());
            for &k in &order {
                let r = &records[k];
                if r.vertices.len() != 2 {
                    return Err(ViewError::VertexCount(k + 1, r.vertices.len()));
                }
                let points = r
                    .vertices
                    .iter()
                    .map(|v| match v.as_slice() {
                        [x, y] => Ok(Point2::new(*x, *y)),
                        _ => Err(coordinate_error(k, 2)),
                    })
                    .collect::<Result<Vec<_>>>()?;
                if r.trns.is_some_and(|t| t > 0.0) {
                    return Err(ViewError::InvalidInput(format!(
                        "surface {}: transmittance is not supported in 2-D",
                        k + 1
                    )));
                }
                let mut s = Surface2D::new(k, surface_name(k, r), points[0], points[1], r.role)?;
                s.base = links[k].0.map(|b| internal[b]);
                s.cmbn = links[k].1.map(|c| internal[c]);
                s.emit = emittance(k, r)?;
                surfaces.push(s);
            }
            for (i, s) in surfaces.iter().enumerate() {
                if let Some(b) = s.base {
                    check_within_segment(numbers[i], numbers[b], &s.segment, &surfaces[b].segment)?;
                }
            }
            Geometry::TwoD(surfaces)
        };

        Ok(Self {
            title: title.to_string(),
            enclosure,
            geometry,
            numbers,
            n_rad,
        })
    }

    pub fn len(&self) -> usize {
        self.numbers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.numbers.is_empty()
    }

    pub fn dimension(&self) -> usize {
        match self.geometry {
            Geometry::ThreeD(_) => 3,
            Geometry::TwoD(_) => 2,
        }
    }

    /// Row descriptions of the matrix surfaces.
    pub fn infos(&self) -> Vec<SurfaceInfo> {
        match &self.geometry {
            Geometry::ThreeD(surfaces) => surfaces[..self.n_rad]
                .iter()
                .zip(&self.numbers)
                .map(|(s, &number)| SurfaceInfo {
                    name: s.name.clone(),
                    number,
                    area: s.area(),
                    emit: s.emit,
                    role: s.role,
                    base: s.base,
                    cmbn: s.cmbn,
                })
                .collect(),
            Geometry::TwoD(surfaces) => surfaces[..self.n_rad]
                .iter()
                .zip(&self.numbers)
                .map(|(s, &number)| SurfaceInfo {
                    name: s.name.clone(),
                    number,
                    area: s.area(),
                    emit: s.emit,
                    role: s.role,
                    base: s.base,
                    cmbn: s.cmbn,
                })
                .collect(),
        }
    }
}

fn surface_name(k: usize, r: &SurfaceRecord) -> String {
    r.name.clone().unwrap_or_else(|| format!("s{}", k + 1))
}

fn coordinate_error(k: usize, dimension: usize) -> ViewError {
    ViewError::InvalidInput(format!(
        "surface {}: vertices need {} coordinates",
        k + 1,
        dimension
    ))
}

fn emittance(k: usize, r: &SurfaceRecord) -> Result<f64> {
    let emit = r.emit.unwrap_or(config::DEFAULT_EMITTANCE);
    if emit <= 0.0 || emit > 1.0 {
        return Err(ViewError::InvalidInput(format!(
            "surface {}: emittance {} is not in (0, 1]",
            k + 1,
            emit
        )));
    }
    Ok(emit)
}

fn transmittance(k: usize, r: &SurfaceRecord) -> Result<f64> {
    let trns = r.trns.unwrap_or(0.0);
    if !(0.0..1.0).contains(&trns) {
        return Err(ViewError::InvalidInput(format!(
            "surface {}: transmittance {} is not in [0, 1)",
            k + 1,
            trns
        )));
    }
    if trns > 0.0 && r.role != Role::Obso {
        return Err(ViewError::InvalidInput(format!(
            "surface {}: only obstruction surfaces may be transparent",
            k + 1
        )));
    }
    Ok(trns)
}

/// Zero-based base and combine targets of input surface `i`.
fn resolve_links(i: usize, r: &SurfaceRecord, records: &[SurfaceRecord]) -> Result<(Option<usize>, Option<usize>)> {
    let number = i + 1;
    let lookup = |target: Option<usize>| -> Result<Option<usize>> {
        match target {
            None => Ok(None),
            Some(t) if t == 0 || t > records.len() => {
                Err(ViewError::BadReference(number, t, "no such surface"))
            }
            Some(t) if t == number => Err(ViewError::BadReference(number, t, "refers to itself")),
            Some(t) => Ok(Some(t - 1)),
        }
    };

    let base = lookup(r.base)?;
    match base {
        None if r.role.needs_base() => {
            return Err(ViewError::BadReference(number, 0, "a base surface is required"));
        }
        Some(b) if !r.role.needs_base() => {
            return Err(ViewError::BadReference(
                number,
                b + 1,
                "only subsurfaces, masks and nulls have a base",
            ));
        }
        Some(b) if records[b].role != Role::Rad => {
            return Err(ViewError::BadReference(number, b + 1, "a base must be a radiating surface"));
        }
        _ => {}
    }

    let cmbn = lookup(r.cmbn)?;
    if let Some(c) = cmbn {
        if r.role == Role::Obso || records[c].role == Role::Obso {
            return Err(ViewError::BadReference(number, c + 1, "obstructions cannot be combined"));
        }
        if c > i {
            return Err(ViewError::BadReference(number, c + 1, "must combine into an earlier surface"));
        }
    }
    Ok((base, cmbn))
}

/// A subsurface must be coplanar with its base and inside it.
fn check_within_base(number: usize, base_number: usize, sub: &Facet, base: &Facet) -> Result<()> {
    let outside = ViewError::SubsurfaceOutsideBase(number, base_number);
    if sub.dc.normal.dot(&base.dc.normal) < 1.0 - config::PLANE_TOLERANCE {
        return Err(outside);
    }
    if sub
        .vertices
        .iter()
        .any(|p| base.dc.distance(p).abs() > config::PLANE_TOLERANCE * base.rc)
    {
        return Err(outside);
    }

    let (u, v) = base.frame();
    // clockwise in the base frame
    let project = |vertices: &[Point3<f64>]| -> Vec<Coord<f64>> {
        vertices
            .iter()
            .rev()
            .map(|p| {
                let d = p - base.centroid;
                Coord {
                    x: d.dot(&u),
                    y: d.dot(&v),
                }
            })
            .collect()
    };
    let mut arena = PolygonArena::new(1.0e-9 * base.rc, config::EPS2 * base.area);
    let outer = arena.insert(&project(&base.vertices), 1.0)?;
    let inner = arena.insert(&project(&sub.vertices), 1.0)?;
    let (Some(outer), Some(inner)) = (outer, inner) else {
        return Err(outside);
    };
    let overlap = arena.overlap(outer, inner, OverlapMode::Inside)?;
    let inside = overlap.inside.map_or(0.0, |id| arena.area(id));
    if (1.0 - inside / sub.area).abs() > config::ENCLOSED_AREA_TOLERANCE {
        return Err(outside);
    }
    Ok(())
}

/// A 2-D subsurface must lie along its base, facing the same way.
fn check_within_segment(number: usize, base_number: usize, sub: &Segment, base: &Segment) -> Result<()> {
    let eps = config::PLANE_TOLERANCE * base.length;
    let along = |p: &Point2<f64>| (p - base.v1).dot(&(base.v2 - base.v1)) / (base.length * base.length);
    let inside = sub.normal.dot(&base.normal) > 0.0
        && [&sub.v1, &sub.v2].iter().all(|p| {
            let t = along(p);
            base.distance(p).abs() <= eps && t >= -config::PLANE_TOLERANCE && t <= 1.0 + config::PLANE_TOLERANCE
        });
    if inside {
        Ok(())
    } else {
        Err(ViewError::SubsurfaceOutsideBase(number, base_number))
    }
}
