//! Radiative view factors between planar surfaces in 2-D and 3-D.
//!
//! A [`scene::Scene`] is loaded and validated, [`assembler::compute`] fills
//! the matrix of area-weighted factors pair by pair, and
//! [`output::writeup`] writes the results.

pub mod analytic;
pub mod assembler;
pub mod config;
pub mod cull;
pub mod error;
pub mod geom;
pub mod matrix;
pub mod obstructed;
pub mod output;
pub mod polygon;
pub mod postprocess;
pub mod quadrature;
pub mod result;
pub mod scene;
pub mod settings;
pub mod stats;
pub mod unobstructed;
pub mod view2d;
