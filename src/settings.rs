use anyhow::{anyhow, Context, Result};
use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::env;
use std::fmt;
use std::path::PathBuf;

use crate::obstructed::Params;
use crate::unobstructed::Method;

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> Settings {
        Settings {
            geom_name: "demos/parallel_squares.toml".to_string(),
            ..Settings::default()
        }
    }

    #[test]
    fn limits_are_clamped() {
        let mut s = settings();
        s.eps_adap = 1.0e-9;
        s.max_recursion = 2;
        s.min_recursion = 6;
        s.max_recurs_ali = 40;
        s.validate();
        assert_eq!(s.eps_adap, MIN_TOLERANCE);
        assert_eq!(s.max_recursion, 4);
        assert_eq!(s.min_recursion, 2);
        assert_eq!(s.max_recurs_ali, 20);
    }

    #[test]
    fn line_recursions_stay_in_range() {
        let mut s = settings();
        s.max_recurs_ali = 1;
        s.validate();
        assert_eq!(s.max_recurs_ali, 4);
        s.max_recurs_ali = 16;
        s.validate();
        assert_eq!(s.max_recurs_ali, 16);
    }

    #[test]
    fn column_needs_row() {
        let mut s = settings();
        s.col = 3;
        s.validate();
        assert_eq!(s.col, 0);
    }

    #[test]
    fn cli_overrides() {
        let mut s = settings();
        let args = CliArgs::parse_from([
            "viewfactor",
            "--geo",
            "room.obj",
            "--eps",
            "1e-5",
            "--row",
            "2",
            "--method",
            "dai",
            "--encl",
        ]);
        s.apply(args);
        assert_eq!(s.geom_name, "room.obj");
        assert_eq!(s.eps_adap, 1.0e-5);
        assert_eq!(s.row, 2);
        assert_eq!(s.method_override, Some(Method::Dai));
        assert!(s.enclosure);
        assert!(!s.prj_reverse);
    }
}

/// Smallest accepted convergence tolerance.
pub const MIN_TOLERANCE: f64 = 1.0e-7;

/// Runtime configuration for the application.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Settings {
    pub geom_name: String,
    /// Convergence tolerance of the 3-D integrations.
    pub eps_adap: f64,
    pub max_recursion: usize,
    pub min_recursion: usize,
    pub max_recurs_ali: usize,
    /// Convergence tolerance of obstructed 2-D integration.
    pub eps_obstr: f64,
    /// 1-based row to compute, 0 for all.
    #[serde(default)]
    pub row: usize,
    /// 1-based column to compute with `row`, 0 for all.
    #[serde(default)]
    pub col: usize,
    #[serde(default)]
    pub prj_reverse: bool,
    /// Treat the scene as an enclosure even if the file does not say so.
    #[serde(default)]
    pub enclosure: bool,
    #[serde(default)]
    pub method_override: Option<Method>,
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    #[serde(default)]
    pub verbosity: u8,
    #[serde(default)]
    pub threads: usize,
}

fn default_output_dir() -> String {
    "output".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            geom_name: String::new(),
            eps_adap: 1.0e-4,
            max_recursion: 8,
            min_recursion: 0,
            max_recurs_ali: 12,
            eps_obstr: 1.0e-4,
            row: 0,
            col: 0,
            prj_reverse: false,
            enclosure: false,
            method_override: None,
            output_dir: default_output_dir(),
            verbosity: 0,
            threads: 0,
        }
    }
}

impl Settings {
    /// Controls for 3-D obstructed integration.
    pub fn params(&self) -> Params {
        Params {
            eps_adap: self.eps_adap,
            max_recursion: self.max_recursion,
            min_recursion: self.min_recursion,
            prj_reverse: self.prj_reverse,
        }
    }

    /// Controls for 2-D obstructed integration.
    pub fn params_2d(&self) -> Params {
        Params {
            eps_adap: self.eps_obstr,
            ..self.params()
        }
    }

    /// Applies command-line overrides.
    pub fn apply(&mut self, args: CliArgs) {
        if let Some(geo) = args.geo {
            self.geom_name = geo;
        }
        if let Some(eps) = args.eps {
            self.eps_adap = eps;
        }
        if let Some(eps) = args.eps_obstr {
            self.eps_obstr = eps;
        }
        if let Some(rec) = args.max_recurs {
            self.max_recursion = rec;
        }
        if let Some(rec) = args.min_recurs {
            self.min_recursion = rec;
        }
        if let Some(rec) = args.max_recurs_ali {
            self.max_recurs_ali = rec;
        }
        if let Some(row) = args.row {
            self.row = row;
        }
        if let Some(col) = args.col {
            self.col = col;
        }
        if let Some(method) = args.method {
            self.method_override = Some(method);
        }
        if let Some(dir) = args.output {
            self.output_dir = dir;
        }
        if let Some(verbosity) = args.verbosity {
            self.verbosity = verbosity;
        }
        if let Some(threads) = args.threads {
            self.threads = threads;
        }
        self.prj_reverse |= args.reverse;
        self.enclosure |= args.encl;
    }

    /// Resets out-of-range controls with a warning.
    pub fn validate(&mut self) {
        if !(self.eps_adap >= MIN_TOLERANCE) {
            eprintln!("Warning: convergence tolerance limited to {:e}", MIN_TOLERANCE);
            self.eps_adap = MIN_TOLERANCE;
        }
        if !(self.eps_obstr >= MIN_TOLERANCE) {
            eprintln!("Warning: obstructed convergence limited to {:e}", MIN_TOLERANCE);
            self.eps_obstr = MIN_TOLERANCE;
        }
        if self.max_recursion < 4 {
            eprintln!("Warning: maximum recursions reset to 4");
            self.max_recursion = 4;
        }
        if self.max_recursion > 12 {
            eprintln!("Warning: maximum recursions may be too large");
        }
        if self.min_recursion > 2 {
            eprintln!("Warning: minimum recursions reset to 2");
            self.min_recursion = 2;
        }
        if !(4..=20).contains(&self.max_recurs_ali) {
            self.max_recurs_ali = self.max_recurs_ali.clamp(4, 20);
            eprintln!(
                "Warning: adaptive line recursions reset to {}",
                self.max_recurs_ali
            );
        }
        if self.col > 0 && self.row == 0 {
            eprintln!("Warning: a column needs a row, computing all pairs");
            self.col = 0;
        }
    }
}

/// Configuration file, then `VIEWFACTOR_*` environment, then command line.
pub fn load_config() -> Result<Settings> {
    load_config_with(CliArgs::parse())
}

pub fn load_config_with(args: CliArgs) -> Result<Settings> {
    let root = retrieve_project_root()?;

    let default_config_file = root.join("config/default.toml");
    let local_config = root.join("config/local.toml");

    let config_file = if local_config.exists() {
        println!("Using local configuration: {:?}", local_config);
        local_config
    } else {
        println!("Using default configuration: {:?}", default_config_file);
        default_config_file
    };

    let settings = Config::builder()
        .add_source(File::from(config_file).required(true))
        .add_source(Environment::with_prefix("viewfactor"))
        .build()
        .context("Error loading configuration")?;

    let mut config: Settings = settings
        .try_deserialize()
        .context("Error deserializing configuration")?;

    config.apply(args);
    config.validate();

    Ok(config)
}

/// Retrieve the project root directory.
/// This function tries to find the project root directory in different ways:
/// 1. If the CARGO_MANIFEST_DIR environment variable is set, use it.
/// 2. If the VIEWFACTOR_ROOT_DIR environment variable is set, use it.
/// 3. If the "config" subdirectory is found in the executable directory or any of its parents, use it.
fn retrieve_project_root() -> Result<PathBuf> {
    if let Ok(manifest_dir) = env::var("CARGO_MANIFEST_DIR") {
        return Ok(PathBuf::from(manifest_dir));
    }
    if let Ok(path) = env::var("VIEWFACTOR_ROOT_DIR") {
        return Ok(PathBuf::from(path));
    }

    let exe_path = env::current_exe().context("Failed to get current executable path")?;
    let mut current_dir = exe_path.parent();
    while let Some(dir) = current_dir {
        if dir.join("config").is_dir() {
            return Ok(dir.to_path_buf());
        }
        current_dir = dir.parent();
    }
    Err(anyhow!("Could not find project root directory"))
}

#[derive(Parser, Debug)]
#[command(version, about = "viewfactor - radiative view factors between planar surfaces")]
pub struct CliArgs {
    /// File path to the input geometry: a TOML scene or a Wavefront .obj mesh.
    #[arg(short, long)]
    geo: Option<String>,

    /// Convergence tolerance of the adaptive integrations.
    #[arg(short, long)]
    eps: Option<f64>,

    /// Convergence tolerance of obstructed 2-D integration.
    #[arg(long)]
    eps_obstr: Option<f64>,

    /// Maximum recursion depth of obstructed integration.
    #[arg(long)]
    max_recurs: Option<usize>,

    /// Minimum recursion depth of obstructed integration.
    #[arg(long)]
    min_recurs: Option<usize>,

    /// Maximum recursion depth of adaptive line integration.
    #[arg(long)]
    max_recurs_ali: Option<usize>,

    /// Compute only this row (1-based input number).
    #[arg(long)]
    row: Option<usize>,

    /// Compute only this column of the selected row (1-based input number).
    #[arg(long, requires = "row")]
    col: Option<usize>,

    /// Reverse the chosen projection direction for obstructed pairs.
    #[arg(long)]
    reverse: bool,

    /// Treat the geometry as a closed enclosure and normalise the rows.
    #[arg(long)]
    encl: bool,

    /// Force the unobstructed method: DAI, SAI, DLI, SLI or ALI.
    #[arg(short, long)]
    method: Option<Method>,

    /// Directory for the factor matrix and summary.
    #[arg(short, long)]
    output: Option<String>,

    /// 0 = summary, 1 = progress and warnings, 2 = per-pair trace.
    #[arg(short, long)]
    verbosity: Option<u8>,

    /// Worker threads, 0 for one per core.
    #[arg(short, long)]
    threads: Option<usize>,
}

impl fmt::Display for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Settings:
  - Geometry: {}
  - Tolerance: {:e}
  - Obstructed 2-D Tolerance: {:e}
  - Recursions: {} to {}
  - ALI Recursions: {}
  - Row/Column: {}/{}
  - Reverse Projection: {}
  - Enclosure: {}
  - Method Override: {}
  ",
            self.geom_name,
            self.eps_adap,
            self.eps_obstr,
            self.min_recursion,
            self.max_recursion,
            self.max_recurs_ali,
            self.row,
            self.col,
            self.prj_reverse,
            self.enclosure,
            self.method_override
                .map_or_else(|| "none".to_string(), |m| m.to_string()),
        )
    }
}
