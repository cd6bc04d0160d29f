use std::path::Path;
use std::process;

use viewfactor::scene::Scene;
use viewfactor::settings;
use viewfactor::{assembler, output};

fn main() {
    let settings = settings::load_config().unwrap_or_else(|err| {
        eprintln!("Error: {:#}", err);
        process::exit(1);
    });
    if settings.verbosity > 0 {
        println!("{}", settings);
    }

    let scene = Scene::from_file(Path::new(&settings.geom_name)).unwrap_or_else(|err| {
        eprintln!("Error: {:#}", err);
        process::exit(1);
    });

    let result = assembler::compute(&scene, &settings).unwrap_or_else(|err| {
        eprintln!("Error: {}", err);
        process::exit(1);
    });
    result.print();

    if let Err(err) = output::writeup(&result, Path::new(&settings.output_dir)) {
        eprintln!("Error: {:#}", err);
        process::exit(1);
    }
}
