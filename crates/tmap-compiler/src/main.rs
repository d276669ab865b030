// main.rs -- command line front end for the tile compiler

use std::path::PathBuf;
use std::process;

use tmap_compiler::bsp::compile_tile;
use tmap_compiler::config::Config;
use tmap_compiler::textures::NoTextures;

const USAGE: &str = "\
usage: tmap [options] file.map

geometry:
  -nocsg          skip brush subtraction
  -nodetail       drop detail brushes
  -fulldetail     treat detail brushes as structural
  -nowater        drop water brushes
  -nomerge        keep coplanar faces separate
  -nosubdiv       never subdivide large faces
  -notjunc        skip T-junction fixing
  -noweld         emit every vertex unshared
  -noshare        never share edges between faces
  -nobackclip     keep downward-facing surfaces
  -micro <v>      microbrush warning volume (default 1.0)
  -subdivide <v>  face subdivision size (default 1024)

lighting:
  -quant <n>      lightmap luxel shift, 1..6 (default 4)
  -extra          5 jittered samples per luxel
  -scale <v>      output brightness (default 1.0)
  -contrast <v>   contrast factor (default 1.0)
  -saturation <v> saturation factor (default 1.0)
  -day            also compile the day lightmap
";

fn usage() -> ! {
    eprint!("{USAGE}");
    process::exit(1)
}

fn float_arg(args: &mut impl Iterator<Item = String>, name: &str) -> f32 {
    match args.next().and_then(|v| v.parse().ok()) {
        Some(v) => v,
        None => {
            eprintln!("{name} needs a numeric argument");
            usage()
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    let mut config = Config::default();
    let mut map_path: Option<PathBuf> = None;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-nocsg" => config.nocsg = true,
            "-nodetail" => config.nodetail = true,
            "-fulldetail" => config.fulldetail = true,
            "-nowater" => config.nowater = true,
            "-nomerge" => config.nomerge = true,
            "-nosubdiv" => config.nosubdiv = true,
            "-notjunc" => config.notjunc = true,
            "-noweld" => config.noweld = true,
            "-noshare" => config.noshare = true,
            "-nobackclip" => config.nobackclip = true,
            "-micro" => config.microvolume = float_arg(&mut args, "-micro"),
            "-subdivide" => config.subdivide_size = float_arg(&mut args, "-subdivide"),
            "-quant" => config.lightquant = (float_arg(&mut args, "-quant") as u8).clamp(1, 6),
            "-extra" => config.extrasamples = true,
            "-scale" => config.brightness = float_arg(&mut args, "-scale"),
            "-contrast" => config.contrast = float_arg(&mut args, "-contrast"),
            "-saturation" => config.saturation = float_arg(&mut args, "-saturation"),
            "-day" => config.day = true,
            "-h" | "-help" | "--help" => usage(),
            _ if arg.starts_with('-') => {
                eprintln!("unknown option {arg}");
                usage()
            }
            _ => {
                if map_path.replace(PathBuf::from(arg)).is_some() {
                    eprintln!("only one map file at a time");
                    usage()
                }
            }
        }
    }

    let Some(path) = map_path else { usage() };
    match compile_tile(&path, &mut config, &NoTextures) {
        Ok(out) => println!("wrote {}", out.display()),
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    }
}
