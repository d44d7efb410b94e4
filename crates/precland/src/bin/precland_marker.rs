//! precland-marker: render printable marker images.

use clap::Parser;
use image::GrayImage as PngImage;
use precland::aruco::builtins::{builtin_dictionary, DICT_4X4_50};
use precland::aruco::{render_marker, Dictionary};
use std::path::PathBuf;

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "precland-marker")]
#[command(about = "Render landing pad markers as PNG images")]
#[command(version)]
struct Cli {
    /// Builtin dictionary name or dictionary JSON file.
    #[arg(long, default_value = DICT_4X4_50)]
    dictionary: String,

    /// Marker ids to render.
    #[arg(long = "id", required = true, num_args = 1..)]
    ids: Vec<u32>,

    /// Pixels per marker cell.
    #[arg(long, default_value_t = 50)]
    cell_px: usize,

    /// White margin around the marker, in cells.
    #[arg(long, default_value_t = 1)]
    quiet_zone: usize,

    /// Output directory; files are named `<dictionary>_<id>.png`.
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,
}

fn main() -> CliResult<()> {
    let cli = Cli::parse();
    let dict = match builtin_dictionary(&cli.dictionary) {
        Some(dict) => dict,
        None => Dictionary::load_json(&cli.dictionary)?,
    };
    if cli.cell_px == 0 {
        return Err("--cell-px must be at least 1".into());
    }

    std::fs::create_dir_all(&cli.out_dir)?;
    for &id in &cli.ids {
        let marker = render_marker(&dict, id, cli.cell_px, cli.quiet_zone)?;
        let png = PngImage::from_raw(marker.width as u32, marker.height as u32, marker.data)
            .ok_or("marker buffer does not match its size")?;
        let path = cli.out_dir.join(format!("{}_{id}.png", dict.name));
        png.save(&path)?;
        println!("{}", path.display());
    }
    Ok(())
}
