// Command line interface module
// Resolves where the displayed image comes from: an explicit path, a stdin
// pipe, or the bundled default.

use std::io::{self, Read};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;

/// rview - a zoom-and-pan image viewer for Wayland
#[derive(Parser, Debug)]
#[command(name = "rview")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the image file (also delivered by "open with" file
    /// associations; image data may be piped to stdin instead)
    #[arg(value_name = "IMAGE")]
    pub image: Option<PathBuf>,

    /// Disable GPU rendering and use the shared-memory software path
    #[arg(long, default_value = "false")]
    pub cpu: bool,
}

/// Where the displayed image comes from.
#[derive(Debug)]
pub enum ImageSource {
    /// Explicit path from the command line or a file association.
    File(PathBuf),
    /// Raw image bytes piped through stdin.
    Piped(Vec<u8>),
    /// The placeholder image shipped next to the executable.
    BundledDefault,
    /// Switching to a sibling image at runtime. Nothing produces this yet;
    /// loading it reports an explicit unimplemented error.
    #[allow(dead_code)]
    NextInDirectory,
}

impl ImageSource {
    /// Label shown in the window title.
    pub fn label(&self) -> String {
        match self {
            ImageSource::File(path) => path.display().to_string(),
            ImageSource::Piped(_) => "stdin".to_string(),
            ImageSource::BundledDefault => crate::image_loader::bundled_default_path()
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "default".to_string()),
            ImageSource::NextInDirectory => "next".to_string(),
        }
    }
}

/// Parsed arguments with the image source resolved.
#[derive(Debug)]
pub struct ViewerArgs {
    pub source: ImageSource,
    /// GPU rendering is the default; `--cpu` turns it off.
    pub use_gpu: bool,
}

/// Check if stdin has data available (is a pipe)
fn stdin_has_data() -> bool {
    !atty::is(atty::Stream::Stdin)
}

/// Read image data from stdin
fn read_stdin() -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    io::stdin()
        .read_to_end(&mut buffer)
        .context("failed to read image data from stdin")?;
    Ok(buffer)
}

/// Parse command line arguments and pick the image source. An explicit path
/// wins over a pipe; with neither, the bundled default is shown.
pub fn parse_args() -> Result<ViewerArgs> {
    let args = Args::parse();

    let source = if let Some(path) = args.image {
        ImageSource::File(path)
    } else if stdin_has_data() {
        let data = read_stdin()?;
        if data.is_empty() {
            bail!("no data received from stdin");
        }
        ImageSource::Piped(data)
    } else {
        ImageSource::BundledDefault
    };

    Ok(ViewerArgs {
        source,
        use_gpu: !args.cpu, // GPU is default, --cpu disables it
    })
}
