// rview - a zoom-and-pan image viewer for Wayland
// Loads one raster image into a desktop window: the wheel zooms, dragging
// pans, F11 toggles fullscreen, and the maximized state survives restarts.

mod cli;
mod image_loader;
mod session;
mod viewport;
mod wayland;
mod wgpu_renderer;

use anyhow::Result;
use log::{error, info};

fn main() -> Result<()> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Parse command line arguments
    let args = cli::parse_args()?;

    info!("starting rview with source: {}", args.source.label());

    // Load the image; failure here is fatal, before any window exists
    let image = match image_loader::load(&args.source) {
        Ok(image) => image,
        Err(err) => {
            error!("no valid image: {}", err);
            return Err(err.into());
        }
    };

    info!(
        "image loaded: {}x{} pixels",
        image.width, image.height
    );

    wayland::run(image, &args)
}
