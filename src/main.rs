mod compass;
mod config;
mod display;
mod raster;
mod util;
mod weather;

use crate::{
    config::{CompassConfig, Config},
    display::{Dashboard, Inputs, TerminalSession},
    raster::Raster,
    weather::Weather,
};
use anyhow::Context;
use log::{debug, info, warn, LevelFilter};
use std::{fs::OpenOptions, path::Path};

fn main() -> anyhow::Result<()> {
    let config = Config::load()?;
    init_logging(config.log_file.as_deref())?;
    info!(
        "Starting dashboard for {} {} ({} units)",
        config.zip_code,
        config.country,
        config.units.as_str()
    );

    // Anything that goes wrong before the dashboard is up is fatal
    let weather = Weather::new(&config);
    let snapshot = weather
        .current()
        .context("Error fetching current weather")?;
    let icon = weather
        .icon(&snapshot.condition.icon)
        .context("Error fetching weather icon")?;
    let compass = config
        .compass
        .as_ref()
        .and_then(|compass| compass_panel(snapshot.wind.deg, compass));
    let dashboard = Dashboard::new(&snapshot, config.units, icon, compass);

    // Signals are caught from here on, so raw mode is always undone.
    // Session is restored on drop, including when run() fails.
    let inputs = Inputs::listen()?;
    let mut session = TerminalSession::start()?;
    display::run(&mut session, &dashboard, inputs)
}

/// Logs go to stderr by default, but that's the same screen the dashboard is
/// drawn on. Set a log file to see anything while it's running.
fn init_logging(log_file: Option<&Path>) -> anyhow::Result<()> {
    let mut builder = env_logger::builder();
    builder.filter_level(LevelFilter::Warn).parse_default_env();
    if let Some(path) = log_file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| {
                format!("Error opening log file {}", path.display())
            })?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.init();
    Ok(())
}

/// Draw the wind compass. The compass is just decoration, so if it can't be
/// drawn we show the rest of the dashboard without it.
fn compass_panel(bearing: f64, config: &CompassConfig) -> Option<Raster> {
    let style = &config.style;
    debug!(
        "Drawing {}x{} compass for {bearing}° ({} ring on {})",
        style.size.width,
        style.size.height,
        style.outer_color,
        style.inner_color
    );
    let raster = match compass::render(bearing, &config.style) {
        Ok(raster) => raster,
        Err(err) => {
            warn!("Skipping compass: {err}");
            return None;
        }
    };

    if let Some(path) = &config.path {
        match raster.save_png(path) {
            Ok(()) => info!("Saved compass to {}", path.display()),
            Err(err) => warn!("Error saving compass: {err:#}"),
        }
    }
    Some(raster)
}
