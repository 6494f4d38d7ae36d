//! camview: live camera viewer with zoom and pan

use std::path::PathBuf;

use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use tracing::{debug, info, warn};
use tracing_subscriber::fmt::time::uptime;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use camview::capture::{Camera, FeatureDescriptor, FeatureSetting, SimulatedCamera, V4l2Camera};
use camview::control::{AcquisitionControl, Preconfiguration, PropertyEditor};
use camview::display::Sdl2Display;
use camview::{utils, CameraSource, Config};

#[derive(Debug, Parser)]
#[command(version, about = "Live camera viewer with zoom and pan")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Camera id used for the preconfiguration lookup
    #[arg(long)]
    camera: Option<String>,

    #[arg(long, value_enum)]
    source: Option<CameraSource>,

    /// V4L2 device node, e.g. /dev/video0
    #[arg(long)]
    device: Option<String>,

    /// Feature to set when the camera has no preconfiguration (name=value)
    #[arg(long = "set", value_name = "NAME=VALUE")]
    settings: Vec<String>,

    /// Start acquisition as soon as the window opens
    #[arg(long)]
    autostart: bool,
}

/// Applies the `--set` arguments in place of an interactive editor
struct CliEditor {
    overrides: Vec<FeatureSetting>,
}

impl PropertyEditor for CliEditor {
    fn edit(&mut self, camera_id: &str, features: &[FeatureDescriptor]) -> Vec<FeatureSetting> {
        for feature in features {
            debug!(camera_id, name = %feature.name, value = %feature.value, "Feature");
        }
        self.overrides.clone()
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("camview=info"));
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_timer(uptime()));
    #[cfg(feature = "profiling")]
    let registry = registry.with(tracing_tracy::TracyLayer::default());
    registry.init();
}

fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(camera) = cli.camera {
        config.camera.id = camera;
    }
    if let Some(source) = cli.source {
        config.camera.source = source;
    }
    if let Some(device) = cli.device {
        config.camera.device = device;
    }
    let overrides = utils::parse_settings(cli.settings.iter().map(String::as_str))?;

    info!(camera_id = %config.camera.id, source = ?config.camera.source, "camview launching");

    let camera: Box<dyn Camera> = match config.camera.source {
        CameraSource::Simulated => Box::new(SimulatedCamera::new(config.camera.simulated.clone())),
        CameraSource::V4l2 => {
            if config.camera.device.is_empty() {
                let found = utils::auto_detect_device()?;
                info!("Using capture device: {} ({})", found.path, found.format);
                Box::new(V4l2Camera::new(found.path).with_format(found.format))
            } else {
                info!("Using capture device: {}", config.camera.device);
                Box::new(V4l2Camera::new(config.camera.device.clone()))
            }
        }
    };

    let preconfig = Preconfiguration::new(config.preconfigured.iter().cloned());
    if preconfig.lookup(&config.camera.id).is_some() && !overrides.is_empty() {
        warn!("Camera is preconfigured; --set values are ignored");
    }
    let mut control = AcquisitionControl::new(camera, config.bridge.clone(), preconfig)?
        .with_editor(Box::new(CliEditor { overrides }));

    let sdl_context = sdl2::init().map_err(|e| eyre!(e))?;
    let mut display = Sdl2Display::new(&sdl_context, &config.display, config.viewport.clone())?;

    if cli.autostart {
        control.start(&config.camera.id)?;
    }
    display.run(&sdl_context, &mut control, &config.camera.id)?;

    control.stop();
    info!("camview shutting down");
    Ok(())
}
