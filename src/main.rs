//! Aperture demo: enumerate devices, stream frames, poke properties.

use std::time::Instant;

use color_eyre::eyre::{bail, eyre, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use aperture::driver::CameraBackend;
use aperture::{diag, AcquisitionMode, CaptureOptions, CaptureSession, Prop};

struct Args {
    command: String,
    mock: bool,
    sync: bool,
    frames: u64,
    index: usize,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        command: "run".into(),
        mock: false,
        sync: false,
        frames: 100,
        index: 0,
    };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "list" | "check" | "run" => args.command = arg,
            "--mock" => args.mock = true,
            "--sync" => args.sync = true,
            "--frames" => {
                args.frames = iter
                    .next()
                    .ok_or_else(|| eyre!("--frames needs a value"))?
                    .parse()?;
            }
            "--index" => {
                args.index = iter
                    .next()
                    .ok_or_else(|| eyre!("--index needs a value"))?
                    .parse()?;
            }
            other => bail!("unknown argument: {other} (usage: aperture [list|check|run] [--mock] [--sync] [--frames N] [--index N])"),
        }
    }
    Ok(args)
}

fn backend(mock: bool) -> Result<Box<dyn CameraBackend>> {
    if mock {
        #[cfg(feature = "mock")]
        return Ok(Box::new(aperture::driver::mock::MockBackend::default()));
        #[cfg(not(feature = "mock"))]
        bail!("built without the mock backend");
    }
    #[cfg(feature = "v4l2")]
    return Ok(Box::new(aperture::driver::v4l2::V4l2Backend::new()));
    #[cfg(not(feature = "v4l2"))]
    bail!("built without a hardware backend; try --mock");
}

/// Layer `aperture.toml` and `APERTURE_*` environment variables over the
/// built-in defaults.
fn load_options() -> Result<CaptureOptions> {
    let options = config::Config::builder()
        .add_source(config::File::with_name("aperture").required(false))
        .add_source(config::Environment::with_prefix("APERTURE"))
        .build()?
        .try_deserialize()?;
    Ok(options)
}

fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("aperture=info")),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    let args = parse_args()?;

    match args.command.as_str() {
        "check" => {
            for check in diag::environment_report() {
                println!("{check}");
            }
            Ok(())
        }
        "list" => {
            let backend = backend(args.mock)?;
            let devices = aperture::enumerate(backend.as_ref())?;
            if devices.is_empty() {
                println!("no capture devices found");
            }
            for device in devices {
                println!("{device}");
            }
            Ok(())
        }
        _ => run(&args),
    }
}

fn run(args: &Args) -> Result<()> {
    let backend = backend(args.mock)?;
    let options = load_options()?;
    let mode = if args.sync {
        AcquisitionMode::Synchronous
    } else {
        AcquisitionMode::Asynchronous
    };

    let mut session = CaptureSession::open(backend.as_ref(), args.index, mode, options)?;
    info!(device = %session.info(), ?mode, "session open");

    let started = Instant::now();
    let mut shown = 0u64;
    while shown < args.frames {
        let frame = session.read()?;
        shown += 1;
        if shown == 1 || shown % 30 == 0 {
            let fps = shown as f64 / started.elapsed().as_secs_f64();
            info!(
                frame = shown,
                width = frame.meta.width,
                height = frame.meta.height,
                fps = format_args!("{fps:.1}"),
                "streaming"
            );
        }
    }

    // Property round-trip.
    if session.set(Prop::Gain, 12.0).is_ok() {
        info!(gain = session.get(Prop::Gain), "gain after set");
    }
    info!(
        width = session.get(Prop::FrameWidth),
        height = session.get(Prop::FrameHeight),
        fps = session.get(Prop::Fps),
        "reported properties"
    );

    session.release();
    info!(opened = session.is_opened(), "released");
    Ok(())
}
