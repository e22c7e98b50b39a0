//! Capture node binary: drives one camera and reports frames.

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use clap::Parser;
use env_logger::Env;
use isp_cam_capture::{CameraConfig, PixelFormat, State, V4L2Camera};
use log::{info, warn, LevelFilter};

/// Output pixel format choices.
#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum OutputFormat {
    /// 8-bit luma
    Mono8,
    /// Packed 4:2:2 as captured
    Uyvy,
}

impl From<OutputFormat> for PixelFormat {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Mono8 => Self::Mono8,
            OutputFormat::Uyvy => Self::Uyvy,
        }
    }
}

/// Command-line arguments for the capture node.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Capture device path
    #[arg(short, long, env = "ISP_CAM_DEVICE", default_value = "/dev/video2")]
    device: PathBuf,

    /// Capture input index
    #[arg(long, env = "ISP_CAM_INPUT", default_value_t = 1)]
    input: u32,

    /// Driver capture mode
    #[arg(long, env = "ISP_CAM_MODE", default_value = "0x8000", value_parser = parse_mode)]
    mode: u32,

    /// Native capture width
    #[arg(long, env = "ISP_CAM_WIDTH", default_value_t = 640)]
    width: u32,

    /// Native capture height
    #[arg(long, env = "ISP_CAM_HEIGHT", default_value_t = 480)]
    height: u32,

    /// Number of capture buffers
    #[arg(long, env = "ISP_CAM_BUFFERS", default_value_t = 4)]
    buffers: u32,

    /// Output pixel format
    #[arg(long, env = "ISP_CAM_FORMAT", default_value = "mono8", value_enum)]
    format: OutputFormat,

    /// Output width (defaults to native)
    #[arg(long, env = "ISP_CAM_OUT_WIDTH")]
    out_width: Option<u32>,

    /// Output height (defaults to native)
    #[arg(long, env = "ISP_CAM_OUT_HEIGHT")]
    out_height: Option<u32>,

    /// Stop after this many frames
    #[arg(short = 'n', long)]
    count: Option<u64>,

    /// Debug logging
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Errors only
    #[arg(short, long)]
    quiet: bool,
}

fn parse_mode(value: &str) -> Result<u32, String> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|err| format!("invalid capture mode {value}: {err}"))
}

const fn log_level(args: &Args) -> LevelFilter {
    if args.verbose {
        LevelFilter::Debug
    } else if args.quiet {
        LevelFilter::Error
    } else {
        LevelFilter::Info
    }
}

/// Install the global logger. `RUST_LOG` overrides the flag-derived level.
fn init_logging(args: &Args) {
    let level = log_level(args);
    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or(level.as_str()));
    builder.format_timestamp_millis();
    builder.init();
}

fn main() {
    let args = Args::parse();
    init_logging(&args);

    if let Err(err) = run(&args) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run(args: &Args) -> isp_cam_capture::Result<()> {
    let config = CameraConfig::new(&args.device)
        .with_input(args.input)
        .with_capture_mode(args.mode)
        .with_size(args.width, args.height)
        .with_buffer_count(args.buffers);

    let mut camera = V4L2Camera::v4l2(config);
    camera.set_pixel_format(args.format.into())?;
    camera.set_size(
        args.out_width.unwrap_or(args.width),
        args.out_height.unwrap_or(args.height),
    )?;

    camera.init()?;
    if let Some(caps) = camera.capabilities() {
        info!("device: {} driver: {} bus: {}", caps.card, caps.driver, caps.bus_info);
    }

    while let Err(err) = camera.start() {
        warn!("failed to start camera, retrying: {err}");
        if camera.state() != State::Initialized {
            camera.uninit()?;
            camera.init()?;
        }
        thread::sleep(Duration::from_secs(1));
    }

    let (width, height) = camera.size();
    info!(
        "streaming {} as {width}x{height} {}",
        camera.device_id(),
        camera.pixel_format()
    );

    let mut frames = 0u64;
    while args.count.map_or(true, |count| frames < count) {
        match camera.read() {
            Ok(frame) => {
                info!(
                    "frame {}: {}x{} {} {} bytes{}",
                    frame.sequence(),
                    frame.width(),
                    frame.height(),
                    frame.pixel_format(),
                    frame.buf_size(),
                    if frame.is_zero_copy() { " (zero-copy)" } else { "" }
                );
                frames += 1;
            }
            Err(err) => {
                warn!("failed to read frame: {err}");
                if camera.state() == State::Error {
                    return Err(err);
                }
            }
        }
    }

    camera.stop()?;
    camera.uninit()
}
