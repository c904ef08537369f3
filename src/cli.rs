// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands for scanning
//!
//! This module provides command-line functionality for:
//! - Listing available cameras
//! - Running one scan session and printing the decoded text

use camera_scanner::backends::camera::types::{CameraBackendType, DeviceSelector, FacingMode};
use camera_scanner::backends::camera::{CaptureDeviceProvider, provider_for};
use camera_scanner::errors::{AppError, AppResult};
use camera_scanner::frame_processor::{QrDecoder, QrDetector, Symbology};
use camera_scanner::session::{
    ControllerConfig, FrameSink, HostEvent, ScanSessionController, SessionState,
};
use camera_scanner::Config;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(clap::Args, Debug)]
pub struct ScanArgs {
    /// Camera to use: index from 'camera-scanner list' or device path
    #[arg(short, long)]
    camera: Option<String>,

    /// Preferred camera direction when no camera is given (environment, user)
    #[arg(short, long)]
    facing: Option<FacingMode>,

    /// Accepted code format, may be repeated (e.g. QR_CODE, CODE_128)
    #[arg(short, long = "symbology")]
    symbologies: Vec<Symbology>,

    /// Decode frames at full resolution
    #[arg(long)]
    thorough: bool,

    /// Give up after this many seconds
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Scan still images instead of a camera (one virtual camera per file)
    #[arg(long = "image")]
    images: Vec<PathBuf>,

    /// Print the result as JSON
    #[arg(long)]
    json: bool,
}

enum Outcome {
    Event(HostEvent),
    Interrupted,
    TimedOut,
    ControllerGone,
}

fn use_images(config: &mut Config, images: Vec<PathBuf>) {
    if !images.is_empty() {
        config.backend = CameraBackendType::Virtual;
        config.virtual_images = images;
    }
}

/// List all available cameras
pub async fn list_cameras(images: Vec<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = Config::load();
    use_images(&mut config, images);

    let provider = provider_for(&config);
    let cameras = provider.list_devices().await.map_err(AppError::from)?;

    if cameras.is_empty() {
        println!("No cameras found.");
        return Ok(());
    }

    println!("Available cameras:");
    println!();
    for (index, camera) in cameras.iter().enumerate() {
        let remembered = config.last_camera_path.as_deref() == Some(camera.id());
        println!(
            "  [{}] {}{}",
            index,
            camera.name,
            if remembered { " (last used)" } else { "" }
        );
        println!("      Path: {}", camera.path);
        if let Some(info) = &camera.device_info {
            println!("      Driver: {}", info.driver);
        }
        if let Some(location) = &camera.camera_location {
            println!("      Location: {}", location);
        } else if let Some(facing) = camera.facing_hint() {
            println!("      Facing: {}", facing);
        }
        println!();
    }

    Ok(())
}

/// Resolve `--camera` into a selector: an index into the current
/// enumeration, or a device id as-is
async fn resolve_selector(
    provider: &dyn CaptureDeviceProvider,
    camera: Option<&str>,
) -> AppResult<Option<DeviceSelector>> {
    let Some(camera) = camera else {
        return Ok(None);
    };

    let Ok(index) = camera.parse::<usize>() else {
        return Ok(Some(DeviceSelector::Device(camera.to_string())));
    };

    let cameras = provider.list_devices().await?;
    cameras
        .get(index)
        .map(|c| Some(DeviceSelector::Device(c.id().to_string())))
        .ok_or_else(|| {
            AppError::Other(format!(
                "Camera index {} out of range ({} cameras found)",
                index,
                cameras.len()
            ))
        })
}

/// Run one scan session and print what was decoded
pub async fn scan(args: ScanArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = Config::load();
    let using_images = !args.images.is_empty();
    use_images(&mut config, args.images);
    if let Some(facing) = args.facing {
        config.facing = facing;
    }
    if !args.symbologies.is_empty() {
        config.symbologies = args.symbologies;
    }
    config.thorough |= args.thorough;

    let symbologies = config.symbology_filter();
    if !symbologies.allows(Symbology::QrCode) {
        eprintln!(
            "Warning: only QR codes can be decoded, but accepted formats are {}",
            symbologies
        );
    }

    let provider = provider_for(&config);
    let selector = resolve_selector(provider.as_ref(), args.camera.as_deref()).await?;

    let decoder = QrDecoder::new(
        QrDetector::with_max_dimension(config.max_decode_dimension),
        config.decode_interval(),
    );
    let (host, mut events) = mpsc::unbounded_channel::<HostEvent>();
    let controller = ScanSessionController::spawn(
        provider,
        Box::new(decoder),
        FrameSink::new(),
        Arc::new(host),
        ControllerConfig::from(&config),
    );

    // Set up Ctrl+C handler
    let (interrupt_tx, mut interrupted) = mpsc::unbounded_channel::<()>();
    ctrlc::set_handler(move || {
        let _ = interrupt_tx.send(());
    })?;

    if !args.json {
        let mut states = controller.subscribe();
        tokio::spawn(async move {
            while states.changed().await.is_ok() {
                let snapshot = states.borrow_and_update().clone();
                if snapshot.state == SessionState::Decoding {
                    eprintln!(
                        "Scanning with {} (press Ctrl+C to stop)",
                        snapshot.current_camera_label.as_deref().unwrap_or("camera")
                    );
                }
            }
        });
    }

    controller.open(selector);

    let wait = async {
        tokio::select! {
            event = events.recv() => event.map(Outcome::Event).unwrap_or(Outcome::ControllerGone),
            _ = interrupted.recv() => Outcome::Interrupted,
        }
    };
    let outcome = match args.timeout {
        Some(secs) => tokio::time::timeout(Duration::from_secs(secs), wait)
            .await
            .unwrap_or(Outcome::TimedOut),
        None => wait.await,
    };

    if !matches!(outcome, Outcome::Event(HostEvent::Result(_))) {
        controller.close();
    }
    controller.shutdown().await;

    match outcome {
        Outcome::Event(HostEvent::Result(result)) => {
            if args.json {
                println!("{}", serde_json::to_string(&result)?);
            } else {
                println!("{}", result.text);
            }

            if !using_images && result.device_id != config.last_camera_path {
                config.last_camera_path = result.device_id;
                if let Err(e) = config.save() {
                    tracing::warn!(error = %e, "Failed to remember camera");
                }
            }
            Ok(())
        }
        Outcome::Event(HostEvent::Error(error)) => Err(AppError::Scan(error).into()),
        Outcome::Interrupted => {
            eprintln!("Scan cancelled");
            Ok(())
        }
        Outcome::TimedOut => Err(format!(
            "No code found within {} seconds",
            args.timeout.unwrap_or_default()
        )
        .into()),
        Outcome::ControllerGone => Err("Scan session ended unexpectedly".into()),
    }
}
