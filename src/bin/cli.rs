use scopecam::platform::UvcProvider;
use scopecam::{
    CaptureController, DeviceDescriptor, ScopecamConfig, SessionEvent, SessionState,
};
use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    scopecam::init_logging();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: scopecam-cli <command> [args]");
        eprintln!("Commands: list-devices, list-modes, preview, photo");
        std::process::exit(1);
    }

    let command = &args[1];
    match command.as_str() {
        "list-devices" => cmd_list_devices(&args),
        "list-modes" => cmd_list_modes(&args),
        "preview" => cmd_preview(&args),
        "photo" => cmd_photo(&args),
        _ => {
            eprintln!("Unknown command: {}", command);
            std::process::exit(1);
        }
    }
}

fn make_controller() -> CaptureController {
    let config = ScopecamConfig::load_or_default();
    CaptureController::new(
        Box::new(UvcProvider::with_still_config(&config.still)),
        config.session,
    )
}

fn find_device(
    controller: &CaptureController,
    device_id: &str,
) -> Result<DeviceDescriptor, Box<dyn std::error::Error>> {
    let devices = controller.list_devices()?;
    devices
        .into_iter()
        .find(|device| device.id == device_id)
        .ok_or_else(|| format!("No such device: {}", device_id).into())
}

/// Drain events until the session reaches `Running` or fails.
fn wait_for_running(
    controller: &CaptureController,
    events: &scopecam::EventReceiver,
    timeout: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let deadline = Instant::now() + timeout;
    loop {
        if controller.state() == SessionState::Running {
            return Ok(());
        }
        let now = Instant::now();
        if now >= deadline {
            return Err("Timed out waiting for capture to start".into());
        }
        match events.recv_timeout(deadline - now) {
            Some(SessionEvent::StateChanged(SessionState::Running)) => return Ok(()),
            Some(SessionEvent::StateChanged(SessionState::Failed)) => {
                return Err("Capture session failed to start".into());
            }
            Some(SessionEvent::Error(e)) => return Err(e.to_string().into()),
            _ => {}
        }
    }
}

fn cmd_list_devices(args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let controller = make_controller();
    let devices = controller.list_devices()?;
    if args.contains(&"--json".to_string()) {
        println!("{}", serde_json::to_string(&devices)?);
    } else {
        for device in devices {
            println!("{}: {}", device.id, device.name);
        }
    }
    Ok(())
}

fn cmd_list_modes(args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    if args.len() < 3 {
        eprintln!("Usage: scopecam-cli list-modes <device_id>");
        std::process::exit(1);
    }
    let controller = make_controller();
    let descriptor = find_device(&controller, &args[2])?;
    let events = controller.events();

    controller.attach(&descriptor)?;
    wait_for_running(&controller, &events, Duration::from_secs(10))?;

    let modes = controller.list_modes();
    let current = controller.current_mode_index();
    if args.contains(&"--json".to_string()) {
        println!("{}", serde_json::to_string(&modes)?);
    } else {
        for (index, mode) in modes.iter().enumerate() {
            let marker = if Some(index) == current { "*" } else { " " };
            println!("{} [{}] {}", marker, index, mode.display_label);
        }
    }
    controller.stop();
    Ok(())
}

fn cmd_preview(args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    if args.len() < 3 {
        eprintln!("Usage: scopecam-cli preview <device_id> [--mode <index>] [--frames <n>] [--json]");
        std::process::exit(1);
    }
    let mut frames: u64 = 30;
    let mut mode_index: Option<usize> = None;
    let mut json = false;
    let mut i = 3;
    while i < args.len() {
        match args[i].as_str() {
            "--frames" => {
                i += 1;
                frames = args[i].parse()?;
            }
            "--mode" => {
                i += 1;
                mode_index = Some(args[i].parse()?);
            }
            "--json" => json = true,
            other => return Err(format!("Unknown option: {}", other).into()),
        }
        i += 1;
    }

    let controller = make_controller();
    let descriptor = find_device(&controller, &args[2])?;
    let events = controller.events();

    controller.attach(&descriptor)?;
    wait_for_running(&controller, &events, Duration::from_secs(10))?;
    if let Some(index) = mode_index {
        controller.select_mode(index)?;
    }

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = interrupted.clone();
        ctrlc::set_handler(move || interrupted.store(true, Ordering::Relaxed))?;
    }

    let mut received = 0u64;
    while received < frames && !interrupted.load(Ordering::Relaxed) {
        match events.recv_timeout(Duration::from_secs(2)) {
            Some(SessionEvent::Frame(frame)) => {
                received += 1;
                if json {
                    println!(
                        "{}",
                        serde_json::json!({
                            "sequence": frame.sequence,
                            "width": frame.width,
                            "height": frame.height,
                            "pixel_format": frame.pixel_format,
                            "bytes": frame.data.len(),
                        })
                    );
                } else {
                    println!(
                        "Frame: {}x{} {} seq:{}",
                        frame.width, frame.height, frame.pixel_format, frame.sequence
                    );
                }
            }
            Some(SessionEvent::Error(e)) => return Err(e.to_string().into()),
            Some(_) => {}
            None => {
                if !interrupted.load(Ordering::Relaxed) {
                    println!("Timeout");
                }
            }
        }
    }

    println!("Dropped frames: {}", events.dropped_frames());
    controller.stop();
    Ok(())
}

fn cmd_photo(args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    if args.len() < 3 {
        eprintln!("Usage: scopecam-cli photo <device_id> [--output <path>]");
        std::process::exit(1);
    }
    let mut output: Option<String> = None;
    let mut i = 3;
    while i < args.len() {
        match args[i].as_str() {
            "--output" => {
                i += 1;
                output = Some(args[i].clone());
            }
            other => return Err(format!("Unknown option: {}", other).into()),
        }
        i += 1;
    }

    let controller = make_controller();
    let descriptor = find_device(&controller, &args[2])?;
    let events = controller.events();

    controller.attach(&descriptor)?;
    wait_for_running(&controller, &events, Duration::from_secs(10))?;
    controller.take_photo();

    let deadline = Instant::now() + Duration::from_secs(10);
    let photo = loop {
        let now = Instant::now();
        if now >= deadline {
            return Err("Timed out waiting for photo".into());
        }
        match events.recv_timeout(deadline - now) {
            Some(SessionEvent::Photo(photo)) => break photo,
            Some(SessionEvent::Error(e)) => return Err(e.to_string().into()),
            Some(_) => {}
            None => return Err("Timed out waiting for photo".into()),
        }
    };

    let path = output.unwrap_or_else(|| {
        let timestamp = photo.captured_at.format("%Y%m%d_%H%M%S");
        let device_name = photo.device_name.replace([' ', '/'], "_");
        format!(
            "{}_{}_{}x{}.jpg",
            timestamp, device_name, photo.width, photo.height
        )
    });
    std::fs::write(&path, &photo.data)?;
    println!(
        "Photo saved to {} ({}x{}, {} bytes)",
        path,
        photo.width,
        photo.height,
        photo.data.len()
    );

    controller.stop();
    Ok(())
}
