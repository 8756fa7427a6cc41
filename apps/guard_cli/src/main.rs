mod console;
mod devices;

use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use clap::{Parser, Subcommand};
use console::{describe_event, parse_line, render_snapshot, ConsoleCommand, HELP};
use devices::{ConsoleProximityDriver, StillImageCamera, TerminalBell};
use guard_core::{
    config::DEFAULT_CONFIG_FILE, load_settings_from, AlarmSoundController, AudioBackend,
    CameraDevice, CaptureAdapter, GuardDependencies, GuardEvent, GuardHandle, HttpServerGateway,
    MissingAudioBackend, MissingCamera, MissingProximityDriver, ProximityDriver,
    RemoteStatePoller, SensorAdapter, ServerGateway, Settings,
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::{self, error::RecvError},
};
use tracing::{info, warn};

#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    /// Overrides `server_url` from the config file and environment.
    #[arg(long)]
    server_url: Option<String>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Interactive guard session driven from stdin.
    Run {
        /// Still image served as the camera picture.
        #[arg(long)]
        camera_image: Option<PathBuf>,
        /// Run as a device without a proximity sensor.
        #[arg(long)]
        no_sensor: bool,
        #[arg(long)]
        mute: bool,
    },
    Ping,
    Status,
    StopRemote,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();
    let args = Args::parse();

    let mut settings = load_settings_from(&args.config)?;
    if let Some(server_url) = args.server_url {
        settings.server_url = server_url;
        settings.validate()?;
    }
    let gateway = Arc::new(HttpServerGateway::new(
        &settings.server_url,
        settings.gateway_timeouts(),
    )?);

    match args.command.unwrap_or(Command::Run {
        camera_image: None,
        no_sensor: false,
        mute: false,
    }) {
        Command::Ping => {
            gateway.ping().await?;
            println!("server {} is reachable", settings.server_url);
        }
        Command::Status => match gateway.get_remote_alarm_state().await {
            Some(state) => println!("alarm_active={}", state.active),
            None => println!("alarm state unknown"),
        },
        Command::StopRemote => {
            let ack = gateway.stop_remote_alarm().await?;
            println!("server alarm stopped: {}", serde_json::to_string(&ack)?);
        }
        Command::Run {
            camera_image,
            no_sensor,
            mute,
        } => run(settings, gateway, camera_image, no_sensor, mute).await?,
    }

    Ok(())
}

async fn run(
    settings: Settings,
    gateway: Arc<HttpServerGateway>,
    camera_image: Option<PathBuf>,
    no_sensor: bool,
    mute: bool,
) -> Result<()> {
    let console_driver = Arc::new(ConsoleProximityDriver::new());
    let driver: Arc<dyn ProximityDriver> = if no_sensor {
        Arc::new(MissingProximityDriver)
    } else {
        console_driver.clone()
    };
    let camera: Arc<dyn CameraDevice> = match camera_image {
        Some(path) => Arc::new(StillImageCamera::new(path)),
        None => Arc::new(MissingCamera),
    };
    let audio: Arc<dyn AudioBackend> = if mute {
        Arc::new(MissingAudioBackend)
    } else {
        Arc::new(TerminalBell)
    };

    let deps = GuardDependencies {
        sensor: Arc::new(SensorAdapter::new(driver)),
        capture: Arc::new(CaptureAdapter::new(camera, &settings.photo_dir)),
        sound: Arc::new(AlarmSoundController::new(audio)),
        gateway: gateway.clone(),
    };
    let guard = GuardHandle::spawn(settings.trigger_policy(), deps).await;
    let _poller = RemoteStatePoller::spawn(gateway.clone(), guard.clone(), settings.poll_interval());
    let printer = tokio::spawn(print_events(guard.subscribe_events()));

    info!(server_url = %settings.server_url, "guard session started");
    let status = guard.check_connection().await?;
    println!("server: {}", status.label());
    println!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let command = match parse_line(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(err) => {
                println!("{err}");
                continue;
            }
        };
        if command == ConsoleCommand::Quit {
            break;
        }
        execute(command, &guard, &gateway, &console_driver, no_sensor).await?;
    }

    guard.shutdown().await;
    printer.abort();
    info!("guard session ended");
    Ok(())
}

async fn execute(
    command: ConsoleCommand,
    guard: &GuardHandle,
    gateway: &HttpServerGateway,
    driver: &ConsoleProximityDriver,
    no_sensor: bool,
) -> Result<()> {
    match command {
        ConsoleCommand::Arm => guard.arm().await?,
        ConsoleCommand::Disarm => guard.disarm().await?,
        ConsoleCommand::Reading(distance_mm) => {
            if no_sensor {
                println!("no proximity sensor on this device; use `trigger`");
            } else if !driver.push(distance_mm) {
                println!("security mode is off; reading ignored");
            }
        }
        ConsoleCommand::Trigger => match guard.manual_trigger().await {
            Ok(episode_id) => info!(%episode_id, "test alarm triggered"),
            Err(rejection) => println!("{rejection}"),
        },
        ConsoleCommand::StopLocal => guard.stop_local_alarm().await?,
        ConsoleCommand::StopRemote => {
            if let Err(err) = guard.stop_remote_alarm().await {
                println!("could not stop server alarm: {}", err.message);
            }
        }
        ConsoleCommand::Ping => {
            let status = guard.check_connection().await?;
            println!("server: {}", status.label());
        }
        ConsoleCommand::Server(url) => match gateway.set_base_url(&url).await {
            Ok(()) => {
                let status = guard.check_connection().await?;
                println!("server {url}: {}", status.label());
            }
            Err(err) => println!("{}", err.message),
        },
        ConsoleCommand::Status => println!("{}", render_snapshot(&guard.snapshot())),
        ConsoleCommand::Help => println!("{HELP}"),
        ConsoleCommand::Quit => {}
    }
    Ok(())
}

async fn print_events(mut events: broadcast::Receiver<GuardEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => {
                if let Some(text) = describe_event(&event) {
                    println!("{text}");
                }
            }
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "event printer lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}
