use std::future::Future;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use scara_arm_runtime::arm::{
    ArmError, ArmGeometry, CalibrationStore, CalibrationWizard, System, WizardStep,
};
use scara_arm_runtime::config::{ArmConfig, CALIBRATION_DIR};
use scara_arm_runtime::messages::{RuntimeHealth, TargetPose};
use scara_arm_runtime::motor::sim::SimConnector;
use scara_arm_runtime::motor::{DeviceLink, PortConnector, SerialConnector};
use scara_arm_runtime::runtime::ArmRuntime;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Parser)]
#[command(name = "scara-arm-runtime")]
#[command(about = "Drive a four-motor SCARA arm over serial", long_about = None)]
struct Cli {
    /// Use simulated controllers instead of serial ports
    #[arg(long, global = true)]
    sim: bool,

    /// JSON tuning file; built-in defaults otherwise
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the per-joint calibration files
    #[arg(long, global = true, default_value = CALIBRATION_DIR)]
    calibration_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List serial ports
    Ports,

    /// Query every controller without moving anything
    Diagnose,

    /// Home all joints from the calibration files
    Home,

    /// Record joint calibration interactively
    Calibrate,

    /// Home, then move smoothly to a Cartesian target
    Move {
        #[arg(allow_hyphen_values = true)]
        x: f64,
        #[arg(allow_hyphen_values = true)]
        y: f64,
        #[arg(allow_hyphen_values = true)]
        z: f64,
        /// End effector bearing, world radians
        #[arg(long, default_value = "0", allow_hyphen_values = true)]
        r: f64,
        /// End effector value
        #[arg(long)]
        e: Option<f64>,
        /// Seconds; the tuning file's default otherwise
        #[arg(long)]
        duration: Option<f64>,
        /// Skip homing (joints must already be homed)
        #[arg(long)]
        no_home: bool,
    },

    /// Home, then follow newline-delimited JSON targets from stdin
    Stream {
        #[arg(long)]
        no_home: bool,
    },
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=debug for every serial exchange)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(e) = run(Cli::parse()).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), BoxError> {
    let connector: Arc<dyn PortConnector> = if cli.sim {
        info!("Using simulated controllers");
        Arc::new(SimConnector::arm())
    } else {
        Arc::new(SerialConnector)
    };
    let config = match &cli.config {
        Some(path) => ArmConfig::load(path)?,
        None => ArmConfig::default(),
    };
    let store = CalibrationStore::new(&cli.calibration_dir);

    match cli.command {
        Commands::Ports => {
            for port in connector.available_ports()? {
                println!("{}", port);
            }
            Ok(())
        }
        Commands::Diagnose => tokio::task::spawn_blocking(move || diagnose(connector)).await?,
        Commands::Home => {
            let arm = connect(connector, config).await?;
            guarded(&arm, home(&arm, store)).await
        }
        Commands::Calibrate => {
            let arm = connect(connector, config).await?;
            let system = Arc::clone(arm.system());
            let wizard = tokio::task::spawn_blocking(move || calibrate(&system, &store));
            guarded(&arm, async { Ok::<(), BoxError>(wizard.await??) }).await
        }
        Commands::Move {
            x,
            y,
            z,
            r,
            e,
            duration,
            no_home,
        } => {
            let duration = duration.unwrap_or(config.motion.duration);
            let arm = connect(connector, config).await?;
            let target = TargetPose { x, y, z, r, e };
            guarded(&arm, async {
                if !no_home {
                    home(&arm, store).await?;
                }
                arm.move_to(target, duration).await?;
                let pose = arm.system().current_pose()?;
                info!("Arrived at {:?}", pose);
                Ok::<(), BoxError>(())
            })
            .await
        }
        Commands::Stream { no_home } => {
            let arm = connect(connector, config).await?;
            guarded(&arm, async {
                if !no_home {
                    home(&arm, store).await?;
                }
                stream_stdin(&arm).await
            })
            .await
        }
    }
}

async fn connect(connector: Arc<dyn PortConnector>, config: ArmConfig) -> Result<ArmRuntime, BoxError> {
    let system = tokio::task::spawn_blocking(move || {
        System::discover(connector, ArmGeometry::default(), config)
    })
    .await??;
    Ok(ArmRuntime::new(system))
}

/// Run `op`, or emergency stop the arm if Ctrl-C arrives first
async fn guarded<T>(
    arm: &ArmRuntime,
    op: impl Future<Output = Result<T, BoxError>>,
) -> Result<T, BoxError> {
    tokio::select! {
        result = op => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("Ctrl-C received, stopping the arm");
            arm.emergency_stop().await?;
            Err("interrupted".into())
        }
    }
}

async fn home(arm: &ArmRuntime, store: CalibrationStore) -> Result<(), BoxError> {
    match arm.home(store).await {
        Ok(_) => Ok(()),
        Err(e @ ArmError::ConfigLoad { .. }) => {
            Err(format!("{} (run the calibrate command first)", e).into())
        }
        Err(e) => Err(e.into()),
    }
}

async fn stream_stdin(arm: &ArmRuntime) -> Result<(), BoxError> {
    let (tx, rx) = mpsc::channel(64);
    let (health_tx, mut health_rx) = watch::channel(RuntimeHealth::CmdStale);

    tokio::task::spawn_blocking(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<TargetPose>(&line) {
                Ok(target) => {
                    if tx.blocking_send(target).is_err() {
                        break;
                    }
                }
                Err(e) => warn!("Failed to parse target: {}", e),
            }
        }
    });

    tokio::spawn(async move {
        while health_rx.changed().await.is_ok() {
            info!("Health: {:?}", *health_rx.borrow());
        }
    });

    arm.stream(rx, health_tx).await?;
    Ok(())
}

fn calibrate(system: &System, store: &CalibrationStore) -> Result<(), BoxError> {
    let mut wizard = CalibrationWizard::start(system, store)?;
    let stdin = io::stdin();

    while !wizard.is_done() {
        println!();
        println!("{}", wizard.step().instructions());
        print!("Press Enter to continue... ");
        io::stdout().flush()?;

        let mut input = String::new();
        if stdin.lock().read_line(&mut input)? == 0 {
            return Err("calibration cancelled".into());
        }
        wizard.advance()?;
    }

    println!("{}", WizardStep::Done.instructions());
    wizard.finish()?;
    Ok(())
}

// Queries only: nothing here enables, moves, or reconfigures a controller
fn diagnose(connector: Arc<dyn PortConnector>) -> Result<(), BoxError> {
    let ports = connector.available_ports()?;
    println!("Probing {} port(s)", ports.len());

    for port in ports {
        println!();
        println!("=== {} ===", port);
        let link = match DeviceLink::open(connector.clone(), &port) {
            Ok(link) => link,
            Err(e) => {
                println!("  Cannot open: {}", e);
                continue;
            }
        };
        let id = match link.request::<i64>("I", -1) {
            Ok(id) => id,
            Err(e) => {
                println!("  No motor identity ({}); servo or unrelated device", e);
                continue;
            }
        };

        println!("  Identity:  {}", id);
        report(&link, "Precision", |l| l.request::<i64>("#", id).map(|v| v.to_string()));
        report(&link, "Enabled", |l| l.request::<bool>("ME", id).map(|v| v.to_string()));
        report(&link, "Position", |l| l.request::<f64>("MMG6", id).map(|v| v.to_string()));
        report(&link, "Velocity", |l| l.request::<f64>("MMG5", id).map(|v| v.to_string()));
        report(&link, "Torque", |l| l.request::<f64>("MMG1", id).map(|v| v.to_string()));

        println!("  Exchanges:");
        for entry in link.audit().entries() {
            println!(
                "    {} {:>6} -> {}",
                entry.at.format("%H:%M:%S%.3f"),
                entry.command,
                entry.response
            );
        }
    }
    Ok(())
}

fn report<F>(link: &DeviceLink, label: &str, query: F)
where
    F: FnOnce(&DeviceLink) -> scara_arm_runtime::motor::protocol::Result<String>,
{
    match query(link) {
        Ok(value) => println!("  {:<10} {}", format!("{}:", label), value),
        Err(e) => println!("  {:<10} ERROR - {}", format!("{}:", label), e),
    }
}
