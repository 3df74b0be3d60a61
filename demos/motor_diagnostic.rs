// Motor diagnostic: READ-ONLY probe of one controller
//
// Sends queries only (identity, precision, enabled, position, velocity,
// torque). Nothing is enabled, moved, or reconfigured. Run this first when
// wiring a new joint.
//
// Usage: cargo run --example motor_diagnostic -- [port]
// Example: cargo run --example motor_diagnostic -- /dev/ttyUSB0
//          cargo run --example motor_diagnostic -- sim/inner_rot

use std::sync::Arc;

use scara_arm_runtime::config::{
    END_ROT_ID, GRIPPER_ID, INNER_ROT_ID, OUTER_ROT_ID, VERTICAL_ID,
};
use scara_arm_runtime::motor::sim::SimConnector;
use scara_arm_runtime::motor::{DeviceLink, PortConnector, SerialConnector};

fn role(id: i64) -> &'static str {
    match id {
        VERTICAL_ID => "vertical",
        INNER_ROT_ID => "inner rotation",
        OUTER_ROT_ID => "outer rotation",
        END_ROT_ID => "end effector rotation",
        GRIPPER_ID => "gripper",
        _ => "not part of the arm",
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .init();

    let port = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/dev/ttyUSB0".to_string());
    // Ports named sim/... are answered by the simulated arm
    let connector: Arc<dyn PortConnector> = if port.starts_with("sim/") {
        Arc::new(SimConnector::arm())
    } else {
        Arc::new(SerialConnector)
    };

    println!("SCARA motor diagnostic (READ-ONLY)");
    println!("Serial port: {}", port);
    println!();

    println!("Step 1: Opening serial port...");
    let link = match DeviceLink::open(connector, &port) {
        Ok(link) => {
            println!("  ✓ Serial port opened");
            link
        }
        Err(e) => {
            println!("  ✗ Failed to open serial port: {}", e);
            println!();
            println!("Troubleshooting:");
            println!("  - Check the port path is correct");
            println!("  - Verify the USB cable is connected");
            println!("  - On Linux, check you are in the dialout group");
            return Err(e.into());
        }
    };
    println!();

    println!("Step 2: Reading identity...");
    let id = match link.request::<i64>("I", -1) {
        Ok(id) => {
            println!("  ✓ Motor id {} ({})", id, role(id));
            id
        }
        Err(e) => {
            println!("  ✗ No identity: {}", e);
            println!("  A servo end effector never answers; anything else may be at the wrong baud rate.");
            return Ok(());
        }
    };
    println!();

    println!("Step 3: Reading state...");
    match link.request::<i64>("#", id) {
        Ok(n) => println!("    Precision: {} decimals", n),
        Err(e) => println!("    Precision: ERROR - {}", e),
    }
    match link.request::<bool>("ME", id) {
        Ok(on) => println!("    Enabled:   {}", if on { "ENABLED" } else { "disabled" }),
        Err(e) => println!("    Enabled:   ERROR - {}", e),
    }
    match link.request::<f64>("MMG6", id) {
        Ok(p) => println!("    Position:  {} rad ({:.1}°)", p, p.to_degrees()),
        Err(e) => println!("    Position:  ERROR - {}", e),
    }
    match link.request::<f64>("MMG5", id) {
        Ok(v) => println!("    Velocity:  {} rad/s", v),
        Err(e) => println!("    Velocity:  ERROR - {}", e),
    }
    match link.request::<f64>("MMG1", id) {
        Ok(t) => println!("    Torque:    {}", t),
        Err(e) => println!("    Torque:    ERROR - {}", e),
    }
    println!();

    println!("Exchanges:");
    for entry in link.audit().entries() {
        println!("  {:>6} -> {}", entry.command, entry.response);
    }
    println!();
    println!("Velocity should read 0 or near 0 while the joint is at rest.");
    println!("Next step: run `scara-arm-runtime calibrate` if the calibration files are missing");

    Ok(())
}
