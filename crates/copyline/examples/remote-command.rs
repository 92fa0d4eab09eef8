//! Remote command relay: OUTSIDE asks INSIDE to run a command.
//!
//! Run with:
//!   cargo run --example remote-command -- "uname -a"
//!
//! The INSIDE node executes through a small allow-list executor; anything
//! else comes back as an error text inside CMD_ACK.

use std::sync::Arc;
use std::time::Duration;

use copyline::bridge::{
    BridgeConfig, BridgeMode, CommandExecutor, ExecError, Manager, ShellExecutor,
};
use copyline::transport::LoopbackTransport;

/// Runs only commands whose program name is on the list.
struct AllowList {
    programs: &'static [&'static str],
    shell: ShellExecutor,
}

impl CommandExecutor for AllowList {
    fn execute(&self, command: &str, timeout: Duration) -> Result<String, ExecError> {
        let program = command.split_whitespace().next().unwrap_or_default();
        if !self.programs.contains(&program) {
            return Err(ExecError::Invalid(format!("{program:?} is not allowed")));
        }
        self.shell.execute(command, timeout)
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let command = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "echo hello from the inside".to_string());

    let (outer_cable, inner_cable) = LoopbackTransport::pair();
    let outside = Manager::new(
        outer_cable,
        BridgeConfig {
            initial_mode: BridgeMode::OUTSIDE,
            cycle_interval_ms: 10,
            ..BridgeConfig::default()
        },
    );
    let inside = Manager::with_executor(
        inner_cable,
        Arc::new(AllowList {
            programs: &["echo", "uname", "date", "ls"],
            shell: ShellExecutor,
        }),
        BridgeConfig {
            initial_mode: BridgeMode::INSIDE,
            cycle_interval_ms: 10,
            ..BridgeConfig::default()
        },
    );
    outside.start()?;
    inside.start()?;

    let output = outside.send_command(&command)?;
    println!("{output}");

    // The inside node may not originate commands.
    if let Err(err) = inside.send_command("ls") {
        eprintln!("[inside] refused: {err} (code {})", err.code());
    }

    outside.stop();
    inside.stop();
    Ok(())
}
