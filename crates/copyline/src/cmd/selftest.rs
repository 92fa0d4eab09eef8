use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use copyline_bridge::{BridgeConfig, BridgeMode, LinkState, Manager};
use copyline_frame::{sha256, PacketOwner};
use copyline_transport::LoopbackTransport;
use serde::Serialize;

use crate::cmd::{plan, SelftestArgs};
use crate::exit::{bridge_error, CliError, CliResult, DATA_INVALID, INTERNAL, SUCCESS, TIMEOUT};
use crate::output::{print_report, Field, OutputFormat};

#[derive(Debug, Serialize)]
struct RoundReport {
    round: u32,
    message_id: String,
    packets: u32,
    elapsed_ms: f64,
    sha256: String,
}

#[derive(Debug, Serialize)]
struct CommandReport {
    command: String,
    output: String,
    elapsed_ms: f64,
}

#[derive(Debug, Serialize)]
struct SelftestOutput {
    schema_id: &'static str,
    payload_size: u32,
    rounds: Vec<RoundReport>,
    command: Option<CommandReport>,
    link: LinkState,
    restarts: u64,
}

impl SelftestOutput {
    fn fields(&self) -> Vec<Field> {
        let mut fields = vec![
            ("payload_size", self.payload_size.to_string()),
            ("rounds", self.rounds.len().to_string()),
        ];
        if let Some(last) = self.rounds.last() {
            fields.push(("message_id", last.message_id.clone()));
            fields.push(("packets", last.packets.to_string()));
            fields.push(("sha256", last.sha256.clone()));
        }
        if !self.rounds.is_empty() {
            let total: f64 = self.rounds.iter().map(|r| r.elapsed_ms).sum();
            fields.push((
                "avg_elapsed_ms",
                format!("{:.2}", total / self.rounds.len() as f64),
            ));
        }
        if let Some(command) = &self.command {
            fields.push(("command", command.command.clone()));
            fields.push(("command_output", command.output.clone()));
        }
        fields.push(("link", self.link.to_string()));
        fields.push(("restarts", self.restarts.to_string()));
        fields
    }
}

/// An OUTSIDE and an INSIDE node joined by an in-memory cable.
struct Bench {
    outside: Manager,
    inside: Manager,
}

impl Bench {
    fn start(config: &BridgeConfig) -> CliResult<Self> {
        let (a, b) = LoopbackTransport::pair();
        let outside = Manager::new(
            a,
            BridgeConfig {
                initial_mode: BridgeMode::OUTSIDE,
                ..config.clone()
            },
        );
        let inside = Manager::new(
            b,
            BridgeConfig {
                initial_mode: BridgeMode::INSIDE,
                ..config.clone()
            },
        );
        outside
            .start()
            .map_err(|err| bridge_error("outside start failed", err))?;
        inside
            .start()
            .map_err(|err| bridge_error("inside start failed", err))?;
        Ok(Self { outside, inside })
    }

    fn wait_online(&self, timeout: Duration) -> CliResult<()> {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.outside.link_state().is_online() && self.inside.link_state().is_online() {
                return Ok(());
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        Err(CliError::new(TIMEOUT, "loopback link did not come online"))
    }

    fn transfer(&self, round: u32, size: u32, timeout: Duration) -> CliResult<RoundReport> {
        let payload = pattern(size as usize, round);
        let digest = sha256(&payload);

        let started = Instant::now();
        let message_id = self
            .outside
            .send_big_data(PacketOwner::OuterNet, &payload)
            .map_err(|err| bridge_error("send failed", err))?;
        let message = self
            .inside
            .recv_message(timeout)
            .ok_or_else(|| CliError::new(TIMEOUT, format!("message {message_id} not delivered")))?;
        let elapsed = started.elapsed();

        if message.message_id != message_id || sha256(&message.payload) != digest {
            return Err(CliError::new(
                DATA_INVALID,
                format!("message {message_id} arrived corrupted"),
            ));
        }

        let packets = plan::layout(u64::from(size))
            .map(|plan| plan.total_count)
            .unwrap_or_default();
        tracing::info!(round, %message_id, len = size, "selftest transfer verified");
        Ok(RoundReport {
            round,
            message_id: message_id.to_string(),
            packets,
            elapsed_ms: millis(elapsed),
            sha256: hex::encode(digest),
        })
    }

    fn command(&self, command: &str) -> CliResult<CommandReport> {
        let started = Instant::now();
        let output = self
            .outside
            .send_command(command)
            .map_err(|err| bridge_error("command failed", err))?;
        Ok(CommandReport {
            command: command.to_string(),
            output,
            elapsed_ms: millis(started.elapsed()),
        })
    }

    fn stop(self) -> (LinkState, u64) {
        let link = self.outside.link_state();
        let restarts = self.outside.restart_count() + self.inside.restart_count();
        self.outside.stop();
        self.inside.stop();
        (link, restarts)
    }
}

pub fn run(args: SelftestArgs, format: OutputFormat, config: BridgeConfig) -> CliResult<i32> {
    let timeout = args.timeout;

    let running = Arc::new(AtomicBool::new(true));
    if args.rounds == 0 {
        install_ctrlc_handler(running.clone())?;
    }

    let bench = Bench::start(&config)?;
    bench.wait_online(timeout)?;

    let mut rounds = Vec::new();
    let mut round = 0u32;
    while running.load(Ordering::SeqCst) && (args.rounds == 0 || round < args.rounds) {
        round = round.saturating_add(1);
        rounds.push(bench.transfer(round, args.size, timeout)?);
    }

    let command = match &args.command {
        Some(command) => Some(bench.command(command)?),
        None => None,
    };

    let (link, restarts) = bench.stop();
    let output = SelftestOutput {
        schema_id: "copyline.cli.v1/selftest-report",
        payload_size: args.size,
        rounds,
        command,
        link,
        restarts,
    };
    print_report(&output, &output.fields(), format);
    Ok(SUCCESS)
}

/// Deterministic, round-dependent test payload.
fn pattern(len: usize, round: u32) -> Vec<u8> {
    let seed = round as usize;
    (0..len).map(|i| ((i + seed * 31) % 251) as u8).collect()
}

fn millis(duration: Duration) -> f64 {
    (duration.as_secs_f64() * 1000.0 * 100.0).round() / 100.0
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> BridgeConfig {
        BridgeConfig {
            ack_timeout_ms: 2_000,
            cycle_interval_ms: 5,
            ..BridgeConfig::default()
        }
    }

    #[test]
    fn pattern_varies_by_round() {
        assert_eq!(pattern(4, 0), vec![0, 1, 2, 3]);
        assert_ne!(pattern(64, 1), pattern(64, 2));
    }

    #[test]
    fn bench_transfers_and_verifies() {
        let bench = Bench::start(&fast()).unwrap();
        bench.wait_online(Duration::from_secs(2)).unwrap();

        let report = bench.transfer(1, 3000, Duration::from_secs(5)).unwrap();
        assert_eq!(report.packets, 6);
        assert_eq!(report.sha256, hex::encode(sha256(&pattern(3000, 1))));

        let (link, restarts) = bench.stop();
        assert_eq!(link, LinkState::Online);
        assert_eq!(restarts, 0);
    }

    #[test]
    fn fields_summarise_last_round() {
        let output = SelftestOutput {
            schema_id: "x",
            payload_size: 10,
            rounds: vec![RoundReport {
                round: 1,
                message_id: "1700000000000000".into(),
                packets: 3,
                elapsed_ms: 1.5,
                sha256: "ab".into(),
            }],
            command: None,
            link: LinkState::Online,
            restarts: 0,
        };
        let fields = output.fields();
        assert!(fields.contains(&("packets", "3".to_string())));
        assert!(fields.contains(&("avg_elapsed_ms", "1.50".to_string())));
        assert!(fields.contains(&("link", "ONLINE".to_string())));
    }
}
