//! `fnirsi-ps`: command-line control of FNIRSI DC power supplies.

use std::io;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use tracing_subscriber::EnvFilter;

use fnirsi_dc_psu::command;
use fnirsi_dc_psu::model::DeviceModel;
use fnirsi_dc_psu::psu::FnirsiPsu;
use fnirsi_dc_psu::transport;

/// Environment variable naming the default serial device.
const PORT_ENV: &str = "FNIRSI_PS";
const DEFAULT_PORT: &str = "/dev/fnirsi-ps0";

#[derive(Parser, Debug)]
#[command(
    name = "fnirsi-ps",
    version = env!("CARGO_PKG_VERSION"),
    about = "Controls FNIRSI DC power supplies (DC6006L, DC-580)",
    after_help = "\
Commands:
  on / off          Turn the output on or off
  v=<V>  c=<A>      Set target voltage / current
  ovp=<V> ocp=<A>   Set over-voltage / over-current limits
  opp=<W>           Set over-power limit
  ohp=<sec>         Set over-time limit (0 disables)
  noprotect         Disable protection
  stat              Print one merged status snapshot
  trace=<n>         Print n status samples (-1 = until ctrl-c)
  flush             Stop and clear the device log stream
  mem=<m1|m2>       Recall a memory preset
  cmd=<body>        Send a raw command frame
  echo=<str> / sep  Local output only
  sleep=<sec>       Pause between commands
  check             Enable double-check mode for later setters

Examples:
  # Output 1V 1A for ~3s
  fnirsi-ps v=1 c=1 on sleep=3 off
  # Verified ramp with trace captures
  fnirsi-ps check v=1.5 c=1.0 on flush sep trace=15 c=0.5 off

Set FNIRSI_PS=/some/devport to pick the default port."
)]
struct Args {
    /// Serial device (default: $FNIRSI_PS, else /dev/fnirsi-ps0)
    #[arg(short, long)]
    port: Option<String>,

    /// Device model: dc6006l or dc580
    #[arg(short, long, default_value = "dc6006l")]
    model: DeviceModel,

    /// Emit status records as JSON lines instead of text
    #[arg(long)]
    json: bool,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Command tokens, executed strictly in order
    #[arg(required = true)]
    commands: Vec<String>,
}

/// Everything the command processor needs, resolved once up front.
struct Config {
    port: String,
    model: DeviceModel,
}

impl Config {
    fn from_args(args: &Args) -> Self {
        let port = args
            .port
            .clone()
            .or_else(|| std::env::var(PORT_ENV).ok())
            .unwrap_or_else(|| DEFAULT_PORT.to_string());
        Config {
            port,
            model: args.model,
        }
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "fnirsi_dc_psu=info,fnirsi_ps=info",
        1 => "fnirsi_dc_psu=debug,fnirsi_ps=debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);
    let config = Config::from_args(&args);

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = cancel.clone();
        if let Err(e) = ctrlc::set_handler(move || cancel.store(true, Ordering::Relaxed)) {
            tracing::warn!("ctrl-c handler not installed: {e}");
        }
    }

    tracing::info!(port = %config.port, model = %config.model, "connecting");
    let session = match transport::open(&config.port) {
        Ok(session) => session,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut psu: FnirsiPsu<_, 256> = FnirsiPsu::new(session, config.model);

    // Quiesce whatever the device was still streaming from a previous run.
    if let Err(e) = psu.flush() {
        eprintln!("Error: {e}");
        return ExitCode::FAILURE;
    }

    let mut stdout = io::stdout().lock();
    match command::run(&mut psu, &args.commands, &mut stdout, args.json, &cancel) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
