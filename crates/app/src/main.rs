use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use vrack_core::modules::builtin_catalog;
use vrack_core::server::send_message;
use vrack_core::{AppConfig, Argument, Message, OscServer, ServerConfig, VrackError};

fn main() -> vrack_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            listen_port,
            send_port,
            peers,
            frame_rate,
            log_incoming,
        } => {
            let mut server_config = match config {
                Some(path) => AppConfig::from_path(&path)?.server,
                None => ServerConfig::default(),
            };
            if let Some(port) = listen_port {
                server_config.listen_port = port;
            }
            if let Some(port) = send_port {
                server_config.send_port = port;
            }
            if peers.is_some() {
                server_config.peer_store = peers;
            }
            if let Some(rate) = frame_rate {
                server_config.frame_rate = rate;
            }
            server_config.log_incoming |= log_incoming;
            server_config.validate()?;
            run_serve(server_config)
        }
        Commands::Send {
            host,
            port,
            address,
            args,
        } => run_send(&host, port, address, &args),
        Commands::Modules => {
            list_modules();
            Ok(())
        }
    }
}

fn run_serve(config: ServerConfig) -> vrack_core::Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = running.clone();
    ctrlc::set_handler(move || handler_flag.store(false, Ordering::SeqCst))
        .map_err(|err| VrackError::msg(format!("failed to install ctrl-c handler: {err}")))?;

    let frame = config.frame_duration();
    let mut server: OscServer = OscServer::new(config, builtin_catalog());
    server.start()?;

    let mut last = Instant::now();
    while running.load(Ordering::SeqCst) {
        let started = Instant::now();
        if let Err(err) = server.tick(started - last) {
            tracing::error!(%err, "tick failed");
            break;
        }
        last = started;

        if let Some(remaining) = frame.checked_sub(started.elapsed()) {
            thread::sleep(remaining);
        }
    }

    tracing::info!("shutting down");
    server.stop()
}

fn run_send(host: &str, port: u16, address: String, args: &[String]) -> vrack_core::Result<()> {
    let target: SocketAddr = (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| VrackError::msg(format!("could not resolve {host}")))?;
    let message = Message::new(address, args.iter().map(|arg| parse_argument(arg)).collect());

    send_message(target, &message)?;
    tracing::info!(%target, %message, "sent");
    Ok(())
}

/// Ints first, then floats, anything else travels as a string.
fn parse_argument(raw: &str) -> Argument {
    if let Ok(value) = raw.parse::<i32>() {
        Argument::Int(value)
    } else if let Ok(value) = raw.parse::<f32>() {
        Argument::Float(value)
    } else {
        Argument::Str(raw.to_string())
    }
}

fn list_modules() {
    let catalog = builtin_catalog();
    for name in catalog.type_names() {
        let Some(descriptor) = catalog.descriptor(name) else {
            continue;
        };
        println!("{name}");
        for input in &descriptor.inputs {
            let range = &input.range;
            println!(
                "  input    {:<12} {}..{} -> {}..{}",
                input.name, range.min_input, range.max_input, range.min_output, range.max_output
            );
        }
        for property in &descriptor.properties {
            println!(
                "  property {:<12} {} {:?}",
                property.name,
                property.kind.name(),
                property.access
            );
        }
        for output in &descriptor.outputs {
            println!("  output   {output}");
        }
        for query in &descriptor.queries {
            println!("  query    {query}");
        }
        for action in &descriptor.actions {
            println!("  action   {action}");
        }
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "OSC-controlled module rack server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Listen for a controller and drive the rack until ctrl-c.
    Serve {
        /// JSON configuration file.
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[arg(long)]
        listen_port: Option<u16>,
        /// Port peers listen on.
        #[arg(long)]
        send_port: Option<u16>,
        /// Where the peer list is kept between runs.
        #[arg(long)]
        peers: Option<PathBuf>,
        /// Ticks per second.
        #[arg(long)]
        frame_rate: Option<f32>,
        /// Log every routed message at debug level.
        #[arg(long)]
        log_incoming: bool,
    },
    /// Send a single OSC message, e.g. `vrack send 127.0.0.1 /Add Lamp 1`.
    Send {
        host: String,
        /// Address path of the message.
        address: String,
        /// Arguments, typed as int, then float, then string.
        #[arg(allow_hyphen_values = true)]
        args: Vec<String>,
        #[arg(short, long, default_value_t = 54321)]
        port: u16,
    },
    /// List the built-in module types.
    Modules,
}
