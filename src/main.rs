use anyhow::Context;
use clap::{Parser, Subcommand};
use mbus_gateway::logging::log_warn;
use mbus_gateway::mbus::frame::parse_hex_frame;
use mbus_gateway::util::hex::encode_hex_upper;
use mbus_gateway::{
    build_read_command, decode_frame_registers, init_logger, log_info, GatewayConfig, GatewayEvent,
    GatewayServer,
};
use std::path::PathBuf;
use tokio::sync::broadcast::error::RecvError;

#[derive(Parser)]
#[command(name = "mbus-gateway")]
#[command(about = "TCP server for M-Bus metering gateways")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Accept gateway connections until Ctrl-C
    Serve {
        /// JSON config file
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[arg(short, long)]
        port: Option<u16>,
        #[arg(short, long)]
        bind: Option<String>,
    },
    /// Parse a hex encoded M-Bus frame
    ParseFrame { hex: String },
    /// Print the REQ_UD2 frame for a primary address
    BuildRead { address: u8 },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, port, bind } => {
            let mut config = match config {
                Some(path) => GatewayConfig::from_file(&path)
                    .with_context(|| format!("loading config {}", path.display()))?,
                None => GatewayConfig::default(),
            };
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(bind) = bind {
                config.bind_address = bind;
            }
            config.validate().context("invalid configuration")?;
            serve(config).await?;
        }
        Commands::ParseFrame { hex } => {
            let (frame, trailing) = parse_hex_frame(&hex).context("parsing frame")?;
            println!("type:     {:?}", frame.frame_type);
            if !frame.is_ack() {
                println!("control:  0x{:02X}", frame.control);
                println!("address:  {}", frame.address);
                println!("checksum: 0x{:02X}", frame.checksum);
            }
            if trailing > 0 {
                println!("trailing: {trailing} bytes");
            }
            if let Some(registers) = decode_frame_registers(&frame) {
                println!("data:     {}", encode_hex_upper(&frame.data));
                for register in registers {
                    println!(
                        "  DIF 0x{:02X} VIF 0x{:02X}: {} {}",
                        register.dif, register.vif, register.value, register.unit
                    );
                }
            }
        }
        Commands::BuildRead { address } => {
            println!("{}", encode_hex_upper(&build_read_command(address)));
        }
    }

    Ok(())
}

async fn serve(config: GatewayConfig) -> anyhow::Result<()> {
    let server = GatewayServer::new(config);
    let mut events = server.subscribe();
    let addr = server.start().await.context("starting gateway server")?;
    log_info(&format!("Waiting for gateways on {addr}"));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(GatewayEvent::DataReceived { .. }) => {}
                Ok(event) => {
                    let line = serde_json::to_string(&event)?;
                    log_info(&format!("Event: {line}"));
                }
                Err(RecvError::Lagged(skipped)) => {
                    log_warn(&format!("Event log lagging, skipped {skipped} events"));
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    log_info("Shutting down");
    server.stop().await;
    Ok(())
}
