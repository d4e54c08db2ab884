//! Single-call DCE RPC client
//!
//! Run with: cargo run --bin ndr-call -- --port 5000 \
//!     --interface 12345678-1234-1234-1234-123456789012 --opnum 1 --stub 68656c6c6f

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use ndr_client::{ServiceDescriptor, SessionBuilder};

#[derive(Parser)]
#[command(name = "ndr-call")]
#[command(about = "Bind to a DCE RPC interface and issue one call")]
struct Args {
    /// Server host
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(short, long, default_value = "135")]
    port: u16,

    /// Interface UUID
    #[arg(short, long)]
    interface: String,

    /// Interface major version
    #[arg(long, default_value = "1")]
    major: u16,

    /// Interface minor version
    #[arg(long, default_value = "0")]
    minor: u16,

    /// Operation number to call
    #[arg(short, long, default_value = "0")]
    opnum: u16,

    /// Request stub data as hex
    #[arg(short, long, default_value = "")]
    stub: String,

    /// Restrict calls to these opnums (comma separated); any opnum is sent if omitted
    #[arg(long, value_delimiter = ',')]
    operations: Vec<u16>,

    /// I/O timeout in seconds
    #[arg(long, default_value = "30")]
    timeout: u64,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(if args.verbose { Level::TRACE } else { Level::INFO })
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let stub = hex::decode(args.stub.trim())?;

    let mut service = ServiceDescriptor::parse(&args.interface, args.major, args.minor)?;
    if !args.operations.is_empty() {
        service = service.operations(args.operations.iter().copied());
    }

    info!("Connecting to {}", addr);
    let mut session = SessionBuilder::new()
        .io_timeout(Duration::from_secs(args.timeout))
        .connect(addr)?;

    let binding = session.bind(&service)?;
    info!(
        "Bound {} as context {} (max_xmit_frag={}, max_recv_frag={})",
        service.interface,
        binding.presentation_id(),
        binding.max_xmit_frag(),
        binding.max_recv_frag()
    );

    let result = session.call_raw(&binding, args.opnum, &stub)?;
    info!("Opnum {} returned {} bytes", args.opnum, result.len());
    println!("{}", hex::encode(&result));

    Ok(())
}
