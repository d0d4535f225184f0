use std::sync::Arc;
use std::time::Duration;

use chord::{rpc::TcpTransport, ChordNode, Node};

use clap::Parser;

use tracing::Level;

#[derive(Parser)]
#[command(author, version, about = "Run a Chord ring node", long_about = None)]
struct Cli {
    /// Ip address other nodes reach this node on
    #[arg(long, default_value = "127.0.0.1")]
    ip: String,
    #[arg(long, default_value_t = chord::rpc::DEFAULT_PORT)]
    port: u16,
    /// Ring width in bits
    #[arg(long, default_value_t = chord::rpc::DEFAULT_BITS)]
    bits: u32,
    /// Address of a ring member to join, as `ip:port`
    #[arg(long)]
    join: Option<String>,
    /// Seconds between two routing state reports
    #[arg(long, default_value_t = 5)]
    report: u64,
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose {
            Level::DEBUG
        } else {
            Level::INFO
        })
        .init();

    let transport = Arc::new(
        TcpTransport::bind(("0.0.0.0", cli.port)).expect("failed to bind the transport"),
    );

    let node = ChordNode::builder()
        .ip(&cli.ip)
        .port(cli.port)
        .bits(cli.bits)
        .build(transport.clone())
        .expect("failed to start the node");

    if let Some(address) = cli.join {
        let (ip, port) = address
            .rsplit_once(':')
            .expect("--join expects ip:port");
        let port: u16 = port.parse().expect("invalid port");

        node.join_address(ip, port).expect("failed to join the ring");
    }

    let (stop, stopped) = flume::bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = stop.try_send(());
    })
    .expect("failed to set the Ctrl-C handler");

    while stopped
        .recv_timeout(Duration::from_secs(cli.report))
        .is_err()
    {
        report(&node);
    }

    println!("\nShutting down...");
    node.shutdown();
    transport.close();
}

fn report(node: &ChordNode) {
    let info = node.info();

    println!("\n=== {} ({}) ===", info.node(), info.id());
    println!("successor:   {}", describe(Some(info.successor())));
    println!("predecessor: {}", describe(info.predecessor()));

    let mut previous: Option<&Node> = None;
    for (index, finger) in info.fingers().iter().enumerate().rev() {
        if previous != Some(finger) {
            println!("finger[{index:>3}]: {}", describe(Some(finger)));
        }
        previous = Some(finger);
    }
}

fn describe(node: Option<&Node>) -> String {
    match node {
        Some(node) => format!("{} ({})", node, node.id()),
        None => "none".to_string(),
    }
}
