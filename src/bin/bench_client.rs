use clap::{ArgAction, Parser};
use std::time::Duration;
use tracing::Level;
use xs_bench::bench::{self, BenchConfig};
use xs_bench::config::parse_bool;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = if args.debug { Level::DEBUG } else { Level::INFO };
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(level)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let config = BenchConfig {
        address: args.address,
        clients: args.clients,
        requests: args.requests,
        payload_size: args.data_size,
        timeout: Duration::from_secs(args.timeout),
        keepalive: args.keepalive,
    };

    tracing::info!(
        address = %config.address,
        clients = config.clients,
        requests = config.requests,
        payload_size = config.payload_size,
        timeout = config.timeout.as_secs(),
        keepalive = config.keepalive,
        "starting benchmark"
    );

    let report = bench::run(&config).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report.summary())?);
    } else if args.csv {
        for latency in report.latencies() {
            println!("{},", latency.as_micros());
        }
    } else {
        let summary = report.summary();
        println!();
        println!("====== {} ======", config.address);
        println!(
            "  {} requests completed in {:.5} seconds",
            summary.requests, summary.duration_secs
        );
        println!("  {} parallel clients", summary.clients);
        println!("  {} bytes payload", summary.payload_size);
        println!("  keep alive: {}", u8::from(summary.keepalive));
        println!();
        for (label, value) in [
            ("50%", summary.p50_us),
            ("90%", summary.p90_us),
            ("99%", summary.p99_us),
            ("max", summary.max_us),
        ] {
            if let Some(us) = value {
                println!("  {label} <= {us}us");
            }
        }
        println!();
        println!("{:.2} requests per second", summary.requests_per_second);
        println!("{:.2} MB per second", summary.megabytes_per_second);
    }

    Ok(())
}

#[derive(Parser, Debug)]
#[command(name = "bench-client", about = "Echo load generator")]
struct Args {
    /// Address of the echo server or the proxy in front of it
    #[arg(long, default_value = "127.0.0.1:19999")]
    address: String,

    /// Number of parallel connections
    #[arg(short, long, default_value_t = 20)]
    clients: usize,

    /// Total number of requests
    #[arg(short = 'n', long, default_value_t = 10_000)]
    requests: usize,

    /// Bytes sent (and echoed) per request
    #[arg(short, long, default_value_t = 500 * 1024)]
    data_size: usize,

    /// Socket timeout in seconds
    #[arg(short, long, default_value_t = 60)]
    timeout: u64,

    /// Print per-request latencies in microseconds as CSV
    #[arg(long)]
    csv: bool,

    /// Print the summary as JSON
    #[arg(long, conflicts_with = "csv")]
    json: bool,

    /// Reuse connections (1) or reconnect for every request (0)
    #[arg(long, default_value = "1", value_parser = parse_bool, action = ArgAction::Set)]
    keepalive: bool,

    /// Dump debug info
    #[arg(long, default_value = "0", value_parser = parse_bool, action = ArgAction::Set)]
    debug: bool,
}
