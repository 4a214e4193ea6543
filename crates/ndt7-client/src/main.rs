//! ndt7 client
//!
//! Runs one download + upload session against an ndt7 server and exits with
//! the composite status code (`download + (upload << 4)`).

use std::path::PathBuf;

use clap::Parser;
use ndt7_client::{Callbacks, Client, ClientConfigInput};
use tracing_subscriber::EnvFilter;

/// ndt7 speed test.
#[derive(Parser, Debug)]
#[command(name = "ndt7-client", about = "ndt7 download/upload speed test")]
struct Cli {
    /// TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Server location identifier (e.g. "rj", "sp").
    #[arg(long)]
    location: Option<String>,

    /// Server URL template with {location} and {subtest} placeholders.
    #[arg(long)]
    url_template: Option<String>,

    /// Print the final results as JSON.
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut input = match &cli.config {
        Some(path) => ClientConfigInput::load(path)?,
        None => ClientConfigInput::default(),
    };
    if cli.location.is_some() {
        input.location = cli.location;
    }
    if cli.url_template.is_some() {
        input.url_template = cli.url_template;
    }
    let config = input.resolve()?;

    let client = Client::new(config, callbacks(cli.json));
    let urls = client.urls();
    tracing::info!(
        location = %client.config().location,
        download = %urls.download,
        upload = %urls.upload,
        "ndt7-client starting"
    );

    let status = client.run().await?;
    tracing::info!(%status, "ndt7-client finished");
    std::process::exit(i32::from(status.code()));
}

fn callbacks(json: bool) -> Callbacks {
    Callbacks::new()
        .on_error(|e| tracing::error!(error = %e, "subtest failed"))
        .on_download_measurement(|m| {
            tracing::info!(
                elapsed_s = format_args!("{:.2}", m.elapsed_time),
                mbps = format_args!("{:.2}", m.mean_client_mbps),
                "download"
            )
        })
        .on_upload_measurement(|m| {
            tracing::info!(
                elapsed_s = format_args!("{:.2}", m.elapsed_time),
                mbps = format_args!("{:.2}", m.mean_client_mbps),
                "upload"
            )
        })
        .on_final_measurements(move |r| {
            if json {
                match serde_json::to_string_pretty(r) {
                    Ok(out) => println!("{out}"),
                    Err(e) => tracing::error!(error = %e, "cannot encode results"),
                }
                return;
            }
            println!("timestamp:       {}", r.timestamp.to_rfc3339());
            println!("download:        {:.2} Mbps", r.bandwidth_download);
            println!("upload:          {:.2} Mbps", r.bandwidth_upload);
            println!("retransmission:  {:.2} %", r.retransmission_pct);
            println!("rtt:             {:.2} ms", r.rtt);
            println!("jitter:          {:.2} ms", r.jitter);
            println!("client:          {}", r.client_ip);
            println!("server:          {} ({})", r.server_ip, r.server_name);
        })
}
