//! Example: find which routing endpoint recognizes a credential and print the result as JSON.
//!
//! Usage: cargo run -p wallet-sync --example discover -- --credential sk-... --endpoint api.example.com
//!        [--known URL]... [--directory URL | --no-directory] [--batch-size N] [--timeout-ms MS]

use std::time::Duration;
use wallet_sync::{CredentialDiscovery, DiscoveryConfig, EndpointCandidate};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let args: Vec<String> = std::env::args().collect();
    let mut credential = String::new();
    let mut endpoint = String::new();
    let mut known = Vec::new();
    let mut config = DiscoveryConfig::default();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--credential" => {
                i += 1;
                credential = args.get(i).cloned().unwrap_or_default();
            }
            "--endpoint" => {
                i += 1;
                endpoint = args.get(i).cloned().unwrap_or_default();
            }
            "--known" => {
                i += 1;
                known.extend(args.get(i).cloned());
            }
            "--directory" => {
                i += 1;
                config.directory_url = args.get(i).cloned();
            }
            "--no-directory" => config.directory_url = None,
            "--batch-size" => {
                i += 1;
                config.batch_size = args.get(i).and_then(|s| s.parse().ok()).unwrap_or(config.batch_size);
            }
            "--timeout-ms" => {
                i += 1;
                if let Some(ms) = args.get(i).and_then(|s| s.parse().ok()) {
                    config.probe_timeout = Duration::from_millis(ms);
                }
            }
            _ => {}
        }
        i += 1;
    }
    if credential.is_empty() || endpoint.is_empty() {
        eprintln!("Usage: discover --credential KEY --endpoint URL [--known URL]... [--directory URL]");
        std::process::exit(1);
    }
    let preferred = EndpointCandidate::parse(&endpoint)?;
    let discovery = CredentialDiscovery::from_config(config)?;

    let rt = tokio::runtime::Runtime::new()?;
    let result = rt.block_on(discovery.discover(&credential, &preferred, &known));
    println!("{}", serde_json::to_string_pretty(&result)?);
    if result.matched.is_none() {
        std::process::exit(2);
    }
    Ok(())
}
