use std::{env, path::Path, process::exit};

use bunstrap::{fetch, get_error_chain, EXTRACT_ROOT};
use reqwest::Client;
use tokio::runtime;

async fn inner_main() -> anyhow::Result<()> {
    let mut args = env::args().skip(1);

    let Some(filter) = args.next() else {
        println!("usage: bunstrap <asset-filter> [output-dir]");
        println!("example: bunstrap bun-darwin-aarch64 ./.pio");
        return Ok(());
    };
    let output_dir = args.next().unwrap_or_else(|| EXTRACT_ROOT.to_string());

    let client = Client::new();
    if let Err(err) = fetch(&client, &filter, Path::new(&output_dir)).await {
        println!("failed to fetch bun!");
        println!("errors: {}", get_error_chain(&err));
        exit(1);
    }

    Ok(())
}

fn main() -> anyhow::Result<()> {
    let rt = runtime::Builder::new_current_thread()
        .enable_io()
        .enable_time()
        .build()?;

    rt.block_on(inner_main())
}
