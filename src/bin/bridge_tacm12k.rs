use std::error::Error;
use clap::Parser;
use tracing::info;
use reltab_learn::{bridge, config, BridgeArgs, BridgeParams};


fn main() -> Result<(), Box<dyn Error>> {

    let args = BridgeArgs::parse();
    config::init_tracing(args.verbose)?;

    let params = BridgeParams::new(&args)?;
    config::init_threads(params.threads)?;

    let report = bridge::run(&params)?;
    info!("report: {}", serde_json::to_string(&report)?);

    Ok(())
}
