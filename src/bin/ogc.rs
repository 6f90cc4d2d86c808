use std::error::Error;
use clap::Parser;
use tracing::info;
use reltab_learn::{config, ogc, OgcArgs, OgcParams};


fn main() -> Result<(), Box<dyn Error>> {

    let args = OgcArgs::parse();
    config::init_tracing(args.verbose)?;

    let params = OgcParams::new(&args)?;
    config::init_threads(params.threads)?;

    let report = ogc::run(&params)?;
    info!("report: {}", serde_json::to_string(&report)?);

    Ok(())
}
