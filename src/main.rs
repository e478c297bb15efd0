use clap::Parser;
use prison_bot::cli::CliArgs;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    prison_bot::init_logging(args.debug, args.log_dir.as_deref())?;

    log::info!("PrisonBot starting...");
    prison_bot::run(args).await
}
