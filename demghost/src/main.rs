use clap::Parser;
use demghost::Cli;
use miette::Result;

fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(cli.verbose.log_level_filter())
        .format_timestamp(None)
        .init();
    log::debug!("demghost {}", demghost::VERSION);

    let merged = demghost::run(&cli)?;
    log::info!(
        "Merged {} ghost(s) into {}",
        merged.ghosts.len(),
        cli.output.display()
    );
    Ok(())
}
