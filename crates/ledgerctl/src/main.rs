mod cli;

use clap::Parser;
use cli::{Cli, Command};
use common::{config::Config, logging};
use db::Database;
use ledger::Ledger;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    let config = Config::new(cli.config)?;

    logging::init(&config);

    info!("connecting to database");
    let database = Database::connect(&config.database.url).await?;

    let ledger = Ledger::new(database, config.billing);

    match cli.command {
        Command::User(command) => cli::user(&ledger, command).await?,
        Command::Tariff(command) => cli::tariff(&ledger, command).await?,
        Command::Device(command) => cli::device(&ledger, command).await?,
        Command::Payment(command) => cli::payment(&ledger, command).await?,
        Command::Stats => cli::stats(&ledger).await?,
    }

    Ok(())
}
