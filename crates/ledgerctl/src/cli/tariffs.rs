use ledger::{Ledger, LedgerError, NewTariff};

use super::TariffCommand;

pub async fn tariff(ledger: &Ledger, command: TariffCommand) -> Result<(), LedgerError> {
    match command {
        TariffCommand::Add {
            name,
            days,
            price,
            max_devices,
        } => {
            let tariff = ledger
                .create_tariff(NewTariff {
                    name,
                    days,
                    price,
                    max_devices,
                })
                .await?;

            println!("tariff {} created", tariff.id);
        }
        TariffCommand::List => {
            let currency = &ledger.billing().currency;

            for tariff in ledger.active_tariffs().await? {
                println!(
                    "{:>4}  {:<24} {:>4} days  {:>3} devices  {} {}",
                    tariff.id, tariff.name, tariff.days, tariff.max_devices, tariff.price, currency
                );
            }
        }
        TariffCommand::Enable { id } => {
            ledger.set_tariff_active(id, true).await?;
        }
        TariffCommand::Disable { id } => {
            ledger.set_tariff_active(id, false).await?;
        }
    }

    Ok(())
}
