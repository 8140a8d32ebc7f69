use db::device;
use ledger::{Ledger, LedgerError};

use super::DeviceCommand;

fn print_device(device: &device::Model) {
    let state = if device.enabled { "enabled" } else { "disabled" };

    println!(
        "{:>6}  {:<8} {:<24} {}",
        device.id, state, device.wg_client_name, device.wg_client_id
    );
}

pub async fn device(ledger: &Ledger, command: DeviceCommand) -> Result<(), LedgerError> {
    match command {
        DeviceCommand::List { tg_id } => {
            let user = ledger.get_user_by_tg_id(tg_id).await?;

            for device in ledger.user_devices(user.id).await? {
                print_device(&device);
            }
        }
        DeviceCommand::Enable { id } => print_device(&ledger.enable_device(id).await?),
        DeviceCommand::Disable { id } => print_device(&ledger.disable_device(id).await?),
        DeviceCommand::Delete { id } => {
            ledger.delete_device(id).await?;

            println!("device {id} deleted");
        }
        DeviceCommand::Enforce { tg_id } => {
            let user = ledger.get_user_by_tg_id(tg_id).await?;

            for device in ledger.enforce_device_limit(user.id).await? {
                print_device(&device);
            }
        }
    }

    Ok(())
}
