use db::payment;
use ledger::{Ledger, LedgerError};

use super::PaymentCommand;

fn print_payment(payment: &payment::Model) {
    println!(
        "{:>6}  {:<10} {:<12} {} {}  user {}  {}",
        payment.id,
        payment.status.as_str(),
        payment.purpose.as_str(),
        payment.amount,
        payment.currency,
        payment.user_id,
        payment.yk_payment_id.as_deref().unwrap_or("-"),
    );
}

pub async fn payment(ledger: &Ledger, command: PaymentCommand) -> Result<(), LedgerError> {
    match command {
        PaymentCommand::Show { external_id } => {
            print_payment(&ledger.get_payment(&external_id).await?);
        }
        PaymentCommand::Finalize {
            external_id,
            status,
        } => {
            let finalization = ledger.finalize_payment(&external_id, status).await?;
            if !finalization.changed {
                println!(
                    "payment is already {}",
                    finalization.payment.status.as_str()
                );
            }

            print_payment(&finalization.payment);
        }
        PaymentCommand::Pending { limit } => {
            for payment in ledger.pending_payments(limit).await? {
                print_payment(&payment);
            }
        }
        PaymentCommand::Report { period } => {
            let report = ledger.payment_report(period).await?;

            println!("payments: {}", report.count);
            println!("total:    {} {}", report.total, ledger.billing().currency);
            for purpose in report.by_purpose {
                println!(
                    "  {:<12} {:>6}  {}",
                    purpose.purpose.as_str(),
                    purpose.count,
                    purpose.total
                );
            }
        }
    }

    Ok(())
}
