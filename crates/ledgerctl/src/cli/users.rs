use db::user;
use ledger::{Ledger, LedgerError, Profile};

use super::UserCommand;

fn print_user(user: &user::Model) {
    println!("id:             {}", user.id);
    println!("telegram id:    {}", user.tg_id);
    if let Some(username) = &user.username {
        println!("username:       @{username}");
    }
    println!("balance:        {}", user.balance);
    match user.subscription_until {
        Some(until) => println!("subscription:   until {until}"),
        None => println!("subscription:   none"),
    }
    println!(
        "devices:        {} + {} extra",
        user.device_quota, user.extra_devices
    );
    if let Some(code) = &user.referral_code {
        println!("referral code:  {code}");
    }
    if let Some(referrer) = user.referred_by_user_id {
        println!("referred by:    {referrer}");
    }
    if user.is_admin {
        println!("administrator");
    }
}

pub async fn user(ledger: &Ledger, command: UserCommand) -> Result<(), LedgerError> {
    match command {
        UserCommand::Create {
            tg_id,
            username,
            referral_code,
        } => {
            let profile = Profile {
                username,
                ..Profile::default()
            };

            let registration = ledger.register_user(tg_id, profile, referral_code).await?;
            if !registration.created {
                println!("user is already registered");
            }

            print_user(&registration.user);
        }
        UserCommand::Show { tg_id } => {
            print_user(&ledger.get_user_by_tg_id(tg_id).await?);
        }
        UserCommand::Find { username } => {
            print_user(&ledger.find_user_by_username(&username).await?);
        }
        UserCommand::List { scope } => {
            let users = ledger.users_by_scope(scope).await?;

            println!("{} users", users.len());
            for user in users {
                println!("{}", user.tg_id);
            }
        }
        UserCommand::Credit { tg_id, amount } => {
            let user = ledger.get_user_by_tg_id(tg_id).await?;
            print_user(&ledger.credit_balance(user.id, amount).await?);
        }
        UserCommand::Extend { tg_id, days } => {
            let user = ledger.get_user_by_tg_id(tg_id).await?;
            print_user(&ledger.extend_subscription(user.id, days).await?);
        }
        UserCommand::Quota { tg_id, quota } => {
            let user = ledger.get_user_by_tg_id(tg_id).await?;
            print_user(&ledger.set_device_quota(user.id, quota).await?);
        }
        UserCommand::GrantDevice { tg_id } => {
            let user = ledger.get_user_by_tg_id(tg_id).await?;
            print_user(&ledger.grant_extra_device(user.id).await?);
        }
        UserCommand::RevokeDevice { tg_id } => {
            let user = ledger.get_user_by_tg_id(tg_id).await?;
            print_user(&ledger.revoke_extra_device(user.id).await?);
        }
        UserCommand::Reset { tg_id } => {
            let user = ledger.get_user_by_tg_id(tg_id).await?;
            print_user(&ledger.reset_subscription(user.id).await?);
        }
        UserCommand::Referrals { tg_id } => {
            let user = ledger.get_user_by_tg_id(tg_id).await?;
            let summary = ledger.referral_summary(user.id).await?;

            println!("invited: {}", summary.invited);
            println!("earned:  {}", summary.earned);
        }
        UserCommand::Delete { tg_id } => {
            let user = ledger.get_user_by_tg_id(tg_id).await?;
            ledger.delete_user(user.id).await?;

            println!("user {} deleted", user.id);
        }
    }

    Ok(())
}
