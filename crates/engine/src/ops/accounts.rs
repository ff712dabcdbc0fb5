use crate::{BankAccount, NewBankAccount, ResultEngine, store};

use super::{Engine, normalize_required_text};

impl Engine {
    /// Add a new bank account. Its balance starts at `initial_amount`.
    pub async fn create_bank_account(&self, cmd: NewBankAccount) -> ResultEngine<BankAccount> {
        let name = normalize_required_text(&cmd.name, "account name")?;
        let account_number = normalize_required_text(&cmd.account_number, "account number")?;

        let mut account = BankAccount::new(name, account_number, cmd.initial_amount);
        account.id = self
            .store
            .add(store::BANK_ACCOUNTS, store::encode(&account)?)
            .await?;
        tracing::info!("bank account {} created ({})", account.id, account.name);
        Ok(account)
    }

    /// Return a bank account snapshot.
    pub async fn bank_account(&self, account_id: &str) -> ResultEngine<BankAccount> {
        self.require_account(account_id).await
    }

    /// Every bank account that decodes. Malformed ones are logged and skipped.
    pub async fn bank_accounts(&self) -> ResultEngine<Vec<BankAccount>> {
        self.load_all_accounts().await
    }
}
