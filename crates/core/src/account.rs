use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum AccountIdError {
    #[error("bank id must not be empty")]
    EmptyBankId,
    #[error("bank account id must not be empty")]
    EmptyBankAccountId,
    #[error("invalid account id: {0}")]
    Malformed(String),
}

/// Natural key of a bank account: the bank's own account number plus the
/// bank code. String form is `"account/bank"`, the Czech convention.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountId {
    bank_id: String,
    bank_account_id: String,
}

impl AccountId {
    pub fn new(bank_id: &str, bank_account_id: &str) -> Result<Self, AccountIdError> {
        if bank_id.trim().is_empty() {
            return Err(AccountIdError::EmptyBankId);
        }
        if bank_account_id.trim().is_empty() {
            return Err(AccountIdError::EmptyBankAccountId);
        }
        Ok(AccountId {
            bank_id: bank_id.trim().to_string(),
            bank_account_id: bank_account_id.trim().to_string(),
        })
    }

    pub fn bank_id(&self) -> &str {
        &self.bank_id
    }

    pub fn bank_account_id(&self) -> &str {
        &self.bank_account_id
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bank_account_id, self.bank_id)
    }
}

impl FromStr for AccountId {
    type Err = AccountIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (account, bank) = s
            .split_once('/')
            .ok_or_else(|| AccountIdError::Malformed(s.to_string()))?;
        AccountId::new(bank, account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_rejects_empty_parts() {
        assert_eq!(AccountId::new("", "123456789"), Err(AccountIdError::EmptyBankId));
        assert_eq!(
            AccountId::new("2010", "   "),
            Err(AccountIdError::EmptyBankAccountId)
        );
    }

    #[test]
    fn display_is_account_slash_bank() {
        let id = AccountId::new("2010", "123456789").unwrap();
        assert_eq!(id.to_string(), "123456789/2010");
    }

    #[test]
    fn parse_round_trips_display() {
        let id = AccountId::new("2010", "123456789").unwrap();
        let parsed: AccountId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn parse_rejects_missing_separator() {
        assert!(matches!(
            "123456789".parse::<AccountId>(),
            Err(AccountIdError::Malformed(_))
        ));
    }

    #[test]
    fn new_trims_whitespace() {
        let id = AccountId::new(" 2010 ", " 123 ").unwrap();
        assert_eq!(id.bank_id(), "2010");
        assert_eq!(id.bank_account_id(), "123");
    }
}
