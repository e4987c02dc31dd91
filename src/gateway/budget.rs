//! Process-wide budget ledger, keyed by (provider, org).
//!
//! Debits happen before any provider is contacted; a call that would
//! exceed its account fails fast with no network traffic. Accounts not
//! present in the ledger are unlimited.

use std::sync::Mutex;

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use thiserror::Error;

use super::contract::BudgetHint;

/// Raised when a pre-call debit would overdraw the account.
#[derive(Debug, Error, Diagnostic)]
pub enum BudgetError {
    #[error("budget exhausted for provider {provider:?}, org {org:?}")]
    #[diagnostic(
        code(modforge::gateway::budget_exhausted),
        help("No provider was contacted; raise the account limits or stop submitting jobs.")
    )]
    Exhausted { provider: String, org: String },
}

/// Remaining allowance for one (provider, org) account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetAccount {
    pub tokens: u64,
    pub cost_microcents: u64,
    pub wall_ms: u64,
}

impl BudgetAccount {
    fn covers(&self, hint: &BudgetHint) -> bool {
        self.tokens >= hint.tokens
            && self.cost_microcents >= hint.cost_microcents
            && self.wall_ms >= hint.wall_ms
    }

    fn debit(&mut self, hint: &BudgetHint) {
        self.tokens -= hint.tokens;
        self.cost_microcents -= hint.cost_microcents;
        self.wall_ms -= hint.wall_ms;
    }
}

/// Shared ledger guarded by a mutex; the critical section is a map
/// lookup plus subtraction, never I/O.
#[derive(Debug, Default)]
pub struct BudgetLedger {
    accounts: Mutex<FxHashMap<(String, String), BudgetAccount>>,
}

impl BudgetLedger {
    /// A ledger with no accounts: every debit succeeds.
    #[must_use]
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// Set (or replace) the account for a (provider, org) pair.
    pub fn set_account(&self, provider: &str, org: &str, account: BudgetAccount) {
        self.accounts
            .lock()
            .expect("budget ledger poisoned")
            .insert((provider.to_string(), org.to_string()), account);
    }

    /// Debit the account before a call. All-or-nothing: either every
    /// dimension is debited or the call is refused.
    pub fn try_debit(
        &self,
        provider: &str,
        org: &str,
        hint: &BudgetHint,
    ) -> Result<(), BudgetError> {
        let mut accounts = self.accounts.lock().expect("budget ledger poisoned");
        let key = (provider.to_string(), org.to_string());
        match accounts.get_mut(&key) {
            None => Ok(()),
            Some(account) if account.covers(hint) => {
                account.debit(hint);
                Ok(())
            }
            Some(_) => Err(BudgetError::Exhausted {
                provider: provider.to_string(),
                org: org.to_string(),
            }),
        }
    }

    /// Remaining allowance, if the account is tracked.
    #[must_use]
    pub fn remaining(&self, provider: &str, org: &str) -> Option<BudgetAccount> {
        self.accounts
            .lock()
            .expect("budget ledger poisoned")
            .get(&(provider.to_string(), org.to_string()))
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hint(tokens: u64) -> BudgetHint {
        BudgetHint {
            tokens,
            cost_microcents: 0,
            wall_ms: 0,
        }
    }

    #[test]
    fn untracked_accounts_are_unlimited() {
        let ledger = BudgetLedger::unlimited();
        ledger.try_debit("primary", "acme", &hint(1_000_000)).unwrap();
    }

    #[test]
    fn debit_is_all_or_nothing() {
        let ledger = BudgetLedger::unlimited();
        ledger.set_account(
            "primary",
            "acme",
            BudgetAccount {
                tokens: 100,
                cost_microcents: 100,
                wall_ms: 100,
            },
        );
        ledger.try_debit("primary", "acme", &hint(60)).unwrap();
        assert!(ledger.try_debit("primary", "acme", &hint(60)).is_err());
        // The failed debit consumed nothing.
        assert_eq!(ledger.remaining("primary", "acme").unwrap().tokens, 40);
        ledger.try_debit("primary", "acme", &hint(40)).unwrap();
    }

    #[test]
    fn accounts_are_keyed_by_provider_and_org() {
        let ledger = BudgetLedger::unlimited();
        ledger.set_account(
            "primary",
            "acme",
            BudgetAccount {
                tokens: 0,
                cost_microcents: 0,
                wall_ms: 0,
            },
        );
        assert!(ledger.try_debit("primary", "acme", &hint(1)).is_err());
        ledger.try_debit("primary", "globex", &hint(1)).unwrap();
        ledger.try_debit("fallback", "acme", &hint(1)).unwrap();
    }
}
