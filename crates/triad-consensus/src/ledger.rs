//! Pull-based escrow ledger.
//!
//! Amounts owed to a recipient accumulate here and are withdrawn by the
//! recipient whenever they choose. A recipient that cannot receive funds
//! only blocks itself.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use triad_types::{Result, TriadError};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(
    serialize = "K: Serialize + Ord",
    deserialize = "K: Deserialize<'de> + Ord"
))]
pub struct EscrowLedger<K> {
    owed: BTreeMap<K, Decimal>,
    total_credited: Decimal,
    total_withdrawn: Decimal,
}

impl<K> Default for EscrowLedger<K> {
    fn default() -> Self {
        Self {
            owed: BTreeMap::new(),
            total_credited: Decimal::ZERO,
            total_withdrawn: Decimal::ZERO,
        }
    }
}

impl<K: Ord + Copy> EscrowLedger<K> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `amount` to what `recipient` may withdraw. Non-positive amounts
    /// are ignored.
    pub fn credit(&mut self, recipient: K, amount: Decimal) {
        if amount <= Decimal::ZERO {
            return;
        }
        *self.owed.entry(recipient).or_insert(Decimal::ZERO) += amount;
        self.total_credited += amount;
    }

    #[must_use]
    pub fn owed(&self, recipient: &K) -> Decimal {
        self.owed.get(recipient).copied().unwrap_or(Decimal::ZERO)
    }

    /// Drain everything owed to `recipient`.
    ///
    /// # Errors
    /// `NothingToClaim` if nothing is owed.
    pub fn withdraw(&mut self, recipient: &K) -> Result<Decimal> {
        let amount = self
            .owed
            .remove(recipient)
            .filter(|a| *a > Decimal::ZERO)
            .ok_or(TriadError::NothingToClaim)?;
        self.total_withdrawn += amount;
        Ok(amount)
    }

    /// Sum of all unwithdrawn balances.
    #[must_use]
    pub fn outstanding(&self) -> Decimal {
        self.owed.values().copied().sum()
    }

    #[must_use]
    pub fn total_credited(&self) -> Decimal {
        self.total_credited
    }

    #[must_use]
    pub fn total_withdrawn(&self) -> Decimal {
        self.total_withdrawn
    }

    /// Number of recipients with a balance.
    #[must_use]
    pub fn len(&self) -> usize {
        self.owed.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.owed.is_empty()
    }

    /// `credited == outstanding + withdrawn`.
    pub fn verify(&self) -> Result<()> {
        let accounted = self.outstanding() + self.total_withdrawn;
        if accounted != self.total_credited {
            return Err(TriadError::ConservationViolation {
                reason: format!(
                    "ledger credited {} but outstanding + withdrawn = {accounted}",
                    self.total_credited
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use triad_types::AccountId;

    use super::*;

    #[test]
    fn credit_accumulates_and_withdraw_drains() {
        let mut ledger = EscrowLedger::new();
        let alice = AccountId::new();
        ledger.credit(alice, Decimal::new(5, 0));
        ledger.credit(alice, Decimal::new(3, 0));
        assert_eq!(ledger.owed(&alice), Decimal::new(8, 0));

        assert_eq!(ledger.withdraw(&alice).unwrap(), Decimal::new(8, 0));
        assert_eq!(ledger.owed(&alice), Decimal::ZERO);
        assert!(matches!(ledger.withdraw(&alice), Err(TriadError::NothingToClaim)));
        ledger.verify().unwrap();
    }

    #[test]
    fn one_recipient_does_not_block_another() {
        let mut ledger = EscrowLedger::new();
        let (a, b) = (AccountId::new(), AccountId::new());
        ledger.credit(a, Decimal::ONE);
        ledger.credit(b, Decimal::TWO);
        // `a` never withdraws; `b` still can.
        assert_eq!(ledger.withdraw(&b).unwrap(), Decimal::TWO);
        assert_eq!(ledger.outstanding(), Decimal::ONE);
        assert_eq!(ledger.total_withdrawn(), Decimal::TWO);
        ledger.verify().unwrap();
    }

    #[test]
    fn zero_credit_ignored() {
        let mut ledger: EscrowLedger<AccountId> = EscrowLedger::new();
        ledger.credit(AccountId::new(), Decimal::ZERO);
        assert!(ledger.is_empty());
        assert_eq!(ledger.total_credited(), Decimal::ZERO);
    }

    #[test]
    fn serde_roundtrip() {
        let mut ledger = EscrowLedger::new();
        let a = AccountId::new();
        ledger.credit(a, Decimal::new(42, 1));
        let json = serde_json::to_string(&ledger).unwrap();
        let back: EscrowLedger<AccountId> = serde_json::from_str(&json).unwrap();
        assert_eq!(back.owed(&a), Decimal::new(42, 1));
    }
}
