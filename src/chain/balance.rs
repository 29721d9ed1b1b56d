//! Native balance tracking for every address on the host chain

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::encoding::Address;
use crate::error::{KernelError, Result};

/// Balance store for all addresses
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct BalanceStore {
    balances: HashMap<Address, u128>,
}

impl BalanceStore {
    /// Create a new empty balance store
    pub fn new() -> Self {
        Self {
            balances: HashMap::new(),
        }
    }

    /// Get balance for an address
    pub fn get_balance(&self, account: &Address) -> u128 {
        self.balances.get(account).copied().unwrap_or(0)
    }

    /// Credit (add) balance to an address
    pub fn credit(&mut self, account: &Address, amount: u128) -> Result<()> {
        if amount == 0 {
            return Ok(());
        }

        let current = self.get_balance(account);
        let new_balance = current.checked_add(amount).ok_or(KernelError::Overflow)?;

        self.balances.insert(*account, new_balance);
        Ok(())
    }

    /// Debit (subtract) balance from an address
    pub fn debit(&mut self, account: &Address, amount: u128) -> Result<()> {
        if amount == 0 {
            return Ok(());
        }

        let current = self.get_balance(account);
        if current < amount {
            return Err(KernelError::InsufficientFunds {
                available: current,
                required: amount,
            });
        }

        let new_balance = current - amount;
        if new_balance == 0 {
            self.balances.remove(account);
        } else {
            self.balances.insert(*account, new_balance);
        }

        Ok(())
    }

    /// Transfer balance from one address to another
    pub fn transfer(&mut self, from: &Address, to: &Address, amount: u128) -> Result<()> {
        if from == to {
            // still enforce that the sender can cover it
            let available = self.get_balance(from);
            if available < amount {
                return Err(KernelError::InsufficientFunds {
                    available,
                    required: amount,
                });
            }
            return Ok(());
        }

        self.debit(from, amount)?;

        if let Err(e) = self.credit(to, amount) {
            // Rollback on error
            self.credit(from, amount).ok();
            return Err(e);
        }

        Ok(())
    }

    /// Set balance directly (genesis / test funding)
    pub fn set_balance(&mut self, account: &Address, amount: u128) {
        if amount == 0 {
            self.balances.remove(account);
        } else {
            self.balances.insert(*account, amount);
        }
    }

    /// Sum of all balances
    pub fn total_supply(&self) -> u128 {
        self.balances.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balance_operations() {
        let mut store = BalanceStore::new();
        let alice = Address::from_low_u64(1);

        store.credit(&alice, 1000).unwrap();
        assert_eq!(store.get_balance(&alice), 1000);

        store.debit(&alice, 300).unwrap();
        assert_eq!(store.get_balance(&alice), 700);

        // Test insufficient funds
        assert_eq!(
            store.debit(&alice, 1000),
            Err(KernelError::InsufficientFunds { available: 700, required: 1000 })
        );
    }

    #[test]
    fn test_transfer() {
        let mut store = BalanceStore::new();
        let alice = Address::from_low_u64(1);
        let bob = Address::from_low_u64(2);
        store.credit(&alice, 1000).unwrap();

        store.transfer(&alice, &bob, 400).unwrap();

        assert_eq!(store.get_balance(&alice), 600);
        assert_eq!(store.get_balance(&bob), 400);
        assert_eq!(store.total_supply(), 1000);
    }

    #[test]
    fn test_self_transfer_requires_funds() {
        let mut store = BalanceStore::new();
        let alice = Address::from_low_u64(1);
        store.credit(&alice, 10).unwrap();

        assert!(store.transfer(&alice, &alice, 10).is_ok());
        assert!(store.transfer(&alice, &alice, 11).is_err());
        assert_eq!(store.get_balance(&alice), 10);
    }
}
