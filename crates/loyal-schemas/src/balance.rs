//! Per-user balance and the arithmetic rules of the ledger.
//!
//! Storage backends load the balance row under a lock, call [`Balance::credit`]
//! or [`Balance::debit`], and write the result back inside the same
//! transaction. Keeping the rules here means every backend refuses the same
//! mutations.

use crate::{Points, UserId};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("amount must not be negative: {0}")]
    NegativeAmount(Points),
    #[error("withdrawal sum must be positive: {0}")]
    NonPositiveSum(Points),
    #[error("insufficient funds: current={current} requested={requested}")]
    InsufficientFunds { current: Points, requested: Points },
    #[error("balance overflow")]
    Overflow,
}

/// Invariants: `current >= 0`, `withdrawn` never decreases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Balance {
    pub owner: UserId,
    pub current: Points,
    pub withdrawn: Points,
}

impl Balance {
    pub fn empty(owner: UserId) -> Self {
        Self {
            owner,
            current: Points::ZERO,
            withdrawn: Points::ZERO,
        }
    }

    /// Add an accrual to `current`. A zero credit is allowed and is a no-op.
    pub fn credit(&mut self, amount: Points) -> Result<(), LedgerError> {
        if amount.is_negative() {
            return Err(LedgerError::NegativeAmount(amount));
        }
        self.current = self
            .current
            .checked_add(amount)
            .ok_or(LedgerError::Overflow)?;
        Ok(())
    }

    /// Move `amount` from `current` to `withdrawn`. On error the balance is
    /// left untouched.
    pub fn debit(&mut self, amount: Points) -> Result<(), LedgerError> {
        if !amount.is_positive() {
            return Err(LedgerError::NonPositiveSum(amount));
        }
        if self.current < amount {
            return Err(LedgerError::InsufficientFunds {
                current: self.current,
                requested: amount,
            });
        }
        let withdrawn = self
            .withdrawn
            .checked_add(amount)
            .ok_or(LedgerError::Overflow)?;
        self.current = self
            .current
            .checked_sub(amount)
            .ok_or(LedgerError::Overflow)?;
        self.withdrawn = withdrawn;
        Ok(())
    }
}
