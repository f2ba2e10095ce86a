//!
//! Accounts and the fee batch.
//!
//! Each `Account` owns its own optional lock, so operations on one account
//! are serialized while different accounts proceed in parallel. Both
//! operations have the same shape: read the balance, pause for the
//! configured delay, write the new balance. In a guarded account the lock
//! covers all three steps; in an unguarded one a concurrent withdraw and
//! deposit can both read the old balance and one of them is lost, leaving
//! 985.05 or 1014.95 instead of 1000.00.
//!

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use racelab_std_sync::Lock;

use crate::errors::AccountError;
use crate::money::Money;

#[derive(Debug)]
pub struct Account {
    balance: AtomicI64,
    guard: Option<Lock>,
    delay: Duration,
}

impl Account {
    pub fn new(initial: Money, guarded: bool, delay: Duration) -> Self {
        Self {
            balance: AtomicI64::new(initial.cents()),
            guard: guarded.then(Lock::new),
            delay,
        }
    }

    /// Whether another thread is inside this account's critical section.
    pub fn is_busy(&self) -> bool {
        self.guard.as_ref().is_some_and(Lock::is_locked)
    }

    pub fn balance(&self) -> Money {
        Money::from_cents(self.balance.load(Ordering::Acquire))
    }

    fn read(&self) -> Money {
        Money::from_cents(self.balance.load(Ordering::Relaxed))
    }

    fn write(&self, balance: Money) {
        self.balance.store(balance.cents(), Ordering::Relaxed);
    }

    fn simulate_work(&self) {
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
    }

    pub fn withdraw(&self, amount: Money) -> Result<(), AccountError> {
        let _guard = self.guard.as_ref().map(Lock::acquire);
        let balance = self.read();
        if balance < amount {
            return Err(AccountError::InsufficientFunds { balance, amount });
        }
        let new_balance = balance - amount;
        self.simulate_work();
        self.write(new_balance);
        Ok(())
    }

    pub fn deposit(&self, amount: Money) {
        let _guard = self.guard.as_ref().map(Lock::acquire);
        let new_balance = self.read() + amount;
        self.simulate_work();
        self.write(new_balance);
    }
}

/// A set of accounts sharing an initial balance and a locking mode.
#[derive(Debug)]
pub struct Bank {
    accounts: Vec<Account>,
    refused: AtomicUsize,
}

impl Bank {
    pub fn new(count: usize, initial: Money, guarded: bool, delay: Duration) -> Self {
        Self {
            accounts: (0..count)
                .map(|_| Account::new(initial, guarded, delay))
                .collect(),
            refused: AtomicUsize::new(0),
        }
    }

    pub fn accounts(&self) -> &[Account] {
        &self.accounts
    }

    /// Withdraws `fee` from every account in order. A refused withdrawal
    /// is counted and the batch moves on to the next account.
    pub fn charge_fees(&self, fee: Money) {
        for (index, account) in self.accounts.iter().enumerate() {
            if let Err(err) = account.withdraw(fee) {
                warn!(account = index + 1, %err, "withdrawal refused");
                self.refused.fetch_add(1, Ordering::Relaxed);
            }
        }
        debug!(accounts = self.accounts.len(), "fees charged");
    }

    /// Deposits `fee` into every account in order.
    pub fn reimburse_fees(&self, fee: Money) {
        for account in &self.accounts {
            account.deposit(fee);
        }
        debug!(accounts = self.accounts.len(), "fees reimbursed");
    }

    pub fn balances(&self) -> Vec<Money> {
        self.accounts.iter().map(Account::balance).collect()
    }

    pub fn refused(&self) -> usize {
        self.refused.load(Ordering::Relaxed)
    }
}
