//! Per-account exposure book read by the risk gate.
//!
//! Exposure is reserved when the risk gate admits a command, turned into an
//! open position when the fill is confirmed, and released when the command
//! fails, times out or is cancelled.

use chrono::{NaiveDate, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Daily-resetting exposure for one account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountState {
    pub account_id: String,
    pub open_positions: u32,
    /// Admitted opening commands not yet resolved
    pub pending_positions: u32,
    /// Lots held by `pending_positions`
    pub pending_lots: Decimal,
    /// Lots opened today
    pub daily_risk_used: Decimal,
    /// Realized PnL today (negative = loss)
    pub daily_realized_pnl: Decimal,
    pub trading_day: NaiveDate,
}

impl AccountState {
    pub fn new(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            open_positions: 0,
            pending_positions: 0,
            pending_lots: Decimal::ZERO,
            daily_risk_used: Decimal::ZERO,
            daily_realized_pnl: Decimal::ZERO,
            trading_day: Utc::now().date_naive(),
        }
    }

    /// Open plus in-flight opening commands
    pub fn committed_positions(&self) -> u32 {
        self.open_positions.saturating_add(self.pending_positions)
    }

    /// Lots opened today plus lots held by in-flight commands
    pub fn committed_risk(&self) -> Decimal {
        self.daily_risk_used + self.pending_lots
    }

    /// Loss as a positive number; zero when the day is flat or green
    pub fn daily_loss(&self) -> Decimal {
        if self.daily_realized_pnl < Decimal::ZERO {
            -self.daily_realized_pnl
        } else {
            Decimal::ZERO
        }
    }

    fn roll_day(&mut self, today: NaiveDate) {
        if self.trading_day != today {
            debug!(account = %self.account_id, day = %today, "daily risk counters reset");
            self.trading_day = today;
            self.daily_risk_used = Decimal::ZERO;
            self.daily_realized_pnl = Decimal::ZERO;
        }
    }
}

#[derive(Debug, Default)]
pub struct AccountBook {
    accounts: DashMap<String, AccountState>,
}

impl AccountBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state; an unknown account reads as flat.
    pub fn snapshot(&self, account_id: &str) -> AccountState {
        let today = Utc::now().date_naive();
        match self.accounts.get(account_id) {
            Some(state) => {
                let mut s = state.clone();
                s.roll_day(today);
                s
            }
            None => AccountState::new(account_id),
        }
    }

    /// Run `decide` under the account's entry lock. When it returns a lot
    /// size, that exposure is reserved before the lock is released, so two
    /// concurrent callers can never both pass against the same headroom.
    pub fn reserve_with<T>(
        &self,
        account_id: &str,
        decide: impl FnOnce(&AccountState) -> (T, Option<Decimal>),
    ) -> T {
        let mut state = self.entry(account_id);
        let (out, reserve) = decide(&state);
        if let Some(lots) = reserve {
            state.pending_positions += 1;
            state.pending_lots += lots;
        }
        out
    }

    /// Give back a reservation whose command did not open a position
    pub fn release(&self, account_id: &str, lots: Decimal) {
        let mut state = self.entry(account_id);
        release_pending(&mut state, lots);
    }

    /// A reserved command was filled
    pub fn confirm_open(&self, account_id: &str, lots: Decimal) {
        let mut state = self.entry(account_id);
        release_pending(&mut state, lots);
        state.open_positions += 1;
        state.daily_risk_used += lots;
    }

    /// A closed position with its realized profit
    pub fn record_close(&self, account_id: &str, profit: Decimal) {
        let mut state = self.entry(account_id);
        state.open_positions = state.open_positions.saturating_sub(1);
        state.daily_realized_pnl += profit;
    }

    /// Realized profit for a close whose position count arrives separately
    pub fn record_pnl(&self, account_id: &str, profit: Decimal) {
        self.entry(account_id).daily_realized_pnl += profit;
    }

    /// Overwrite the open-position count from an authoritative remote report
    pub fn sync_open_positions(&self, account_id: &str, open_positions: u32) {
        self.entry(account_id).open_positions = open_positions;
    }

    fn entry(&self, account_id: &str) -> dashmap::mapref::one::RefMut<'_, String, AccountState> {
        let today = Utc::now().date_naive();
        let mut state = self
            .accounts
            .entry(account_id.to_string())
            .or_insert_with(|| AccountState::new(account_id));
        state.roll_day(today);
        state
    }
}

fn release_pending(state: &mut AccountState, lots: Decimal) {
    state.pending_positions = state.pending_positions.saturating_sub(1);
    state.pending_lots = (state.pending_lots - lots).max(Decimal::ZERO);
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn open_and_close_update_counters() {
        let book = AccountBook::new();
        book.confirm_open("acc", dec!(0.5));
        book.confirm_open("acc", dec!(0.25));
        book.record_close("acc", dec!(-40));

        let s = book.snapshot("acc");
        assert_eq!(s.open_positions, 1);
        assert_eq!(s.daily_risk_used, dec!(0.75));
        assert_eq!(s.daily_loss(), dec!(40));
    }

    #[test]
    fn reservations_count_until_settled() {
        let book = AccountBook::new();
        let held: bool = book.reserve_with("acc", |_| (true, Some(dec!(0.4))));
        assert!(held);
        book.reserve_with("acc", |_| ((), Some(dec!(0.3))));

        let s = book.snapshot("acc");
        assert_eq!(s.committed_positions(), 2);
        assert_eq!(s.committed_risk(), dec!(0.7));

        book.confirm_open("acc", dec!(0.4));
        book.release("acc", dec!(0.3));
        let s = book.snapshot("acc");
        assert_eq!((s.open_positions, s.pending_positions), (1, 0));
        assert_eq!(s.pending_lots, Decimal::ZERO);
        assert_eq!(s.daily_risk_used, dec!(0.4));
    }

    #[test]
    fn declined_reservation_holds_nothing() {
        let book = AccountBook::new();
        book.reserve_with("acc", |_| (false, None));
        assert_eq!(book.snapshot("acc").committed_positions(), 0);
    }

    #[test]
    fn unknown_account_is_flat() {
        let s = AccountBook::new().snapshot("nobody");
        assert_eq!(s.open_positions, 0);
        assert_eq!(s.daily_loss(), Decimal::ZERO);
    }

    #[test]
    fn stale_day_is_reset_on_read() {
        let book = AccountBook::new();
        book.confirm_open("acc", dec!(1));
        book.accounts.get_mut("acc").unwrap().trading_day =
            NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();

        let s = book.snapshot("acc");
        assert_eq!(s.daily_risk_used, Decimal::ZERO);
        assert_eq!(s.open_positions, 1);
    }
}
