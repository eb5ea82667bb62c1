use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::base::{EpochId, ObjectID};

/// Delegated-stake pool for one storage node.
///
/// Stake is tracked in pool tokens: stakers buy in at the exchange rate of
/// their activation epoch and sell out at the rate of the withdrawal epoch,
/// so rewards compound without per-staker bookkeeping. Stake and withdrawals
/// requested mid-epoch sit in pending buckets until the next epoch boundary.
#[derive(Debug, Serialize, Deserialize, Clone, Eq, PartialEq, Hash)]
pub struct StakingPool {
    pub id: ObjectID,
    /// Epoch when this pool became active (None = preactive)
    pub activation_epoch: Option<EpochId>,
    /// Epoch when deactivated (None = active)
    pub deactivation_epoch: Option<EpochId>,
    /// Total TIDE principal plus compounded rewards in this pool
    pub tide_balance: u64,
    /// Staker rewards not yet withdrawn
    pub rewards_pool: u64,
    /// Total pool tokens issued
    pub pool_token_balance: u64,
    /// Exchange rates by epoch
    pub exchange_rates: BTreeMap<EpochId, PoolTokenExchangeRate>,
    /// Pending stake awaiting the next epoch boundary
    pub pending_stake: u64,
    /// Pending TIDE withdrawals
    pub pending_total_tide_withdraw: u64,
    /// Pending pool token withdrawals
    pub pending_pool_token_withdraw: u64,
}

impl StakingPool {
    pub fn new(id: ObjectID) -> Self {
        Self {
            id,
            activation_epoch: None,
            deactivation_epoch: None,
            tide_balance: 0,
            rewards_pool: 0,
            pool_token_balance: 0,
            exchange_rates: BTreeMap::new(),
            pending_stake: 0,
            pending_total_tide_withdraw: 0,
            pending_pool_token_withdraw: 0,
        }
    }

    /// Request to add stake, activating at `activation_epoch`.
    pub fn request_add_stake(&mut self, stake: u64, activation_epoch: EpochId) -> StakedTide {
        assert!(stake > 0, "Stake amount must be greater than zero");
        assert!(!self.is_inactive(), "Cannot stake with inactive pool");

        let staked_tide = StakedTide::new(self.id, activation_epoch, stake);

        self.pending_stake += stake;

        staked_tide
    }

    /// Request to withdraw stake. Returns the total TIDE owed: principal plus
    /// any rewards earned since the stake activated.
    pub fn request_withdraw_stake(&mut self, staked_tide: StakedTide, current_epoch: EpochId) -> u64 {
        assert!(
            staked_tide.pool_id == self.id,
            "StakedTide belongs to a different pool"
        );

        // Stake that never activated carries no rewards; return the principal.
        if staked_tide.activation_epoch > current_epoch {
            self.pending_stake -= staked_tide.principal;
            return staked_tide.principal;
        }

        let (pool_token_amount, principal_amount) = self.withdraw_from_principal(&staked_tide);

        let rewards_amount =
            self.withdraw_rewards(principal_amount, pool_token_amount, current_epoch);

        let total_withdraw_amount = principal_amount + rewards_amount;

        self.pending_total_tide_withdraw += total_withdraw_amount;
        self.pending_pool_token_withdraw += pool_token_amount;

        // Inactive pools have no further epoch boundaries; settle immediately.
        if self.is_inactive() {
            self.process_pending_stake_withdraw();
        }

        total_withdraw_amount
    }

    pub fn is_inactive(&self) -> bool {
        self.deactivation_epoch.is_some()
    }

    pub fn is_preactive(&self) -> bool {
        self.activation_epoch.is_none()
    }

    /// Pool tokens and principal amount corresponding to a stake receipt.
    pub fn withdraw_from_principal(&self, staked_tide: &StakedTide) -> (u64, u64) {
        let exchange_rate = self.pool_token_exchange_rate_at_epoch(staked_tide.activation_epoch);

        let pool_token_amount = self.get_token_amount(&exchange_rate, staked_tide.principal);

        (pool_token_amount, staked_tide.principal)
    }

    /// Calculate and deduct the rewards portion of a withdrawal.
    pub fn withdraw_rewards(
        &mut self,
        principal_amount: u64,
        pool_token_amount: u64,
        epoch: EpochId,
    ) -> u64 {
        let exchange_rate = self.pool_token_exchange_rate_at_epoch(epoch);

        let total_withdraw_value = self.get_tide_amount(&exchange_rate, pool_token_amount);

        // Guard against rounding pushing the value below the principal.
        let reward_amount = if total_withdraw_value > principal_amount {
            total_withdraw_value - principal_amount
        } else {
            0
        };

        let reward_amount = std::cmp::min(reward_amount, self.rewards_pool);

        self.rewards_pool -= reward_amount;

        reward_amount
    }

    pub fn process_pending_stake_withdraw(&mut self) {
        self.tide_balance -= self.pending_total_tide_withdraw;
        self.pool_token_balance -= self.pending_pool_token_withdraw;

        self.pending_total_tide_withdraw = 0;
        self.pending_pool_token_withdraw = 0;
    }

    /// Roll pending stake into the pool at the current exchange rate.
    pub fn process_pending_stake(&mut self) {
        let latest_exchange_rate = PoolTokenExchangeRate {
            tide_amount: self.tide_balance,
            pool_token_amount: self.pool_token_balance,
        };

        self.tide_balance += self.pending_stake;

        // An empty pool issues tokens 1:1.
        if self.tide_balance == self.pending_stake && self.pool_token_balance == 0 {
            self.pool_token_balance = self.pending_stake;
        } else {
            self.pool_token_balance =
                self.get_token_amount(&latest_exchange_rate, self.tide_balance);
        }

        self.pending_stake = 0;
    }

    /// The exchange rate in effect at `epoch`.
    pub fn pool_token_exchange_rate_at_epoch(&self, epoch: EpochId) -> PoolTokenExchangeRate {
        if self.is_preactive() {
            return PoolTokenExchangeRate::default();
        }

        let activation_epoch = self.activation_epoch.unwrap();

        if epoch < activation_epoch {
            return PoolTokenExchangeRate::default();
        }

        // Inactive pools stop accruing at their deactivation epoch.
        let epoch = if let Some(deactivation_epoch) = self.deactivation_epoch {
            std::cmp::min(epoch, deactivation_epoch)
        } else {
            epoch
        };

        // Walk back to the nearest epoch with a recorded rate.
        let mut current_epoch = epoch;
        while current_epoch >= activation_epoch {
            if let Some(rate) = self.exchange_rates.get(&current_epoch) {
                return rate.clone();
            }
            if current_epoch == 0 {
                break;
            }
            current_epoch -= 1;
        }

        PoolTokenExchangeRate::default()
    }

    /// Convert pool tokens to a TIDE amount at `exchange_rate`.
    pub fn get_tide_amount(&self, exchange_rate: &PoolTokenExchangeRate, token_amount: u64) -> u64 {
        if exchange_rate.tide_amount == 0 || exchange_rate.pool_token_amount == 0 {
            return token_amount;
        }

        let res = (exchange_rate.tide_amount as u128) * (token_amount as u128)
            / (exchange_rate.pool_token_amount as u128);

        res as u64
    }

    /// Convert a TIDE amount to pool tokens at `exchange_rate`.
    pub fn get_token_amount(&self, exchange_rate: &PoolTokenExchangeRate, tide_amount: u64) -> u64 {
        if exchange_rate.tide_amount == 0 || exchange_rate.pool_token_amount == 0 {
            return tide_amount;
        }

        let res = (exchange_rate.pool_token_amount as u128) * (tide_amount as u128)
            / (exchange_rate.tide_amount as u128);

        res as u64
    }

    /// Deposit staker rewards. The balance grows without issuing new tokens,
    /// which is what moves the exchange rate.
    pub fn deposit_rewards(&mut self, reward_amount: u64) {
        self.tide_balance += reward_amount;

        self.rewards_pool += reward_amount;
    }

    pub fn update_exchange_rate(&mut self, epoch: EpochId) {
        self.exchange_rates.insert(
            epoch,
            PoolTokenExchangeRate {
                tide_amount: self.tide_balance,
                pool_token_amount: self.pool_token_balance,
            },
        );
    }

    /// Epoch-boundary processing: settle withdrawals, roll in new stake, and
    /// record the rate for the new epoch.
    pub fn process_pending_stakes_and_withdraws(&mut self, epoch: EpochId) {
        self.process_pending_stake_withdraw();

        self.process_pending_stake();

        self.update_exchange_rate(epoch);
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, Eq, PartialEq, Hash)]
pub struct PoolTokenExchangeRate {
    /// Amount of TIDE
    pub tide_amount: u64,
    /// Amount of pool tokens
    pub pool_token_amount: u64,
}

/// Receipt for delegated stake. Whoever holds the receipt can withdraw;
/// custody is the concern of the surrounding system, not this crate.
#[derive(Debug, Serialize, Deserialize, Clone, Eq, PartialEq, Hash)]
pub struct StakedTide {
    /// Staking pool the stake belongs to
    pub pool_id: ObjectID,
    /// Epoch when the stake becomes active
    pub activation_epoch: EpochId,
    /// Principal amount staked
    pub principal: u64,
}

impl StakedTide {
    pub fn new(pool_id: ObjectID, activation_epoch: EpochId, principal: u64) -> Self {
        StakedTide {
            pool_id,
            activation_epoch,
            principal,
        }
    }
}
