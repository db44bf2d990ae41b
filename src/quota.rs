use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::clock::Clock;
use crate::provider::ProviderId;

/// Priority of a consumer of a provider's daily budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    #[default]
    Primary,
    Secondary,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Tier::Primary => "primary",
            Tier::Secondary => "secondary",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QuotaConfig {
    pub hard_limit: u32,
    /// Guard band below `hard_limit` where primary calls stop.
    pub operational_cap: u32,
    #[serde(default = "default_safety_margin")]
    pub safety_margin: u32,
    /// Own cap for secondary consumers, on top of the reservation rule.
    #[serde(default)]
    pub secondary_cap: Option<u32>,
}

fn default_safety_margin() -> u32 {
    10
}

impl QuotaConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.hard_limit == 0 {
            return Err("hard_limit must be positive".to_string());
        }
        if self.operational_cap > self.hard_limit {
            return Err(format!(
                "operational_cap ({}) above hard_limit ({})",
                self.operational_cap, self.hard_limit
            ));
        }
        Ok(())
    }
}

/// Point-in-time view of one provider's daily budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuotaState {
    pub provider: ProviderId,
    pub date_utc: NaiveDate,
    pub used: u32,
    pub hard_limit: u32,
    pub operational_cap: u32,
    pub primary_need: u32,
    pub safety_margin: u32,
    pub secondary_used: u32,
    pub secondary_cap: Option<u32>,
    pub secondary_locked: bool,
}

impl QuotaState {
    pub fn remaining(&self) -> u32 {
        self.hard_limit.saturating_sub(self.used)
    }

    /// Calls held back for the primary tier.
    pub fn reserved_for_primary(&self) -> u32 {
        self.primary_need.saturating_add(self.safety_margin)
    }
}

type RolloverHook = Box<dyn Fn(&ProviderId) + Send + Sync>;

/// Daily call budgets per provider. All mutation happens under one lock, so
/// `used` can never pass `hard_limit` however many schedulers race.
pub struct QuotaBudgetManager {
    clock: Arc<dyn Clock>,
    budgets: Mutex<HashMap<ProviderId, QuotaState>>,
    /// Current UTC day of providers without a budget, so the rollover hook
    /// fires for them too.
    unmetered_days: Mutex<HashMap<ProviderId, NaiveDate>>,
    on_rollover: Option<RolloverHook>,
}

impl QuotaBudgetManager {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            budgets: Mutex::new(HashMap::new()),
            unmetered_days: Mutex::new(HashMap::new()),
            on_rollover: None,
        }
    }

    /// Called (outside the budget lock) whenever a registered or tracked
    /// provider rolls over to a new UTC day.
    pub fn with_rollover_hook(mut self, hook: impl Fn(&ProviderId) + Send + Sync + 'static) -> Self {
        self.on_rollover = Some(Box::new(hook));
        self
    }

    pub fn register(&self, provider: ProviderId, cfg: QuotaConfig) {
        let today = self.clock.now().date_naive();
        let state = QuotaState {
            provider: provider.clone(),
            date_utc: today,
            used: 0,
            hard_limit: cfg.hard_limit,
            operational_cap: cfg.operational_cap.min(cfg.hard_limit),
            primary_need: 0,
            safety_margin: cfg.safety_margin,
            secondary_used: 0,
            secondary_cap: cfg.secondary_cap,
            secondary_locked: false,
        };
        self.budgets.lock().insert(provider, state);
    }

    /// Follows the UTC day of a provider with no budget. Its calls stay
    /// unmetered; only the rollover hook applies.
    pub fn track_unmetered(&self, provider: ProviderId) {
        let today = self.clock.now().date_naive();
        self.unmetered_days.lock().insert(provider, today);
    }

    pub fn is_metered(&self, provider: &ProviderId) -> bool {
        self.budgets.lock().contains_key(provider)
    }

    /// Attempts to take one call from the provider's budget for `tier`.
    /// Providers without a registered budget are unmetered.
    pub fn try_reserve(&self, provider: &ProviderId, tier: Tier) -> bool {
        let today = self.clock.now().date_naive();
        let (granted, rolled) = {
            let mut budgets = self.budgets.lock();
            let Some(state) = budgets.get_mut(provider) else {
                return true;
            };
            let rolled = roll_to(state, today);
            (reserve(state, tier), rolled)
        };
        if rolled {
            self.notify_rollover(provider);
        }
        granted
    }

    /// Publishes how many primary-tier entities still need a call today.
    pub fn set_primary_need(&self, provider: &ProviderId, need: u32) {
        let today = self.clock.now().date_naive();
        let rolled = {
            let mut budgets = self.budgets.lock();
            let Some(state) = budgets.get_mut(provider) else {
                return;
            };
            let rolled = roll_to(state, today);
            state.primary_need = need;
            rolled
        };
        if rolled {
            self.notify_rollover(provider);
        }
    }

    /// Resets the budget if the UTC day changed. Returns whether it did.
    /// Tracked unmetered providers roll too, with nothing to reset.
    pub fn roll_if_new_day(&self, provider: &ProviderId) -> bool {
        let today = self.clock.now().date_naive();
        let metered = {
            let mut budgets = self.budgets.lock();
            budgets.get_mut(provider).map(|state| roll_to(state, today))
        };
        let rolled = match metered {
            Some(rolled) => rolled,
            None => match self.unmetered_days.lock().get_mut(provider) {
                Some(day) if *day != today => {
                    *day = today;
                    true
                }
                _ => false,
            },
        };
        if rolled {
            self.notify_rollover(provider);
        }
        rolled
    }

    pub fn state(&self, provider: &ProviderId) -> Option<QuotaState> {
        let today = self.clock.now().date_naive();
        let (state, rolled) = {
            let mut budgets = self.budgets.lock();
            let state = budgets.get_mut(provider)?;
            let rolled = roll_to(state, today);
            (state.clone(), rolled)
        };
        if rolled {
            self.notify_rollover(provider);
        }
        Some(state)
    }

    fn notify_rollover(&self, provider: &ProviderId) {
        info!(%provider, "utc day rolled over");
        if let Some(hook) = self.on_rollover.as_ref() {
            hook(provider);
        }
    }
}

fn roll_to(state: &mut QuotaState, today: NaiveDate) -> bool {
    if state.date_utc == today {
        return false;
    }
    state.date_utc = today;
    state.used = 0;
    state.secondary_used = 0;
    state.secondary_locked = false;
    true
}

fn reserve(state: &mut QuotaState, tier: Tier) -> bool {
    if state.used >= state.hard_limit || state.used >= state.operational_cap {
        debug!(provider = %state.provider, %tier, used = state.used, "quota refused: cap reached");
        return false;
    }
    if tier == Tier::Secondary {
        if state.secondary_locked {
            return false;
        }
        let reserved = state.reserved_for_primary();
        if state.remaining() <= reserved {
            state.secondary_locked = true;
            info!(
                provider = %state.provider,
                remaining = state.remaining(),
                reserved,
                "secondary tier locked out for the rest of the day"
            );
            return false;
        }
        if state
            .secondary_cap
            .is_some_and(|cap| state.secondary_used >= cap)
        {
            debug!(provider = %state.provider, "quota refused: secondary cap reached");
            return false;
        }
        state.secondary_used += 1;
    }
    state.used += 1;
    true
}
