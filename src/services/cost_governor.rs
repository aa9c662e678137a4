//! Cost governor: admission control and spend book-keeping.
//!
//! Consults the ledger-derived windows before admitting work and records
//! actuals afterward. Windowed sums (24 h and 30 d) are maintained in a
//! ring buffer of hourly buckets for O(1) reads; the persistent ledger is
//! the source of truth and the ring is rebuilt from it at startup.
//!
//! Crossing 80 % or 95 % of either budget emits `cost.warning`; crossing
//! 100 % emits `cost.hardStop` (the orchestrator reacts by pausing all
//! agents). A single record emits at most the highest newly crossed
//! threshold.

use chrono::{DateTime, Duration, DurationRound, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::error::OrchestratorError;
use crate::domain::models::{AgentId, BudgetScope, CostLedgerEntry};
use crate::domain::ports::{Clock, CostLedgerRepository};

use super::audit_log::{AuditLog, AuditOperation};
use super::event_bus::{EventBus, EventPayload};

const WARN_THRESHOLDS: [f64; 2] = [0.80, 0.95];
const MONTH_WINDOW_HOURS: i64 = 30 * 24;

/// Configuration for the governor.
#[derive(Debug, Clone)]
pub struct CostGovernorConfig {
    pub daily_budget_usd: f64,
    pub monthly_budget_usd: f64,
    pub per_agent_daily_cap_usd: Option<f64>,
}

/// One hourly accumulation bucket.
#[derive(Debug, Clone)]
struct HourBucket {
    start: DateTime<Utc>,
    usd: f64,
    tokens: u64,
    per_agent_usd: HashMap<AgentId, f64>,
}

impl HourBucket {
    fn new(start: DateTime<Utc>) -> Self {
        Self { start, usd: 0.0, tokens: 0, per_agent_usd: HashMap::new() }
    }
}

/// Point-in-time view of one budget window.
#[derive(Debug, Clone, Serialize)]
pub struct WindowSnapshot {
    pub spent_usd: f64,
    pub tokens: u64,
    pub budget_usd: f64,
    pub consumed_pct: f64,
}

/// Current windows and budgets, served by `GET /cost`.
#[derive(Debug, Clone, Serialize)]
pub struct CostSnapshot {
    pub daily: WindowSnapshot,
    pub monthly: WindowSnapshot,
    pub hard_stopped: bool,
}

#[derive(Debug, Default)]
struct ThresholdFlags {
    warned_80: bool,
    warned_95: bool,
    hard_stopped: bool,
}

struct Inner {
    buckets: VecDeque<HourBucket>,
    daily_flags: ThresholdFlags,
    monthly_flags: ThresholdFlags,
}

/// Central admission-control and cost-accounting service.
pub struct CostGovernor {
    config: CostGovernorConfig,
    ledger: Arc<dyn CostLedgerRepository>,
    bus: Arc<EventBus>,
    audit: Arc<AuditLog>,
    clock: Arc<dyn Clock>,
    inner: RwLock<Inner>,
}

impl CostGovernor {
    pub fn new(
        config: CostGovernorConfig,
        ledger: Arc<dyn CostLedgerRepository>,
        bus: Arc<EventBus>,
        audit: Arc<AuditLog>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            ledger,
            bus,
            audit,
            clock,
            inner: RwLock::new(Inner {
                buckets: VecDeque::new(),
                daily_flags: ThresholdFlags::default(),
                monthly_flags: ThresholdFlags::default(),
            }),
        }
    }

    /// Rebuild the in-memory windows from the persistent ledger. Called at
    /// startup before any admission decision.
    pub async fn load_from_ledger(&self) -> Result<(), OrchestratorError> {
        let since = self.clock.now() - Duration::hours(MONTH_WINDOW_HOURS);
        let entries = self.ledger.entries_since(since).await?;
        let mut inner = self.inner.write().await;
        inner.buckets.clear();
        for entry in entries {
            Self::accumulate(&mut inner.buckets, &entry);
        }
        tracing::info!(buckets = inner.buckets.len(), "cost windows rebuilt from ledger");
        Ok(())
    }

    /// Admission check: deny when daily or monthly spend plus the estimate
    /// would exceed the corresponding budget, or when the per-agent daily
    /// cap would be exceeded.
    pub async fn may_start(
        &self,
        agent_id: &AgentId,
        estimate_usd: f64,
    ) -> Result<(), OrchestratorError> {
        let now = self.clock.now();
        let inner = self.inner.read().await;
        let (daily_usd, _, agent_daily) = Self::window_sums(&inner.buckets, now, 24, Some(agent_id));
        let (monthly_usd, _, _) = Self::window_sums(&inner.buckets, now, MONTH_WINDOW_HOURS, None);
        drop(inner);

        let denial = if daily_usd + estimate_usd > self.config.daily_budget_usd {
            Some(format!(
                "daily budget exceeded: spent ${daily_usd:.2} + estimate ${estimate_usd:.2} > ${:.2}",
                self.config.daily_budget_usd
            ))
        } else if monthly_usd + estimate_usd > self.config.monthly_budget_usd {
            Some(format!(
                "monthly budget exceeded: spent ${monthly_usd:.2} + estimate ${estimate_usd:.2} > ${:.2}",
                self.config.monthly_budget_usd
            ))
        } else if let Some(cap) = self.config.per_agent_daily_cap_usd {
            (agent_daily + estimate_usd > cap).then(|| {
                format!(
                    "per-agent daily cap exceeded: {agent_id} spent ${agent_daily:.2} + estimate ${estimate_usd:.2} > ${cap:.2}"
                )
            })
        } else {
            None
        };

        if let Some(reason) = denial {
            self.audit.record_operation(
                AuditOperation::CostDenied,
                Some(agent_id.clone()),
                None,
                reason.clone(),
                "denied",
                0,
            );
            return Err(OrchestratorError::BudgetDenied(reason));
        }
        Ok(())
    }

    /// Record actual spend, then emit any newly crossed threshold event.
    pub async fn record(
        &self,
        agent_id: &AgentId,
        project_number: Option<u64>,
        usd: f64,
        tokens: u64,
    ) {
        let now = self.clock.now();
        let entry = CostLedgerEntry::new(agent_id.clone(), project_number, usd, tokens, now);

        // The ledger is append-only; failures degrade to in-memory
        // accounting and a warning.
        if let Err(e) = self.ledger.append(&entry).await {
            tracing::warn!(error = %e, "failed to append cost ledger entry");
        }

        let crossings = {
            let mut inner = self.inner.write().await;
            Self::accumulate(&mut inner.buckets, &entry);
            let (daily_usd, _, _) = Self::window_sums(&inner.buckets, now, 24, None);
            let (monthly_usd, _, _) =
                Self::window_sums(&inner.buckets, now, MONTH_WINDOW_HOURS, None);

            let mut crossings = Vec::new();
            if let Some(event) = Self::check_thresholds(
                BudgetScope::Daily,
                daily_usd,
                self.config.daily_budget_usd,
                &mut inner.daily_flags,
            ) {
                crossings.push(event);
            }
            if let Some(event) = Self::check_thresholds(
                BudgetScope::Monthly,
                monthly_usd,
                self.config.monthly_budget_usd,
                &mut inner.monthly_flags,
            ) {
                crossings.push(event);
            }
            crossings
        };

        self.audit.record_operation(
            AuditOperation::CostRecorded,
            Some(agent_id.clone()),
            project_number,
            format!("${usd:.4}, {tokens} tokens"),
            "ok",
            0,
        );

        for event in crossings {
            self.bus.publish(event).await;
        }
    }

    /// Current windows and budgets.
    pub async fn snapshot(&self) -> CostSnapshot {
        let now = self.clock.now();
        let inner = self.inner.read().await;
        let (daily_usd, daily_tokens, _) = Self::window_sums(&inner.buckets, now, 24, None);
        let (monthly_usd, monthly_tokens, _) =
            Self::window_sums(&inner.buckets, now, MONTH_WINDOW_HOURS, None);
        CostSnapshot {
            daily: WindowSnapshot {
                spent_usd: daily_usd,
                tokens: daily_tokens,
                budget_usd: self.config.daily_budget_usd,
                consumed_pct: Self::pct(daily_usd, self.config.daily_budget_usd),
            },
            monthly: WindowSnapshot {
                spent_usd: monthly_usd,
                tokens: monthly_tokens,
                budget_usd: self.config.monthly_budget_usd,
                consumed_pct: Self::pct(monthly_usd, self.config.monthly_budget_usd),
            },
            hard_stopped: inner.daily_flags.hard_stopped || inner.monthly_flags.hard_stopped,
        }
    }

    /// Whether either budget has reached 100 %.
    pub async fn is_hard_stopped(&self) -> bool {
        let inner = self.inner.read().await;
        inner.daily_flags.hard_stopped || inner.monthly_flags.hard_stopped
    }

    /// Periodic maintenance: drop buckets past the 30-day window and reset
    /// threshold flags for windows that have decayed below their levels, so
    /// thresholds fire again on the next crossing.
    pub async fn sweep(&self) {
        let now = self.clock.now();
        let horizon = now - Duration::hours(MONTH_WINDOW_HOURS);
        let mut inner = self.inner.write().await;
        while inner.buckets.front().is_some_and(|b| b.start < horizon) {
            inner.buckets.pop_front();
        }
        let (daily_usd, _, _) = Self::window_sums(&inner.buckets, now, 24, None);
        let (monthly_usd, _, _) = Self::window_sums(&inner.buckets, now, MONTH_WINDOW_HOURS, None);
        Self::decay_flags(
            &mut inner.daily_flags,
            Self::pct(daily_usd, self.config.daily_budget_usd),
        );
        Self::decay_flags(
            &mut inner.monthly_flags,
            Self::pct(monthly_usd, self.config.monthly_budget_usd),
        );
    }

    fn pct(spent: f64, budget: f64) -> f64 {
        if budget <= 0.0 {
            return 0.0;
        }
        spent / budget
    }

    fn accumulate(buckets: &mut VecDeque<HourBucket>, entry: &CostLedgerEntry) {
        let hour = entry
            .at
            .duration_trunc(Duration::hours(1))
            .unwrap_or(entry.at);
        let needs_new = buckets.back().is_none_or(|b| b.start != hour);
        if needs_new {
            buckets.push_back(HourBucket::new(hour));
            while buckets.len() > usize::try_from(MONTH_WINDOW_HOURS).unwrap_or(720) {
                buckets.pop_front();
            }
        }
        if let Some(bucket) = buckets.back_mut() {
            bucket.usd += entry.usd;
            bucket.tokens += entry.tokens;
            *bucket.per_agent_usd.entry(entry.agent_id.clone()).or_insert(0.0) += entry.usd;
        }
    }

    /// Sliding-window sums over buckets no older than `hours`.
    fn window_sums(
        buckets: &VecDeque<HourBucket>,
        now: DateTime<Utc>,
        hours: i64,
        agent: Option<&AgentId>,
    ) -> (f64, u64, f64) {
        let horizon = now - Duration::hours(hours);
        let mut usd = 0.0;
        let mut tokens = 0u64;
        let mut agent_usd = 0.0;
        for bucket in buckets.iter().rev() {
            if bucket.start < horizon {
                break;
            }
            usd += bucket.usd;
            tokens += bucket.tokens;
            if let Some(agent) = agent {
                agent_usd += bucket.per_agent_usd.get(agent).copied().unwrap_or(0.0);
            }
        }
        (usd, tokens, agent_usd)
    }

    /// Emit at most the highest newly crossed threshold for one scope.
    fn check_thresholds(
        scope: BudgetScope,
        spent: f64,
        budget: f64,
        flags: &mut ThresholdFlags,
    ) -> Option<EventPayload> {
        let pct = Self::pct(spent, budget);
        if pct >= 1.0 {
            if flags.hard_stopped {
                return None;
            }
            flags.warned_80 = true;
            flags.warned_95 = true;
            flags.hard_stopped = true;
            return Some(EventPayload::CostHardStop {
                scope,
                spent_usd: spent,
                budget_usd: budget,
            });
        }
        if pct >= WARN_THRESHOLDS[1] {
            if flags.warned_95 {
                return None;
            }
            flags.warned_80 = true;
            flags.warned_95 = true;
            return Some(EventPayload::CostWarning {
                scope,
                consumed_pct: pct,
                spent_usd: spent,
                budget_usd: budget,
            });
        }
        if pct >= WARN_THRESHOLDS[0] {
            if flags.warned_80 {
                return None;
            }
            flags.warned_80 = true;
            return Some(EventPayload::CostWarning {
                scope,
                consumed_pct: pct,
                spent_usd: spent,
                budget_usd: budget,
            });
        }
        None
    }

    fn decay_flags(flags: &mut ThresholdFlags, pct: f64) {
        if pct < WARN_THRESHOLDS[0] {
            flags.warned_80 = false;
        }
        if pct < WARN_THRESHOLDS[1] {
            flags.warned_95 = false;
        }
        if pct < 1.0 {
            flags.hard_stopped = false;
        }
    }
}
