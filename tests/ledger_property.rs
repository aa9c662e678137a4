//! Property: windowed cost sums are non-decreasing under appends and equal
//! a direct sum of the raw ledger entries within the window.

mod common;

use std::sync::Arc;

use chrono::Utc;
use proptest::prelude::*;

use common::{MemLedger, NullAuditStore};
use foreman::domain::models::AgentId;
use foreman::domain::ports::ManualClock;
use foreman::services::{
    AuditLog, AuditLogConfig, CostGovernor, CostGovernorConfig, EventBus, EventBusConfig,
};

async fn run_case(amounts: Vec<(u32, u32)>) {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let bus = Arc::new(EventBus::new(EventBusConfig::default(), clock.clone()));
    let (audit, _) =
        AuditLog::spawn(Arc::new(NullAuditStore), AuditLogConfig::default(), clock.clone());
    let ledger = MemLedger::new();
    let governor = CostGovernor::new(
        CostGovernorConfig {
            daily_budget_usd: 1.0e9,
            monthly_budget_usd: 1.0e9,
            per_agent_daily_cap_usd: None,
        },
        ledger.clone(),
        bus,
        audit,
        clock.clone(),
    );

    let mut previous_daily = 0.0f64;
    let mut direct_sum = 0.0f64;
    let mut direct_tokens = 0u64;

    for (i, (cents, tokens)) in amounts.iter().enumerate() {
        let usd = f64::from(*cents) / 100.0;
        let agent = AgentId::new(format!("agent-{}", i % 3));
        governor.record(&agent, Some(i as u64 + 1), usd, u64::from(*tokens)).await;
        direct_sum += usd;
        direct_tokens += u64::from(*tokens);

        let snapshot = governor.snapshot().await;
        // Monotonic under appends (the clock is frozen, so nothing decays).
        assert!(snapshot.daily.spent_usd >= previous_daily);
        previous_daily = snapshot.daily.spent_usd;

        // Windowed sum equals the direct sum of raw entries.
        assert!((snapshot.daily.spent_usd - direct_sum).abs() < 1e-9);
        assert!((snapshot.monthly.spent_usd - direct_sum).abs() < 1e-9);
        assert_eq!(snapshot.daily.tokens, direct_tokens);
    }

    // The persistent ledger saw every append, in order.
    let entries = ledger.entries.lock().await;
    assert_eq!(entries.len(), amounts.len());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn windowed_sums_match_raw_entries(
        amounts in proptest::collection::vec((0u32..5_000, 0u32..100_000), 1..40),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(run_case(amounts));
    }
}
