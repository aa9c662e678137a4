//! Property: for any interleaving of concurrent claims on a queue of N
//! projects by M agents, exactly min(N, M) claims succeed and no project
//! is claimed twice.

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use proptest::prelude::*;

use common::{MemProjects, NullAuditStore};
use foreman::domain::models::{AgentId, Project};
use foreman::domain::ports::{Clock, ManualClock, ProjectRepository};
use foreman::services::{
    AuditLog, AuditLogConfig, Dispatcher, DispatcherConfig, EventBus, EventBusConfig,
};

async fn run_case(n_projects: u64, m_agents: u32) {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let bus = Arc::new(EventBus::new(EventBusConfig::default(), clock.clone()));
    let (audit, _) =
        AuditLog::spawn(Arc::new(NullAuditStore), AuditLogConfig::default(), clock.clone());
    let projects = MemProjects::new();
    let dispatcher = Arc::new(Dispatcher::new(
        DispatcherConfig::default(),
        projects.clone(),
        bus,
        audit,
        clock.clone(),
    ));

    for number in 1..=n_projects {
        let project = Project::new(number, format!("p{number}"), clock.now());
        projects.upsert(&project).await.unwrap();
        dispatcher.enqueue(number).await.unwrap();
    }

    let mut handles = Vec::new();
    for i in 0..m_agents {
        let dispatcher = dispatcher.clone();
        handles.push(tokio::spawn(async move {
            dispatcher
                .try_claim(&AgentId::new(format!("agent-{i}")))
                .await
                .unwrap()
                .map(|(project, ticket)| (project.number, ticket.fence))
        }));
    }

    let mut claimed_numbers = HashSet::new();
    let mut fences = HashSet::new();
    let mut granted = 0usize;
    for handle in handles {
        if let Some((number, fence)) = handle.await.unwrap() {
            granted += 1;
            assert!(claimed_numbers.insert(number), "project {number} claimed twice");
            assert!(fences.insert(fence), "fence {fence} issued twice");
        }
    }

    let expected = usize::try_from(n_projects.min(u64::from(m_agents))).unwrap();
    assert_eq!(granted, expected, "claims for N={n_projects}, M={m_agents}");
    assert_eq!(dispatcher.active_claims().await, expected);
    assert_eq!(
        dispatcher.queue_depth().await,
        usize::try_from(n_projects).unwrap() - expected
    );
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn concurrent_claims_grant_min_n_m(n_projects in 0u64..8, m_agents in 1u32..8) {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(4)
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(run_case(n_projects, m_agents));
    }
}
