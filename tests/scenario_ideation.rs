//! Empty-queue ideation: an idle agent picks a category, generates a
//! proposal, and the queue refills.

mod common;

use common::{assert_event_subsequence, ManualStack, StackConfig};
use foreman::domain::models::{AgentStatus, CategoryTag, ProjectState, ProposalDraft};
use foreman::services::EventPayload;

#[tokio::test]
async fn empty_queue_wakes_ideation_and_refills() {
    let mut stack = ManualStack::new(StackConfig::default()).await;
    stack.add_agent("agent-1").await;

    // Queue empty: the first tick takes the ideation slot with the first
    // category by weighted round-robin.
    stack.tick("agent-1").await;
    assert_eq!(stack.agent_status("agent-1").await, AgentStatus::Ideating);

    // The proposal lands as a new queued project and the agent yields.
    stack.tick("agent-1").await;
    assert_eq!(stack.agent_status("agent-1").await, AgentStatus::Idle);

    let projects = stack.projects.rows.lock().await.clone();
    assert_eq!(projects.len(), 1);
    let project = projects.values().next().unwrap();
    assert_eq!(project.state, ProjectState::Queued);
    assert_eq!(project.category_tag, Some(CategoryTag::Optimization));

    let events = stack.drain_events();
    assert_event_subsequence(&events, &["project.created", "project.queued"]);
    let created_category = events.iter().find_map(|e| match &e.payload {
        EventPayload::ProjectCreated { category, .. } => *category,
        _ => None,
    });
    assert_eq!(created_category, Some(CategoryTag::Optimization));

    // Next idle tick claims the project it just proposed.
    stack.tick("agent-1").await;
    assert_eq!(stack.agent_status("agent-1").await, AgentStatus::Working);
}

#[tokio::test]
async fn invalid_proposal_backs_off_category_and_picks_next() {
    let mut stack = ManualStack::new(StackConfig::default()).await;
    stack.add_agent("agent-1").await;

    // First generation returns an empty title: no project, category backs
    // off.
    stack.runtime.push_proposal(ProposalDraft {
        title: String::new(),
        problem_statement: "whatever".to_string(),
        acceptance_criteria: vec![],
    });

    stack.tick("agent-1").await; // enters ideation with optimization
    stack.tick("agent-1").await; // proposal rejected
    assert!(stack.projects.rows.lock().await.is_empty());

    // The loop moves on to the next category.
    stack.tick("agent-1").await;
    stack.tick("agent-1").await;
    let projects = stack.projects.rows.lock().await.clone();
    assert_eq!(projects.len(), 1);
    assert_eq!(
        projects.values().next().unwrap().category_tag,
        Some(CategoryTag::Security)
    );
}

#[tokio::test]
async fn ideation_defers_while_reviews_are_pending() {
    let mut stack = ManualStack::new(StackConfig::default()).await;
    stack.add_agent("agent-1").await;
    stack.enqueue_project(1, "Work", &["done"]).await;

    // Push the only project; the queue is now empty but a review is
    // pending, so the executor does not ideate.
    for _ in 0..5 {
        stack.tick("agent-1").await;
    }
    assert_eq!(stack.review_engine.pending_reviews().await, 1);

    stack.tick("agent-1").await;
    assert_eq!(stack.agent_status("agent-1").await, AgentStatus::Idle);
    assert!(stack.projects.rows.lock().await.len() == 1);
}
