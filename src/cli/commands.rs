//! Command handlers for the operator CLI.

use anyhow::{Context, Result};
use comfy_table::{presets::UTF8_FULL, Cell, Table};
use console::style;
use std::sync::Arc;

use crate::api::{self, AppState};
use crate::domain::models::{Config, Workspace};
use crate::domain::ports::{Clock, IssueHost, NullIssueHost, SystemClock};
use crate::infrastructure::database::{
    AgentRepositoryImpl, AuditRepositoryImpl, CostLedgerRepositoryImpl, DatabaseConnection,
    EventRepositoryImpl, ProjectRepositoryImpl, ProposalRepositoryImpl, ReviewRepositoryImpl,
};
use crate::services::{
    AuditLog, AuditLogConfig, CostGovernor, CostGovernorConfig, Dispatcher, DispatcherConfig,
    EventBus, EventBusConfig, IdeationLoop, IdeationLoopConfig, Orchestrator, OrchestratorConfig,
    ReviewEngine, ReviewEngineConfig, SupervisorConfig,
};

use super::client::{ApiClient, CliError};

/// Run the orchestrator daemon in the foreground until ctrl-c or
/// `POST /shutdown`.
pub async fn handle_start(config: Config, initial_agents: u32) -> Result<()> {
    let clock = Arc::new(SystemClock);

    // The in-memory tenant record; budgets and caps flow from here.
    let mut workspace = Workspace::new(
        config.workspace_id.clone(),
        config.max_agents,
        config.daily_budget_usd,
        config.monthly_budget_usd,
        clock.now(),
    );
    workspace.per_agent_daily_cap_usd = config.agent.per_agent_daily_cap_usd;

    let db = DatabaseConnection::new(&config.db_url)
        .await
        .context("Failed to connect to database")?;
    db.migrate().await.context("Failed to run database migrations")?;
    let pool = db.pool().clone();

    let agent_repo = Arc::new(AgentRepositoryImpl::new(pool.clone()));
    let project_repo = Arc::new(ProjectRepositoryImpl::new(pool.clone()));
    let review_repo = Arc::new(ReviewRepositoryImpl::new(pool.clone()));
    let ledger = Arc::new(CostLedgerRepositoryImpl::new(pool.clone()));
    let proposal_repo = Arc::new(ProposalRepositoryImpl::new(pool.clone()));
    let event_store = Arc::new(EventRepositoryImpl::new(pool.clone()));
    let audit_store = Arc::new(AuditRepositoryImpl::new(pool));

    let (audit, _audit_writer) = AuditLog::spawn(
        audit_store.clone(),
        AuditLogConfig { retry_buffer: config.audit.retry_buffer },
        clock.clone(),
    );

    let bus = Arc::new(EventBus::new(
        EventBusConfig {
            retention: config.event_retention,
            channel_capacity: config.events.subscriber_queue_cap,
        },
        clock.clone(),
    ));
    bus.set_store(event_store.clone()).await;
    bus.set_audit(audit.clone()).await;

    let cost_governor = Arc::new(CostGovernor::new(
        CostGovernorConfig {
            daily_budget_usd: workspace.daily_budget_usd,
            monthly_budget_usd: workspace.monthly_budget_usd,
            per_agent_daily_cap_usd: workspace.per_agent_daily_cap_usd,
        },
        ledger.clone(),
        bus.clone(),
        audit.clone(),
        clock.clone(),
    ));

    let dispatcher = Arc::new(Dispatcher::new(
        DispatcherConfig {
            lease: chrono::Duration::seconds(
                i64::try_from(config.dispatcher.lease_secs).unwrap_or(600),
            ),
            rework_preference: chrono::Duration::seconds(
                i64::try_from(config.dispatcher.rework_preference_secs).unwrap_or(60),
            ),
        },
        project_repo.clone(),
        bus.clone(),
        audit.clone(),
        clock.clone(),
    ));

    let review_engine = Arc::new(ReviewEngine::new(
        ReviewEngineConfig {
            max_iterations: config.review_max_iter,
            allow_self_review: config.review.allow_self_review,
            check_lint: config.review.check_lint,
            check_tests: config.review.check_tests,
            check_type_check: config.review.check_type_check,
            estimate_usd: 0.05,
        },
        project_repo.clone(),
        review_repo,
        dispatcher.clone(),
        bus.clone(),
        audit.clone(),
        clock.clone(),
    ));

    let issue_host: Arc<dyn IssueHost> = if config.issue_host.repository.is_empty() {
        tracing::warn!("no issue-host repository configured; using local project numbering");
        Arc::new(NullIssueHost)
    } else {
        Arc::new(crate::adapters::github::GitHubIssueHost::new(
            &config.issue_host,
            std::time::Duration::from_secs(config.timeouts.issue_host_secs),
        )?)
    };

    let ideation = Arc::new(IdeationLoop::new(
        IdeationLoopConfig {
            cooldown: chrono::Duration::seconds(
                i64::try_from(config.ideation.cooldown_secs).unwrap_or(300),
            ),
            base_backoff: chrono::Duration::seconds(
                i64::try_from(config.ideation.base_backoff_secs).unwrap_or(60),
            ),
            max_backoff: chrono::Duration::seconds(
                i64::try_from(config.ideation.max_backoff_secs).unwrap_or(3_600),
            ),
            estimate_usd: config.ideation.estimate_usd,
        },
        issue_host,
        proposal_repo,
        project_repo.clone(),
        dispatcher.clone(),
        review_engine.clone(),
        bus.clone(),
        audit.clone(),
        clock.clone(),
    ));

    // The model runtime that performs real edits lives outside this
    // repository; the daemon runs against the deterministic substrate
    // unless an integration provides one.
    let runtime = Arc::new(crate::adapters::substrates::MockModelRuntime::new());

    let supervisor_config = SupervisorConfig {
        heartbeat_interval: chrono::Duration::seconds(
            i64::try_from(config.agent.heartbeat_interval_secs).unwrap_or(30),
        ),
        stale_threshold: chrono::Duration::milliseconds(
            i64::try_from(config.stale_threshold_ms).unwrap_or(150_000),
        ),
        tick_interval: std::time::Duration::from_millis(config.agent.tick_interval_ms),
        stop_grace: std::time::Duration::from_secs(config.agent.stop_grace_secs),
        max_consecutive_errors: config.agent.max_consecutive_errors,
        work_estimate_usd: config.agent.work_estimate_usd,
        model_timeout: std::time::Duration::from_secs(config.timeouts.model_secs),
    };

    let orchestrator = Orchestrator::new(
        OrchestratorConfig {
            workspace_id: workspace.id.clone(),
            max_agents: workspace.max_concurrent_agents,
            sweep_interval: std::time::Duration::from_secs(1),
            retention_interval: std::time::Duration::from_secs(3_600),
            event_retention_secs: config.retention.event_secs,
            event_retention_count: config.event_retention as u64,
            ledger_retention_days: config.retention.ledger_days,
            audit_retention_days: config.retention.audit_days,
        },
        supervisor_config,
        dispatcher,
        review_engine,
        ideation,
        cost_governor.clone(),
        runtime,
        agent_repo,
        project_repo,
        audit_store.clone(),
        event_store,
        ledger,
        bus.clone(),
        audit,
        clock,
    );
    orchestrator.start().await?;

    for _ in 0..initial_agents {
        orchestrator.add_agent().await?;
    }

    let shutdown_signal = Arc::new(tokio::sync::Notify::new());
    let state = AppState {
        orchestrator: orchestrator.clone(),
        bus,
        cost_governor,
        audit_store,
        api_key: Arc::from(config.api_key.as_str()),
        batch_window: std::time::Duration::from_millis(config.events.batch_window_ms),
        shutdown_signal: shutdown_signal.clone(),
    };

    let host = config.server.host.clone();
    let port = config.server.port;
    let server = tokio::spawn(async move { api::serve(state, &host, port).await });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("ctrl-c received; shutting down");
            orchestrator.shutdown().await;
        }
        () = shutdown_signal.notified() => {
            tracing::info!("shutdown requested over the API");
        }
    }
    server.abort();
    Ok(())
}

/// `orchestrator stop`: ask a running daemon to shut down.
pub async fn handle_stop(client: &ApiClient, json: bool) -> Result<(), CliError> {
    client.shutdown().await?;
    if json {
        println!("{}", serde_json::json!({ "status": "stopping" }));
    } else {
        println!("{}", style("orchestrator stopping").green());
    }
    Ok(())
}

/// `orchestrator status`: agents, queue, and event-stream position.
pub async fn handle_status(client: &ApiClient, json: bool) -> Result<(), CliError> {
    let status = client.status().await?;
    if json {
        println!("{status}");
        return Ok(());
    }

    println!(
        "workspace {}  queue {}  claims {}  reviews {}  seq {}",
        style(status["workspace_id"].as_str().unwrap_or("?")).bold(),
        status["queue_depth"],
        status["active_claims"],
        status["pending_reviews"],
        status["event_sequence"],
    );

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["agent", "status", "project", "phase", "done", "errors"]);
    if let Some(agents) = status["agents"].as_array() {
        for agent in agents {
            table.add_row(vec![
                Cell::new(agent["id"].as_str().unwrap_or("?")),
                Cell::new(agent["status"].as_str().unwrap_or("?")),
                Cell::new(
                    agent["current_project"]
                        .as_u64()
                        .map_or_else(|| "-".to_string(), |n| n.to_string()),
                ),
                Cell::new(agent["current_phase"].as_str().unwrap_or("-")),
                Cell::new(agent["tasks_completed"].to_string()),
                Cell::new(agent["error_count"].to_string()),
            ]);
        }
    }
    println!("{table}");
    Ok(())
}

/// `orchestrator agent add`
pub async fn handle_agent_add(client: &ApiClient, json: bool) -> Result<(), CliError> {
    let agent = client.add_agent().await?;
    if json {
        println!("{agent}");
    } else {
        println!(
            "added {}",
            style(agent["id"].as_str().unwrap_or("?")).green().bold()
        );
    }
    Ok(())
}

/// `orchestrator agent stop <id>`
pub async fn handle_agent_stop(client: &ApiClient, id: &str, json: bool) -> Result<(), CliError> {
    client.stop_agent(id).await?;
    if json {
        println!("{}", serde_json::json!({ "status": "ok", "agent": id }));
    } else {
        println!("stopping {}", style(id).yellow());
    }
    Ok(())
}

/// `orchestrator cost`: current windows and budgets.
pub async fn handle_cost(client: &ApiClient, json: bool) -> Result<(), CliError> {
    let cost = client.cost().await?;
    if json {
        println!("{cost}");
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["window", "spent", "budget", "consumed"]);
    for window in ["daily", "monthly"] {
        let w = &cost[window];
        table.add_row(vec![
            Cell::new(window),
            Cell::new(format!("${:.2}", w["spent_usd"].as_f64().unwrap_or(0.0))),
            Cell::new(format!("${:.2}", w["budget_usd"].as_f64().unwrap_or(0.0))),
            Cell::new(format!(
                "{:.0}%",
                w["consumed_pct"].as_f64().unwrap_or(0.0) * 100.0
            )),
        ]);
    }
    println!("{table}");
    if cost["hard_stopped"].as_bool() == Some(true) {
        println!("{}", style("budget hard stop active; all agents paused").red().bold());
    }
    Ok(())
}

/// `orchestrator replay --since N`
pub async fn handle_replay(client: &ApiClient, since: u64, json: bool) -> Result<(), CliError> {
    let events = client.replay(since).await?;
    if json {
        println!("{events}");
        return Ok(());
    }
    if let Some(events) = events.as_array() {
        for event in events {
            println!(
                "{:>8}  {}  {}",
                event["seq"].as_u64().unwrap_or(0),
                event["at"].as_str().unwrap_or(""),
                style(event["type"].as_str().unwrap_or("?")).cyan(),
            );
        }
    }
    Ok(())
}
