//! Integration tests for warnings, the summary report and outbox delivery.

mod common;

use std::sync::Arc;

use chrono::{Duration, Utc};
use common::{monday, tuesday, TestContext, UnreachableTransport};
use helpdesk_core::UserId;
use helpdesk_db::models::{NotificationKind, NotificationStatus, TicketPriority};
use helpdesk_escalation::jobs::{
    EscalationReportJob, EscalationWarningJob, NotificationOutboxWorker, ReportStats,
};
use helpdesk_escalation::notification::EscalationSummaryContext;
use helpdesk_escalation::report::EscalationSummaryBuilder;
use helpdesk_escalation::{
    LoggingTransport, Notification, NotificationDispatch, NotificationPayload, OutboxDispatcher,
    StaticRecipientDirectory, TicketEscalationStateMachine,
};

fn warning_job(ctx: &TestContext) -> EscalationWarningJob {
    EscalationWarningJob::new(
        ctx.shared_store(),
        ctx.catalog(),
        ctx.resolver(),
        ctx.dispatcher.clone(),
    )
}

// ============================================================================
// Warnings
// ============================================================================

/// A ticket due within the lead time is warned once.
#[tokio::test]
async fn test_warning_sent_once_per_deadline() {
    let ctx = TestContext::new();
    ctx.around_the_clock(3).await;
    let rule = ctx.add_rule(false, TicketPriority::High, 1, 4.0).await;
    let ticket = ctx.create_ticket(TicketPriority::High, monday(9)).await;

    let job = warning_job(&ctx);
    let early = job.run(monday(11)).await.unwrap();
    assert_eq!(early.processed, 0);

    let stats = job.run(monday(12) + Duration::minutes(15)).await.unwrap();
    assert_eq!(stats.warnings_sent, 1);

    let sent = ctx.recorder.sent().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].recipient, ticket.created_by);
    match &sent[0].payload {
        NotificationPayload::EscalationWarning(warning) => {
            assert_eq!(warning.next_level, 1);
            assert_eq!(warning.escalates_to, rule.escalate_to);
            assert_eq!(warning.minutes_remaining, 45);
            assert_eq!(warning.due_at, monday(13));
        }
        other => panic!("unexpected payload {other:?}"),
    }
    assert!(ctx.ticket(ticket.id).await.escalation_warning_sent);

    let again = job.run(monday(12) + Duration::minutes(30)).await.unwrap();
    assert_eq!(again.processed, 0);
    assert_eq!(ctx.recorder.sent().await.len(), 1);
}

/// Escalating resets the warning flag for the next deadline.
#[tokio::test]
async fn test_warning_flag_resets_after_escalation() {
    let ctx = TestContext::new();
    ctx.around_the_clock(3).await;
    ctx.add_rule(false, TicketPriority::High, 1, 4.0).await;
    ctx.add_rule(false, TicketPriority::High, 2, 8.0).await;
    let ticket = ctx.create_ticket(TicketPriority::High, monday(9)).await;

    warning_job(&ctx).run(monday(12)).await.unwrap();
    ctx.scheduler().run_cycle(monday(13)).await.unwrap();

    let escalated = ctx.ticket(ticket.id).await;
    assert!(!escalated.escalation_warning_sent);

    let stats = warning_job(&ctx).run(monday(16)).await.unwrap();
    assert_eq!(stats.warnings_sent, 1);
}

/// No warning when the coming evaluation would be capped.
#[tokio::test]
async fn test_no_warning_at_level_cap() {
    let ctx = TestContext::new();
    ctx.around_the_clock(1).await;
    ctx.add_rule(false, TicketPriority::High, 1, 4.0).await;
    ctx.add_rule(false, TicketPriority::High, 2, 8.0).await;
    ctx.create_ticket(TicketPriority::High, monday(9)).await;
    ctx.scheduler().run_cycle(monday(13)).await.unwrap();

    let stats = warning_job(&ctx).run(monday(16)).await.unwrap();
    assert_eq!(stats.processed, 1);
    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.warnings_sent, 0);
}

// ============================================================================
// Summary report
// ============================================================================

fn report_job(ctx: &TestContext, directory: StaticRecipientDirectory) -> EscalationReportJob {
    EscalationReportJob::new(
        ctx.shared_store(),
        ctx.shared_store(),
        ctx.shared_store(),
        Arc::new(directory),
        ctx.dispatcher.clone(),
    )
}

/// The summary goes to global recipients in full and to each company in part.
#[tokio::test]
async fn test_summary_report_recipients() {
    let ctx = TestContext::new();
    ctx.around_the_clock(3).await;
    ctx.add_rule(false, TicketPriority::High, 1, 1.0).await;
    ctx.create_ticket(TicketPriority::High, monday(9)).await;
    ctx.create_ticket(TicketPriority::High, monday(9)).await;
    ctx.scheduler().run_cycle(monday(10)).await.unwrap();
    let before = ctx.recorder.sent().await.len();

    let superadmin = UserId::new();
    let company_admin = UserId::new();
    let directory = StaticRecipientDirectory::new(vec![superadmin])
        .with_company(ctx.company_id, vec![company_admin]);
    let job = report_job(&ctx, directory);

    let stats = job.run(monday(20)).await.unwrap();
    assert!(stats.reported);
    assert_eq!(stats.escalations, 2);
    assert_eq!(stats.companies, 1);
    assert_eq!(stats.notifications_sent, 2);

    let sent = ctx.recorder.sent().await;
    let summaries: Vec<_> = sent[before..].iter().collect();
    assert_eq!(summaries[0].recipient, superadmin);
    assert_eq!(summaries[0].company_id, None);
    assert_eq!(summaries[1].recipient, company_admin);
    assert_eq!(summaries[1].company_id, Some(ctx.company_id));
    match &summaries[1].payload {
        NotificationPayload::EscalationSummary(report) => {
            assert_eq!(report.summary.total, 2);
            assert_eq!(report.summary.by_level.get(&1), Some(&2));
            assert_eq!(report.summary.companies[0].tickets.len(), 2);
        }
        other => panic!("unexpected payload {other:?}"),
    }
}

/// Nothing is sent for a quiet day.
#[tokio::test]
async fn test_summary_report_skips_quiet_period() {
    let ctx = TestContext::new();
    let job = report_job(&ctx, StaticRecipientDirectory::new(vec![UserId::new()]));

    let stats = job.run(monday(20)).await.unwrap();
    assert!(stats.reported);
    assert_eq!(stats.escalations, 0);
    assert_eq!(stats.notifications_sent, 0);
    assert!(ctx.recorder.sent().await.is_empty());
}

/// Workers sharing the store report each period once; later periods start
/// where the previous one ended.
#[tokio::test]
async fn test_summary_report_sent_once_per_period() {
    let ctx = TestContext::new();
    ctx.around_the_clock(3).await;
    ctx.add_rule(false, TicketPriority::High, 1, 1.0).await;
    ctx.create_ticket(TicketPriority::High, monday(9)).await;
    ctx.scheduler().run_cycle(monday(10)).await.unwrap();
    let before = ctx.recorder.sent().await.len();

    let admin = UserId::new();
    let first = report_job(&ctx, StaticRecipientDirectory::new(vec![admin]));
    let second = report_job(&ctx, StaticRecipientDirectory::new(vec![admin]));

    let stats = first.run(monday(20)).await.unwrap();
    assert!(stats.reported);
    assert_eq!(stats.escalations, 1);
    assert_eq!(stats.notifications_sent, 1);

    assert_eq!(second.run(monday(20)).await.unwrap(), ReportStats::default());

    // A restarted worker within the same period stays quiet.
    let restarted = report_job(&ctx, StaticRecipientDirectory::new(vec![admin]));
    assert_eq!(restarted.run(monday(21)).await.unwrap(), ReportStats::default());
    assert_eq!(ctx.recorder.sent().await.len(), before + 1);

    ctx.create_ticket(TicketPriority::High, monday(21)).await;
    ctx.scheduler().run_cycle(monday(23)).await.unwrap();
    let before = ctx.recorder.sent().await.len();

    let stats = second.run(tuesday(20)).await.unwrap();
    assert!(stats.reported);
    assert_eq!(stats.escalations, 1);
    assert_eq!(first.run(tuesday(20)).await.unwrap(), ReportStats::default());

    let sent = ctx.recorder.sent().await;
    assert_eq!(sent.len(), before + 1);
    match &sent[before].payload {
        NotificationPayload::EscalationSummary(report) => {
            assert_eq!(report.summary.period_start, monday(20));
            assert_eq!(report.summary.period_end, tuesday(20));
        }
        other => panic!("unexpected payload {other:?}"),
    }
}

// ============================================================================
// Outbox delivery
// ============================================================================

/// Escalation notifications land in the outbox and a transport delivers them.
#[tokio::test]
async fn test_outbox_delivers_escalation_notifications() {
    let ctx = TestContext::new();
    let outbox: Arc<dyn NotificationDispatch> =
        Arc::new(OutboxDispatcher::new(ctx.shared_store()));
    ctx.around_the_clock(3).await;
    ctx.add_rule(false, TicketPriority::High, 1, 4.0).await;
    let ticket = ctx.create_ticket(TicketPriority::High, monday(9)).await;

    let machine = TicketEscalationStateMachine::new(ctx.shared_store(), outbox);
    let config = ctx.scheduler().load_config().await.unwrap();
    let ticket = ctx.ticket(ticket.id).await;
    machine.escalate(&ticket, monday(13), &config).await.unwrap();

    let queued = ctx.store.outbox().await;
    assert_eq!(queued.len(), 2);
    assert!(queued.iter().all(|n| n.kind == NotificationKind::TicketEscalated));

    let worker = NotificationOutboxWorker::new(ctx.shared_store(), Arc::new(LoggingTransport));
    let stats = worker.run(Utc::now() + Duration::seconds(1)).await.unwrap();
    assert_eq!(stats.claimed, 2);
    assert_eq!(stats.delivered, 2);
    assert!(ctx
        .store
        .outbox()
        .await
        .iter()
        .all(|n| n.status == NotificationStatus::Sent && n.attempts == 1));
}

/// Failed deliveries back off, then give up after the last attempt.
#[tokio::test]
async fn test_outbox_retries_then_fails() {
    let ctx = TestContext::new();
    let dispatcher = OutboxDispatcher::new(ctx.shared_store());
    dispatcher
        .send(Notification {
            company_id: Some(ctx.company_id),
            recipient: UserId::new(),
            payload: NotificationPayload::EscalationSummary(EscalationSummaryContext {
                summary: EscalationSummaryBuilder::new(monday(0), monday(23)).build(),
            }),
        })
        .await
        .unwrap();

    let worker =
        NotificationOutboxWorker::new(ctx.shared_store(), Arc::new(UnreachableTransport))
            .with_max_attempts(3);

    let mut now = Utc::now() + Duration::seconds(1);
    let first = worker.run(now).await.unwrap();
    assert_eq!(first.retried, 1);
    let row = ctx.store.outbox().await.remove(0);
    assert_eq!(row.status, NotificationStatus::Pending);
    assert_eq!(row.attempts, 1);
    assert_eq!(row.next_attempt_at, now + Duration::seconds(60));
    assert_eq!(row.last_error.as_deref(), Some("Connection failed: connection refused"));

    // Not due yet.
    let idle = worker.run(now + Duration::seconds(30)).await.unwrap();
    assert_eq!(idle.claimed, 0);

    now += Duration::seconds(61);
    let second = worker.run(now).await.unwrap();
    assert_eq!(second.retried, 1);

    now += Duration::seconds(301);
    let third = worker.run(now).await.unwrap();
    assert_eq!(third.exhausted, 1);

    let row = ctx.store.outbox().await.remove(0);
    assert_eq!(row.status, NotificationStatus::Failed);
    assert_eq!(row.attempts, 3);
}
