use crate::infra::{LoggingNotifier, LoggingSuspensionSink, SimulatedPaymentProvider};
use chrono::{DateTime, Duration, DurationRound, Utc};
use clap::Args;
use serde::Serialize;
use shiftfill::config::MarketplaceConfig;
use shiftfill::error::AppError;
use shiftfill::workflows::staffing::{
    Actor, AgencyTier, AvailabilityWindow, BusinessId, ClaimReport, Collaborators,
    CompletionSignal, GeoPoint, InMemoryWorkerDirectory, MarketplaceError, MarketplaceService, NoShowReport,
    RankedCandidate, ShiftPayment, ShiftPosting, SweepReport, Urgency, WorkerId, WorkerProfile,
    WorkerStanding,
};
use std::sync::Arc;

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Number of synthetic workers registered in the directory (at least 2).
    #[arg(long, default_value_t = 5)]
    pub(crate) workers: usize,
    /// How many of the top-ranked workers receive an invitation.
    #[arg(long, default_value_t = 3)]
    pub(crate) invite: usize,
    /// Print the full run as JSON instead of a readable summary.
    #[arg(long)]
    pub(crate) json: bool,
}

#[derive(Debug, Serialize)]
struct DemoRun {
    ranking: Vec<RankedCandidate>,
    invitation_claim: ClaimReport,
    completed_payment: ShiftPayment,
    release_sweep: SweepReport,
    broadcast_claim: ClaimReport,
    retried_payment: ShiftPayment,
    no_show: NoShowReport,
    no_show_standing: WorkerStanding,
    notifications: usize,
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        workers,
        invite,
        json,
    } = args;
    let workers = workers.max(2);

    let clock = Utc::now()
        .duration_trunc(Duration::hours(1))
        .unwrap_or_else(|_| Utc::now());
    let site = GeoPoint::new(40.7128, -74.0060);
    let business = Actor::Business(BusinessId::from("biz-demo"));
    let admin = Actor::Admin("demo-ops".to_string());

    let notifier = Arc::new(LoggingNotifier::capturing());
    let provider = Arc::new(SimulatedPaymentProvider::default());
    let profiles = (0..workers)
        .map(|index| demo_worker(index, site, clock))
        .collect::<Vec<_>>();
    let collaborators = Collaborators::in_memory(
        Arc::new(InMemoryWorkerDirectory::with_profiles(profiles)),
        notifier.clone(),
        provider.clone(),
        Arc::new(LoggingSuspensionSink),
    );
    let config = MarketplaceConfig::default();
    let dispute_window = Duration::hours(config.dispute_window_hours);
    let no_show_grace = Duration::minutes(config.no_show_grace_minutes);
    let service = MarketplaceService::new(collaborators, config.settings())?;

    // Morning shift: invitations, check-in, completion and the automatic payout.
    let morning = demo_posting(site, clock + Duration::days(1), Urgency::Normal);
    let morning = service.post_shift(morning, clock)?;
    service.approve_shift(&morning.id, &admin, clock)?;
    let ranking = service.rank_candidates(&morning.id, clock)?;
    let invitations = service.invite_top_candidates(&morning.id, invite.max(1), &business, clock)?;
    let first = invitations
        .first()
        .ok_or_else(|| MarketplaceError::validation("no eligible workers to invite"))?;
    let invitation_claim =
        service.accept_invitation(&morning.id, &first.id, &first.worker_id, clock + Duration::minutes(5))?;
    let assignment = &invitation_claim.win.assignment;
    service.check_in(&assignment.id, &assignment.worker_id, morning.starts_at)?;
    service.complete(&assignment.id, CompletionSignal::Scheduled, &business, morning.ends_at)?;
    service.record_rating(&assignment.id, 5, &business, morning.ends_at)?;
    let release_sweep = service.sweep(morning.ends_at + dispute_window)?;
    let completed_payment = service.payment_for_assignment(&assignment.id)?;

    // Urgent evening shift: the broadcast winner's hold fails, is retried, and the worker never shows.
    let evening = demo_posting(site, clock + Duration::days(3), Urgency::Urgent);
    let evening = service.post_shift(evening, clock)?;
    service.approve_shift(&evening.id, &admin, clock)?;
    service.broadcast(&evening.id, &business, clock)?;
    let responder = service
        .rank_candidates(&evening.id, clock)?
        .last()
        .map(|candidate| candidate.worker_id.clone())
        .unwrap_or_else(|| first.worker_id.clone());
    provider.set_outage(true);
    let broadcast_claim = service.respond_to_broadcast(&evening.id, &responder, clock)?;
    provider.set_outage(false);
    let retried_payment = match &broadcast_claim.payment {
        Some(payment) => service.retry_payment(&payment.id, &admin, clock + Duration::minutes(1))?,
        None => service.payment_for_assignment(&broadcast_claim.win.assignment.id)?,
    };
    let no_show = service.mark_no_show(
        &broadcast_claim.win.assignment.id,
        evening.starts_at + no_show_grace + Duration::minutes(1),
    )?;
    let no_show_standing = service.worker_standing(&responder)?;

    let run = DemoRun {
        ranking,
        invitation_claim,
        completed_payment,
        release_sweep,
        broadcast_claim,
        retried_payment,
        no_show,
        no_show_standing,
        notifications: notifier.delivered().len(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&run)?);
    } else {
        render_run(&run);
    }
    Ok(())
}

fn render_run(run: &DemoRun) {
    println!("Shift fill marketplace demo");
    println!("\nCandidate ranking for the morning shift");
    for candidate in &run.ranking {
        println!(
            "  {}. {} score {:.2} ({:.1} km, {} strikes)",
            candidate.rank,
            candidate.worker_id,
            candidate.score.total,
            candidate.score.distance_km,
            candidate.strikes
        );
    }

    let win = &run.invitation_claim.win;
    println!(
        "\n- {} accepted an invitation; shift {} is {}",
        win.assignment.worker_id, win.shift.id, win.shift.status
    );
    println!(
        "  {} competing invitations closed out",
        win.close_out.declined_invitations.len()
    );
    println!(
        "- Payment {} {} after the dispute window: {} of {} cents paid out",
        run.completed_payment.id,
        run.completed_payment.status.label(),
        run.completed_payment.released_cents,
        run.completed_payment.held_cents
    );
    println!(
        "  Sweep released {} payment(s) across {} shift(s)",
        run.release_sweep.payments_released, run.release_sweep.shifts_scanned
    );

    let broadcast = &run.broadcast_claim;
    println!(
        "\n- {} answered the urgent broadcast first",
        broadcast.win.assignment.worker_id
    );
    if let Some(payment) = &broadcast.payment {
        println!(
            "  Escrow hold during the gateway outage: {}",
            payment.status.label()
        );
    }
    println!("  After retry: {}", run.retried_payment.status.label());
    println!(
        "- No-show recorded; shift returned to {} and {} now has {} strike(s)",
        run.no_show.outcome.shift_status,
        run.no_show.outcome.assignment.worker_id,
        run.no_show_standing.strikes
    );
    if let Some(payment) = &run.no_show.payment {
        println!(
            "  Escrow {} ({} cents refunded)",
            payment.status.label(),
            payment.refunded_cents
        );
    }
    println!("\n{} notifications dispatched", run.notifications);
}

fn demo_posting(site: GeoPoint, starts_at: DateTime<Utc>, urgency: Urgency) -> ShiftPosting {
    ShiftPosting {
        business_id: BusinessId::from("biz-demo"),
        title: "Warehouse associate".to_string(),
        industry: "logistics".to_string(),
        required_skills: ["forklift", "inventory"].iter().map(|s| s.to_string()).collect(),
        required_certifications: ["osha-10"].iter().map(|s| s.to_string()).collect(),
        location: site,
        radius_km: 30.0,
        starts_at,
        ends_at: starts_at + Duration::hours(8),
        urgency,
        gross_amount_cents: 24_000,
    }
}

fn demo_worker(index: usize, site: GeoPoint, clock: DateTime<Utc>) -> WorkerProfile {
    let offset = index as f64 * 0.02;
    let tier = match index % 4 {
        0 => AgencyTier::Gold,
        1 => AgencyTier::Preferred,
        2 => AgencyTier::Standard,
        _ => AgencyTier::Platinum,
    };
    let mut skills = vec!["forklift", "inventory"];
    if index % 3 == 2 {
        skills.pop();
    }
    WorkerProfile {
        worker_id: WorkerId(format!("w-demo-{index:02}")),
        display_name: format!("Demo Worker {}", index + 1),
        skills: skills.into_iter().map(str::to_string).collect(),
        certifications: ["osha-10"].iter().map(|s| s.to_string()).collect(),
        location: GeoPoint::new(site.latitude + offset, site.longitude - offset),
        availability: vec![AvailabilityWindow {
            starts_at: clock,
            ends_at: clock + Duration::days(7),
        }],
        tier,
        urgent_acceptance_rate: Some(0.55 + (index % 4) as f64 * 0.1),
        joined_at: clock - Duration::days(400 - index as i64 * 30),
    }
}
