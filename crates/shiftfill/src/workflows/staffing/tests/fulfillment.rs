use super::common::*;
use std::sync::{Arc, Barrier};
use std::thread;

use chrono::Duration;

use crate::workflows::staffing::{
    ApplicationSource, ApplicationStatus, AssignmentStatus, ClaimOrigin, Collaborators,
    ConflictKind, Ineligibility, InMemoryStandingRepository, InMemoryWorkerDirectory,
    InvitationStatus, MarketplaceError, MarketplaceService, MarketplaceSettings,
    NotificationEvent, PaymentStatus, Recipient, ShiftStatus, StandingRepository,
    WorkerStanding,
};

fn is_already_filled(error: &MarketplaceError) -> bool {
    matches!(
        error,
        MarketplaceError::Conflict(ConflictKind::ShiftAlreadyFilled(_))
    )
}

#[test]
fn approving_an_application_fills_the_shift_and_rejects_competitors() {
    let harness = build_service(vec![nearby("w-a"), far_away("w-b")]);
    let shift = open_shift(&harness);
    let service = &harness.service;

    let app_a = service.apply(&shift.id, &worker("w-a"), now()).expect("a applies");
    let app_b = service.apply(&shift.id, &worker("w-b"), now()).expect("b applies");

    let report = service
        .approve_application(&shift.id, &app_a.id, &business(), now())
        .expect("approval wins");

    assert_eq!(report.win.assignment.worker_id, worker("w-a"));
    assert_eq!(report.win.assignment.status, AssignmentStatus::Assigned);
    assert_eq!(
        report.win.assignment.origin,
        ClaimOrigin::Application(app_a.id.clone())
    );
    assert!(report.win.assignment.match_score.is_some());
    assert_eq!(report.win.shift.status, ShiftStatus::Filled);
    assert_eq!(
        report.win.close_out.rejected_applications,
        vec![(app_b.id.clone(), worker("w-b"))]
    );

    let payment = report.payment.expect("escrow opened");
    assert_eq!(payment.status, PaymentStatus::InEscrow);
    assert_eq!(payment.held_cents, SHIFT_AMOUNT_CENTS);
    assert_eq!(payment.platform_fee_cents, 3_000);

    let record = service.shift(&shift.id).expect("record");
    assert_eq!(record.shift.status, ShiftStatus::Filled);
    assert!(record.shift.filled_at.is_some());
    assert_eq!(record.assignments.len(), 1);
    let statuses: Vec<_> = record.applications.iter().map(|a| a.status).collect();
    assert_eq!(
        statuses,
        vec![ApplicationStatus::Approved, ApplicationStatus::Rejected]
    );

    assert_eq!(
        harness.notifier.events_for(&Recipient::Worker(worker("w-a"))),
        vec![NotificationEvent::ClaimAccepted]
    );
    assert_eq!(
        harness.notifier.events_for(&Recipient::Worker(worker("w-b"))),
        vec![NotificationEvent::ClaimRejected]
    );
    assert!(harness
        .notifier
        .events_for(&Recipient::Business("biz-1".into()))
        .contains(&NotificationEvent::ShiftFilled));
}

#[test]
fn application_approval_and_invitation_acceptance_race_for_one_slot() {
    let harness = build_service(vec![nearby("w-a"), nearby("w-b")]);
    let shift = open_shift(&harness);
    let service = harness.service.clone();

    let application = service.apply(&shift.id, &worker("w-a"), now()).expect("applies");
    let invitations = service
        .invite_top_candidates(&shift.id, 5, &business(), now())
        .expect("invites");
    assert_eq!(invitations.len(), 1, "applicant is not invited again");
    let invitation = invitations[0].clone();
    assert_eq!(invitation.worker_id, worker("w-b"));

    let barrier = Barrier::new(2);
    let (approval, acceptance) = thread::scope(|scope| {
        let approve = scope.spawn(|| {
            barrier.wait();
            service.approve_application(&shift.id, &application.id, &business(), now())
        });
        let accept = scope.spawn(|| {
            barrier.wait();
            service.accept_invitation(&shift.id, &invitation.id, &worker("w-b"), now())
        });
        (approve.join().unwrap(), accept.join().unwrap())
    });

    let winners = [approval.is_ok(), acceptance.is_ok()]
        .iter()
        .filter(|won| **won)
        .count();
    assert_eq!(winners, 1);
    let loser = approval
        .as_ref()
        .err()
        .or(acceptance.as_ref().err())
        .expect("one loser");
    assert!(is_already_filled(loser), "unexpected error {loser:?}");

    let record = service.shift(&shift.id).expect("record");
    assert_eq!(record.assignments.len(), 1);
    assert_eq!(record.shift.status, ShiftStatus::Filled);
    if acceptance.is_ok() {
        assert_eq!(record.applications[0].status, ApplicationStatus::Rejected);
        assert_eq!(record.invitations[0].status, InvitationStatus::Accepted);
    } else {
        assert_eq!(record.applications[0].status, ApplicationStatus::Approved);
        assert_eq!(record.invitations[0].status, InvitationStatus::Declined);
    }
}

#[test]
fn many_broadcast_responders_produce_a_single_assignment() {
    let ids: Vec<String> = (0..8).map(|n| format!("w-{n}")).collect();
    let harness = build_service(ids.iter().map(|id| nearby(id)).collect());
    let shift = open_shift(&harness);
    let service = harness.service.clone();

    let broadcast = service.broadcast(&shift.id, &business(), now()).expect("broadcast");
    assert_eq!(broadcast.recipients, 8);
    assert_eq!(harness.notifier.count(NotificationEvent::BroadcastSent), 8);

    let barrier = Barrier::new(ids.len());
    let outcomes: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = ids
            .iter()
            .map(|id| {
                let service = &service;
                let barrier = &barrier;
                let shift_id = &shift.id;
                scope.spawn(move || {
                    barrier.wait();
                    service.respond_to_broadcast(shift_id, &worker(id), now())
                })
            })
            .collect();
        handles.into_iter().map(|handle| handle.join().unwrap()).collect()
    });

    assert_eq!(outcomes.iter().filter(|outcome| outcome.is_ok()).count(), 1);
    for outcome in outcomes.iter().filter_map(|outcome| outcome.as_ref().err()) {
        assert!(is_already_filled(outcome), "unexpected error {outcome:?}");
    }

    let record = service.shift(&shift.id).expect("record");
    assert_eq!(record.assignments.len(), 1);
    let broadcast = record.broadcast.expect("broadcast kept");
    assert!(broadcast.closed);
    assert_eq!(broadcast.response_count, 8);
    let rejected = record
        .applications
        .iter()
        .filter(|application| {
            application.source == ApplicationSource::BroadcastResponse
                && application.status == ApplicationStatus::Rejected
        })
        .count();
    assert_eq!(rejected, 7);
}

#[test]
fn late_broadcast_response_leaves_a_rejected_record() {
    let harness = build_service(vec![nearby("w-a"), nearby("w-b")]);
    let shift = open_shift(&harness);
    let service = &harness.service;

    service.broadcast(&shift.id, &business(), now()).expect("broadcast");
    let application = service.apply(&shift.id, &worker("w-a"), now()).expect("applies");
    service
        .approve_application(&shift.id, &application.id, &business(), now())
        .expect("application wins");

    let error = service
        .respond_to_broadcast(&shift.id, &worker("w-b"), now())
        .expect_err("shift already filled");
    assert!(is_already_filled(&error));

    let record = service.shift(&shift.id).expect("record");
    let responses: Vec<_> = record
        .applications
        .iter()
        .filter(|application| application.worker_id == worker("w-b"))
        .collect();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].source, ApplicationSource::BroadcastResponse);
    assert_eq!(responses[0].status, ApplicationStatus::Rejected);
    assert_eq!(responses[0].decided_at, Some(now()));
    assert_eq!(record.broadcast.map(|b| b.response_count), Some(1));
    assert!(record.audit.iter().any(|entry| entry.action == "claim_lost"));
}

#[test]
fn duplicate_application_is_a_conflict() {
    let harness = build_service(vec![nearby("w-a")]);
    let shift = open_shift(&harness);

    harness
        .service
        .apply(&shift.id, &worker("w-a"), now())
        .expect("first application");
    let error = harness
        .service
        .apply(&shift.id, &worker("w-a"), now())
        .expect_err("second application");

    assert!(matches!(
        error,
        MarketplaceError::Conflict(ConflictKind::DuplicateApplication { .. })
    ));
}

#[test]
fn withdrawn_application_allows_reapplying() {
    let harness = build_service(vec![nearby("w-a")]);
    let shift = open_shift(&harness);
    let service = &harness.service;

    let application = service.apply(&shift.id, &worker("w-a"), now()).expect("applies");
    let withdrawn = service
        .withdraw_application(&shift.id, &application.id, &worker("w-a"), now())
        .expect("withdraws");
    assert_eq!(withdrawn.status, ApplicationStatus::Withdrawn);

    service
        .apply(&shift.id, &worker("w-a"), now())
        .expect("reapplies after withdrawal");

    let error = service
        .approve_application(&shift.id, &application.id, &business(), now())
        .expect_err("withdrawn application cannot win");
    assert!(matches!(
        error,
        MarketplaceError::NotEligible(Ineligibility::ClaimNotPending(_))
    ));
}

#[test]
fn pending_shift_does_not_accept_applications() {
    let harness = build_service(vec![nearby("w-a")]);
    let shift = harness.service.post_shift(posting(), now()).expect("posted");

    let error = harness
        .service
        .apply(&shift.id, &worker("w-a"), now())
        .expect_err("shift awaiting approval");

    assert!(matches!(
        error,
        MarketplaceError::NotEligible(Ineligibility::ShiftNotOpen {
            status: ShiftStatus::PendingApproval,
            ..
        })
    ));
}

#[test]
fn suspended_worker_cannot_apply() {
    let standings = Arc::new(InMemoryStandingRepository::new());
    let mut standing = WorkerStanding::new(worker("w-a"));
    standing.strikes = 3;
    standing.suspended_until = Some(now() + Duration::days(7));
    standings.upsert(standing).expect("seeded");

    let mut collaborators = Collaborators::in_memory(
        Arc::new(InMemoryWorkerDirectory::with_profiles(vec![nearby("w-a")])),
        Arc::new(RecordingNotifier::default()),
        Arc::new(ScriptedProvider::default()),
        Arc::new(RecordingSuspensionSink::default()),
    );
    collaborators.standings = standings;
    let service =
        MarketplaceService::new(collaborators, MarketplaceSettings::default()).expect("service");

    let shift = service.post_shift(posting(), now()).expect("posted");
    service.approve_shift(&shift.id, &admin(), now()).expect("approved");

    let error = service
        .apply(&shift.id, &worker("w-a"), now())
        .expect_err("suspended");
    assert!(matches!(
        error,
        MarketplaceError::NotEligible(Ineligibility::WorkerSuspended(_))
    ));
    assert!(service.rank_candidates(&shift.id, now()).expect("ranked").is_empty());
}

#[test]
fn expired_invitation_is_closed_and_the_shift_stays_open() {
    let harness = build_service(vec![nearby("w-a")]);
    let shift = open_shift(&harness);
    let service = &harness.service;

    let invitation = service
        .invite_top_candidates(&shift.id, 1, &business(), now())
        .expect("invites")
        .remove(0);
    assert_eq!(invitation.expires_at, now() + Duration::minutes(60));

    let late = now() + Duration::hours(2);
    let error = service
        .accept_invitation(&shift.id, &invitation.id, &worker("w-a"), late)
        .expect_err("invitation expired");
    assert!(matches!(
        error,
        MarketplaceError::NotEligible(Ineligibility::InvitationExpired { .. })
    ));

    let record = service.shift(&shift.id).expect("record");
    assert_eq!(record.invitations[0].status, InvitationStatus::Expired);
    assert_eq!(record.shift.status, ShiftStatus::Open);
    assert!(record.assignments.is_empty());
}

#[test]
fn declined_invitation_cannot_be_accepted_afterwards() {
    let harness = build_service(vec![nearby("w-a")]);
    let shift = open_shift(&harness);
    let service = &harness.service;

    let invitation = service
        .invite_top_candidates(&shift.id, 1, &business(), now())
        .expect("invites")
        .remove(0);
    service
        .decline_invitation(&shift.id, &invitation.id, &worker("w-a"), now())
        .expect("declines");

    let error = service
        .accept_invitation(&shift.id, &invitation.id, &worker("w-a"), now())
        .expect_err("already declined");
    assert!(matches!(
        error,
        MarketplaceError::NotEligible(Ineligibility::ClaimNotPending(_))
    ));
}

#[test]
fn late_invitation_acceptance_loses_to_the_filled_shift() {
    let harness = build_service(vec![nearby("w-a"), nearby("w-b")]);
    let shift = open_shift(&harness);
    let service = &harness.service;

    let application = service.apply(&shift.id, &worker("w-a"), now()).expect("applies");
    let invitation = service
        .invite_top_candidates(&shift.id, 5, &business(), now())
        .expect("invites")
        .remove(0);
    service
        .approve_application(&shift.id, &application.id, &business(), now())
        .expect("application wins");

    let error = service
        .accept_invitation(&shift.id, &invitation.id, &worker("w-b"), now())
        .expect_err("shift already filled");
    assert!(is_already_filled(&error));

    let record = service.shift(&shift.id).expect("record");
    assert_eq!(record.invitations[0].status, InvitationStatus::Declined);
    assert_eq!(record.assignments.len(), 1);
}

#[test]
fn second_broadcast_is_a_conflict() {
    let harness = build_service(vec![nearby("w-a")]);
    let shift = open_shift(&harness);

    harness
        .service
        .broadcast(&shift.id, &business(), now())
        .expect("first broadcast");
    let error = harness
        .service
        .broadcast(&shift.id, &business(), now())
        .expect_err("second broadcast");

    assert!(matches!(
        error,
        MarketplaceError::Conflict(ConflictKind::BroadcastExists(_))
    ));
}

#[test]
fn hard_filtered_applicant_cannot_be_approved() {
    let harness = build_service(vec![far_away("w-far")]);
    let shift = open_shift(&harness);
    let service = &harness.service;

    let application = service
        .apply(&shift.id, &worker("w-far"), now())
        .expect("applying is unfiltered");
    let error = service
        .approve_application(&shift.id, &application.id, &business(), now())
        .expect_err("outside radius");

    assert!(matches!(
        error,
        MarketplaceError::NotEligible(Ineligibility::HardFiltered { .. })
    ));
    let record = service.shift(&shift.id).expect("record");
    assert_eq!(record.shift.status, ShiftStatus::Open);
    assert_eq!(record.applications[0].status, ApplicationStatus::Pending);
}

#[test]
fn only_the_owner_may_approve_applications() {
    let harness = build_service(vec![nearby("w-a")]);
    let shift = open_shift(&harness);
    let service = &harness.service;

    let application = service.apply(&shift.id, &worker("w-a"), now()).expect("applies");
    let error = service
        .approve_application(
            &shift.id,
            &application.id,
            &crate::workflows::staffing::Actor::Business("biz-other".into()),
            now(),
        )
        .expect_err("not the owner");

    assert!(matches!(
        error,
        MarketplaceError::NotEligible(Ineligibility::NotShiftOwner(_))
    ));
}

#[test]
fn flagged_shift_rejects_workers_but_admin_override_assigns() {
    let harness = build_service(vec![nearby("w-a"), far_away("w-far")]);
    let shift = open_shift(&harness);
    let service = &harness.service;

    service
        .flag_shift(&shift.id, "suspicious pay rate", &admin(), now())
        .expect("flagged");

    let error = service
        .apply(&shift.id, &worker("w-a"), now())
        .expect_err("flagged shift");
    assert!(matches!(
        error,
        MarketplaceError::NotEligible(Ineligibility::ShiftFlagged(_))
    ));

    let report = service
        .override_assign(&shift.id, &worker("w-far"), &admin(), now())
        .expect("override ignores targeting");
    assert!(report.win.assignment.privileged);
    assert_eq!(report.win.assignment.match_score, None);
    assert_eq!(report.win.shift.status, ShiftStatus::Filled);

    let error = service
        .override_assign(&shift.id, &worker("w-a"), &business(), now())
        .expect_err("business cannot override");
    assert!(matches!(error, MarketplaceError::Validation(_)));
}
