//! End-to-end scenarios for the shift fill workflow.
//!
//! Everything runs through the public `MarketplaceService` facade with in-memory storage and
//! recording doubles for notifications, payments and suspensions.

mod common {
    use std::collections::BTreeSet;
    use std::sync::{Arc, Mutex};

    use chrono::{DateTime, Duration, TimeZone, Utc};

    use shiftfill::workflows::staffing::{
        Actor, AgencyTier, AvailabilityWindow, BusinessId, Collaborators, GeoPoint,
        InMemoryWorkerDirectory, MarketplaceService, MarketplaceSettings, Notification,
        NotificationEvent, Notifier, NotifyError, PaymentProvider, ProviderError,
        ProviderReceipt, ProviderRequest, Recipient, Shift, ShiftPosting, SuspensionError,
        SuspensionSignal, SuspensionSink, Urgency, WorkerId, WorkerProfile,
    };

    pub fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 15, 8, 0, 0).unwrap()
    }

    pub fn starts_at() -> DateTime<Utc> {
        now() + Duration::hours(30)
    }

    pub fn ends_at() -> DateTime<Utc> {
        starts_at() + Duration::hours(6)
    }

    pub fn admin() -> Actor {
        Actor::Admin("trust-and-safety".to_string())
    }

    pub fn business() -> Actor {
        Actor::Business(BusinessId::from("biz-harbor"))
    }

    pub fn worker(id: &str) -> WorkerId {
        WorkerId::from(id)
    }

    pub fn posting() -> ShiftPosting {
        ShiftPosting {
            business_id: BusinessId::from("biz-harbor"),
            title: "Event server".to_string(),
            industry: "hospitality".to_string(),
            required_skills: ["banquet", "pos"].iter().map(|s| s.to_string()).collect(),
            required_certifications: ["food-handler"].iter().map(|s| s.to_string()).collect(),
            location: GeoPoint::new(47.6062, -122.3321),
            radius_km: 20.0,
            starts_at: starts_at(),
            ends_at: ends_at(),
            urgency: Urgency::Normal,
            gross_amount_cents: 18_000,
        }
    }

    pub fn profile(id: &str, latitude: f64, longitude: f64) -> WorkerProfile {
        WorkerProfile {
            worker_id: worker(id),
            display_name: id.to_uppercase(),
            skills: ["banquet", "pos"].iter().map(|s| s.to_string()).collect(),
            certifications: ["food-handler"].iter().map(|s| s.to_string()).collect(),
            location: GeoPoint::new(latitude, longitude),
            availability: vec![AvailabilityWindow {
                starts_at: starts_at() - Duration::hours(1),
                ends_at: ends_at() + Duration::hours(1),
            }],
            tier: AgencyTier::Preferred,
            urgent_acceptance_rate: Some(0.9),
            joined_at: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
        }
    }

    pub fn close_by(id: &str) -> WorkerProfile {
        profile(id, 47.6205, -122.3493)
    }

    pub fn uncertified(id: &str) -> WorkerProfile {
        WorkerProfile {
            certifications: BTreeSet::new(),
            ..close_by(id)
        }
    }

    #[derive(Default)]
    pub struct Outbox(pub Mutex<Vec<Notification>>);

    impl Outbox {
        pub fn received(&self, recipient: &Recipient, event: NotificationEvent) -> bool {
            self.0
                .lock()
                .unwrap()
                .iter()
                .any(|n| &n.recipient == recipient && n.event == event)
        }
    }

    impl Notifier for Outbox {
        fn notify(&self, notification: Notification) -> Result<(), NotifyError> {
            self.0.lock().unwrap().push(notification);
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct Gateway {
        pub requests: Mutex<Vec<(String, ProviderRequest)>>,
    }

    impl Gateway {
        pub fn count(&self, operation: &str) -> usize {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .filter(|(kind, _)| kind == operation)
                .count()
        }

        fn accept(&self, operation: &str, request: &ProviderRequest) -> ProviderReceipt {
            self.requests
                .lock()
                .unwrap()
                .push((operation.to_string(), request.clone()));
            ProviderReceipt {
                reference: format!("gw-{}", request.idempotency_key),
            }
        }
    }

    impl PaymentProvider for Gateway {
        fn charge_or_hold(&self, request: &ProviderRequest) -> Result<ProviderReceipt, ProviderError> {
            Ok(self.accept("hold", request))
        }

        fn release_funds(&self, request: &ProviderRequest) -> Result<ProviderReceipt, ProviderError> {
            Ok(self.accept("release", request))
        }

        fn refund_funds(&self, request: &ProviderRequest) -> Result<ProviderReceipt, ProviderError> {
            Ok(self.accept("refund", request))
        }
    }

    #[derive(Default)]
    pub struct Appeals(pub Mutex<Vec<SuspensionSignal>>);

    impl SuspensionSink for Appeals {
        fn strike_threshold_exceeded(&self, signal: SuspensionSignal) -> Result<(), SuspensionError> {
            self.0.lock().unwrap().push(signal);
            Ok(())
        }
    }

    pub struct World {
        pub service: Arc<MarketplaceService>,
        pub outbox: Arc<Outbox>,
        pub gateway: Arc<Gateway>,
        pub appeals: Arc<Appeals>,
    }

    pub fn world(profiles: Vec<WorkerProfile>) -> World {
        let outbox = Arc::new(Outbox::default());
        let gateway = Arc::new(Gateway::default());
        let appeals = Arc::new(Appeals::default());
        let collaborators = Collaborators::in_memory(
            Arc::new(InMemoryWorkerDirectory::with_profiles(profiles)),
            outbox.clone(),
            gateway.clone(),
            appeals.clone(),
        );
        let service = MarketplaceService::new(collaborators, MarketplaceSettings::default())
            .expect("default settings are valid");
        World {
            service: Arc::new(service),
            outbox,
            gateway,
            appeals,
        }
    }

    pub fn open_shift(world: &World) -> Shift {
        let shift = world.service.post_shift(posting(), now()).expect("posted");
        world
            .service
            .approve_shift(&shift.id, &admin(), now())
            .expect("approved")
    }
}

use std::sync::Barrier;
use std::thread;

use chrono::Duration;
use common::*;
use shiftfill::workflows::staffing::{
    Actor, ApplicationSource, ApplicationStatus, AssignmentStatus, CompletionSignal,
    ConflictKind, DisputeOutcome, Ineligibility, InvitationStatus, MarketplaceError,
    NotificationEvent, PaymentStatus, Recipient, ShiftStatus,
};

#[test]
fn happy_path_from_posting_to_payout() {
    let world = world(vec![close_by("w-ana"), uncertified("w-ben")]);
    let service = &world.service;
    let shift = open_shift(&world);

    let ranked = service.rank_candidates(&shift.id, now()).expect("ranked");
    assert_eq!(ranked.len(), 1);
    assert_eq!(ranked[0].worker_id, worker("w-ana"));

    let ana = service.apply(&shift.id, &worker("w-ana"), now()).expect("ana applies");
    let ben = service.apply(&shift.id, &worker("w-ben"), now()).expect("ben applies");

    let report = service
        .approve_application(&shift.id, &ana.id, &business(), now())
        .expect("ana wins");
    let assignment = report.win.assignment.clone();
    assert_eq!(report.win.close_out.rejected_applications[0].0, ben.id);
    assert!(world
        .outbox
        .received(&Recipient::Worker(worker("w-ben")), NotificationEvent::ClaimRejected));

    service
        .check_in(&assignment.id, &worker("w-ana"), starts_at() - Duration::minutes(5))
        .expect("checks in");
    let completion = service
        .complete(&assignment.id, CompletionSignal::Scheduled, &business(), ends_at())
        .expect("completes");
    assert_eq!(completion.assignment.status, AssignmentStatus::Completed);
    let update = completion.standing.as_ref().expect("standing applied");
    assert_eq!(update.standing.completed_shifts, 1);

    let standing = service
        .record_rating(&assignment.id, 5, &business(), ends_at())
        .expect("rated");
    assert_eq!(standing.average_rating, Some(5.0));

    let payment_id = completion.payment.as_ref().expect("payment").id.clone();
    assert!(matches!(
        service.release_payment(&payment_id, &business(), ends_at()),
        Err(MarketplaceError::Validation(_))
    ));
    assert!(matches!(
        service.release_payment(&payment_id, &Actor::System, ends_at() + Duration::hours(1)),
        Err(MarketplaceError::NotEligible(Ineligibility::ReleaseNotDue { .. }))
    ));

    let sweep = service
        .sweep(ends_at() + Duration::hours(24))
        .expect("sweep");
    assert_eq!(sweep.payments_released, 1);

    let payment = service.payment_for_assignment(&assignment.id).expect("payment");
    assert_eq!(payment.status, PaymentStatus::Released);
    assert_eq!(payment.released_cents, 18_000);
    assert_eq!(world.gateway.count("hold"), 1);
    assert_eq!(world.gateway.count("release"), 1);
    assert!(world
        .outbox
        .received(&Recipient::Worker(worker("w-ana")), NotificationEvent::PaymentReleased));

    let record = service.shift(&shift.id).expect("record");
    assert_eq!(record.shift.status, ShiftStatus::Completed);
    assert!(record.audit.iter().any(|entry| entry.action == "assignment_created"));
}

#[test]
fn invitation_and_broadcast_response_race() {
    let world = world(vec![close_by("w-ana"), close_by("w-cal")]);
    let service = world.service.clone();
    let shift = open_shift(&world);

    let invitation = service
        .invite_top_candidates(&shift.id, 1, &business(), now())
        .expect("invites")
        .remove(0);
    let invited = invitation.worker_id.clone();
    let responder = if invited == worker("w-ana") {
        worker("w-cal")
    } else {
        worker("w-ana")
    };
    service.broadcast(&shift.id, &business(), now()).expect("broadcast");

    let barrier = Barrier::new(2);
    let (accepted, responded) = thread::scope(|scope| {
        let accept = scope.spawn(|| {
            barrier.wait();
            service.accept_invitation(&shift.id, &invitation.id, &invited, now())
        });
        let respond = scope.spawn(|| {
            barrier.wait();
            service.respond_to_broadcast(&shift.id, &responder, now())
        });
        (accept.join().unwrap(), respond.join().unwrap())
    });

    assert_ne!(accepted.is_ok(), responded.is_ok(), "exactly one claim wins");
    let loser = accepted.as_ref().err().or(responded.as_ref().err()).unwrap();
    assert!(matches!(
        loser,
        MarketplaceError::Conflict(ConflictKind::ShiftAlreadyFilled(_))
    ));

    let record = service.shift(&shift.id).expect("record");
    assert_eq!(record.assignments.len(), 1);
    assert!(record.broadcast.as_ref().map(|b| b.closed).unwrap_or(false));
    let invitation_status = record.invitations[0].status;
    let response = record
        .applications
        .iter()
        .find(|application| application.worker_id == responder)
        .expect("broadcast response recorded");
    assert_eq!(response.source, ApplicationSource::BroadcastResponse);
    assert_eq!(record.broadcast.as_ref().map(|b| b.response_count), Some(1));
    if accepted.is_ok() {
        assert_eq!(invitation_status, InvitationStatus::Accepted);
        assert_eq!(response.status, ApplicationStatus::Rejected);
    } else {
        assert_eq!(invitation_status, InvitationStatus::Declined);
        assert_eq!(response.status, ApplicationStatus::Approved);
    }
}

#[test]
fn many_concurrent_claims_yield_at_most_one_assignment() {
    let ids: Vec<String> = (0..12).map(|n| format!("w-{n:02}")).collect();
    let world = world(ids.iter().map(|id| close_by(id)).collect());
    let service = world.service.clone();
    let shift = open_shift(&world);

    // ranking ties break on worker id, so the first four are invited and the rest split
    let invitations = service
        .invite_top_candidates(&shift.id, 4, &business(), now())
        .expect("invites");
    assert_eq!(invitations.len(), 4);
    let mut applications = Vec::new();
    for id in &ids[4..8] {
        applications.push(service.apply(&shift.id, &worker(id), now()).expect("applies"));
    }
    service.broadcast(&shift.id, &business(), now()).expect("broadcast");
    let responders: Vec<_> = ids[8..].iter().map(|id| worker(id)).collect();

    let total = applications.len() + invitations.len() + responders.len();
    let barrier = Barrier::new(total);
    let outcomes: Vec<Result<(), MarketplaceError>> = thread::scope(|scope| {
        let mut handles = Vec::new();
        for application in &applications {
            let (service, barrier, shift_id) = (&service, &barrier, &shift.id);
            handles.push(scope.spawn(move || {
                barrier.wait();
                service
                    .approve_application(shift_id, &application.id, &business(), now())
                    .map(|_| ())
            }));
        }
        for invitation in &invitations {
            let (service, barrier, shift_id) = (&service, &barrier, &shift.id);
            handles.push(scope.spawn(move || {
                barrier.wait();
                service
                    .accept_invitation(shift_id, &invitation.id, &invitation.worker_id, now())
                    .map(|_| ())
            }));
        }
        for responder in &responders {
            let (service, barrier, shift_id) = (&service, &barrier, &shift.id);
            handles.push(scope.spawn(move || {
                barrier.wait();
                service
                    .respond_to_broadcast(shift_id, responder, now())
                    .map(|_| ())
            }));
        }
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(outcomes.iter().filter(|o| o.is_ok()).count(), 1);
    for error in outcomes.iter().filter_map(|o| o.as_ref().err()) {
        assert!(
            matches!(
                error,
                MarketplaceError::Conflict(ConflictKind::ShiftAlreadyFilled(_))
            ),
            "unexpected error {error:?}"
        );
    }

    let record = service.shift(&shift.id).expect("record");
    assert_eq!(record.assignments.len(), 1);
    assert!(record
        .applications
        .iter()
        .all(|a| a.status != ApplicationStatus::Pending));
    assert!(record
        .invitations
        .iter()
        .all(|i| i.status != InvitationStatus::Sent));
    assert_eq!(world.gateway.count("hold"), 1);
}

#[test]
fn disputed_payment_is_frozen_then_refunded_on_resolution() {
    let world = world(vec![close_by("w-ana")]);
    let service = &world.service;
    let shift = open_shift(&world);
    let application = service.apply(&shift.id, &worker("w-ana"), now()).expect("applies");
    let assignment = service
        .approve_application(&shift.id, &application.id, &business(), now())
        .expect("wins")
        .win
        .assignment;
    service
        .check_in(&assignment.id, &worker("w-ana"), starts_at())
        .expect("checks in");
    let payment = service
        .complete(&assignment.id, CompletionSignal::Scheduled, &business(), ends_at())
        .expect("completes")
        .payment
        .expect("payment");

    let disputed = service
        .dispute_payment(&payment.id, "worker left after two hours", &business(), ends_at())
        .expect("disputed");
    assert_eq!(disputed.status, PaymentStatus::Disputed);

    let sweep = service.sweep(ends_at() + Duration::days(2)).expect("sweep");
    assert_eq!(sweep.payments_released, 0);

    service
        .resolve_dispute(&payment.id, DisputeOutcome::Refund, &admin(), ends_at() + Duration::days(2))
        .expect("resolved");
    let refunded = service
        .manual_refund(&payment.id, 18_000, "dispute upheld", &admin(), ends_at() + Duration::days(2))
        .expect("refunded");

    assert_eq!(refunded.status, PaymentStatus::Refunded);
    assert_eq!(world.gateway.count("release"), 0);
    assert!(world.outbox.received(
        &Recipient::Business("biz-harbor".into()),
        NotificationEvent::PaymentRefunded
    ));
}

#[test]
fn repeated_no_shows_suspend_the_worker_and_remove_them_from_ranking() {
    let world = world(vec![close_by("w-ana"), close_by("w-dee")]);
    let service = &world.service;

    for _ in 0..3 {
        let shift = open_shift(&world);
        let application = service.apply(&shift.id, &worker("w-ana"), now()).expect("applies");
        let assignment = service
            .approve_application(&shift.id, &application.id, &business(), now())
            .expect("wins")
            .win
            .assignment;
        let report = service
            .sweep(starts_at() + Duration::minutes(16))
            .expect("sweep");
        assert_eq!(report.no_shows, 1);
        let record = service.shift(&shift.id).expect("record");
        assert_eq!(record.shift.status, ShiftStatus::Open);
        assert_eq!(
            record.assignment(&assignment.id).map(|a| a.status),
            Some(AssignmentStatus::NoShow)
        );
        service
            .cancel_shift(&shift.id, &business(), "filled elsewhere", now())
            .expect("cancelled");
    }

    let standing = service.worker_standing(&worker("w-ana")).expect("standing");
    assert_eq!(standing.strikes, 3);
    assert!(standing.suspended_until.is_some());
    assert_eq!(world.appeals.0.lock().unwrap().len(), 1);

    let shift = open_shift(&world);
    let ranked = service.rank_candidates(&shift.id, now()).expect("ranked");
    assert_eq!(
        ranked.iter().map(|c| c.worker_id.clone()).collect::<Vec<_>>(),
        vec![worker("w-dee")]
    );
    assert!(matches!(
        service.apply(&shift.id, &worker("w-ana"), now()),
        Err(MarketplaceError::NotEligible(_))
    ));
}
