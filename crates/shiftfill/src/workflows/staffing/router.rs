use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::error;

use super::domain::{
    Actor, ApplicationId, AssignmentId, InvitationId, PaymentId, ShiftId, ShiftPosting, WorkerId,
};
use super::error::MarketplaceError;
use super::escrow::DisputeOutcome;
use super::lifecycle::CompletionSignal;
use super::service::MarketplaceService;

/// Router builder exposing the staffing engine over HTTP.
pub fn staffing_router(service: Arc<MarketplaceService>) -> Router {
    Router::new()
        .route("/api/v1/staffing/shifts", post(post_shift_handler))
        .route("/api/v1/staffing/shifts/approve", post(bulk_approve_handler))
        .route("/api/v1/staffing/shifts/:shift_id", get(shift_handler))
        .route(
            "/api/v1/staffing/shifts/:shift_id/approve",
            post(approve_shift_handler),
        )
        .route(
            "/api/v1/staffing/shifts/:shift_id/candidates",
            get(candidates_handler),
        )
        .route(
            "/api/v1/staffing/shifts/:shift_id/applications",
            post(apply_handler),
        )
        .route(
            "/api/v1/staffing/shifts/:shift_id/applications/:application_id/withdraw",
            post(withdraw_handler),
        )
        .route(
            "/api/v1/staffing/shifts/:shift_id/applications/:application_id/approve",
            post(approve_application_handler),
        )
        .route(
            "/api/v1/staffing/shifts/:shift_id/invitations",
            post(invite_handler),
        )
        .route(
            "/api/v1/staffing/shifts/:shift_id/invitations/:invitation_id/accept",
            post(accept_invitation_handler),
        )
        .route(
            "/api/v1/staffing/shifts/:shift_id/invitations/:invitation_id/decline",
            post(decline_invitation_handler),
        )
        .route(
            "/api/v1/staffing/shifts/:shift_id/broadcast",
            post(broadcast_handler),
        )
        .route(
            "/api/v1/staffing/shifts/:shift_id/broadcast/responses",
            post(broadcast_response_handler),
        )
        .route(
            "/api/v1/staffing/shifts/:shift_id/cancel",
            post(cancel_shift_handler),
        )
        .route(
            "/api/v1/staffing/assignments/:assignment_id/check-in",
            post(check_in_handler),
        )
        .route(
            "/api/v1/staffing/assignments/:assignment_id/complete",
            post(complete_handler),
        )
        .route(
            "/api/v1/staffing/assignments/:assignment_id/rating",
            post(rating_handler),
        )
        .route(
            "/api/v1/staffing/assignments/:assignment_id/payment",
            get(assignment_payment_handler),
        )
        .route("/api/v1/staffing/payments/:payment_id", get(payment_handler))
        .route(
            "/api/v1/staffing/payments/:payment_id/release",
            post(release_handler),
        )
        .route(
            "/api/v1/staffing/payments/:payment_id/dispute",
            post(dispute_handler),
        )
        .route(
            "/api/v1/staffing/payments/:payment_id/resolve",
            post(resolve_handler),
        )
        .route(
            "/api/v1/staffing/payments/:payment_id/retry",
            post(retry_handler),
        )
        .route(
            "/api/v1/staffing/workers/:worker_id/standing",
            get(standing_handler),
        )
        .route(
            "/api/v1/staffing/admin/shifts/:shift_id/flag",
            post(flag_handler),
        )
        .route(
            "/api/v1/staffing/admin/shifts/:shift_id/unflag",
            post(unflag_handler),
        )
        .route(
            "/api/v1/staffing/admin/shifts/:shift_id/remove",
            post(remove_handler),
        )
        .route(
            "/api/v1/staffing/admin/shifts/:shift_id/assign",
            post(override_assign_handler),
        )
        .route(
            "/api/v1/staffing/admin/assignments/:assignment_id/cancel",
            post(admin_cancel_handler),
        )
        .route(
            "/api/v1/staffing/admin/assignments/:assignment_id/no-show",
            post(no_show_handler),
        )
        .route(
            "/api/v1/staffing/admin/payments/:payment_id/refund",
            post(manual_refund_handler),
        )
        .route(
            "/api/v1/staffing/admin/workers/:worker_id/lift-suspension",
            post(lift_suspension_handler),
        )
        .route("/api/v1/staffing/admin/sweep", post(sweep_handler))
        .with_state(service)
}

type Service = State<Arc<MarketplaceService>>;
type Json<T> = axum::Json<T>;

#[derive(Debug, Deserialize)]
pub(crate) struct ActorBody {
    pub(crate) actor: Actor,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WorkerBody {
    pub(crate) worker_id: WorkerId,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ReasonBody {
    pub(crate) actor: Actor,
    #[serde(default)]
    pub(crate) reason: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct BulkApproveBody {
    pub(crate) actor: Actor,
    pub(crate) shift_ids: Vec<ShiftId>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct InviteBody {
    pub(crate) actor: Actor,
    #[serde(default = "default_invitation_limit")]
    pub(crate) limit: usize,
}

fn default_invitation_limit() -> usize {
    5
}

#[derive(Debug, Deserialize)]
pub(crate) struct CompleteBody {
    pub(crate) actor: Actor,
    #[serde(default = "default_signal")]
    pub(crate) signal: CompletionSignal,
}

fn default_signal() -> CompletionSignal {
    CompletionSignal::Scheduled
}

#[derive(Debug, Deserialize)]
pub(crate) struct RatingBody {
    pub(crate) actor: Actor,
    pub(crate) stars: u8,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResolveBody {
    pub(crate) actor: Actor,
    pub(crate) outcome: DisputeOutcome,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AssignBody {
    pub(crate) actor: Actor,
    pub(crate) worker_id: WorkerId,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RefundBody {
    pub(crate) actor: Actor,
    pub(crate) amount_cents: u64,
    #[serde(default)]
    pub(crate) reason: String,
}

fn respond<T: Serialize>(status: StatusCode, result: Result<T, MarketplaceError>) -> Response {
    match result {
        Ok(value) => (status, axum::Json(value)).into_response(),
        Err(error) => error.into_response(),
    }
}

pub(crate) async fn post_shift_handler(
    State(service): Service,
    axum::Json(posting): Json<ShiftPosting>,
) -> Response {
    respond(StatusCode::CREATED, service.post_shift(posting, Utc::now()))
}

pub(crate) async fn bulk_approve_handler(
    State(service): Service,
    axum::Json(body): Json<BulkApproveBody>,
) -> Response {
    let report = service.bulk_approve(&body.shift_ids, &body.actor, Utc::now());
    (StatusCode::OK, axum::Json(report)).into_response()
}

pub(crate) async fn shift_handler(State(service): Service, Path(shift_id): Path<String>) -> Response {
    respond(StatusCode::OK, service.shift(&ShiftId(shift_id)))
}

pub(crate) async fn approve_shift_handler(
    State(service): Service,
    Path(shift_id): Path<String>,
    axum::Json(body): Json<ActorBody>,
) -> Response {
    respond(
        StatusCode::OK,
        service.approve_shift(&ShiftId(shift_id), &body.actor, Utc::now()),
    )
}

pub(crate) async fn candidates_handler(
    State(service): Service,
    Path(shift_id): Path<String>,
) -> Response {
    respond(
        StatusCode::OK,
        service.rank_candidates(&ShiftId(shift_id), Utc::now()),
    )
}

pub(crate) async fn apply_handler(
    State(service): Service,
    Path(shift_id): Path<String>,
    axum::Json(body): Json<WorkerBody>,
) -> Response {
    respond(
        StatusCode::CREATED,
        service.apply(&ShiftId(shift_id), &body.worker_id, Utc::now()),
    )
}

pub(crate) async fn withdraw_handler(
    State(service): Service,
    Path((shift_id, application_id)): Path<(String, String)>,
    axum::Json(body): Json<WorkerBody>,
) -> Response {
    respond(
        StatusCode::OK,
        service.withdraw_application(
            &ShiftId(shift_id),
            &ApplicationId(application_id),
            &body.worker_id,
            Utc::now(),
        ),
    )
}

pub(crate) async fn approve_application_handler(
    State(service): Service,
    Path((shift_id, application_id)): Path<(String, String)>,
    axum::Json(body): Json<ActorBody>,
) -> Response {
    respond(
        StatusCode::OK,
        service.approve_application(
            &ShiftId(shift_id),
            &ApplicationId(application_id),
            &body.actor,
            Utc::now(),
        ),
    )
}

pub(crate) async fn invite_handler(
    State(service): Service,
    Path(shift_id): Path<String>,
    axum::Json(body): Json<InviteBody>,
) -> Response {
    respond(
        StatusCode::CREATED,
        service.invite_top_candidates(&ShiftId(shift_id), body.limit, &body.actor, Utc::now()),
    )
}

pub(crate) async fn accept_invitation_handler(
    State(service): Service,
    Path((shift_id, invitation_id)): Path<(String, String)>,
    axum::Json(body): Json<WorkerBody>,
) -> Response {
    respond(
        StatusCode::OK,
        service.accept_invitation(
            &ShiftId(shift_id),
            &InvitationId(invitation_id),
            &body.worker_id,
            Utc::now(),
        ),
    )
}

pub(crate) async fn decline_invitation_handler(
    State(service): Service,
    Path((shift_id, invitation_id)): Path<(String, String)>,
    axum::Json(body): Json<WorkerBody>,
) -> Response {
    respond(
        StatusCode::OK,
        service.decline_invitation(
            &ShiftId(shift_id),
            &InvitationId(invitation_id),
            &body.worker_id,
            Utc::now(),
        ),
    )
}

pub(crate) async fn broadcast_handler(
    State(service): Service,
    Path(shift_id): Path<String>,
    axum::Json(body): Json<ActorBody>,
) -> Response {
    respond(
        StatusCode::CREATED,
        service.broadcast(&ShiftId(shift_id), &body.actor, Utc::now()),
    )
}

pub(crate) async fn broadcast_response_handler(
    State(service): Service,
    Path(shift_id): Path<String>,
    axum::Json(body): Json<WorkerBody>,
) -> Response {
    respond(
        StatusCode::OK,
        service.respond_to_broadcast(&ShiftId(shift_id), &body.worker_id, Utc::now()),
    )
}

pub(crate) async fn cancel_shift_handler(
    State(service): Service,
    Path(shift_id): Path<String>,
    axum::Json(body): Json<ReasonBody>,
) -> Response {
    respond(
        StatusCode::OK,
        service.cancel_shift(&ShiftId(shift_id), &body.actor, &body.reason, Utc::now()),
    )
}

pub(crate) async fn check_in_handler(
    State(service): Service,
    Path(assignment_id): Path<String>,
    axum::Json(body): Json<WorkerBody>,
) -> Response {
    respond(
        StatusCode::OK,
        service.check_in(&AssignmentId(assignment_id), &body.worker_id, Utc::now()),
    )
}

pub(crate) async fn complete_handler(
    State(service): Service,
    Path(assignment_id): Path<String>,
    axum::Json(body): Json<CompleteBody>,
) -> Response {
    respond(
        StatusCode::OK,
        service.complete(
            &AssignmentId(assignment_id),
            body.signal,
            &body.actor,
            Utc::now(),
        ),
    )
}

pub(crate) async fn rating_handler(
    State(service): Service,
    Path(assignment_id): Path<String>,
    axum::Json(body): Json<RatingBody>,
) -> Response {
    respond(
        StatusCode::OK,
        service.record_rating(&AssignmentId(assignment_id), body.stars, &body.actor, Utc::now()),
    )
}

pub(crate) async fn assignment_payment_handler(
    State(service): Service,
    Path(assignment_id): Path<String>,
) -> Response {
    respond(
        StatusCode::OK,
        service.payment_for_assignment(&AssignmentId(assignment_id)),
    )
}

pub(crate) async fn payment_handler(
    State(service): Service,
    Path(payment_id): Path<String>,
) -> Response {
    respond(StatusCode::OK, service.payment(&PaymentId(payment_id)))
}

pub(crate) async fn release_handler(
    State(service): Service,
    Path(payment_id): Path<String>,
    axum::Json(body): Json<ActorBody>,
) -> Response {
    respond(
        StatusCode::OK,
        service.release_payment(&PaymentId(payment_id), &body.actor, Utc::now()),
    )
}

pub(crate) async fn dispute_handler(
    State(service): Service,
    Path(payment_id): Path<String>,
    axum::Json(body): Json<ReasonBody>,
) -> Response {
    respond(
        StatusCode::OK,
        service.dispute_payment(&PaymentId(payment_id), &body.reason, &body.actor, Utc::now()),
    )
}

pub(crate) async fn resolve_handler(
    State(service): Service,
    Path(payment_id): Path<String>,
    axum::Json(body): Json<ResolveBody>,
) -> Response {
    respond(
        StatusCode::OK,
        service.resolve_dispute(&PaymentId(payment_id), body.outcome, &body.actor, Utc::now()),
    )
}

pub(crate) async fn retry_handler(
    State(service): Service,
    Path(payment_id): Path<String>,
    axum::Json(body): Json<ActorBody>,
) -> Response {
    respond(
        StatusCode::OK,
        service.retry_payment(&PaymentId(payment_id), &body.actor, Utc::now()),
    )
}

pub(crate) async fn standing_handler(
    State(service): Service,
    Path(worker_id): Path<String>,
) -> Response {
    respond(StatusCode::OK, service.worker_standing(&WorkerId(worker_id)))
}

pub(crate) async fn flag_handler(
    State(service): Service,
    Path(shift_id): Path<String>,
    axum::Json(body): Json<ReasonBody>,
) -> Response {
    respond(
        StatusCode::OK,
        service.flag_shift(&ShiftId(shift_id), &body.reason, &body.actor, Utc::now()),
    )
}

pub(crate) async fn unflag_handler(
    State(service): Service,
    Path(shift_id): Path<String>,
    axum::Json(body): Json<ActorBody>,
) -> Response {
    respond(
        StatusCode::OK,
        service.unflag_shift(&ShiftId(shift_id), &body.actor, Utc::now()),
    )
}

pub(crate) async fn remove_handler(
    State(service): Service,
    Path(shift_id): Path<String>,
    axum::Json(body): Json<ReasonBody>,
) -> Response {
    respond(
        StatusCode::OK,
        service.remove_shift(&ShiftId(shift_id), &body.reason, &body.actor, Utc::now()),
    )
}

pub(crate) async fn override_assign_handler(
    State(service): Service,
    Path(shift_id): Path<String>,
    axum::Json(body): Json<AssignBody>,
) -> Response {
    respond(
        StatusCode::OK,
        service.override_assign(&ShiftId(shift_id), &body.worker_id, &body.actor, Utc::now()),
    )
}

pub(crate) async fn admin_cancel_handler(
    State(service): Service,
    Path(assignment_id): Path<String>,
    axum::Json(body): Json<ReasonBody>,
) -> Response {
    respond(
        StatusCode::OK,
        service.admin_cancel_assignment(
            &AssignmentId(assignment_id),
            &body.reason,
            &body.actor,
            Utc::now(),
        ),
    )
}

pub(crate) async fn no_show_handler(
    State(service): Service,
    Path(assignment_id): Path<String>,
    axum::Json(body): Json<ActorBody>,
) -> Response {
    if !body.actor.is_privileged() {
        return MarketplaceError::validation("only admins may record no-shows manually")
            .into_response();
    }
    respond(
        StatusCode::OK,
        service.mark_no_show(&AssignmentId(assignment_id), Utc::now()),
    )
}

pub(crate) async fn manual_refund_handler(
    State(service): Service,
    Path(payment_id): Path<String>,
    axum::Json(body): Json<RefundBody>,
) -> Response {
    respond(
        StatusCode::OK,
        service.manual_refund(
            &PaymentId(payment_id),
            body.amount_cents,
            &body.reason,
            &body.actor,
            Utc::now(),
        ),
    )
}

pub(crate) async fn lift_suspension_handler(
    State(service): Service,
    Path(worker_id): Path<String>,
    axum::Json(body): Json<ActorBody>,
) -> Response {
    respond(
        StatusCode::OK,
        service.lift_suspension(&WorkerId(worker_id), &body.actor),
    )
}

pub(crate) async fn sweep_handler(State(service): Service) -> Response {
    respond(StatusCode::OK, service.sweep(Utc::now()))
}

impl MarketplaceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            MarketplaceError::Validation(_) => StatusCode::BAD_REQUEST,
            MarketplaceError::NotEligible(_) => StatusCode::UNPROCESSABLE_ENTITY,
            MarketplaceError::NotFound(_) => StatusCode::NOT_FOUND,
            MarketplaceError::Conflict(_) => StatusCode::CONFLICT,
            MarketplaceError::TransientContention { .. } => StatusCode::SERVICE_UNAVAILABLE,
            MarketplaceError::PaymentProvider { .. } => StatusCode::BAD_GATEWAY,
            MarketplaceError::InvariantViolation(_) | MarketplaceError::Repository(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            MarketplaceError::Validation(_) => "validation",
            MarketplaceError::NotEligible(_) => "not_eligible",
            MarketplaceError::NotFound(_) => "not_found",
            MarketplaceError::Conflict(_) => "conflict",
            MarketplaceError::TransientContention { .. } => "transient_contention",
            MarketplaceError::PaymentProvider { .. } => "payment_provider",
            MarketplaceError::InvariantViolation(_) => "invariant_violation",
            MarketplaceError::Repository(_) => "repository",
        }
    }
}

impl IntoResponse for MarketplaceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(kind = self.kind(), error = %self, "staffing request failed");
        }
        let mut payload = json!({
            "error": self.to_string(),
            "kind": self.kind(),
            "retryable": self.is_retryable(),
        });
        match &self {
            MarketplaceError::TransientContention { shift_id, .. } => {
                payload["shift_id"] = json!(shift_id);
            }
            MarketplaceError::PaymentProvider { payment_id, .. } => {
                payload["payment_id"] = json!(payment_id);
            }
            _ => {}
        }
        (status, axum::Json(payload)).into_response()
    }
}
