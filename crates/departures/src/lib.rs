//! Departure (outbound) request workflow as a command/event aggregate.
//!
//! Pure state machine: PENDING → {APPROVED, REVISION}, REVISION → PENDING on
//! edit, APPROVED → DISPATCHED, and any non-terminal state → REJECTED.
//! Inventory effects are applied by the infra fulfillment service.

pub mod request;

pub use request::{
    ApproveRequest, DepartureCommand, DepartureEvent, DepartureLine, DepartureRequest,
    EditLines, LineDraft, LinesEdited, MarkDispatched, RejectRequest, RequestApproved,
    RequestDispatched, RequestRejected, RequestRevision, RequestSubmitted, Review,
    RevisionRequested, SubmitRequest, WorkflowStatus,
};
