use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockroom_core::{
    Aggregate, AggregateRoot, AllocationId, DepartureRequestId, DomainError, ProductId, UserId,
};
use stockroom_events::Event;
use stockroom_inventory::CellFilter;

/// Departure request workflow lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Pending,
    Revision,
    Approved,
    Rejected,
    Dispatched,
}

impl WorkflowStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkflowStatus::Rejected | WorkflowStatus::Dispatched)
    }
}

/// Requested line as submitted or edited. Weight in grams.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineDraft {
    pub product_id: ProductId,
    pub quantity: i64,
    pub weight: i64,
    #[serde(default)]
    pub cell_filter: Option<CellFilter>,
}

/// Numbered request line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepartureLine {
    pub line_no: u32,
    pub product_id: ProductId,
    pub quantity: i64,
    /// Upper bound on the weight leaving for this line.
    pub weight: i64,
    pub cell_filter: Option<CellFilter>,
}

/// Reviewer attribution for the latest approval, rejection or revision request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub reviewer: UserId,
    pub outcome: WorkflowStatus,
    pub note: Option<String>,
    pub reviewed_at: DateTime<Utc>,
}

/// Aggregate root: DepartureRequest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepartureRequest {
    id: DepartureRequestId,
    requester: Option<UserId>,
    status: WorkflowStatus,
    lines: Vec<DepartureLine>,
    review: Option<Review>,
    dispatched_by: Option<UserId>,
    dispatched_at: Option<DateTime<Utc>>,
    allocation_ids: Vec<AllocationId>,
    version: u64,
    created: bool,
}

impl DepartureRequest {
    /// Create an empty, not-yet-submitted aggregate instance for rehydration.
    pub fn empty(id: DepartureRequestId) -> Self {
        Self {
            id,
            requester: None,
            status: WorkflowStatus::Pending,
            lines: Vec::new(),
            review: None,
            dispatched_by: None,
            dispatched_at: None,
            allocation_ids: Vec::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> DepartureRequestId {
        self.id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn requester(&self) -> Option<UserId> {
        self.requester
    }

    pub fn status(&self) -> WorkflowStatus {
        self.status
    }

    pub fn lines(&self) -> &[DepartureLine] {
        &self.lines
    }

    pub fn review(&self) -> Option<&Review> {
        self.review.as_ref()
    }

    pub fn dispatched_by(&self) -> Option<UserId> {
        self.dispatched_by
    }

    pub fn dispatched_at(&self) -> Option<DateTime<Utc>> {
        self.dispatched_at
    }

    pub fn allocation_ids(&self) -> &[AllocationId] {
        &self.allocation_ids
    }

    pub fn is_editable(&self) -> bool {
        matches!(self.status, WorkflowStatus::Revision)
    }

    pub fn is_dispatch_allowed(&self) -> bool {
        matches!(self.status, WorkflowStatus::Approved)
    }
}

impl AggregateRoot for DepartureRequest {
    type Id = DepartureRequestId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: SubmitRequest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub request_id: DepartureRequestId,
    pub requester: UserId,
    pub lines: Vec<LineDraft>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ApproveRequest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproveRequest {
    pub request_id: DepartureRequestId,
    pub reviewer: UserId,
    pub comments: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RejectRequest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectRequest {
    pub request_id: DepartureRequestId,
    pub reviewer: UserId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RequestRevision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestRevision {
    pub request_id: DepartureRequestId,
    pub reviewer: UserId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: EditLines (replaces every line).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditLines {
    pub request_id: DepartureRequestId,
    pub editor: UserId,
    pub lines: Vec<LineDraft>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkDispatched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkDispatched {
    pub request_id: DepartureRequestId,
    pub dispatcher: UserId,
    pub allocation_ids: Vec<AllocationId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DepartureCommand {
    SubmitRequest(SubmitRequest),
    ApproveRequest(ApproveRequest),
    RejectRequest(RejectRequest),
    RequestRevision(RequestRevision),
    EditLines(EditLines),
    MarkDispatched(MarkDispatched),
}

/// Event: RequestSubmitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestSubmitted {
    pub request_id: DepartureRequestId,
    pub requester: UserId,
    pub lines: Vec<DepartureLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: RequestApproved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestApproved {
    pub request_id: DepartureRequestId,
    pub reviewer: UserId,
    pub comments: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: RequestRejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestRejected {
    pub request_id: DepartureRequestId,
    pub reviewer: UserId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: RevisionRequested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionRequested {
    pub request_id: DepartureRequestId,
    pub reviewer: UserId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LinesEdited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinesEdited {
    pub request_id: DepartureRequestId,
    pub editor: UserId,
    pub lines: Vec<DepartureLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: RequestDispatched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestDispatched {
    pub request_id: DepartureRequestId,
    pub dispatcher: UserId,
    pub allocation_ids: Vec<AllocationId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DepartureEvent {
    RequestSubmitted(RequestSubmitted),
    RequestApproved(RequestApproved),
    RequestRejected(RequestRejected),
    RevisionRequested(RevisionRequested),
    LinesEdited(LinesEdited),
    RequestDispatched(RequestDispatched),
}

impl Event for DepartureEvent {
    fn event_type(&self) -> &'static str {
        match self {
            DepartureEvent::RequestSubmitted(_) => "departures.request.submitted",
            DepartureEvent::RequestApproved(_) => "departures.request.approved",
            DepartureEvent::RequestRejected(_) => "departures.request.rejected",
            DepartureEvent::RevisionRequested(_) => "departures.request.revision_requested",
            DepartureEvent::LinesEdited(_) => "departures.request.lines_edited",
            DepartureEvent::RequestDispatched(_) => "departures.request.dispatched",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            DepartureEvent::RequestSubmitted(e) => e.occurred_at,
            DepartureEvent::RequestApproved(e) => e.occurred_at,
            DepartureEvent::RequestRejected(e) => e.occurred_at,
            DepartureEvent::RevisionRequested(e) => e.occurred_at,
            DepartureEvent::LinesEdited(e) => e.occurred_at,
            DepartureEvent::RequestDispatched(e) => e.occurred_at,
        }
    }
}

impl Aggregate for DepartureRequest {
    type Command = DepartureCommand;
    type Event = DepartureEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            DepartureEvent::RequestSubmitted(e) => {
                self.id = e.request_id;
                self.requester = Some(e.requester);
                self.status = WorkflowStatus::Pending;
                self.lines = e.lines.clone();
                self.review = None;
                self.created = true;
            }
            DepartureEvent::RequestApproved(e) => {
                self.status = WorkflowStatus::Approved;
                self.review = Some(Review {
                    reviewer: e.reviewer,
                    outcome: WorkflowStatus::Approved,
                    note: e.comments.clone(),
                    reviewed_at: e.occurred_at,
                });
            }
            DepartureEvent::RequestRejected(e) => {
                self.status = WorkflowStatus::Rejected;
                self.review = Some(Review {
                    reviewer: e.reviewer,
                    outcome: WorkflowStatus::Rejected,
                    note: Some(e.reason.clone()),
                    reviewed_at: e.occurred_at,
                });
            }
            DepartureEvent::RevisionRequested(e) => {
                self.status = WorkflowStatus::Revision;
                self.review = Some(Review {
                    reviewer: e.reviewer,
                    outcome: WorkflowStatus::Revision,
                    note: Some(e.reason.clone()),
                    reviewed_at: e.occurred_at,
                });
            }
            DepartureEvent::LinesEdited(e) => {
                // Editing forces a fresh review.
                self.lines = e.lines.clone();
                self.status = WorkflowStatus::Pending;
                self.review = None;
            }
            DepartureEvent::RequestDispatched(e) => {
                self.status = WorkflowStatus::Dispatched;
                self.dispatched_by = Some(e.dispatcher);
                self.dispatched_at = Some(e.occurred_at);
                self.allocation_ids = e.allocation_ids.clone();
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            DepartureCommand::SubmitRequest(cmd) => self.handle_submit(cmd),
            DepartureCommand::ApproveRequest(cmd) => self.handle_approve(cmd),
            DepartureCommand::RejectRequest(cmd) => self.handle_reject(cmd),
            DepartureCommand::RequestRevision(cmd) => self.handle_request_revision(cmd),
            DepartureCommand::EditLines(cmd) => self.handle_edit_lines(cmd),
            DepartureCommand::MarkDispatched(cmd) => self.handle_mark_dispatched(cmd),
        }
    }
}

/// Validate drafts and number them from 1.
fn number_lines(drafts: &[LineDraft]) -> Result<Vec<DepartureLine>, DomainError> {
    if drafts.is_empty() {
        return Err(DomainError::validation(
            "departure request needs at least one line",
        ));
    }

    drafts
        .iter()
        .enumerate()
        .map(|(idx, d)| {
            let line_no = (idx as u32) + 1;
            if d.quantity <= 0 {
                return Err(DomainError::validation(format!(
                    "line {line_no}: quantity must be positive"
                )));
            }
            if d.weight <= 0 {
                return Err(DomainError::validation(format!(
                    "line {line_no}: weight must be positive"
                )));
            }
            Ok(DepartureLine {
                line_no,
                product_id: d.product_id,
                quantity: d.quantity,
                weight: d.weight,
                cell_filter: d.cell_filter.clone(),
            })
        })
        .collect()
}

fn required_reason(reason: &str) -> Result<String, DomainError> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(DomainError::validation("reason cannot be empty"));
    }
    Ok(reason.to_string())
}

impl DepartureRequest {
    fn ensure_exists(&self, request_id: DepartureRequestId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found("departure request", request_id));
        }
        if self.id != request_id {
            return Err(DomainError::invariant("request_id mismatch"));
        }
        Ok(())
    }

    fn ensure_status(&self, expected: WorkflowStatus, action: &str) -> Result<(), DomainError> {
        if self.status != expected {
            return Err(DomainError::invalid_transition(format!(
                "cannot {action} a request that is {:?}",
                self.status
            )));
        }
        Ok(())
    }

    fn handle_submit(&self, cmd: &SubmitRequest) -> Result<Vec<DepartureEvent>, DomainError> {
        if self.created {
            return Err(DomainError::invalid_transition(
                "departure request already submitted",
            ));
        }
        let lines = number_lines(&cmd.lines)?;

        Ok(vec![DepartureEvent::RequestSubmitted(RequestSubmitted {
            request_id: cmd.request_id,
            requester: cmd.requester,
            lines,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_approve(&self, cmd: &ApproveRequest) -> Result<Vec<DepartureEvent>, DomainError> {
        self.ensure_exists(cmd.request_id)?;
        self.ensure_status(WorkflowStatus::Pending, "approve")?;

        Ok(vec![DepartureEvent::RequestApproved(RequestApproved {
            request_id: cmd.request_id,
            reviewer: cmd.reviewer,
            comments: cmd
                .comments
                .as_ref()
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty()),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reject(&self, cmd: &RejectRequest) -> Result<Vec<DepartureEvent>, DomainError> {
        self.ensure_exists(cmd.request_id)?;
        // Cancellation is possible at any point before dispatch.
        if self.status.is_terminal() {
            return Err(DomainError::invalid_transition(format!(
                "cannot reject a request that is {:?}",
                self.status
            )));
        }
        let reason = required_reason(&cmd.reason)?;

        Ok(vec![DepartureEvent::RequestRejected(RequestRejected {
            request_id: cmd.request_id,
            reviewer: cmd.reviewer,
            reason,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_request_revision(
        &self,
        cmd: &RequestRevision,
    ) -> Result<Vec<DepartureEvent>, DomainError> {
        self.ensure_exists(cmd.request_id)?;
        self.ensure_status(WorkflowStatus::Pending, "request revision of")?;
        let reason = required_reason(&cmd.reason)?;

        Ok(vec![DepartureEvent::RevisionRequested(RevisionRequested {
            request_id: cmd.request_id,
            reviewer: cmd.reviewer,
            reason,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_edit_lines(&self, cmd: &EditLines) -> Result<Vec<DepartureEvent>, DomainError> {
        self.ensure_exists(cmd.request_id)?;
        if !self.is_editable() {
            return Err(DomainError::invalid_state_for_edit(format!(
                "lines can only change while under revision (request is {:?})",
                self.status
            )));
        }
        if self.requester != Some(cmd.editor) {
            return Err(DomainError::unauthorized(format!(
                "departures.edit on request {} (only its requester may edit it)",
                cmd.request_id
            )));
        }
        let lines = number_lines(&cmd.lines)?;

        Ok(vec![DepartureEvent::LinesEdited(LinesEdited {
            request_id: cmd.request_id,
            editor: cmd.editor,
            lines,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_mark_dispatched(
        &self,
        cmd: &MarkDispatched,
    ) -> Result<Vec<DepartureEvent>, DomainError> {
        self.ensure_exists(cmd.request_id)?;
        if !self.is_dispatch_allowed() {
            return Err(DomainError::invalid_transition(format!(
                "only approved requests can be dispatched (request is {:?})",
                self.status
            )));
        }
        if cmd.allocation_ids.is_empty() {
            return Err(DomainError::invariant(
                "dispatch must record at least one allocation",
            ));
        }

        Ok(vec![DepartureEvent::RequestDispatched(RequestDispatched {
            request_id: cmd.request_id,
            dispatcher: cmd.dispatcher,
            allocation_ids: cmd.allocation_ids.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}
