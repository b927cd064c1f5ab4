use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::courier::CourierCandidate;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoreBreakdown {
    pub rating_score: f64,
    pub distance_score: f64,
    pub experience_score: f64,
    pub availability_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedCandidate {
    pub candidate: CourierCandidate,
    pub distance_km: Option<f64>,
    pub score: f64,
    pub score_breakdown: ScoreBreakdown,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentEventKind {
    Broadcasted,
    Assigned,
    Reassigned,
    Unassigned,
    Cancelled,
}

impl AssignmentEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AssignmentEventKind::Broadcasted => "broadcasted",
            AssignmentEventKind::Assigned => "assigned",
            AssignmentEventKind::Reassigned => "reassigned",
            AssignmentEventKind::Unassigned => "unassigned",
            AssignmentEventKind::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentEvent {
    pub order_id: Uuid,
    pub event: AssignmentEventKind,
    pub courier_id: Option<Uuid>,
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}
