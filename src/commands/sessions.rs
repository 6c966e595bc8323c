use chrono::NaiveDate;
use serde::Serialize;

use crate::database::{Database, Session, SessionSummary};
use crate::error::AppError;
use crate::reconcile::cascade::{self, CascadeReport};
use crate::temporal::normalize_session;

#[derive(Debug, Serialize)]
pub struct SessionPage {
    pub sessions: Vec<SessionSummary>,
    pub total: i64,
    pub has_more: bool,
}

/// Insert or update a session. Missing times are filled in and an inverted
/// date window is put right before saving.
pub fn save_session(db: &Database, mut session: Session) -> Result<i64, AppError> {
    log::info!("Saving session {}", session.tag);
    if normalize_session(&mut session) {
        log::debug!("Session {} times normalized", session.tag);
    }
    db.merge_session(&session).map_err(AppError::from)
}

pub fn get_session(db: &Database, id: i64) -> Result<Session, AppError> {
    db.get_session(id)?
        .ok_or_else(|| AppError::NotFound(format!("session {}", id)))
}

pub fn get_sessions(
    db: &Database,
    limit: Option<i64>,
    offset: Option<i64>,
) -> Result<SessionPage, AppError> {
    let limit = limit.unwrap_or(50).max(1);
    let offset = offset.unwrap_or(0).max(0);
    let (sessions, total) = db.list_sessions(limit, offset)?;
    let has_more = offset + (sessions.len() as i64) < total;
    Ok(SessionPage {
        sessions,
        total,
        has_more,
    })
}

pub fn get_sessions_between(
    db: &Database,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Vec<Session>, AppError> {
    if from > to {
        return Err(AppError::Validation(format!("{} is after {}", from, to)));
    }
    db.sessions_in_date_range(from, to).map_err(AppError::from)
}

/// Delete a session with all of its recordings and segments
pub fn delete_session(db: &Database, id: i64) -> Result<CascadeReport, AppError> {
    log::info!("Deleting session {}", id);
    cascade::delete_session(db, id).map_err(AppError::from)
}
