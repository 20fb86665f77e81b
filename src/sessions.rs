//! Read-only rendering of open initiator sessions.

use std::fmt;
use std::num::{IntErrorKind, ParseIntError};
use std::str::FromStr;
use thiserror::Error;

use crate::backend::{Backend, Session};

/// Spaces per indentation level.
const INDENT_STEP: usize = 4;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InspectError {
    #[error("action must be one of: {}", SessionAction::NAMES.join(", "))]
    InvalidAction(String),

    #[error("sid must be a number, '{0}' given")]
    InvalidSid(String),

    /// Holds the sid as given, which may lie outside the id range.
    #[error("no session found with sid {0}")]
    NotFound(String),
}

/// How much of each session to show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionAction {
    #[default]
    List,
    Details,
}

impl SessionAction {
    pub const NAMES: [&'static str; 2] = ["list", "details"];
}

impl FromStr for SessionAction {
    type Err = InspectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "list" => Ok(SessionAction::List),
            "details" => Ok(SessionAction::Details),
            other => Err(InspectError::InvalidAction(other.to_string())),
        }
    }
}

impl fmt::Display for SessionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionAction::List => f.write_str("list"),
            SessionAction::Details => f.write_str("details"),
        }
    }
}

/// Parse a session id filter. An integer too large for a session id is a
/// valid filter that matches nothing, so it fails as not found.
pub fn parse_sid(raw: &str) -> Result<i64, InspectError> {
    let trimmed = raw.trim();
    trimmed.parse().map_err(|e: ParseIntError| match e.kind() {
        IntErrorKind::PosOverflow | IntErrorKind::NegOverflow => {
            InspectError::NotFound(trimmed.to_string())
        }
        _ => InspectError::InvalidSid(raw.to_string()),
    })
}

fn indent(text: &str, steps: usize) -> String {
    format!("{}{text}", " ".repeat(INDENT_STEP * steps))
}

fn render_session(session: &Session, action: SessionAction, privileged: bool, out: &mut Vec<String>) {
    out.push(indent(
        &format!(
            "alias: {}\tsid: {}  type: {}  state: {}",
            session.alias, session.id, session.session_type, session.state
        ),
        0,
    ));

    if action != SessionAction::Details {
        return;
    }

    // Only privileged callers learn whether the ACL authenticates.
    let identity = if privileged {
        let auth = if session.acl.authenticated {
            "authenticated"
        } else {
            "NOT AUTHENTICATED"
        };
        format!("{} ({auth})", session.acl.node_wwn)
    } else {
        session.acl.node_wwn.clone()
    };
    out.push(indent(&identity, 1));

    for mlun in &session.mapped_luns {
        let mode = if mlun.write_protect { "(r)" } else { "(rw)" };
        out.push(indent(
            &format!("{} {} {mode}", mlun.mapped_lun, mlun.udev_path),
            2,
        ));
    }

    for conn in &session.connections {
        out.push(indent(
            &format!(
                "address: {} ({})  cid: {}  state: {}",
                conn.address, conn.transport, conn.cid, conn.state
            ),
            2,
        ));
    }
}

/// Render the sessions known to `backend`, optionally only the one with id
/// `sid`.
///
/// Without a filter and without sessions the output is the single line
/// `(no open sessions)`. A filter that matches nothing is an error.
pub fn render_sessions<B: Backend + ?Sized>(
    backend: &B,
    action: SessionAction,
    sid: Option<i64>,
    privileged: bool,
) -> Result<Vec<String>, InspectError> {
    let mut lines = Vec::new();
    let mut found = false;

    for session in backend.sessions() {
        if sid.map_or(true, |sid| sid == session.id) {
            found = true;
            render_session(&session, action, privileged, &mut lines);
        }
    }

    if !found {
        return match sid {
            Some(sid) => Err(InspectError::NotFound(sid.to_string())),
            None => Ok(vec![indent("(no open sessions)", 0)]),
        };
    }
    Ok(lines)
}
