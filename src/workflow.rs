//! Lifecycle state machines for score records and compiled results, plus
//! the notification intents their transitions emit. Everything here is
//! pure; handlers load the current state, call in, and persist what comes
//! back.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreStatus {
    Draft,
    Submitted,
    Rejected,
}

impl ScoreStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Submitted => "submitted",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "submitted" => Some(Self::Submitted),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultStatus {
    Draft,
    Submitted,
    Approved,
    Rejected,
}

impl ResultStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Submitted => "submitted",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "submitted" => Some(Self::Submitted),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TransitionError {
    pub code: &'static str,
    pub message: String,
}

impl TransitionError {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Draft and Rejected scores are editable by their owner. A Submitted
/// score only reopens through the explicit edit override, which also
/// clears any stored rejection reason on save.
pub fn score_editable(
    status: ScoreStatus,
    is_owner: bool,
    edit_override: bool,
) -> Result<(), TransitionError> {
    if !is_owner {
        return Err(TransitionError::new(
            "forbidden",
            "only the assigned subject teacher may edit this score",
        ));
    }
    match status {
        ScoreStatus::Draft | ScoreStatus::Rejected => Ok(()),
        ScoreStatus::Submitted if edit_override => Ok(()),
        ScoreStatus::Submitted => Err(TransitionError::new(
            "invalid_state",
            "score is submitted and locked for editing",
        )),
    }
}

pub fn submit_score(status: ScoreStatus, is_owner: bool) -> Result<ScoreStatus, TransitionError> {
    if !is_owner {
        return Err(TransitionError::new(
            "forbidden",
            "only the assigned subject teacher may submit this score",
        ));
    }
    match status {
        ScoreStatus::Draft | ScoreStatus::Rejected => Ok(ScoreStatus::Submitted),
        ScoreStatus::Submitted => Err(TransitionError::new(
            "invalid_state",
            "score is already submitted",
        )),
    }
}

pub fn reject_score(
    status: ScoreStatus,
    is_class_teacher: bool,
    reason: &str,
) -> Result<ScoreStatus, TransitionError> {
    if !is_class_teacher {
        return Err(TransitionError::new(
            "forbidden",
            "only the class teacher may reject a submitted score",
        ));
    }
    if reason.trim().is_empty() {
        return Err(TransitionError::new(
            "bad_params",
            "a rejection reason is required",
        ));
    }
    match status {
        ScoreStatus::Submitted => Ok(ScoreStatus::Rejected),
        _ => Err(TransitionError::new(
            "invalid_state",
            "only a submitted score can be rejected",
        )),
    }
}

/// Compiled result submission covers both first submission and the
/// rejected-then-corrected cycle; the same logical record is overwritten.
pub fn submit_result(
    current: Option<ResultStatus>,
    is_class_teacher: bool,
    comment: &str,
) -> Result<ResultStatus, TransitionError> {
    if !is_class_teacher {
        return Err(TransitionError::new(
            "forbidden",
            "only the class teacher may submit a compiled result",
        ));
    }
    if comment.trim().is_empty() {
        return Err(TransitionError::new(
            "bad_params",
            "a class teacher comment is required before submission",
        ));
    }
    match current {
        None | Some(ResultStatus::Draft) | Some(ResultStatus::Rejected) => {
            Ok(ResultStatus::Submitted)
        }
        Some(ResultStatus::Submitted) => Err(TransitionError::new(
            "invalid_state",
            "compiled result is already submitted",
        )),
        Some(ResultStatus::Approved) => Err(TransitionError::new(
            "invalid_state",
            "compiled result is already approved",
        )),
    }
}

pub fn approve_result(
    current: ResultStatus,
    is_approver: bool,
    principal_comment: &str,
) -> Result<ResultStatus, TransitionError> {
    if !is_approver {
        return Err(TransitionError::new(
            "forbidden",
            "only an approver may approve a compiled result",
        ));
    }
    if principal_comment.trim().is_empty() {
        return Err(TransitionError::new(
            "bad_params",
            "a principal comment is required for approval",
        ));
    }
    match current {
        ResultStatus::Submitted => Ok(ResultStatus::Approved),
        _ => Err(TransitionError::new(
            "invalid_state",
            "only a submitted result can be approved",
        )),
    }
}

pub fn reject_result(
    current: ResultStatus,
    is_approver: bool,
    reason: &str,
) -> Result<ResultStatus, TransitionError> {
    if !is_approver {
        return Err(TransitionError::new(
            "forbidden",
            "only an approver may reject a compiled result",
        ));
    }
    if reason.trim().is_empty() {
        return Err(TransitionError::new(
            "bad_params",
            "a rejection reason is required",
        ));
    }
    match current {
        ResultStatus::Submitted => Ok(ResultStatus::Rejected),
        _ => Err(TransitionError::new(
            "invalid_state",
            "only a submitted result can be rejected",
        )),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Info,
    Warning,
    Success,
    Error,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    All,
    Teachers,
    Parents,
    Accountants,
}

impl Audience {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Teachers => "teachers",
            Self::Parents => "parents",
            Self::Accountants => "accountants",
        }
    }
}

/// Who to notify, with what message. Persisting and delivering these is
/// the handler layer's and the shell's business respectively.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationIntent {
    pub title: String,
    pub message: String,
    pub kind: NotificationKind,
    pub audience: Audience,
    pub teacher_id: Option<String>,
    pub student_id: Option<String>,
}

pub fn score_rejection_intent(
    student_name: &str,
    subject_name: &str,
    owner_teacher_id: &str,
    reason: &str,
) -> NotificationIntent {
    NotificationIntent {
        title: "Score rejected".to_string(),
        message: format!(
            "{} score for {} was rejected: {}",
            subject_name, student_name, reason
        ),
        kind: NotificationKind::Warning,
        audience: Audience::Teachers,
        teacher_id: Some(owner_teacher_id.to_string()),
        student_id: None,
    }
}

pub fn result_rejection_intent(
    student_name: &str,
    class_teacher_id: &str,
    reason: &str,
) -> NotificationIntent {
    NotificationIntent {
        title: "Compiled result rejected".to_string(),
        message: format!(
            "The compiled result for {} was rejected: {}",
            student_name, reason
        ),
        kind: NotificationKind::Warning,
        audience: Audience::Teachers,
        teacher_id: Some(class_teacher_id.to_string()),
        student_id: None,
    }
}

pub fn result_approval_intents(
    student_name: &str,
    student_id: &str,
    class_teacher_id: &str,
) -> Vec<NotificationIntent> {
    vec![
        NotificationIntent {
            title: "Result approved".to_string(),
            message: format!("The term result for {} has been approved.", student_name),
            kind: NotificationKind::Success,
            audience: Audience::Parents,
            teacher_id: None,
            student_id: Some(student_id.to_string()),
        },
        NotificationIntent {
            title: "Result approved".to_string(),
            message: format!("The compiled result for {} has been approved.", student_name),
            kind: NotificationKind::Success,
            audience: Audience::Teachers,
            teacher_id: Some(class_teacher_id.to_string()),
            student_id: None,
        },
    ]
}
