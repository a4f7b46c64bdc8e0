//! User-facing outcome notices and how each one is presented.

use serde::Serialize;

use crate::alarm::lifecycle::ClusterError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Success { message: String },
    Error { message: String },
    Permission { message: String },
    Deactivate { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeAction {
    Dismiss,
    Retry,
    OpenSettings,
    ProceedAnyway,
    ConfirmDeactivate,
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NoticePresentation {
    pub kind: &'static str,
    pub title: &'static str,
    pub icon: &'static str,
    pub accent: &'static str,
    pub message: String,
    pub actions: &'static [NoticeAction],
}

impl Notice {
    pub fn message(&self) -> &str {
        match self {
            Notice::Success { message }
            | Notice::Error { message }
            | Notice::Permission { message }
            | Notice::Deactivate { message } => message,
        }
    }

    pub fn presentation(&self) -> NoticePresentation {
        let (kind, title, icon, accent, actions): (_, _, _, _, &'static [NoticeAction]) = match self {
            Notice::Success { .. } => (
                "success",
                "Alarms set",
                "✓",
                "#4CAF50",
                &[NoticeAction::Dismiss],
            ),
            Notice::Error { .. } => (
                "error",
                "Something went wrong",
                "✕",
                "#FF6B6B",
                &[NoticeAction::Retry, NoticeAction::Dismiss],
            ),
            Notice::Permission { .. } => (
                "permission",
                "Permission needed",
                "🔔",
                "#F5A623",
                &[NoticeAction::OpenSettings, NoticeAction::ProceedAnyway],
            ),
            Notice::Deactivate { .. } => (
                "deactivate",
                "Turn off alarms?",
                "⏰",
                "#6B5CE7",
                &[NoticeAction::ConfirmDeactivate, NoticeAction::Cancel],
            ),
        };
        NoticePresentation {
            kind,
            title,
            icon,
            accent,
            message: self.message().to_string(),
            actions,
        }
    }

    pub fn render_plain(&self) -> String {
        let presentation = self.presentation();
        format!(
            "{} {}: {}",
            presentation.icon, presentation.title, presentation.message
        )
    }
}

impl From<&ClusterError> for Notice {
    fn from(err: &ClusterError) -> Self {
        let message = err.to_string();
        match err {
            ClusterError::PermissionDenied => Notice::Permission {
                message: format!(
                    "{message}. Grant it in settings, or proceed and alarms may not appear over the lock screen."
                ),
            },
            ClusterError::Persistence(_)
            | ClusterError::SchedulerCall(_)
            | ClusterError::ClusterLocked
            | ClusterError::Busy => Notice::Error { message },
        }
    }
}
