//! Caller identity and capability checks
//!
//! Authentication lives in a trusted upstream gateway. By the time a request
//! reaches this service the gateway has already verified the session and
//! injected two headers: `x-user-id` (numeric user id) and `x-user-role`.
//! [`CallerContext`] extracts them; handlers gate privileged operations with
//! the [`capability_guard!`] macro.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error_builder::ErrorBuilder;

/// Role assigned to the caller by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Staff,
    Teacher,
    Parent,
    Student,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Staff => "staff",
            Role::Teacher => "teacher",
            Role::Parent => "parent",
            Role::Student => "student",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(Role::Admin),
            "staff" => Some(Role::Staff),
            "teacher" => Some(Role::Teacher),
            "parent" => Some(Role::Parent),
            "student" => Some(Role::Student),
            _ => None,
        }
    }

    pub fn all() -> Vec<Role> {
        vec![
            Role::Admin,
            Role::Staff,
            Role::Teacher,
            Role::Parent,
            Role::Student,
        ]
    }

    /// Capabilities granted to this role.
    pub fn capabilities(&self) -> Vec<Capability> {
        match self {
            Role::Admin => Capability::all(),
            Role::Staff => vec![
                Capability::AnnouncementsRead,
                Capability::AnnouncementsManage,
                Capability::BulkMessagesManage,
                Capability::EmergencyAlertsSend,
                Capability::TemplatesRead,
                Capability::TemplatesManage,
                Capability::NotificationsSend,
                Capability::AnalyticsRead,
                Capability::AudiencesPreview,
                Capability::DirectoryRead,
                Capability::SettingsRead,
            ],
            Role::Teacher => vec![
                Capability::AnnouncementsRead,
                Capability::AnnouncementsManage,
                Capability::TemplatesRead,
                Capability::NotificationsSend,
                Capability::AudiencesPreview,
                Capability::DirectoryRead,
            ],
            Role::Parent => vec![Capability::AnnouncementsRead],
            Role::Student => vec![Capability::AnnouncementsRead],
        }
    }

    pub fn has_capability(&self, capability: &Capability) -> bool {
        self.capabilities().contains(capability)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A privileged operation a role may perform.
///
/// Senders of announcements and bulk messages act on other users; these
/// capabilities gate those paths. Operations that only touch the caller's own
/// rows (own notifications, own preferences, own threads) need no capability,
/// only a valid [`CallerContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    AnnouncementsRead,
    AnnouncementsManage,
    BulkMessagesManage,
    EmergencyAlertsSend,
    TemplatesRead,
    TemplatesManage,
    NotificationsSend,
    AnalyticsRead,
    AudiencesPreview,
    DirectoryRead,
    SettingsRead,
    MaintenanceRun,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::AnnouncementsRead => "announcements:read",
            Capability::AnnouncementsManage => "announcements:manage",
            Capability::BulkMessagesManage => "bulk_messages:manage",
            Capability::EmergencyAlertsSend => "emergency_alerts:send",
            Capability::TemplatesRead => "templates:read",
            Capability::TemplatesManage => "templates:manage",
            Capability::NotificationsSend => "notifications:send",
            Capability::AnalyticsRead => "analytics:read",
            Capability::AudiencesPreview => "audiences:preview",
            Capability::DirectoryRead => "directory:read",
            Capability::SettingsRead => "settings:read",
            Capability::MaintenanceRun => "maintenance:run",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Capability::all().into_iter().find(|c| c.as_str() == s)
    }

    pub fn all() -> Vec<Capability> {
        vec![
            Capability::AnnouncementsRead,
            Capability::AnnouncementsManage,
            Capability::BulkMessagesManage,
            Capability::EmergencyAlertsSend,
            Capability::TemplatesRead,
            Capability::TemplatesManage,
            Capability::NotificationsSend,
            Capability::AnalyticsRead,
            Capability::AudiencesPreview,
            Capability::DirectoryRead,
            Capability::SettingsRead,
            Capability::MaintenanceRun,
        ]
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Identity of the caller as asserted by the gateway.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema)]
pub struct CallerContext {
    pub user_id: i32,
    pub role: Role,
}

impl CallerContext {
    pub fn new(user_id: i32, role: Role) -> Self {
        Self { user_id, role }
    }

    pub fn has_capability(&self, capability: &Capability) -> bool {
        self.role.has_capability(capability)
    }
}

fn missing_identity(detail: &str) -> axum::response::Response {
    ErrorBuilder::new(StatusCode::UNAUTHORIZED)
        .type_("https://crier.sh/probs/missing-caller-identity")
        .title("Missing Caller Identity")
        .detail(detail)
        .build()
        .into_response()
}

impl<S> FromRequestParts<S> for CallerContext
where
    S: Send + Sync,
{
    type Rejection = axum::response::Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<i32>().ok())
            .ok_or_else(|| {
                missing_identity("The gateway did not supply a numeric x-user-id header")
            })?;

        let role = parts
            .headers
            .get("x-user-role")
            .and_then(|v| v.to_str().ok())
            .and_then(Role::from_str)
            .ok_or_else(|| {
                missing_identity(
                    "The gateway did not supply a recognized x-user-role header \
                     (admin, staff, teacher, parent, student)",
                )
            })?;

        Ok(CallerContext::new(user_id, role))
    }
}

/// Guard macro that checks a capability and returns early if not authorized
///
/// Usage in handler:
/// ```ignore
/// pub async fn create_announcement(
///     caller: CallerContext,
///     State(state): State<Arc<AnnouncementState>>,
///     Json(request): Json<CreateAnnouncementRequest>,
/// ) -> Result<impl IntoResponse, Problem> {
///     capability_guard!(caller, AnnouncementsManage);
///
///     // Your handler logic here
/// }
/// ```
#[macro_export]
macro_rules! capability_guard {
    ($caller:expr, $capability:ident) => {
        if !$caller.has_capability(&$crate::access::Capability::$capability) {
            return Err($crate::error_builder::ErrorBuilder::new(
                ::axum::http::StatusCode::FORBIDDEN,
            )
            .type_("https://crier.sh/probs/insufficient-capability")
            .title("Insufficient Capability")
            .detail(format!(
                "This operation requires the {} capability",
                $crate::access::Capability::$capability
            ))
            .value(
                "required_capability",
                $crate::access::Capability::$capability.to_string(),
            )
            .value("caller_role", $caller.role.to_string())
            .build());
        }
    };
}
