use async_trait::async_trait;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::Result;

/// Enrollment verification, owned by the course platform.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EnrollmentGuard: Send + Sync {
    /// Returns the active enrollment id for the user in the course, if any.
    async fn active_enrollment(&self, user_id: Uuid, course_id: Uuid) -> Result<Option<Uuid>>;
}

/// Course catalog checks, owned by the course platform.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CourseAccess: Send + Sync {
    async fn course_exists(&self, course_id: Uuid) -> Result<bool>;
    async fn instructor_owns_course(&self, user_id: Uuid, course_id: Uuid) -> Result<bool>;
}

/// Delivery of result notifications, owned by the notification subsystem.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(
        &self,
        user_id: Uuid,
        kind: &str,
        title: &str,
        message: &str,
        data: JsonValue,
    ) -> Result<()>;
}
