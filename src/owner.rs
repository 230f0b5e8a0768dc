//! Owner identity.
//!
//! An owner is `"<process-uuid>$<process-id>$<task-id>"`. The UUID makes the
//! identity unique across the fleet, the pid survives task churn within a
//! process, and the task component scopes ownership to one cooperative task.
//! Callers may substitute the task component to share a lock across a task
//! group (for example, every task servicing one inbound connection); the
//! UUID and pid always remain, so identical substitutions in different
//! processes never collide.

use remutex_core::LEASE_SEPARATOR;
use uuid::Uuid;

/// Identifier of the current cooperative task.
///
/// Tokio task ids are unique for the lifetime of the runtime. Outside a task
/// (for example on a plain thread driving `block_on`), the thread id stands
/// in.
pub fn current_task_id() -> String {
    match tokio::task::try_id() {
        Some(id) => format!("task-{id}"),
        None => format!("{:?}", std::thread::current().id()),
    }
}

/// Compose the full owner identity, with `task_override` standing in for the
/// current task's id when given.
pub(crate) fn identity(process_uuid: &Uuid, task_override: Option<&str>) -> String {
    let task = match task_override {
        Some(task) => task.to_string(),
        None => current_task_id(),
    };
    format!(
        "{}{sep}{}{sep}{}",
        process_uuid,
        std::process::id(),
        task,
        sep = LEASE_SEPARATOR
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use remutex_core::Lease;

    #[tokio::test]
    async fn identity_has_three_components() {
        let uuid = Uuid::new_v4();
        let owner = identity(&uuid, None);
        let parts: Vec<&str> = owner.split(LEASE_SEPARATOR).collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], uuid.to_string());
        assert_eq!(parts[1], std::process::id().to_string());
    }

    #[tokio::test]
    async fn identity_differs_between_tasks() {
        let uuid = Uuid::new_v4();
        let here = identity(&uuid, None);
        let there = tokio::spawn(async move { identity(&uuid, None) }).await.unwrap();
        assert_ne!(here, there);
    }

    #[tokio::test]
    async fn override_substitutes_only_the_task_component() {
        let uuid = Uuid::new_v4();
        let owner = identity(&uuid, Some("conn-42"));
        let parts: Vec<&str> = owner.split(LEASE_SEPARATOR).collect();
        let uuid_str = uuid.to_string();
        let pid = std::process::id().to_string();
        assert_eq!(parts, [uuid_str.as_str(), pid.as_str(), "conn-42"]);
    }

    #[tokio::test]
    async fn same_override_in_different_processes_stays_distinct() {
        // Two process UUIDs tagging the same connection id must not collide.
        let owner_a = identity(&Uuid::new_v4(), Some("conn-42"));
        let owner_b = identity(&Uuid::new_v4(), Some("conn-42"));
        assert_ne!(owner_a, owner_b);
    }

    #[tokio::test]
    async fn identity_survives_lease_round_trip() {
        // The identity contains the lease separator; parsing must still
        // recover it intact.
        let owner = identity(&Uuid::new_v4(), None);
        let lease = Lease::new(owner.clone(), 1_000);
        assert_eq!(Lease::parse(&lease.encode()).unwrap().owner, owner);
    }
}
