//! Pure permission resolution over dotted capability names.
//!
//! No I/O lives here: the resolver takes the already-loaded grant set and a
//! requested name and answers yes or no. Absence of permission is a normal
//! `false`, never an error.

use crate::db::schema::PermissionCategory;
use std::collections::HashSet;

/// The fixed permission set granted to every new identity, with grantor
/// "system". Each entry is upserted by name before the grant row is inserted.
pub const DEFAULT_GRANTS: &[(&str, PermissionCategory, &str)] = &[
    (
        "tools.create-random-user",
        PermissionCategory::Tool,
        "Create a user with generated fake data",
    ),
    (
        "tools.create-user",
        PermissionCategory::Tool,
        "Create a user with explicit name and email",
    ),
    (
        "resources.users",
        PermissionCategory::Resource,
        "Read the full user listing",
    ),
    (
        "resources.user-details",
        PermissionCategory::Resource,
        "Read a single user's profile",
    ),
    (
        "prompts.generate-fake-user",
        PermissionCategory::Prompt,
        "Use the fake-user generation prompt",
    ),
];

/// Decide whether a granted name set authorizes the requested capability.
///
/// Exact match wins immediately. Otherwise every proper dotted prefix of the
/// requested name, longest first, is tried as `prefix.*`. The wildcard is only
/// ever appended to a shorter prefix, so `a.b` is checked as `a.b` then `a.*`,
/// never as `a.b.*`.
pub fn has_permission(granted: &HashSet<String>, requested: &str) -> bool {
    if granted.contains(requested) {
        return true;
    }

    let segments: Vec<&str> = requested.split('.').collect();
    for len in (1..segments.len()).rev() {
        let candidate = format!("{}.*", segments[..len].join("."));
        if granted.contains(&candidate) {
            return true;
        }
    }

    false
}

/// Check whether the grant set allows executing the named tool.
pub fn can_execute_tool(granted: &HashSet<String>, tool_name: &str) -> bool {
    has_permission(granted, &format!("tools.{tool_name}"))
}

/// Check whether the grant set allows reading the named resource.
///
/// Both `resources.<name>.read` and the bare `resources.<name>` authorize
/// access; older grants predate the `.read` suffix.
pub fn can_access_resource(granted: &HashSet<String>, resource_name: &str) -> bool {
    has_permission(granted, &format!("resources.{resource_name}.read"))
        || has_permission(granted, &format!("resources.{resource_name}"))
}

/// Check whether the grant set allows using the named prompt.
pub fn can_use_prompt(granted: &HashSet<String>, prompt_name: &str) -> bool {
    has_permission(granted, &format!("prompts.{prompt_name}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn granted(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_exact_match() {
        let set = granted(&["tools.create-user"]);
        assert!(has_permission(&set, "tools.create-user"));
    }

    #[test]
    fn test_exact_grant_does_not_leak_to_siblings() {
        let set = granted(&["tools.create-user"]);
        assert!(!has_permission(&set, "tools.create-random-user"));
        assert!(!has_permission(&set, "tools.create-user2"));
    }

    #[test]
    fn test_wildcard_covers_namespace() {
        let set = granted(&["tools.*"]);
        assert!(has_permission(&set, "tools.create-user"));
        assert!(has_permission(&set, "tools.anything"));
        assert!(!has_permission(&set, "resources.users"));
    }

    #[test]
    fn test_wildcard_never_formed_from_full_name() {
        // A grant of "a.b.*" must not satisfy a request for "a.b" itself
        let set = granted(&["tools.create-user.*"]);
        assert!(!has_permission(&set, "tools.create-user"));
    }

    #[test]
    fn test_deep_names_check_longest_prefix_first() {
        let set = granted(&["resources.users.*"]);
        assert!(has_permission(&set, "resources.users.read"));
        assert!(!has_permission(&set, "resources.accounts.read"));

        let set = granted(&["resources.*"]);
        assert!(has_permission(&set, "resources.users.read"));
    }

    #[test]
    fn test_empty_grant_set_denies() {
        let set = granted(&[]);
        assert!(!has_permission(&set, "tools.create-user"));
    }

    #[test]
    fn test_single_segment_names() {
        let set = granted(&["admin"]);
        assert!(has_permission(&set, "admin"));
        // No proper prefix exists for a single segment
        assert!(!has_permission(&set, "admin2"));
    }

    #[test]
    fn test_can_execute_tool() {
        let set = granted(&["tools.create-user"]);
        assert!(can_execute_tool(&set, "create-user"));
        assert!(!can_execute_tool(&set, "create-random-user"));

        let all = granted(&["tools.*"]);
        assert!(can_execute_tool(&all, "create-random-user"));
    }

    #[test]
    fn test_can_access_resource_accepts_both_forms() {
        let bare = granted(&["resources.users"]);
        assert!(can_access_resource(&bare, "users"));

        let suffixed = granted(&["resources.users.read"]);
        assert!(can_access_resource(&suffixed, "users"));

        let neither = granted(&["resources.user-details"]);
        assert!(!can_access_resource(&neither, "users"));
    }

    #[test]
    fn test_can_use_prompt() {
        let set = granted(&["prompts.generate-fake-user"]);
        assert!(can_use_prompt(&set, "generate-fake-user"));
        assert!(!can_use_prompt(&set, "other-prompt"));
    }

    #[test]
    fn test_default_grants_cover_every_category() {
        let names: HashSet<String> = DEFAULT_GRANTS
            .iter()
            .map(|(name, _, _)| name.to_string())
            .collect();

        assert_eq!(names.len(), DEFAULT_GRANTS.len());
        assert!(can_execute_tool(&names, "create-user"));
        assert!(can_execute_tool(&names, "create-random-user"));
        assert!(can_access_resource(&names, "users"));
        assert!(can_access_resource(&names, "user-details"));
        assert!(can_use_prompt(&names, "generate-fake-user"));
    }
}
