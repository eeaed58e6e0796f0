use std::fmt;

use crate::entities::User;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    Create,
    Update,
    Delete,
}

impl Action {
    pub const ALL: [Action; 4] = [Self::Read, Self::Create, Self::Update, Self::Delete];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn permission_key(resource: &str, action: Action) -> String {
    format!("{}.{}", resource, action)
}

/// Exact-match lookup of `resource.action` in the user's flat permission list.
///
/// No user, or a user carrying no permissions at all, is denied.
pub fn can(user: Option<&User>, action: Action, resource: &str) -> bool {
    let Some(user) = user else {
        return false;
    };
    let key = permission_key(resource, action);
    user.permissions.iter().any(|granted| *granted == key)
}

/// Every `resource.action` key for the given resources.
pub fn all_permissions(resources: &[&str]) -> Vec<String> {
    resources
        .iter()
        .flat_map(|resource| Action::ALL.iter().map(move |action| permission_key(resource, *action)))
        .collect()
}
