/// Role tokens and the permission checkers built from them
///
/// Roles are persisted as comma-separated tokens (`users.service_roles`,
/// `household_user_memberships.household_roles`). At read time the raw token
/// lists are turned into checkers with [`ServicePermissionChecker::new`] and
/// [`HouseholdPermissionChecker::new`]. Construction is pure and never fails;
/// unknown tokens are ignored.
///
/// # Permission Model
///
/// 1. **Service roles** apply across every household: `service_user`, `service_admin`
/// 2. **Household roles** apply within one household: `household_member`, `household_admin`
///
/// Within each family a higher role implies every permission of the lower one.
///
/// # Example
///
/// ```
/// use prixfixe_shared::authorization::{HouseholdPermission, HouseholdPermissionChecker};
///
/// let checker = HouseholdPermissionChecker::new(&["household_admin".to_string()]);
/// assert!(checker.has_permission(HouseholdPermission::InviteUser));
/// ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::models::session::SessionContextData;

/// Role tokens that apply service-wide
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceRole {
    ServiceUser,
    ServiceAdmin,
}

/// Role tokens that apply within a single household
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HouseholdRole {
    HouseholdMember,
    HouseholdAdmin,
}

/// Error for an unrecognised role token
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown role: {0}")]
pub struct UnknownRole(pub String);

impl ServiceRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceRole::ServiceUser => "service_user",
            ServiceRole::ServiceAdmin => "service_admin",
        }
    }

    fn level(&self) -> u8 {
        match self {
            ServiceRole::ServiceAdmin => 2,
            ServiceRole::ServiceUser => 1,
        }
    }
}

impl HouseholdRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            HouseholdRole::HouseholdMember => "household_member",
            HouseholdRole::HouseholdAdmin => "household_admin",
        }
    }

    fn level(&self) -> u8 {
        match self {
            HouseholdRole::HouseholdAdmin => 2,
            HouseholdRole::HouseholdMember => 1,
        }
    }
}

impl FromStr for ServiceRole {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "service_user" => Ok(ServiceRole::ServiceUser),
            "service_admin" => Ok(ServiceRole::ServiceAdmin),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

impl FromStr for HouseholdRole {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "household_member" => Ok(HouseholdRole::HouseholdMember),
            "household_admin" => Ok(HouseholdRole::HouseholdAdmin),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

impl fmt::Display for ServiceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for HouseholdRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Service-wide permissions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServicePermission {
    /// Any signed-up user
    ReadCatalog,
    CreateHouseholds,

    /// Service admins only
    ManageCatalog,
    UpdateUserReputations,
    SearchUsers,
    ImpersonateUsers,
    ReadAllHouseholds,
}

impl ServicePermission {
    pub fn min_role(&self) -> ServiceRole {
        match self {
            ServicePermission::ReadCatalog | ServicePermission::CreateHouseholds => {
                ServiceRole::ServiceUser
            }
            _ => ServiceRole::ServiceAdmin,
        }
    }
}

/// Permissions within one household
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HouseholdPermission {
    /// Members
    ReadHousehold,
    ReadWebhooks,
    ReadMembers,

    /// Admins
    UpdateHousehold,
    ArchiveHousehold,
    InviteUser,
    RemoveMember,
    ModifyMemberPermissions,
    TransferOwnership,
    ManageWebhooks,
}

impl HouseholdPermission {
    pub fn min_role(&self) -> HouseholdRole {
        match self {
            HouseholdPermission::ReadHousehold
            | HouseholdPermission::ReadWebhooks
            | HouseholdPermission::ReadMembers => HouseholdRole::HouseholdMember,
            _ => HouseholdRole::HouseholdAdmin,
        }
    }
}

fn parse_roles<R: FromStr>(raw: &[String]) -> Vec<R> {
    raw.iter().filter_map(|r| r.parse().ok()).collect()
}

/// Answers service-level permission questions for one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePermissionChecker {
    roles: Vec<ServiceRole>,
}

impl ServicePermissionChecker {
    pub fn new(raw_roles: &[String]) -> Self {
        Self {
            roles: parse_roles(raw_roles),
        }
    }

    pub fn roles(&self) -> &[ServiceRole] {
        &self.roles
    }

    pub fn has_role(&self, role: ServiceRole) -> bool {
        self.roles.contains(&role)
    }

    pub fn has_permission(&self, permission: ServicePermission) -> bool {
        let required = permission.min_role().level();
        self.roles.iter().any(|r| r.level() >= required)
    }

    pub fn is_service_admin(&self) -> bool {
        self.has_role(ServiceRole::ServiceAdmin)
    }

    pub fn can_update_user_reputations(&self) -> bool {
        self.has_permission(ServicePermission::UpdateUserReputations)
    }

    pub fn can_search_users(&self) -> bool {
        self.has_permission(ServicePermission::SearchUsers)
    }

    pub fn can_impersonate_users(&self) -> bool {
        self.has_permission(ServicePermission::ImpersonateUsers)
    }
}

/// Answers permission questions for one user in one household
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HouseholdPermissionChecker {
    roles: Vec<HouseholdRole>,
}

impl HouseholdPermissionChecker {
    pub fn new(raw_roles: &[String]) -> Self {
        Self {
            roles: parse_roles(raw_roles),
        }
    }

    pub fn roles(&self) -> &[HouseholdRole] {
        &self.roles
    }

    pub fn has_role(&self, role: HouseholdRole) -> bool {
        self.roles.contains(&role)
    }

    pub fn has_permission(&self, permission: HouseholdPermission) -> bool {
        let required = permission.min_role().level();
        self.roles.iter().any(|r| r.level() >= required)
    }

    pub fn is_household_admin(&self) -> bool {
        self.has_role(HouseholdRole::HouseholdAdmin)
    }
}

/// Error type for authorization checks
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthzError {
    /// Requester holds no membership in the household
    #[error("not a member of household {0}")]
    NotMember(String),

    /// Requester's household roles don't grant the permission
    #[error("insufficient household permissions: {0:?}")]
    InsufficientHouseholdPermission(HouseholdPermission),

    /// Requester's service roles don't grant the permission
    #[error("insufficient service permissions: {0:?}")]
    InsufficientServicePermission(ServicePermission),
}

/// Checks a household permission against an assembled session
pub fn require_household_permission(
    session: &SessionContextData,
    household_id: &str,
    permission: HouseholdPermission,
) -> Result<(), AuthzError> {
    let checker = session
        .household_permissions
        .get(household_id)
        .ok_or_else(|| AuthzError::NotMember(household_id.to_string()))?;

    if !checker.has_permission(permission) {
        return Err(AuthzError::InsufficientHouseholdPermission(permission));
    }

    Ok(())
}

/// Checks a service permission against an assembled session
pub fn require_service_permission(
    session: &SessionContextData,
    permission: ServicePermission,
) -> Result<(), AuthzError> {
    if !session.requester.service_permissions.has_permission(permission) {
        return Err(AuthzError::InsufficientServicePermission(permission));
    }

    Ok(())
}
