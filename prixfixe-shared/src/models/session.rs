/// Session context
///
/// The denormalised record request authenticators consult on every call: who
/// the caller is, which households they can act in and with what roles, and
/// which household is active by default. It is computed on read and never
/// stored.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

use super::user::{User, UserReputation};
use crate::authorization::{HouseholdPermissionChecker, ServicePermissionChecker};

/// The caller's identity and service-wide permissions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequesterInfo {
    pub user_id: String,
    pub username: String,
    pub email_address: String,
    pub reputation: UserReputation,
    pub reputation_explanation: String,
    pub service_permissions: ServicePermissionChecker,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionContextData {
    pub requester: RequesterInfo,
    /// One checker per household the caller belongs to
    pub household_permissions: HashMap<String, HouseholdPermissionChecker>,
    pub active_household_id: String,
}

/// Accumulates membership rows into a [`SessionContextData`]
#[derive(Debug)]
pub struct SessionContextBuilder {
    requester: RequesterInfo,
    household_roles: HashMap<String, Vec<String>>,
    first_household: Option<String>,
    default_household: Option<String>,
}

impl SessionContextBuilder {
    pub fn new(user: &User) -> Self {
        Self {
            requester: RequesterInfo {
                user_id: user.id.clone(),
                username: user.username.clone(),
                email_address: user.email_address.clone(),
                reputation: user.reputation,
                reputation_explanation: user.reputation_explanation.clone(),
                service_permissions: ServicePermissionChecker::new(&user.service_roles),
            },
            household_roles: HashMap::new(),
            first_household: None,
            default_household: None,
        }
    }

    /// Records one membership. The first default row wins.
    pub fn add_membership(&mut self, household_id: &str, roles: Vec<String>, is_default: bool) {
        if self.first_household.is_none() {
            self.first_household = Some(household_id.to_string());
        }
        if is_default && self.default_household.is_none() {
            self.default_household = Some(household_id.to_string());
        }
        self.household_roles.insert(household_id.to_string(), roles);
    }

    /// Builds the checkers and picks the active household
    ///
    /// With no default membership the first membership seen is used; with no
    /// memberships at all the active household is empty.
    pub fn build(self) -> SessionContextData {
        let active_household_id = match (self.default_household, self.first_household) {
            (Some(default), _) => default,
            (None, Some(first)) => {
                warn!(user_id = %self.requester.user_id, "user has no default household");
                first
            }
            (None, None) => {
                warn!(user_id = %self.requester.user_id, "user has no households");
                String::new()
            }
        };

        let household_permissions = self
            .household_roles
            .into_iter()
            .map(|(id, roles)| (id, HouseholdPermissionChecker::new(&roles)))
            .collect();

        SessionContextData {
            requester: self.requester,
            household_permissions,
            active_household_id,
        }
    }
}
