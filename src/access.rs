//! Who may use the application, and how a browser session becomes a staff
//! identity.

use catalog_api::{AccessToken, CatalogDto, SellerDto};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub mod controllers;

pub const SESSION_TOKEN: &str = "token";
pub const SESSION_USERNAME: &str = "username";
pub const SESSION_USER: &str = "user";

/// Local identity of a signed-in person.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StaffUser {
    pub username: String,
    pub is_staff: bool,
}

/// Every person who authenticates against the catalog API is staff.
pub fn bridge_login(username: &str) -> StaffUser {
    StaffUser {
        username: username.to_string(),
        is_staff: true,
    }
}

pub trait AccessPolicy: Send + Sync {
    fn name(&self) -> &'static str;
    fn is_authorized(&self, user: &StaffUser) -> bool;
    fn can_access_seller(&self, user: &StaffUser, seller_id: i64) -> bool;
    fn can_access_event(&self, user: &StaffUser, event_id: i64) -> bool;
    fn filter_sellers(&self, user: &StaffUser, sellers: Vec<SellerDto>) -> Vec<SellerDto>;
    fn filter_events(&self, user: &StaffUser, events: Vec<CatalogDto>) -> Vec<CatalogDto>;
}

/// Staff see everything, everyone else sees nothing.
pub struct StaffAccessPolicy;

impl AccessPolicy for StaffAccessPolicy {
    fn name(&self) -> &'static str {
        "staff"
    }

    fn is_authorized(&self, user: &StaffUser) -> bool {
        user.is_staff
    }

    fn can_access_seller(&self, user: &StaffUser, _seller_id: i64) -> bool {
        user.is_staff
    }

    fn can_access_event(&self, user: &StaffUser, _event_id: i64) -> bool {
        user.is_staff
    }

    fn filter_sellers(&self, user: &StaffUser, sellers: Vec<SellerDto>) -> Vec<SellerDto> {
        if user.is_staff {
            sellers
        } else {
            Vec::new()
        }
    }

    fn filter_events(&self, user: &StaffUser, events: Vec<CatalogDto>) -> Vec<CatalogDto> {
        if user.is_staff {
            events
        } else {
            Vec::new()
        }
    }
}

/// Picks the policy named in the configuration.
pub fn policy_from_name(name: &str) -> Arc<dyn AccessPolicy> {
    match name.trim().to_lowercase().as_str() {
        "staff" => Arc::new(StaffAccessPolicy),
        other => {
            log::warn!("Unknown access policy '{other}', falling back to staff");
            Arc::new(StaffAccessPolicy)
        }
    }
}

/// What the cookie session holds about the visitor.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub token: Option<AccessToken>,
    pub username: Option<String>,
    pub user: Option<StaffUser>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Rehydrated {
    Existing(StaffUser),
    /// The session predates local identities and only carries the username.
    Bridged(StaffUser),
}

impl Rehydrated {
    pub fn user(&self) -> &StaffUser {
        match self {
            Rehydrated::Existing(user) | Rehydrated::Bridged(user) => user,
        }
    }

    pub fn into_user(self) -> StaffUser {
        match self {
            Rehydrated::Existing(user) | Rehydrated::Bridged(user) => user,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    NotAuthenticated,
    /// A token without any username. The session has to be flushed.
    Unbridgeable,
}

pub fn rehydrate(state: &SessionState) -> Result<Rehydrated, Rejection> {
    if state.token.is_none() {
        return Err(Rejection::NotAuthenticated);
    }
    if let Some(user) = &state.user {
        return Ok(Rehydrated::Existing(user.clone()));
    }
    match state.username.as_deref().map(str::trim) {
        Some(username) if !username.is_empty() => Ok(Rehydrated::Bridged(bridge_login(username))),
        _ => Err(Rejection::Unbridgeable),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    fn token() -> AccessToken {
        AccessToken {
            access_token: "t".to_string(),
            refresh_token: None,
            expires_at: OffsetDateTime::now_utc(),
        }
    }

    fn seller(id: i64) -> SellerDto {
        SellerDto {
            id,
            name: format!("House {id}"),
            customer_display_id: Some(id.to_string()),
            is_active: Some(true),
        }
    }

    #[test]
    fn no_token_is_not_authenticated() {
        let state = SessionState {
            username: Some("alice".into()),
            ..Default::default()
        };
        assert_eq!(rehydrate(&state), Err(Rejection::NotAuthenticated));
    }

    #[test]
    fn stored_user_is_reused() {
        let user = StaffUser {
            username: "alice".into(),
            is_staff: false,
        };
        let state = SessionState {
            token: Some(token()),
            username: Some("alice".into()),
            user: Some(user.clone()),
        };
        assert_eq!(rehydrate(&state), Ok(Rehydrated::Existing(user)));
    }

    #[test]
    fn legacy_session_is_bridged_as_staff() {
        let state = SessionState {
            token: Some(token()),
            username: Some("bob@example.com".into()),
            user: None,
        };
        let rehydrated = rehydrate(&state).expect("bridged");
        assert!(matches!(rehydrated, Rehydrated::Bridged(_)));
        assert_eq!(rehydrated.user().username, "bob@example.com");
        assert!(rehydrated.user().is_staff);
    }

    #[test]
    fn token_without_username_is_unbridgeable() {
        let state = SessionState {
            token: Some(token()),
            username: Some("  ".into()),
            user: None,
        };
        assert_eq!(rehydrate(&state), Err(Rejection::Unbridgeable));
    }

    #[test]
    fn staff_policy() {
        let policy = policy_from_name("staff");
        let staff = bridge_login("alice");
        let visitor = StaffUser {
            username: "eve".into(),
            is_staff: false,
        };
        assert!(policy.is_authorized(&staff));
        assert!(!policy.is_authorized(&visitor));
        assert!(policy.can_access_seller(&staff, 1));
        assert!(!policy.can_access_event(&visitor, 1));
        assert_eq!(policy.filter_sellers(&staff, vec![seller(1), seller(2)]).len(), 2);
        assert!(policy.filter_sellers(&visitor, vec![seller(1)]).is_empty());
        assert!(policy.filter_events(&visitor, vec![]).is_empty());
    }

    #[test]
    fn unknown_policy_falls_back_to_staff() {
        assert_eq!(policy_from_name("per-seller").name(), "staff");
    }
}
