//! Caller identity forwarded by the fronting gateway.
//!
//! Authentication happens upstream; requests reach this service with the
//! user id, roles and e-mail in headers.

use std::future::{ready, Ready};

use actix_web::{dev::Payload, FromRequest, HttpRequest};

use crate::error::ServiceError;

pub const USER_ID_HEADER: &str = "X-User-Id";
pub const USER_ROLES_HEADER: &str = "X-User-Roles";
pub const USER_EMAIL_HEADER: &str = "X-User-Email";

const ADMIN_ROLES: [&str; 2] = ["Administrators", "SuperUser"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: i32,
    pub is_admin: bool,
    pub email: Option<String>,
}

impl Caller {
    pub fn require_admin(&self) -> Result<(), ServiceError> {
        if self.is_admin {
            Ok(())
        } else {
            Err(ServiceError::Forbidden("Administrator access required".to_string()))
        }
    }

    /// Owners and administrators may act on a booking.
    pub fn require_owner_or_admin(&self, owner_id: i32, action: &str) -> Result<(), ServiceError> {
        if self.is_admin || self.user_id == owner_id {
            Ok(())
        } else {
            Err(ServiceError::Forbidden(format!("You don't have permission to {}", action)))
        }
    }

    fn from_request_headers(req: &HttpRequest) -> Result<Self, ServiceError> {
        let header = |name: &str| {
            req.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        let user_id = header(USER_ID_HEADER)
            .and_then(|v| v.parse::<i32>().ok())
            .filter(|id| *id > 0)
            .ok_or(ServiceError::Unauthorized)?;

        let is_admin = header(USER_ROLES_HEADER)
            .map(|roles| roles.split(',').any(|r| ADMIN_ROLES.contains(&r.trim())))
            .unwrap_or(false);

        Ok(Caller {
            user_id,
            is_admin,
            email: header(USER_EMAIL_HEADER).map(str::to_owned),
        })
    }
}

impl FromRequest for Caller {
    type Error = ServiceError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(Caller::from_request_headers(req))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn reads_identity_headers() {
        let req = TestRequest::default()
            .insert_header((USER_ID_HEADER, "42"))
            .insert_header((USER_ROLES_HEADER, "Registered Users, Administrators"))
            .insert_header((USER_EMAIL_HEADER, "anna@example.com"))
            .to_http_request();

        let caller = Caller::from_request_headers(&req).unwrap();
        assert_eq!(
            caller,
            Caller { user_id: 42, is_admin: true, email: Some("anna@example.com".to_string()) }
        );
    }

    #[test]
    fn plain_users_are_not_admins() {
        let req = TestRequest::default()
            .insert_header((USER_ID_HEADER, "7"))
            .insert_header((USER_ROLES_HEADER, "Registered Users"))
            .to_http_request();

        let caller = Caller::from_request_headers(&req).unwrap();
        assert!(!caller.is_admin);
        assert!(caller.email.is_none());
        assert!(caller.require_admin().is_err());
        assert!(caller.require_owner_or_admin(7, "view this booking").is_ok());
        assert!(caller.require_owner_or_admin(8, "view this booking").is_err());
    }

    #[test]
    fn missing_or_invalid_user_id_is_unauthorized() {
        for value in ["", "abc", "0", "-5"] {
            let req = TestRequest::default().insert_header((USER_ID_HEADER, value)).to_http_request();
            assert!(matches!(Caller::from_request_headers(&req), Err(ServiceError::Unauthorized)));
        }

        let req = TestRequest::default().to_http_request();
        assert!(matches!(Caller::from_request_headers(&req), Err(ServiceError::Unauthorized)));
    }
}
