//! JWT authentication for NATS requests

use anyhow::{anyhow, Result};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{Publisher, Request, UserRole};

/// Token lifetime (one working day)
const TOKEN_TTL_SECS: usize = 8 * 60 * 60;

/// JWT claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,
    pub email: String,
    /// super_admin, admin, partner or viewer
    pub role: String,
    /// Partner account the user acts for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partner_id: Option<String>,
    pub iat: usize,
    pub exp: usize,
}

/// Authentication result from extract_auth
#[derive(Debug, Clone)]
pub struct AuthInfo {
    pub user_id: Uuid,
    pub role: UserRole,
    pub partner_id: Option<Uuid>,
}

impl AuthInfo {
    /// Partner that owns what this user creates. Partners always own their
    /// own uploads; administrators may name any partner.
    pub fn owning_partner(&self, requested: Option<Uuid>) -> Option<Uuid> {
        match self.role {
            UserRole::Partner => Some(self.partner_id.unwrap_or(self.user_id)),
            _ => requested,
        }
    }

    /// Partners only reach publishers they own; other roles reach all of them.
    pub fn can_access(&self, publisher: &Publisher) -> bool {
        self.role != UserRole::Partner || publisher.partner_id == self.owning_partner(None)
    }

    pub fn can_upload(&self) -> bool {
        self.role.is_admin() || self.role == UserRole::Partner
    }
}

/// Generate a JWT access token
pub fn generate_token(
    user_id: Uuid,
    email: &str,
    role: UserRole,
    partner_id: Option<Uuid>,
    secret: &str,
) -> Result<String> {
    let now = chrono::Utc::now().timestamp() as usize;

    let claims = Claims {
        sub: user_id.to_string(),
        email: email.to_string(),
        role: role_name(role).to_string(),
        partner_id: partner_id.map(|id| id.to_string()),
        iat: now,
        exp: now + TOKEN_TTL_SECS,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

/// Validate a JWT token and return claims
pub fn validate_token(token: &str, secret: &str) -> Result<Claims> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| anyhow!("Invalid token: {}", e))?;

    Ok(token_data.claims)
}

fn role_name(role: UserRole) -> &'static str {
    match role {
        UserRole::SuperAdmin => "super_admin",
        UserRole::Admin => "admin",
        UserRole::Partner => "partner",
        UserRole::Viewer => "viewer",
    }
}

/// Extract authentication info from a NATS request. A JWT token is required.
pub fn extract_auth<T>(request: &Request<T>, jwt_secret: &str) -> Result<AuthInfo> {
    let token = request
        .token
        .as_deref()
        .ok_or_else(|| anyhow!("No authentication provided, JWT token is required"))?;

    let claims = validate_token(token, jwt_secret)?;
    let user_id = Uuid::parse_str(&claims.sub)
        .map_err(|e| anyhow!("Invalid user_id in token: {}", e))?;
    let role = UserRole::from_str(&claims.role)
        .ok_or_else(|| anyhow!("Unknown role in token: {}", claims.role))?;
    let partner_id = claims
        .partner_id
        .as_deref()
        .map(Uuid::parse_str)
        .transpose()
        .map_err(|e| anyhow!("Invalid partner_id in token: {}", e))?;

    Ok(AuthInfo {
        user_id,
        role,
        partner_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EmptyPayload;

    const TEST_SECRET: &str = "test-secret-key-for-jwt-at-least-32-bytes-long";

    #[test]
    fn test_generate_and_validate_token() {
        let user_id = Uuid::new_v4();
        let token = generate_token(user_id, "ops@example.com", UserRole::Admin, None, TEST_SECRET).unwrap();

        let claims = validate_token(&token, TEST_SECRET).unwrap();
        assert_eq!(claims.sub, user_id.to_string());
        assert_eq!(claims.role, "admin");
        assert!(claims.partner_id.is_none());
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_validate_token_wrong_secret() {
        let token = generate_token(Uuid::new_v4(), "a@b.com", UserRole::Viewer, None, TEST_SECRET).unwrap();
        assert!(validate_token(&token, "another-secret-that-is-also-long-enough").is_err());
    }

    #[test]
    fn test_validate_token_malformed() {
        assert!(validate_token("not.a.valid.token", TEST_SECRET).is_err());
    }

    #[test]
    fn test_extract_auth_with_partner() {
        let user_id = Uuid::new_v4();
        let partner_id = Uuid::new_v4();
        let token = generate_token(user_id, "p@partner.com", UserRole::Partner, Some(partner_id), TEST_SECRET).unwrap();
        let request = Request::with_token(token, EmptyPayload {});

        let auth = extract_auth(&request, TEST_SECRET).unwrap();
        assert_eq!(auth.user_id, user_id);
        assert_eq!(auth.role, UserRole::Partner);
        assert_eq!(auth.partner_id, Some(partner_id));
    }

    #[test]
    fn test_extract_auth_without_token() {
        let request = Request {
            id: Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
            token: None,
            payload: EmptyPayload {},
        };
        assert!(extract_auth(&request, TEST_SECRET).is_err());
    }

    #[test]
    fn test_extract_auth_rejects_unknown_role() {
        let now = chrono::Utc::now().timestamp() as usize;
        let claims = Claims {
            sub: Uuid::new_v4().to_string(),
            email: "x@y.com".to_string(),
            role: "customer".to_string(),
            partner_id: None,
            iat: now,
            exp: now + 60,
        };
        let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(TEST_SECRET.as_bytes())).unwrap();
        let request = Request::with_token(token, EmptyPayload {});
        assert!(extract_auth(&request, TEST_SECRET).is_err());
    }

    #[test]
    fn test_partner_always_owns_uploads() {
        let user_id = Uuid::new_v4();
        let partner = AuthInfo { user_id, role: UserRole::Partner, partner_id: None };
        assert_eq!(partner.owning_partner(Some(Uuid::new_v4())), Some(user_id));
        assert!(partner.can_upload());

        let admin = AuthInfo { user_id, role: UserRole::Admin, partner_id: None };
        let requested = Uuid::new_v4();
        assert_eq!(admin.owning_partner(Some(requested)), Some(requested));
        assert_eq!(admin.owning_partner(None), None);

        let viewer = AuthInfo { user_id, role: UserRole::Viewer, partner_id: None };
        assert!(!viewer.can_upload());
    }
}
