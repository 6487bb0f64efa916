//! Registration, login and bearer-token verification.

use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use crate::config::AdminBootstrap;
use crate::domain::aggregates::user::normalize_email;
use crate::domain::aggregates::{EntityKind, Role, User, UserProfile};
use crate::services::AuditService;
use crate::store::{Filter, Page, PaginatedResponse, Repository};
use crate::{EcommerceError, Result};

/// JWT claims for storefront users
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// User ID
    pub sub: Uuid,
    pub email: String,
    pub role: Role,
    /// Expiration (Unix timestamp seconds)
    pub exp: usize,
    /// Issued at (Unix timestamp seconds)
    pub iat: usize,
}

/// Authenticated caller, extracted from the bearer token.
#[derive(Clone, Debug, PartialEq)]
pub struct AuthUser {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
}

impl AuthUser {
    pub fn is_staff(&self) -> bool { self.role.is_staff() }
}

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 8, max = 128))]
    pub password: String,
    #[validate(length(min = 1, max = 100))]
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: UserProfile,
}

#[derive(Clone)]
pub struct AuthService {
    users: Repository<User>,
    audit: AuditService,
    jwt_secret: String,
    expiry_hours: i64,
}

impl AuthService {
    pub fn new(users: Repository<User>, audit: AuditService, jwt_secret: String, expiry_hours: i64) -> Self {
        Self { users, audit, jwt_secret, expiry_hours }
    }

    pub async fn register(&self, mut req: RegisterRequest) -> Result<AuthResponse> {
        req.email = normalize_email(&req.email);
        req.validate()?;
        let email = req.email.clone();
        if self.find_by_email(&email).await?.is_some() {
            return Err(EcommerceError::Validation("User already exists".into()));
        }
        let hash = hash_password(&req.password).map_err(|e| {
            tracing::error!("password hashing failed: {e}");
            EcommerceError::Validation("Password could not be processed".into())
        })?;
        // A concurrent registration can still hit the unique index.
        let user = self.users.insert(User::new(&email, req.name.trim(), hash, Role::Customer)).await.map_err(|e| match e {
            EcommerceError::Conflict(_) => EcommerceError::Validation("User already exists".into()),
            other => other,
        })?;
        tracing::info!(user_id = %user.id(), "user registered");
        self.audit.record(Some(user.id()), "user.registered", EntityKind::User, Some(user.id()), json!({ "email": user.email() })).await;
        Ok(AuthResponse { token: self.issue_token(&user)?, user: user.profile() })
    }

    pub async fn login(&self, req: LoginRequest) -> Result<AuthResponse> {
        let email = normalize_email(&req.email);
        let user = self
            .find_by_email(&email)
            .await?
            .ok_or_else(|| EcommerceError::Unauthorized("Invalid credentials".into()))?;
        if !verify_password(&req.password, user.password_hash()) {
            return Err(EcommerceError::Unauthorized("Invalid credentials".into()));
        }
        if !user.is_active() {
            return Err(EcommerceError::Forbidden);
        }
        let (user, _) = self.users.update(user.id(), |u| { u.record_login(); Ok(()) }).await?;
        Ok(AuthResponse { token: self.issue_token(&user)?, user: user.profile() })
    }

    pub fn issue_token(&self, user: &User) -> Result<String> {
        let now = chrono::Utc::now();
        let claims = Claims {
            sub: user.id(),
            email: user.email().to_string(),
            role: user.role(),
            exp: (now + chrono::Duration::hours(self.expiry_hours)).timestamp() as usize,
            iat: now.timestamp() as usize,
        };
        jsonwebtoken::encode(&Header::default(), &claims, &EncodingKey::from_secret(self.jwt_secret.as_bytes())).map_err(|e| {
            tracing::error!("JWT creation failed: {e}");
            EcommerceError::Unauthorized("Token could not be issued".into())
        })
    }

    pub fn verify_token(&self, token: &str) -> Result<AuthUser> {
        let data = jsonwebtoken::decode::<Claims>(token, &DecodingKey::from_secret(self.jwt_secret.as_bytes()), &Validation::default())
            .map_err(|e| {
                tracing::debug!("JWT validation failed: {e}");
                EcommerceError::Unauthorized("Invalid or expired token".into())
            })?;
        Ok(AuthUser { id: data.claims.sub, email: data.claims.email, role: data.claims.role })
    }

    /// Verifies the token and resolves the caller from the stored account, so
    /// deactivation and role changes apply to tokens already issued.
    pub async fn authenticate(&self, token: &str) -> Result<AuthUser> {
        let claims = self.verify_token(token)?;
        let user = self.users.get(claims.id).await?.ok_or_else(|| EcommerceError::Unauthorized("Invalid or expired token".into()))?;
        if !user.is_active() {
            tracing::debug!(user_id = %user.id(), "inactive user rejected");
            return Err(EcommerceError::Forbidden);
        }
        Ok(AuthUser { id: user.id(), email: user.email().to_string(), role: user.role() })
    }

    pub async fn me(&self, user_id: Uuid) -> Result<UserProfile> {
        Ok(self.users.require(user_id).await?.profile())
    }

    pub async fn list_users(&self, role: Option<Role>, search: Option<&str>, page: Page) -> Result<PaginatedResponse<UserProfile>> {
        let filter = Filter::new().eq_opt("role", role).search(&["email", "name"], search);
        let found = self.users.find(&filter, page).await?;
        Ok(PaginatedResponse { data: found.data.iter().map(User::profile).collect(), total: found.total, page: found.page })
    }

    pub async fn set_role(&self, user_id: Uuid, role: Role, actor: &AuthUser) -> Result<UserProfile> {
        if user_id == actor.id {
            return Err(EcommerceError::Validation("You cannot change your own role".into()));
        }
        let (user, previous) = self.users.update(user_id, |u| { let prev = u.role(); u.set_role(role); Ok(prev) }).await?;
        self.audit
            .record(Some(actor.id), "user.role_changed", EntityKind::User, Some(user_id), json!({ "from": previous, "to": role }))
            .await;
        Ok(user.profile())
    }

    pub async fn set_active(&self, user_id: Uuid, active: bool, actor: &AuthUser) -> Result<UserProfile> {
        if user_id == actor.id {
            return Err(EcommerceError::Validation("You cannot deactivate yourself".into()));
        }
        let (user, _) = self.users.update(user_id, |u| { u.set_active(active); Ok(()) }).await?;
        self.audit.record(Some(actor.id), "user.active_changed", EntityKind::User, Some(user_id), json!({ "active": active })).await;
        Ok(user.profile())
    }

    /// Creates the configured administrator when no user has that email yet.
    pub async fn ensure_admin(&self, admin: &AdminBootstrap) -> Result<()> {
        let email = normalize_email(&admin.email);
        if self.find_by_email(&email).await?.is_some() {
            return Ok(());
        }
        let hash = hash_password(&admin.password).map_err(|e| EcommerceError::Config(format!("admin password: {e}")))?;
        let user = self.users.insert(User::new(&email, "Administrator", hash, Role::Admin)).await?;
        tracing::info!(user_id = %user.id(), email = %email, "bootstrap administrator created");
        Ok(())
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        self.users.find_one(&Filter::new().eq("email", normalize_email(email))).await
    }
}

pub fn hash_password(password: &str) -> std::result::Result<String, argon2::password_hash::Error> {
    use argon2::password_hash::rand_core::OsRng;
    use argon2::password_hash::SaltString;
    use argon2::{Argon2, PasswordHasher};
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default().hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    use argon2::{Argon2, PasswordHash, PasswordVerifier};
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestApp;

    fn register(email: &str) -> RegisterRequest {
        RegisterRequest { email: email.into(), password: "correct horse".into(), name: "Ada".into() }
    }

    #[tokio::test]
    async fn test_register_and_login() {
        let app = TestApp::new().await;
        let auth = &app.services.auth;
        let registered = auth.register(register("Ada@Example.com")).await.unwrap();
        assert_eq!(registered.user.email, "ada@example.com");
        let caller = auth.verify_token(&registered.token).unwrap();
        assert_eq!(caller.role, Role::Customer);

        let login = auth.login(LoginRequest { email: "ada@example.com".into(), password: "correct horse".into() }).await.unwrap();
        assert_eq!(login.user.id, registered.user.id);
        let bad = auth.login(LoginRequest { email: "ada@example.com".into(), password: "wrong".into() }).await;
        assert!(matches!(bad, Err(EcommerceError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected_without_creating_user() {
        let app = TestApp::new().await;
        let auth = &app.services.auth;
        auth.register(register("dup@example.com")).await.unwrap();
        let err = auth.register(register("  DUP@example.com")).await.unwrap_err();
        assert!(matches!(err, EcommerceError::Validation(msg) if msg == "User already exists"));
        let users = auth.list_users(None, Some("dup@"), Page::default()).await.unwrap();
        assert_eq!(users.total, 1);
    }

    #[tokio::test]
    async fn test_invalid_registration_input() {
        let app = TestApp::new().await;
        let err = app.services.auth.register(RegisterRequest { email: "not-an-email".into(), password: "short".into(), name: "".into() }).await;
        assert!(matches!(err, Err(EcommerceError::Validation(_))));
    }

    #[tokio::test]
    async fn test_authenticate_follows_stored_account() {
        let app = TestApp::new().await;
        let auth = &app.services.auth;
        let admin = AuthUser { id: Uuid::new_v4(), email: "root@example.com".into(), role: Role::Admin };
        let registered = auth.register(register("staff@example.com")).await.unwrap();
        let token = registered.token;
        let user_id = registered.user.id;

        auth.set_role(user_id, Role::Staff, &admin).await.unwrap();
        let caller = auth.authenticate(&token).await.unwrap();
        assert_eq!(caller.role, Role::Staff);
        // Claims still carry the role at issue time.
        assert_eq!(auth.verify_token(&token).unwrap().role, Role::Customer);

        auth.set_active(user_id, false, &admin).await.unwrap();
        assert!(matches!(auth.authenticate(&token).await, Err(EcommerceError::Forbidden)));
        auth.set_active(user_id, true, &admin).await.unwrap();
        assert_eq!(auth.authenticate(&token).await.unwrap().id, user_id);
    }

    #[tokio::test]
    async fn test_token_for_unknown_user_rejected() {
        let app = TestApp::new().await;
        let ghost = User::new("ghost@example.com", "Ghost", "hash".into(), Role::Customer);
        let token = app.services.auth.issue_token(&ghost).unwrap();
        assert!(matches!(app.services.auth.authenticate(&token).await, Err(EcommerceError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_tampered_token_rejected() {
        let app = TestApp::new().await;
        let token = app.services.auth.register(register("t@example.com")).await.unwrap().token;
        let tampered = format!("{token}x");
        assert!(app.services.auth.verify_token(&tampered).is_err());
    }

    #[test]
    fn test_password_hash_roundtrip() {
        let hash = hash_password("s3cret-pass").unwrap();
        assert!(verify_password("s3cret-pass", &hash));
        assert!(!verify_password("other", &hash));
        assert!(!verify_password("s3cret-pass", "not-a-hash"));
    }
}
