/*!
 * # Authentication and Authorization Module
 *
 * Shopper accounts backed by the `users` table:
 *
 * - registration and login with argon2 password hashes
 * - HS256 JWT access tokens plus rotating, database-tracked refresh tokens
 * - password reset via single-use emailed tokens
 * - `auth_middleware` / `role_middleware` and the `AuthRouterExt` helpers
 */

use async_trait::async_trait;
use axum::{
    extract::{DefaultBodyLimit, FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::config::AppConfig;
use crate::notifications::{Notification, NotificationService, PasswordResetNotice};
use crate::ApiResponse;

// Entity modules
pub mod password_reset_token;
pub mod refresh_token;
pub mod user;

pub mod password;

pub use password::{hash_password, verify_password, PasswordPolicy};
pub use user::UserRole;

pub const TOKEN_TYPE_ACCESS: &str = "access";
pub const TOKEN_TYPE_REFRESH: &str = "refresh";

/// Claim structure for JWT tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,           // Subject (user ID)
    pub name: Option<String>,  // User's name
    pub email: Option<String>, // User's email
    pub roles: Vec<String>,
    pub jti: String, // JWT ID (unique identifier for this token)
    pub iat: i64,
    pub exp: i64,
    pub nbf: i64,
    pub iss: String,
    pub aud: String,
    pub token_type: String, // "access" or "refresh"
}

/// Authenticated user data extracted from the JWT token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub name: Option<String>,
    pub email: Option<String>,
    pub roles: Vec<String>,
    pub token_id: String,
}

impl AuthUser {
    /// Check if the user has a specific role
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn is_admin(&self) -> bool {
        self.has_role(UserRole::Admin.as_str())
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or(AuthError::MissingAuth)
    }
}

/// Authentication configuration
#[derive(Clone, Debug)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_audience: String,
    pub jwt_issuer: String,
    pub access_token_expiration: Duration,
    pub refresh_token_expiration: Duration,
    pub password_reset_expiration: Duration,
}

impl AuthConfig {
    pub fn new(
        jwt_secret: String,
        jwt_audience: String,
        jwt_issuer: String,
        access_token_expiration: Duration,
        refresh_token_expiration: Duration,
        password_reset_expiration: Duration,
    ) -> Self {
        Self {
            jwt_secret,
            jwt_audience,
            jwt_issuer,
            access_token_expiration,
            refresh_token_expiration,
            password_reset_expiration,
        }
    }
}

impl From<&AppConfig> for AuthConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self::new(
            cfg.jwt_secret.clone(),
            cfg.auth_audience.clone(),
            cfg.auth_issuer.clone(),
            Duration::from_secs(cfg.jwt_expiration as u64),
            Duration::from_secs(cfg.refresh_token_expiration as u64),
            Duration::from_secs(cfg.password_reset_expiration as u64),
        )
    }
}

/// Token pair response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub refresh_expires_in: i64,
}

/// Public view of an account
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserProfile {
    pub id: Uuid,
    pub public_id: Uuid,
    pub name: String,
    pub email: String,
    pub role: UserRole,
    pub created_at: DateTime<Utc>,
}

impl From<user::Model> for UserProfile {
    fn from(model: user::Model) -> Self {
        Self {
            id: model.id,
            public_id: model.public_id,
            name: model.name,
            email: model.email,
            role: model.role,
            created_at: model.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct RegisterRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 8, max = 128))]
    pub password: String,
}

/// Login credentials
#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct LoginCredentials {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1))]
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct ForgotPasswordRequest {
    #[validate(email)]
    pub email: String,
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct ResetPasswordRequest {
    #[validate(length(min = 1))]
    pub token: String,
    #[validate(length(min = 8, max = 128))]
    pub new_password: String,
}

/// Authentication service that handles accounts and token issuance
#[derive(Clone)]
pub struct AuthService {
    pub config: AuthConfig,
    pub db: Arc<DatabaseConnection>,
    notifier: Arc<dyn NotificationService>,
    policy: PasswordPolicy,
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn sha256_hex(value: &str) -> String {
    hex::encode(Sha256::digest(value.as_bytes()))
}

fn chrono_duration(d: Duration) -> Result<ChronoDuration, AuthError> {
    ChronoDuration::from_std(d)
        .map_err(|_| AuthError::InternalError("Invalid token duration".to_string()))
}

impl AuthService {
    pub fn new(
        config: AuthConfig,
        db: Arc<DatabaseConnection>,
        notifier: Arc<dyn NotificationService>,
    ) -> Self {
        Self {
            config,
            db,
            notifier,
            policy: PasswordPolicy::default(),
        }
    }

    /// Create a customer account.
    #[instrument(skip(self, request), fields(email = %request.email))]
    pub async fn register(&self, request: RegisterRequest) -> Result<user::Model, AuthError> {
        request
            .validate()
            .map_err(|e| AuthError::Validation(e.to_string()))?;
        self.create_user(
            request.name.trim(),
            &request.email,
            &request.password,
            UserRole::Customer,
        )
        .await
    }

    async fn create_user(
        &self,
        name: &str,
        email: &str,
        password: &str,
        role: UserRole,
    ) -> Result<user::Model, AuthError> {
        self.policy
            .validate(password)
            .map_err(|e| AuthError::WeakPassword(e.to_string()))?;

        let email = normalize_email(email);
        let existing = user::Entity::find()
            .filter(user::Column::Email.eq(email.clone()))
            .one(&*self.db)
            .await?;
        if existing.is_some() {
            return Err(AuthError::EmailTaken);
        }

        let password_hash =
            hash_password(password).map_err(|e| AuthError::InternalError(e.to_string()))?;
        let now = Utc::now();
        let created = user::ActiveModel {
            id: Set(Uuid::new_v4()),
            public_id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            email: Set(email),
            password_hash: Set(password_hash),
            role: Set(role),
            active: Set(true),
            last_login_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await
        .map_err(|e| {
            if crate::errors::is_unique_violation(&e) {
                AuthError::EmailTaken
            } else {
                AuthError::from(e)
            }
        })?;

        info!(user_id = %created.id, role = role.as_str(), "user registered");
        Ok(created)
    }

    /// Create the configured administrator when no account with that email exists.
    pub async fn ensure_admin(&self, email: &str, password: &str) -> Result<user::Model, AuthError> {
        let normalized = normalize_email(email);
        if let Some(existing) = user::Entity::find()
            .filter(user::Column::Email.eq(normalized))
            .one(&*self.db)
            .await?
        {
            if existing.role != UserRole::Admin {
                warn!(user_id = %existing.id, "bootstrap admin email belongs to a non-admin account");
            }
            return Ok(existing);
        }
        self.create_user("Administrator", email, password, UserRole::Admin)
            .await
    }

    /// Verify credentials and issue a token pair.
    #[instrument(skip(self, credentials), fields(email = %credentials.email))]
    pub async fn login(&self, credentials: LoginCredentials) -> Result<TokenPair, AuthError> {
        let email = normalize_email(&credentials.email);
        let account = user::Entity::find()
            .filter(user::Column::Email.eq(email))
            .one(&*self.db)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        if !verify_password(&credentials.password, &account.password_hash) || !account.active {
            warn!(user_id = %account.id, "rejected login");
            return Err(AuthError::InvalidCredentials);
        }

        let mut stamp: user::ActiveModel = account.clone().into();
        stamp.last_login_at = Set(Some(Utc::now()));
        stamp.update(&*self.db).await?;

        self.generate_token(&account).await
    }

    /// Generate a JWT token pair for a user and persist the refresh token id
    pub async fn generate_token(&self, account: &user::Model) -> Result<TokenPair, AuthError> {
        let now = Utc::now();
        let access_exp = now + chrono_duration(self.config.access_token_expiration)?;
        let refresh_exp = now + chrono_duration(self.config.refresh_token_expiration)?;

        let refresh_jti = Uuid::new_v4().to_string();
        let roles = vec![account.role.as_str().to_string()];

        let access_claims = Claims {
            sub: account.id.to_string(),
            name: Some(account.name.clone()),
            email: Some(account.email.clone()),
            roles: roles.clone(),
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: access_exp.timestamp(),
            nbf: now.timestamp(),
            iss: self.config.jwt_issuer.clone(),
            aud: self.config.jwt_audience.clone(),
            token_type: TOKEN_TYPE_ACCESS.to_string(),
        };

        // Refresh tokens carry no profile data
        let refresh_claims = Claims {
            sub: account.id.to_string(),
            name: None,
            email: None,
            roles: vec![],
            jti: refresh_jti.clone(),
            iat: now.timestamp(),
            exp: refresh_exp.timestamp(),
            nbf: now.timestamp(),
            iss: self.config.jwt_issuer.clone(),
            aud: self.config.jwt_audience.clone(),
            token_type: TOKEN_TYPE_REFRESH.to_string(),
        };

        let access_token = self.encode_claims(&access_claims)?;
        let refresh_token = self.encode_claims(&refresh_claims)?;

        refresh_token::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(account.id),
            token_id: Set(refresh_jti),
            expires_at: Set(refresh_exp),
            revoked: Set(false),
            created_at: Set(now),
        }
        .insert(&*self.db)
        .await?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: self.config.access_token_expiration.as_secs() as i64,
            refresh_expires_in: self.config.refresh_token_expiration.as_secs() as i64,
        })
    }

    fn encode_claims(&self, claims: &Claims) -> Result<String, AuthError> {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(self.config.jwt_secret.as_bytes()),
        )
        .map_err(|e| AuthError::TokenCreation(e.to_string()))
    }

    /// Validate a JWT token and extract the claims
    pub fn validate_token(&self, token: &str) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[self.config.jwt_audience.as_str()]);
        validation.set_issuer(&[self.config.jwt_issuer.as_str()]);

        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.config.jwt_secret.as_bytes()),
            &validation,
        )
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            _ => AuthError::InvalidToken,
        })
    }

    /// Validate a bearer token; refresh tokens are not accepted here.
    pub fn authenticate(&self, token: &str) -> Result<AuthUser, AuthError> {
        let claims = self.validate_token(token)?;
        if claims.token_type != TOKEN_TYPE_ACCESS {
            return Err(AuthError::InvalidToken);
        }
        let user_id = Uuid::parse_str(&claims.sub).map_err(|_| AuthError::InvalidToken)?;
        Ok(AuthUser {
            user_id,
            name: claims.name,
            email: claims.email,
            roles: claims.roles,
            token_id: claims.jti,
        })
    }

    /// Rotate a refresh token: the presented one is revoked and a new pair issued.
    #[instrument(skip(self, refresh_token))]
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        let claims = self.validate_token(refresh_token)?;
        if claims.token_type != TOKEN_TYPE_REFRESH {
            return Err(AuthError::InvalidToken);
        }
        let user_id = Uuid::parse_str(&claims.sub).map_err(|_| AuthError::InvalidToken)?;

        let stored = refresh_token::Entity::find()
            .filter(refresh_token::Column::TokenId.eq(claims.jti.clone()))
            .filter(refresh_token::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await?
            .ok_or(AuthError::InvalidToken)?;
        if !stored.is_active(Utc::now()) {
            return Err(AuthError::RevokedToken);
        }

        let account = self.get_user(user_id).await?;
        if !account.active {
            return Err(AuthError::InvalidCredentials);
        }

        let mut revoked: refresh_token::ActiveModel = stored.into();
        revoked.revoked = Set(true);
        revoked.update(&*self.db).await?;

        self.generate_token(&account).await
    }

    pub async fn get_user(&self, user_id: Uuid) -> Result<user::Model, AuthError> {
        user::Entity::find_by_id(user_id)
            .one(&*self.db)
            .await?
            .ok_or(AuthError::UserNotFound)
    }

    /// Issue a single-use reset token. Unknown emails succeed silently.
    #[instrument(skip(self))]
    pub async fn forgot_password(&self, email: &str) -> Result<(), AuthError> {
        let Some(account) = user::Entity::find()
            .filter(user::Column::Email.eq(normalize_email(email)))
            .one(&*self.db)
            .await?
        else {
            info!("password reset requested for unknown email");
            return Ok(());
        };

        let mut raw = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut raw);
        let token = hex::encode(raw);
        let now = Utc::now();
        let expires_at = now + chrono_duration(self.config.password_reset_expiration)?;

        password_reset_token::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(account.id),
            token_hash: Set(sha256_hex(&token)),
            expires_at: Set(expires_at),
            used_at: Set(None),
            created_at: Set(now),
        }
        .insert(&*self.db)
        .await?;

        let notice = PasswordResetNotice {
            user_id: account.id,
            email: account.email.clone(),
            name: account.name.clone(),
            token,
            expires_at,
        };
        if let Err(err) = self.notifier.send(Notification::PasswordReset(notice)).await {
            warn!(user_id = %account.id, error = %err, "failed to send password reset notification");
        }

        info!(user_id = %account.id, "password reset token issued");
        Ok(())
    }

    /// Consume a reset token, set the new password and revoke every refresh token.
    #[instrument(skip(self, request))]
    pub async fn reset_password(&self, request: ResetPasswordRequest) -> Result<(), AuthError> {
        request
            .validate()
            .map_err(|e| AuthError::Validation(e.to_string()))?;
        self.policy
            .validate(&request.new_password)
            .map_err(|e| AuthError::WeakPassword(e.to_string()))?;

        let txn = self.db.begin().await?;
        let token = password_reset_token::Entity::find()
            .filter(password_reset_token::Column::TokenHash.eq(sha256_hex(request.token.trim())))
            .one(&txn)
            .await?
            .ok_or(AuthError::InvalidResetToken)?;
        let now = Utc::now();
        if !token.is_usable(now) {
            return Err(AuthError::InvalidResetToken);
        }

        let account = user::Entity::find_by_id(token.user_id)
            .one(&txn)
            .await?
            .ok_or(AuthError::UserNotFound)?;
        let password_hash = hash_password(&request.new_password)
            .map_err(|e| AuthError::InternalError(e.to_string()))?;

        let user_id = account.id;
        let mut account: user::ActiveModel = account.into();
        account.password_hash = Set(password_hash);
        account.updated_at = Set(now);
        account.update(&txn).await?;

        let mut used: password_reset_token::ActiveModel = token.into();
        used.used_at = Set(Some(now));
        used.update(&txn).await?;

        refresh_token::Entity::update_many()
            .col_expr(
                refresh_token::Column::Revoked,
                sea_orm::sea_query::Expr::value(true),
            )
            .filter(refresh_token::Column::UserId.eq(user_id))
            .exec(&txn)
            .await?;

        txn.commit().await?;
        info!(user_id = %user_id, "password reset completed");
        Ok(())
    }
}

/// Authentication error types
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing authentication")]
    MissingAuth,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token has expired")]
    TokenExpired,

    #[error("Token has been revoked")]
    RevokedToken,

    #[error("Token creation failed: {0}")]
    TokenCreation(String),

    #[error("User not found")]
    UserNotFound,

    #[error("Insufficient permissions")]
    InsufficientPermissions,

    #[error("Email is already registered")]
    EmailTaken,

    #[error("Weak password: {0}")]
    WeakPassword(String),

    #[error("Reset token is invalid or expired")]
    InvalidResetToken,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<DbErr> for AuthError {
    fn from(err: DbErr) -> Self {
        AuthError::DatabaseError(err.to_string())
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, error_code, error_message): (StatusCode, &str, String) = match &self {
            Self::MissingAuth => (
                StatusCode::UNAUTHORIZED,
                "AUTH_MISSING",
                "Authentication required".to_string(),
            ),
            Self::InvalidCredentials => (
                StatusCode::UNAUTHORIZED,
                "AUTH_INVALID_CREDENTIALS",
                "Invalid credentials".to_string(),
            ),
            Self::InvalidToken => (
                StatusCode::UNAUTHORIZED,
                "AUTH_INVALID_TOKEN",
                "Invalid authentication token".to_string(),
            ),
            Self::TokenExpired => (
                StatusCode::UNAUTHORIZED,
                "AUTH_TOKEN_EXPIRED",
                "Token has expired".to_string(),
            ),
            Self::RevokedToken => (
                StatusCode::UNAUTHORIZED,
                "AUTH_REVOKED_TOKEN",
                "Authentication token has been revoked".to_string(),
            ),
            Self::UserNotFound => (
                StatusCode::NOT_FOUND,
                "AUTH_USER_NOT_FOUND",
                "User not found".to_string(),
            ),
            Self::InsufficientPermissions => (
                StatusCode::FORBIDDEN,
                "AUTH_INSUFFICIENT_PERMISSIONS",
                "Insufficient permissions".to_string(),
            ),
            Self::EmailTaken => (
                StatusCode::CONFLICT,
                "AUTH_EMAIL_TAKEN",
                self.to_string(),
            ),
            Self::WeakPassword(_) => (StatusCode::BAD_REQUEST, "AUTH_WEAK_PASSWORD", self.to_string()),
            Self::InvalidResetToken => (
                StatusCode::BAD_REQUEST,
                "AUTH_INVALID_RESET_TOKEN",
                self.to_string(),
            ),
            Self::Validation(_) => (StatusCode::BAD_REQUEST, "AUTH_VALIDATION", self.to_string()),
            Self::TokenCreation(_) | Self::DatabaseError(_) | Self::InternalError(_) => {
                error!(error = %self, "authentication failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "AUTH_INTERNAL_ERROR",
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(serde_json::json!({
            "error": {
                "code": error_code,
                "message": error_message,
            }
        }));

        (status, body).into_response()
    }
}

/// Role middleware to check if a user has the required role
pub async fn role_middleware(
    State(required_role): State<String>,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let user = request
        .extensions()
        .get::<AuthUser>()
        .ok_or(AuthError::MissingAuth)?;

    if !user.has_role(&required_role) {
        return Err(AuthError::InsufficientPermissions);
    }

    Ok(next.run(request).await)
}

/// Authentication middleware that extracts and validates bearer tokens
pub async fn auth_middleware(mut request: Request, next: Next) -> Response {
    let auth_service = match request.extensions().get::<Arc<AuthService>>() {
        Some(service) => service.clone(),
        None => {
            error!("AuthService missing from request extensions");
            return AuthError::InternalError("Authentication service not available".to_string())
                .into_response();
        }
    };

    match extract_auth_from_headers(request.headers(), &auth_service) {
        Ok(user) => {
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        Err(e) => e.into_response(),
    }
}

fn extract_auth_from_headers(
    headers: &HeaderMap,
    auth_service: &AuthService,
) -> Result<AuthUser, AuthError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(AuthError::MissingAuth)?;
    let token = value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::MissingAuth)?;
    auth_service.authenticate(token)
}

/// Authentication routes
pub fn auth_routes() -> Router<Arc<AuthService>> {
    Router::new()
        .route("/register", post(register_handler))
        .route("/login", post(login_handler))
        .route("/refresh", post(refresh_token_handler))
        .route("/forgot-password", post(forgot_password_handler))
        .route("/reset-password", post(reset_password_handler))
        .merge(Router::new().route("/me", get(me_handler)).with_auth())
        .layer(DefaultBodyLimit::max(1024 * 64)) // 64KB limit
}

#[utoipa::path(
    post,
    path = "/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created", body = ApiResponse<UserProfile>),
        (status = 400, description = "Invalid input or weak password"),
        (status = 409, description = "Email already registered")
    ),
    tag = "auth"
)]
pub async fn register_handler(
    State(auth_service): State<Arc<AuthService>>,
    Json(request): Json<RegisterRequest>,
) -> Result<impl IntoResponse, AuthError> {
    let created = auth_service.register(request).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(UserProfile::from(created))),
    ))
}

#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginCredentials,
    responses(
        (status = 200, description = "Token pair issued", body = ApiResponse<TokenPair>),
        (status = 401, description = "Invalid credentials")
    ),
    tag = "auth"
)]
pub async fn login_handler(
    State(auth_service): State<Arc<AuthService>>,
    Json(credentials): Json<LoginCredentials>,
) -> Result<Json<ApiResponse<TokenPair>>, AuthError> {
    credentials
        .validate()
        .map_err(|_| AuthError::InvalidCredentials)?;
    let token_pair = auth_service.login(credentials).await?;
    Ok(Json(ApiResponse::success(token_pair)))
}

#[utoipa::path(
    post,
    path = "/auth/refresh",
    request_body = RefreshTokenRequest,
    responses(
        (status = 200, description = "Rotated token pair", body = ApiResponse<TokenPair>),
        (status = 401, description = "Invalid, expired or revoked refresh token")
    ),
    tag = "auth"
)]
pub async fn refresh_token_handler(
    State(auth_service): State<Arc<AuthService>>,
    Json(refresh_request): Json<RefreshTokenRequest>,
) -> Result<Json<ApiResponse<TokenPair>>, AuthError> {
    let token_pair = auth_service
        .refresh_token(&refresh_request.refresh_token)
        .await?;
    Ok(Json(ApiResponse::success(token_pair)))
}

#[utoipa::path(
    post,
    path = "/auth/forgot-password",
    request_body = ForgotPasswordRequest,
    responses((status = 202, description = "Reset email sent when the account exists")),
    tag = "auth"
)]
pub async fn forgot_password_handler(
    State(auth_service): State<Arc<AuthService>>,
    Json(request): Json<ForgotPasswordRequest>,
) -> Result<impl IntoResponse, AuthError> {
    request
        .validate()
        .map_err(|e| AuthError::Validation(e.to_string()))?;
    auth_service.forgot_password(&request.email).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse::<()>::message(
            "If the account exists, a reset link has been sent",
        )),
    ))
}

#[utoipa::path(
    post,
    path = "/auth/reset-password",
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password updated"),
        (status = 400, description = "Invalid or expired token")
    ),
    tag = "auth"
)]
pub async fn reset_password_handler(
    State(auth_service): State<Arc<AuthService>>,
    Json(request): Json<ResetPasswordRequest>,
) -> Result<Json<ApiResponse<()>>, AuthError> {
    auth_service.reset_password(request).await?;
    Ok(Json(ApiResponse::message("Password has been reset")))
}

#[utoipa::path(
    get,
    path = "/auth/me",
    responses(
        (status = 200, description = "Current account", body = ApiResponse<UserProfile>),
        (status = 401, description = "Missing or invalid token")
    ),
    security(("Bearer" = [])),
    tag = "auth"
)]
pub async fn me_handler(
    State(auth_service): State<Arc<AuthService>>,
    auth_user: AuthUser,
) -> Result<Json<ApiResponse<UserProfile>>, AuthError> {
    let account = auth_service.get_user(auth_user.user_id).await?;
    Ok(Json(ApiResponse::success(account.into())))
}

/// Extension methods for Router to add auth middleware
pub trait AuthRouterExt {
    fn with_auth(self) -> Self;
    fn with_role(self, role: &str) -> Self;
}

impl<S> AuthRouterExt for Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn with_auth(self) -> Self {
        self.layer(axum::middleware::from_fn(auth_middleware))
    }

    fn with_role(self, role: &str) -> Self {
        self.layer(axum::middleware::from_fn_with_state(
            role.to_string(),
            role_middleware,
        ))
        .with_auth()
    }
}
