//! Account routes: signup, login and profile management.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Extension, Json, Router, middleware};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::Result;
use crate::limits::RateLimiter;
use crate::router::Valid;
use crate::user::{ProfileUpdate, User};
use crate::AppState;

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct SignupBody {
    #[validate(custom(function = "crate::validation::username_rule"))]
    pub username: String,
    #[validate(custom(function = "crate::validation::phone_rule"))]
    pub phone: String,
    #[validate(custom(function = "crate::validation::password_rule"))]
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct LoginBody {
    /// Username or phone number.
    #[validate(length(min = 1, message = "Username/phone and password are required."))]
    pub identifier: String,
    #[validate(length(min = 1, message = "Username/phone and password are required."))]
    pub password: String,
}

#[derive(Debug, Default, Serialize, Deserialize, Validate)]
pub struct ProfileBody {
    #[validate(custom(function = "crate::validation::username_rule"))]
    pub username: Option<String>,
    #[validate(custom(function = "crate::validation::phone_rule"))]
    pub phone: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordBody {
    #[validate(length(min = 1, message = "Current password is required."))]
    pub current_password: String,
    #[validate(custom(function = "crate::validation::password_rule"))]
    pub new_password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub message: &'static str,
    pub user: User,
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
    pub user: User,
}

#[derive(Debug, Serialize)]
pub struct Message {
    pub message: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<&'static str>,
}

pub async fn signup(
    State(state): State<AppState>,
    Valid(body): Valid<SignupBody>,
) -> Result<(StatusCode, Json<AuthResponse>)> {
    let (user, token) = state
        .users
        .signup(&body.username, &body.phone, &body.password)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            message: "User created successfully",
            user,
            token,
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Valid(body): Valid<LoginBody>,
) -> Result<Json<AuthResponse>> {
    let (user, token) = state.users.login(&body.identifier, &body.password).await?;

    Ok(Json(AuthResponse {
        message: "Login successful",
        user,
        token,
    }))
}

pub async fn profile(Extension(user): Extension<User>) -> Json<ProfileResponse> {
    Json(ProfileResponse {
        message: None,
        user,
    })
}

pub async fn update_profile(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Valid(body): Valid<ProfileBody>,
) -> Result<Json<ProfileResponse>> {
    let user = state
        .users
        .update_profile(
            &user,
            ProfileUpdate {
                username: body.username,
                phone: body.phone,
            },
        )
        .await?;

    Ok(Json(ProfileResponse {
        message: Some("Profile updated successfully"),
        user,
    }))
}

pub async fn change_password(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Valid(body): Valid<ChangePasswordBody>,
) -> Result<Json<Message>> {
    state
        .users
        .change_password(&user, &body.current_password, &body.new_password)
        .await?;

    Ok(Json(Message {
        message: "Password changed successfully",
        note: None,
    }))
}

/// Tokens are stateless: logging out is dropping the token client-side.
pub async fn logout(Extension(_user): Extension<User>) -> Json<Message> {
    Json(Message {
        message: "Logout successful",
        note: Some("Please remove the token from client storage"),
    })
}

pub fn router(state: AppState) -> Router<AppState> {
    let mut public = Router::new()
        // `POST /api/auth/signup` goes to `signup`.
        .route("/signup", post(signup))
        // `POST /api/auth/login` goes to `login`.
        .route("/login", post(login));

    if let Some(limits) = &state.config.rate_limit {
        let limiter = Arc::new(RateLimiter::new(
            limits.auth_max_requests as usize,
            Duration::from_secs(limits.window_secs),
        )
        .trust_proxy(limits.trust_proxy));
        public = public.route_layer(middleware::from_fn_with_state(
            limiter,
            crate::middleware::rate_limit,
        ));
    }

    let private = Router::new()
        .route("/profile", get(profile).put(update_profile))
        .route("/change-password", post(change_password))
        .route("/logout", post(logout))
        .route_layer(middleware::from_fn_with_state(
            state,
            crate::middleware::authenticate,
        ));

    public.merge(private)
}
