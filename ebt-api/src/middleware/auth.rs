use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{authorization::Bearer, Authorization, HeaderMapExt};
use ebt_core::{Actor, ActorRole};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::state::AppState;

pub const ROLE_CUSTOMER: &str = "CUSTOMER";
pub const ROLE_ADMIN: &str = "ADMIN";
pub const ROLE_SUPER_ADMIN: &str = "SUPER_ADMIN";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    pub email: Option<String>,
    pub role: String,
    pub exp: usize,
}

impl Claims {
    fn actor_role(&self) -> Option<ActorRole> {
        match self.role.as_str() {
            ROLE_CUSTOMER => Some(ActorRole::Customer),
            ROLE_ADMIN | ROLE_SUPER_ADMIN => Some(ActorRole::Admin),
            _ => None,
        }
    }
}

fn authenticate(state: &AppState, req: &Request) -> Result<Actor, AppError> {
    let bearer = req
        .headers()
        .typed_get::<Authorization<Bearer>>()
        .ok_or_else(|| AppError::AuthenticationError("missing bearer token".to_string()))?;

    let token_data = decode::<Claims>(
        bearer.token(),
        &DecodingKey::from_secret(state.auth.secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| AppError::AuthenticationError(e.to_string()))?;

    let claims = token_data.claims;
    let role = claims
        .actor_role()
        .ok_or_else(|| AppError::AuthorizationError(format!("unknown role {}", claims.role)))?;
    Ok(Actor { id: claims.sub, role })
}

/// Customers and staff. The resolved [`Actor`] is placed in request extensions.
pub async fn customer_auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let actor = authenticate(&state, &req)?;
    req.extensions_mut().insert(actor);
    Ok(next.run(req).await)
}

pub async fn admin_auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let actor = authenticate(&state, &req)?;
    if !actor.is_admin() {
        return Err(AppError::AuthorizationError("admin role required".to_string()));
    }
    req.extensions_mut().insert(actor);
    Ok(next.run(req).await)
}
