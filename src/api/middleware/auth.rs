use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};

use crate::{
    api::state::AppState,
    auth::CurrentUser,
    error::{AppError, Result},
};

fn authenticate(
    state: &AppState,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
) -> Result<CurrentUser> {
    let TypedHeader(Authorization(bearer)) = bearer.ok_or(AppError::Unauthorized)?;
    state
        .service_context
        .auth_service
        .validate_access_token(bearer.token())
}

pub async fn require_auth(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    mut request: Request,
    next: Next,
) -> Result<Response> {
    let current_user = authenticate(&state, bearer)?;

    request.extensions_mut().insert(current_user);

    Ok(next.run(request).await)
}

/// Gym admins of their own gym, or super admins.
pub async fn require_gym_admin(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    mut request: Request,
    next: Next,
) -> Result<Response> {
    let current_user = authenticate(&state, bearer)?;

    if !current_user.role.can_manage_gym() {
        tracing::debug!("User {} denied admin route", current_user.user_id);
        return Err(AppError::Forbidden);
    }

    request.extensions_mut().insert(current_user);

    Ok(next.run(request).await)
}
