use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::db::AppState;
use crate::error::AppError;
use crate::util::extract_bearer_token;

/// The authenticated account, inserted by [`account_auth`].
#[derive(Debug, Clone)]
pub struct AccountContext {
    pub account_id: String,
}

/// Require a valid session token and attach the caller's account.
pub async fn account_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_bearer_token(request.headers()).ok_or(AppError::Unauthorized)?;
    let account_id = state.sessions.verify(token)?;

    request
        .extensions_mut()
        .insert(AccountContext { account_id });

    Ok(next.run(request).await)
}
