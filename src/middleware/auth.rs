//! Authorization middleware.

use std::sync::Arc;

use super::{Middleware, Next, from_fn};
use crate::app_error::AppError;
use crate::request::Request;
use crate::response::IntoResponse;

/// Rejects requests the configured [`Authorizer`](crate::Authorizer)
/// refuses, with `401 UNAUTHORIZED`.
///
/// The authorizer comes from the server's resources. Without one every
/// request is refused with `500`.
pub fn authorize() -> Middleware {
    from_fn(|req: Request, next: Next| async move {
        match check(&req) {
            Ok(()) => next.run(req).await,
            Err(err) => err.into_response(),
        }
    })
}

fn check(req: &Request) -> Result<(), AppError> {
    let ctx = req.context();
    let Some(authorizer) = ctx.resources().authorizer().map(Arc::clone) else {
        return Err(AppError::internal("An internal error occurred")
            .add_internal_log("authorize middleware used without a configured authorizer")
            .with_context(ctx.clone()));
    };
    authorizer.authorize(ctx, req).map_err(|e| {
        AppError::unauthorized("Unauthorized")
            .with_error(e)
            .with_context(ctx.clone())
    })
}
