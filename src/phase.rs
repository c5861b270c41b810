//! Pre- and post-request phase functions.
//!
//! Pre-request phases run after routing and before the handler. Each receives
//! the current [`Context`] and returns the one the next phase (and finally the
//! handler) sees; an `Err` stops the chain and becomes the response.
//!
//! Post-request phases run after the handler with the final status, byte
//! count, and elapsed time. They cannot change the response, which has
//! already been produced; their errors are logged and dropped.

use std::sync::Arc;
use std::time::Duration;

use http::StatusCode;
use tracing::warn;

use crate::context::Context;
use crate::error::BoxError;
use crate::request::{Request, RequestHead};

pub type PreRequestFn =
    Arc<dyn Fn(Context, &Request) -> Result<Context, BoxError> + Send + Sync>;

pub type PostRequestFn =
    Arc<dyn Fn(&Context, &RequestHead, &Completion) -> Result<(), BoxError> + Send + Sync>;

/// What a post-request phase learns about the finished response.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Completion {
    pub status: StatusCode,
    pub size: u64,
    pub duration: Duration,
}

/// Threads the context through every phase. Returns the index of the failing
/// phase alongside its error.
pub(crate) fn run_pre(
    phases: &[PreRequestFn],
    mut ctx: Context,
    req: &Request,
) -> Result<Context, (usize, BoxError)> {
    for (index, phase) in phases.iter().enumerate() {
        ctx = phase(ctx, req).map_err(|e| (index, e))?;
    }
    Ok(ctx)
}

pub(crate) fn run_post(
    phases: &[PostRequestFn],
    ctx: &Context,
    head: &RequestHead,
    completion: &Completion,
) {
    for (index, phase) in phases.iter().enumerate() {
        if let Err(e) = phase(ctx, head, completion) {
            warn!(phase = index, error = %e, "post-request phase failed");
        }
    }
}
