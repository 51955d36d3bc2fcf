//! Pre-call hook exposing the triggering job to handlers

use super::JobDispatcher;
use crate::broker::{CallHook, Context};
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::Weak;

/// Sets `ctx.locals.job` when `ctx.meta.job` names a job
///
/// Holds the dispatcher weakly; once the dispatcher is gone the hook does
/// nothing.
pub struct JobPopulator {
    dispatcher: Weak<JobDispatcher>,
}

impl JobPopulator {
    pub(crate) fn new(dispatcher: Weak<JobDispatcher>) -> Self {
        Self { dispatcher }
    }
}

#[async_trait]
impl CallHook for JobPopulator {
    async fn before(&self, ctx: &mut Context) -> Result<()> {
        ctx.locals.job = None;
        let Some((queue, id)) = ctx.job_meta() else {
            return Ok(());
        };
        let Some(dispatcher) = self.dispatcher.upgrade() else {
            return Ok(());
        };

        ctx.locals.job = match dispatcher.job_ref(&queue, &id).await {
            Ok(job) => job,
            Err(Error::QueueClosed(_)) => None,
            Err(e) => return Err(e),
        };
        if ctx.locals.job.is_none() {
            tracing::debug!("Job {} of queue {} named in call meta not found", id, queue);
        }
        Ok(())
    }
}
