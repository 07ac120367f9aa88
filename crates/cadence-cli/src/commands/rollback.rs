use cadence_rollout::{RollbackRequest, RollbackTarget};

use super::Context;

pub struct Options {
    pub env: String,
    pub to: Option<String>,
    pub reason: String,
    pub preserve_data: bool,
    pub force: bool,
    pub dry_run: bool,
    pub allow_service_gap: bool,
}

pub async fn run(ctx: &Context, options: Options) -> anyhow::Result<bool> {
    let target = match options.to {
        Some(id) => RollbackTarget::Deployment(id),
        None => RollbackTarget::LatestPrevious,
    };
    let mut request = RollbackRequest::new(&options.env, target, &options.reason);
    request.preserve_data = options.preserve_data;
    request.force = options.force;
    request.dry_run = options.dry_run;
    request.allow_service_gap = options.allow_service_gap;

    let result = ctx.rollback_manager()?.rollback(&request).await?;
    super::print_json(&result)?;
    Ok(result.success)
}

pub async fn restore_snapshot(ctx: &Context, rollback_id: &str) -> anyhow::Result<bool> {
    let result = ctx.rollback_manager()?.restore_snapshot(rollback_id).await?;
    super::print_json(&result)?;
    Ok(result.success)
}
