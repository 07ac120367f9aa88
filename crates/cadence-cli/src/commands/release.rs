use tracing::info;

use cadence_core::DeployStrategy;
use cadence_rollout::ReleaseRequest;

use super::Context;

pub async fn run(
    ctx: &Context,
    env: &str,
    name: Option<String>,
    strategy: Option<DeployStrategy>,
    rollback_on_failure: bool,
) -> anyhow::Result<bool> {
    let name = name
        .or_else(|| ctx.config.release.name.clone())
        .unwrap_or_else(|| "release".to_string());

    let mut request = ReleaseRequest::new(env, &name, ctx.config.declarations())
        .with_strategy(strategy.unwrap_or(ctx.config.release.strategy))
        .with_rollback_on_failure(rollback_on_failure && ctx.config.release.rollback_on_failure);
    request.notify_channels = ctx.config.release.notify.clone();
    request.deploy_timeout = ctx.config.deploy_timeout();

    info!(release = %name, environment = %env, services = request.services.len(), "starting release");
    let result = ctx.coordinator()?.coordinate_release(request).await?;
    super::print_json(&result)?;
    Ok(result.success)
}
