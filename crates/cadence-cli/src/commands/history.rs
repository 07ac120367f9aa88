use serde::Serialize;

use cadence_registry::{Registry, ReleaseRecord, RollbackEntry};

use super::Context;

#[derive(Serialize)]
struct History {
    environment: String,
    releases: Vec<ReleaseRecord>,
    rollbacks: Vec<RollbackEntry>,
}

pub fn history(ctx: &Context, env: &str) -> anyhow::Result<bool> {
    let history = History {
        environment: env.to_string(),
        releases: ctx.registry.get_releases_by_environment(env)?,
        rollbacks: ctx.registry.get_rollbacks_by_environment(env)?,
    };
    super::print_json(&history)?;
    Ok(true)
}

pub fn stats(ctx: &Context, env: Option<&str>) -> anyhow::Result<bool> {
    let stats = ctx.registry.get_statistics(env)?;
    super::print_json(&stats)?;
    Ok(true)
}
