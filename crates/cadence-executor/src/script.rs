//! Deploy and restore by running external commands.
//!
//! Each call spawns the configured argv with the service context in
//! `CADENCE_*` environment variables. Exit status 0 is success. A deploy
//! command may print a JSON object on its last stdout line carrying
//! `deployment_id` and `health`; anything else on stdout is ignored.

use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use cadence_core::BoxFuture;
use cadence_core::config::ExecutorSettings;

use crate::error::{ExecutorError, ExecutorResult};
use crate::executor::{ServiceDeployer, ServiceRestorer};
use crate::request::*;

/// Command-backed deployer and restorer.
#[derive(Debug, Clone, Default)]
pub struct ScriptDeployer {
    deploy: Vec<String>,
    restore: Vec<String>,
    capture: Option<Vec<String>>,
}

impl ScriptDeployer {
    pub fn new(deploy: Vec<String>, restore: Vec<String>) -> Self {
        Self {
            deploy,
            restore,
            capture: None,
        }
    }

    pub fn from_settings(settings: &ExecutorSettings) -> Self {
        Self {
            deploy: settings.deploy.clone(),
            restore: settings.restore.clone(),
            capture: settings.capture.clone(),
        }
    }

    pub fn with_capture(mut self, capture: Vec<String>) -> Self {
        self.capture = Some(capture);
        self
    }
}

impl ServiceDeployer for ScriptDeployer {
    fn deploy<'a>(
        &'a self,
        request: &'a DeployRequest,
    ) -> BoxFuture<'a, ExecutorResult<DeployReceipt>> {
        Box::pin(async move {
            let config = serde_json::to_string(&request.config)
                .map_err(|e| ExecutorError::Output(e.to_string()))?;
            let env = [
                ("CADENCE_SERVICE", request.service.clone()),
                ("CADENCE_ENVIRONMENT", request.environment.clone()),
                ("CADENCE_VERSION", request.version.clone()),
                ("CADENCE_CONFIG", config),
            ];
            let stdout = run(&self.deploy, "deploy", &env).await?;
            parse_receipt(&stdout)
        })
    }
}

impl ServiceRestorer for ScriptDeployer {
    fn capture<'a>(
        &'a self,
        environment: &'a str,
        service: &'a str,
    ) -> BoxFuture<'a, ExecutorResult<serde_json::Value>> {
        Box::pin(async move {
            let Some(argv) = &self.capture else {
                return Ok(serde_json::Value::Null);
            };
            let env = [
                ("CADENCE_SERVICE", service.to_string()),
                ("CADENCE_ENVIRONMENT", environment.to_string()),
            ];
            let stdout = run(argv, "capture", &env).await?;
            let trimmed = stdout.trim();
            if trimmed.is_empty() {
                return Ok(serde_json::Value::Null);
            }
            // Non-JSON state is kept verbatim as a string.
            Ok(serde_json::from_str(trimmed)
                .unwrap_or_else(|_| serde_json::Value::String(trimmed.to_string())))
        })
    }

    fn restore<'a>(&'a self, request: &'a RestoreRequest) -> BoxFuture<'a, ExecutorResult<()>> {
        Box::pin(async move {
            let mut env = vec![
                ("CADENCE_SERVICE", request.service.clone()),
                ("CADENCE_ENVIRONMENT", request.environment.clone()),
                ("CADENCE_PRESERVE_DATA", request.preserve_data.to_string()),
            ];
            match &request.target {
                Some(target) => {
                    let config = serde_json::to_string(&target.config)
                        .map_err(|e| ExecutorError::Output(e.to_string()))?;
                    env.push(("CADENCE_ACTION", "restore".to_string()));
                    env.push(("CADENCE_VERSION", target.version.clone()));
                    env.push(("CADENCE_CONFIG", config));
                    env.push(("CADENCE_DEPLOYMENT_ID", target.deployment_id.clone()));
                }
                None => env.push(("CADENCE_ACTION", "remove".to_string())),
            }
            if let Some(snapshot) = &request.snapshot_id {
                env.push(("CADENCE_SNAPSHOT_ID", snapshot.clone()));
            }
            run(&self.restore, "restore", &env).await.map(|_| ())
        })
    }
}

/// Run `argv` to completion and return its stdout.
async fn run(
    argv: &[String],
    kind: &'static str,
    env: &[(&str, String)],
) -> ExecutorResult<String> {
    let (program, args) = argv.split_first().ok_or(ExecutorError::NotConfigured(kind))?;
    debug!(%program, kind, "spawning command");

    let output = Command::new(program)
        .args(args)
        .envs(env.iter().map(|(k, v)| (*k, v.as_str())))
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| ExecutorError::Spawn {
            program: program.clone(),
            source,
        })?;

    if !output.status.success() {
        let code = output
            .status
            .code()
            .map_or_else(|| "signal".to_string(), |c| c.to_string());
        return Err(ExecutorError::Exit {
            program: program.clone(),
            code,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    String::from_utf8(output.stdout).map_err(|e| ExecutorError::Output(e.to_string()))
}

fn parse_receipt(stdout: &str) -> ExecutorResult<DeployReceipt> {
    let Some(last) = stdout.lines().rev().map(str::trim).find(|l| !l.is_empty()) else {
        return Ok(DeployReceipt::default());
    };
    if !last.starts_with('{') {
        return Ok(DeployReceipt::default());
    }
    serde_json::from_str(last).map_err(|e| ExecutorError::Output(format!("{e}: {last}")))
}
