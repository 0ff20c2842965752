//! Dependency preparation stage.

use std::process::Stdio;

use anyhow::{bail, Context};
use licenses_kernel::settings::DependencySettings;
use tokio::process::Command;

/// Run the configured package-installation command, if any.
///
/// The child's stdout is redirected to stderr so stdout stays reserved for the
/// bootstrap report.
pub async fn prepare(settings: &DependencySettings) -> anyhow::Result<()> {
    let Some((program, args)) = settings.command.split_first() else {
        tracing::info!("no dependency command configured; skipping preparation");
        return Ok(());
    };

    tracing::info!(program = %program, ?args, "preparing dependencies");

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::from(std::io::stderr()))
        .stderr(Stdio::inherit());
    if let Some(dir) = &settings.working_dir {
        command.current_dir(dir);
    }

    let status = command
        .status()
        .await
        .with_context(|| format!("failed to spawn dependency command '{}'", program))?;

    if !status.success() {
        bail!("dependency command '{}' failed with {}", program, status);
    }

    tracing::info!(program = %program, "dependencies prepared");
    Ok(())
}
