//! Activation hooks
//!
//! Side effects fired after a proxy is committed as current. Every hook
//! is optional and best-effort: a failure is logged by the activator and
//! never rolls back the activation or blocks the hooks after it.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::config::HooksConfig;
use crate::models::ActiveProxy;

/// One activation side effect
#[async_trait]
pub trait ActivationHook: Send + Sync {
    fn name(&self) -> &'static str;
    async fn apply(&self, active: &ActiveProxy) -> anyhow::Result<()>;
}

/// Build the configured hook set in its fixed firing order:
/// egress routing, DNS guard, kill switch, MAC randomization,
/// fingerprint profile, anonymity bridge.
pub fn build_hooks(config: &HooksConfig) -> Vec<Box<dyn ActivationHook>> {
    let mut hooks: Vec<Box<dyn ActivationHook>> = Vec::new();

    if config.egress_env {
        hooks.push(Box::new(EgressEnvHook {
            curlrc_path: config.curlrc_path.clone(),
        }));
    }
    if let Some(path) = &config.dnscrypt_config {
        hooks.push(Box::new(DnsGuardHook {
            config_path: path.clone(),
        }));
    }
    if let Some(cmd) = &config.kill_switch_cmd {
        hooks.push(Box::new(CommandHook::new("kill-switch", cmd)));
    }
    if let Some(cmd) = &config.mac_randomize_cmd {
        hooks.push(Box::new(CommandHook::new("mac-randomize", cmd)));
    }
    if let Some(cmd) = &config.fingerprint_cmd {
        hooks.push(Box::new(CommandHook::new("fingerprint-profile", cmd)));
    }
    if let Some(cmd) = &config.anonymity_cmd {
        hooks.push(Box::new(CommandHook::new("anonymity-bridge", cmd)));
    }

    hooks
}

/// Points child processes at the new egress path
///
/// Sets HTTP_PROXY/HTTPS_PROXY for this process tree and optionally keeps
/// a curl-style rc file in sync.
pub struct EgressEnvHook {
    pub curlrc_path: Option<PathBuf>,
}

#[async_trait]
impl ActivationHook for EgressEnvHook {
    fn name(&self) -> &'static str {
        "egress-env"
    }

    async fn apply(&self, active: &ActiveProxy) -> anyhow::Result<()> {
        let url = active.record.url();
        std::env::set_var("HTTP_PROXY", &url);
        std::env::set_var("HTTPS_PROXY", &url);

        if let Some(path) = &self.curlrc_path {
            tokio::fs::write(path, format!("proxy = {}\n", url)).await?;
            debug!("Updated {} for {}", path.display(), url);
        }

        Ok(())
    }
}

/// Hardens a dnscrypt-proxy configuration and restarts the daemon
///
/// Absent installations are a hook failure, not an activation failure.
pub struct DnsGuardHook {
    pub config_path: PathBuf,
}

#[async_trait]
impl ActivationHook for DnsGuardHook {
    fn name(&self) -> &'static str {
        "dns-guard"
    }

    async fn apply(&self, _active: &ActiveProxy) -> anyhow::Result<()> {
        if !self.config_path.exists() {
            anyhow::bail!("dnscrypt-proxy config not found at {}", self.config_path.display());
        }

        let config = tokio::fs::read_to_string(&self.config_path).await?;
        let hardened = harden_dnscrypt_config(&config);
        tokio::fs::write(&self.config_path, hardened).await?;

        // Restart the resolver so the hardened settings take effect
        let _ = Command::new("pkill").arg("dnscrypt-proxy").status().await;
        Command::new("dnscrypt-proxy")
            .arg("-config")
            .arg(&self.config_path)
            .arg("-daemonize")
            .status()
            .await?;

        debug!("DNS guard applied via {}", self.config_path.display());
        Ok(())
    }
}

/// Rewrite the resolver settings that keep lookups local and validated
fn harden_dnscrypt_config(config: &str) -> String {
    let mut out = String::with_capacity(config.len());
    for line in config.lines() {
        let replaced = if line.starts_with("listen_addresses") {
            "listen_addresses = [\"127.0.0.1:53\"]"
        } else if line.starts_with("require_dnssec") {
            "require_dnssec = true"
        } else if line.starts_with("require_nolog") {
            "require_nolog = true"
        } else if line.starts_with("require_nofilter") {
            "require_nofilter = true"
        } else {
            line
        };
        out.push_str(replaced);
        out.push('\n');
    }
    out
}

/// Delegates a side effect to an external command
///
/// The command receives the active proxy URL as its last argument and must
/// exit zero to count as applied.
pub struct CommandHook {
    name: &'static str,
    program: String,
    args: Vec<String>,
}

impl CommandHook {
    pub fn new(name: &'static str, command_line: &str) -> Self {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts.next().unwrap_or_default();
        Self {
            name,
            program,
            args: parts.collect(),
        }
    }
}

#[async_trait]
impl ActivationHook for CommandHook {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn apply(&self, active: &ActiveProxy) -> anyhow::Result<()> {
        if self.program.is_empty() {
            anyhow::bail!("no command configured");
        }

        let status = Command::new(&self.program)
            .args(&self.args)
            .arg(active.record.url())
            .status()
            .await?;

        if !status.success() {
            anyhow::bail!("{} exited with {}", self.program, status);
        }
        Ok(())
    }
}
