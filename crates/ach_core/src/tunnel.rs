use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::thread::{self, sleep};
use std::time::Duration;

use anyhow::{Context, Result, bail};

use crate::config::{AchConfig, TunnelSection};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelSpec {
    pub local_port: u16,
    pub remote_host: String,
    pub remote_port: u16,
}

/// A running `ssh` port-forwarding process, kept in the foreground so the
/// handle owns the tunnel. Stopped on `kill()` or drop.
pub struct SshTunnel {
    child: Option<Child>,
}

impl SshTunnel {
    pub fn kill(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        tracing::info!("stopping ssh tunnel");
        if let Err(error) = child.kill() {
            tracing::warn!("failed to stop ssh tunnel: {error}");
        }
        let _ = child.wait();
    }
}

impl Drop for SshTunnel {
    fn drop(&mut self) {
        self.kill();
    }
}

pub fn tunnel_args(specs: &[TunnelSpec], bounce_host: &str) -> Vec<String> {
    let mut args = vec!["-N".to_string()];
    for spec in specs {
        args.push("-L".to_string());
        args.push(format!(
            "{}:{}:{}",
            spec.local_port, spec.remote_host, spec.remote_port
        ));
    }
    args.push(bounce_host.to_string());
    args
}

pub fn start_ssh_tunnels(specs: &[TunnelSpec], settings: &TunnelSection) -> Result<SshTunnel> {
    if specs.is_empty() {
        bail!("no tunnels requested");
    }
    tracing::info!(count = specs.len(), "starting ssh tunnel");
    let mut child = Command::new("ssh")
        .args(tunnel_args(specs, settings.bounce_host()))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .context("failed to spawn ssh")?;

    if let Some(stdout) = child.stdout.take() {
        forward_output(stdout, "ssh-tunnel");
    }
    if let Some(stderr) = child.stderr.take() {
        forward_output(stderr, "ssh-tunnel (stderr)");
    }

    sleep(Duration::from_millis(settings.settle_ms()));
    if let Some(status) = child.try_wait().context("failed to poll ssh tunnel")? {
        bail!("ssh tunnel exited early with {status}");
    }
    Ok(SshTunnel { child: Some(child) })
}

/// Tunnel specs reaching the admin endpoints of `envs` through the bounce host.
pub fn env_tunnel_specs(config: &AchConfig, envs: &[String]) -> Result<Vec<TunnelSpec>> {
    envs.iter()
        .map(|env_name| {
            let admin = config.admin_for_env(env_name)?;
            let remote_host = admin
                .host
                .clone()
                .ok_or_else(|| anyhow::anyhow!("[admin.{env_name}] has no host to tunnel to"))?;
            Ok(TunnelSpec {
                local_port: admin.local_port()?,
                remote_host,
                remote_port: config.tunnel.remote_port(),
            })
        })
        .collect()
}

/// Runs `action` while tunnels to the admin endpoints of `envs` are open.
pub fn with_env_tunnel<T>(
    config: &AchConfig,
    envs: &[String],
    action: impl FnOnce() -> Result<T>,
) -> Result<T> {
    let specs = env_tunnel_specs(config, envs)?;
    let mut tunnel = start_ssh_tunnels(&specs, &config.tunnel)?;
    let result = action();
    tunnel.kill();
    result
}

pub fn job_log_args(user: &str, host: &str, job_id: &str) -> Vec<String> {
    vec![
        format!("{user}@{host}"),
        "grep".to_string(),
        job_id.to_string(),
        host.to_string(),
    ]
}

/// Greps the log host of `env_name` for `job_id` and returns the matches.
pub fn fetch_job_logs(config: &AchConfig, env_name: &str, job_id: &str) -> Result<String> {
    let admin = config.admin_for_env(env_name)?;
    let logs = admin
        .logs
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("no [admin.{env_name}.logs] section in config"))?;
    if job_id.trim().is_empty() {
        bail!("logs require a non-empty job id");
    }

    let output = Command::new("ssh")
        .args(job_log_args(&logs.user, &logs.host, job_id.trim()))
        .stdin(Stdio::null())
        .output()
        .context("failed to execute ssh")?;
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

fn forward_output(stream: impl Read + Send + 'static, label: &'static str) {
    thread::spawn(move || {
        for line in BufReader::new(stream).lines() {
            let Ok(line) = line else {
                break;
            };
            let line = line.trim();
            if line.is_empty() || line.contains("is not a tty") {
                continue;
            }
            tracing::info!("{label}: {line}");
        }
    });
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::process::Command;

    use super::{SshTunnel, TunnelSpec, env_tunnel_specs, job_log_args, tunnel_args};
    use crate::config::AchConfig;

    const CONFIG: &str = r#"
[admin.prod]
admin_url = "http://localhost:9104"
admin_auth = "admin:secret"
host = "admin-prod.internal"

[admin.int]
admin_url = "http://localhost:9105"
admin_auth = "admin:int"
host = "admin-int.internal"

[admin.dev]
admin_url = "http://localhost:9106"
admin_auth = "admin:dev"
"#;

    #[test]
    fn tunnel_args_forward_every_spec_through_bounce_host() {
        let args = tunnel_args(
            &[
                TunnelSpec {
                    local_port: 9104,
                    remote_host: "admin-prod.internal".to_string(),
                    remote_port: 6060,
                },
                TunnelSpec {
                    local_port: 9105,
                    remote_host: "admin-int.internal".to_string(),
                    remote_port: 6060,
                },
            ],
            "bounce2",
        );
        assert_eq!(
            args,
            vec![
                "-N",
                "-L",
                "9104:admin-prod.internal:6060",
                "-L",
                "9105:admin-int.internal:6060",
                "bounce2",
            ]
        );
    }

    #[test]
    fn env_tunnel_specs_use_admin_port_and_host() {
        let config: AchConfig = toml::from_str(CONFIG).expect("parse");
        let specs = env_tunnel_specs(&config, &["prod".to_string(), "int".to_string()])
            .expect("specs");
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].local_port, 9104);
        assert_eq!(specs[0].remote_host, "admin-prod.internal");
        assert_eq!(specs[0].remote_port, 6060);
        assert_eq!(specs[1].local_port, 9105);
    }

    #[test]
    fn env_tunnel_specs_require_a_host() {
        let config: AchConfig = toml::from_str(CONFIG).expect("parse");
        let error = env_tunnel_specs(&config, &["dev".to_string()]).expect_err("must fail");
        assert!(error.to_string().contains("no host"));
        let error = env_tunnel_specs(&config, &["staging".to_string()]).expect_err("must fail");
        assert!(error.to_string().contains("[admin.staging]"));
    }

    #[test]
    fn job_log_args_grep_on_log_host() {
        assert_eq!(
            job_log_args("ops", "logs.internal", "job-42"),
            vec!["ops@logs.internal", "grep", "job-42", "logs.internal"]
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn dropping_the_tunnel_stops_its_process() {
        let child = Command::new("sleep").arg("30").spawn().expect("spawn sleep");
        let pid = child.id();
        let tunnel = SshTunnel { child: Some(child) };
        assert!(Path::new(&format!("/proc/{pid}")).exists());
        drop(tunnel);
        assert!(!Path::new(&format!("/proc/{pid}")).exists());
    }

    #[test]
    fn kill_is_idempotent() {
        let child = Command::new("sleep").arg("30").spawn().expect("spawn sleep");
        let mut tunnel = SshTunnel { child: Some(child) };
        tunnel.kill();
        assert!(tunnel.child.is_none());
        tunnel.kill();
    }
}
