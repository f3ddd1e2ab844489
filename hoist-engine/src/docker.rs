//! Docker command lines and output parsing
//!
//! Builders return complete shell command strings for the remote channel;
//! every interpolated value is quoted.

use chrono::{DateTime, Utc};
use hoist_core::tag;
use hoist_remote::{shell_join, shell_quote};
use std::time::Duration;

/// Label recording the tag a server container replaced
pub const PREVIOUS_LABEL: &str = "hoist.previous";

/// Label naming the service a server container belongs to
pub const SERVICE_LABEL: &str = "hoist.service";

/// Suffix given to a running container moved aside for a same-tag redeploy
pub const PARKED_SUFFIX: &str = "-old";

/// Inputs for launching a server container
#[derive(Debug, Clone)]
pub struct ServerLaunch<'a> {
    pub project: &'a str,
    pub service: &'a str,
    pub env: &'a str,
    pub image: &'a str,
    pub tag: &'a str,
    pub previous: &'a str,
    pub env_file: &'a str,
    pub host: &'a str,
    pub port: u16,
    pub command: &'a str,
}

/// Inputs for a scheduled job's entry line
#[derive(Debug, Clone)]
pub struct CronLaunch<'a> {
    pub project: &'a str,
    pub service: &'a str,
    pub env: &'a str,
    pub image: &'a str,
    pub tag: &'a str,
    pub schedule: &'a str,
    pub env_file: &'a str,
    pub command: &'a str,
}

/// Name of a server container: `<service>-<tag>`
pub fn container_name(service: &str, tag: &str) -> String {
    format!("{}-{}", service, tag)
}

/// Name a container is moved to while its tag is redeployed
pub fn parked_name(service: &str, tag: &str) -> String {
    format!("{}{}", container_name(service, tag), PARKED_SUFFIX)
}

/// Name of a scheduled job's container: `<service>-<env>`
pub fn job_container_name(service: &str, env: &str) -> String {
    format!("{}-{}", service, env)
}

/// Extracts the build tag from the name of one of `service`'s containers
///
/// Accepts `<service>-<tag>` and `<service>-<tag>-old` where the remainder
/// decodes as a build tag. The name alone does not tell which service owns a
/// container (`api` on branch `worker-x` looks like `api-worker`); ownership
/// comes from [`SERVICE_LABEL`].
pub fn container_tag(service: &str, name: &str) -> Option<String> {
    let rest = name.strip_prefix(service)?.strip_prefix('-')?;
    let rest = rest.strip_suffix(PARKED_SUFFIX).unwrap_or(rest);
    tag::is_valid(rest).then(|| rest.to_string())
}

pub fn pull(image: &str, tag: &str) -> String {
    let reference = format!("{}:{}", image, tag);
    shell_join(&["docker", "pull", reference.as_str()])
}

pub fn rename(from: &str, to: &str) -> String {
    shell_join(&["docker", "rename", from, to])
}

pub fn stop(name: &str) -> String {
    shell_join(&["docker", "stop", name])
}

pub fn remove(name: &str) -> String {
    shell_join(&["docker", "rm", name])
}

pub fn force_remove(name: &str) -> String {
    shell_join(&["docker", "rm", "-f", name])
}

/// Arguments of `docker run` for a server container
pub fn server_run_args(launch: &ServerLaunch<'_>) -> Vec<String> {
    let s = launch.service;
    let mut args = vec![
        "-d".to_string(),
        "--name".to_string(),
        container_name(s, launch.tag),
        "--restart".to_string(),
        "unless-stopped".to_string(),
        "--env-file".to_string(),
        launch.env_file.to_string(),
        "--log-driver".to_string(),
        "awslogs".to_string(),
        "--log-opt".to_string(),
        log_group(launch.project, launch.env, s),
        "--label".to_string(),
        "traefik.enable=true".to_string(),
        "--label".to_string(),
        format!("traefik.http.routers.{}.rule=Host(`{}`)", s, launch.host),
        "--label".to_string(),
        format!("traefik.http.services.{}.loadbalancer.server.port={}", s, launch.port),
        "--label".to_string(),
        format!("{}={}", SERVICE_LABEL, s),
        "--label".to_string(),
        format!("{}={}", PREVIOUS_LABEL, launch.previous),
        format!("{}:{}", launch.image, launch.tag),
    ];

    if !launch.command.is_empty() {
        args.push(launch.command.to_string());
    }

    args
}

/// `docker run` command line for a server container
pub fn run_server(launch: &ServerLaunch<'_>) -> String {
    let mut args = vec!["docker".to_string(), "run".to_string()];
    args.extend(server_run_args(launch));
    shell_join(&args)
}

/// Scheduler entry line that runs one job container
pub fn cron_entry(launch: &CronLaunch<'_>) -> String {
    let name = job_container_name(launch.service, launch.env);

    let mut run = vec![
        "docker".to_string(),
        "run".to_string(),
        "--name".to_string(),
        name.clone(),
        "--env-file".to_string(),
        launch.env_file.to_string(),
        "--log-driver=awslogs".to_string(),
        "--log-opt".to_string(),
        log_group(launch.project, launch.env, launch.service),
        format!("{}:{}", launch.image, launch.tag),
    ];
    if !launch.command.is_empty() {
        run.push(launch.command.to_string());
    }

    format!(
        "{} root docker rm -f {} 2>/dev/null; {}",
        launch.schedule,
        shell_quote(&name),
        shell_join(&run)
    )
}

fn log_group(project: &str, env: &str, service: &str) -> String {
    format!("awslogs-group=/{}/{}/{}", project, env, service)
}

fn service_filter(service: &str) -> String {
    shell_quote(&format!("label={}={}", SERVICE_LABEL, service))
}

/// Containers of any state labelled as `service`'s
pub fn list_containers(service: &str) -> String {
    format!(
        "docker ps -a --filter {} --format '{{{{.Names}}}}'",
        service_filter(service)
    )
}

/// Running containers labelled as `service`'s, with status
pub fn list_running(service: &str) -> String {
    format!(
        "docker ps --filter {} --format '{{{{.Names}}}}\t{{{{.Status}}}}'",
        service_filter(service)
    )
}

pub fn inspect_ip(container: &str) -> String {
    format!(
        "docker inspect {} --format '{{{{range .NetworkSettings.Networks}}}}{{{{.IPAddress}}}}{{{{end}}}}'",
        shell_quote(container)
    )
}

pub fn inspect_label(container: &str, label: &str) -> String {
    format!(
        "docker inspect --format '{{{{index .Config.Labels \"{}\"}}}}' {}",
        label,
        shell_quote(container)
    )
}

pub fn inspect_finish(container: &str) -> String {
    format!(
        "docker inspect {} --format '{{{{.State.FinishedAt}}}}\t{{{{.State.ExitCode}}}}' 2>/dev/null",
        shell_quote(container)
    )
}

/// Health probe against a container's private address
pub fn health_probe(ip: &str, port: u16, path: &str) -> String {
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    };
    let url = format!("http://{}:{}{}", ip, port, path);
    shell_join(&["curl", "-sf", url.as_str()])
}

/// Parses `docker ps` status strings such as `Up 3 hours`,
/// `Up About a minute` or `Up Less than a second`
///
/// Approximate; unrecognised strings yield zero.
pub fn parse_uptime(status: &str) -> Duration {
    let Some(rest) = status.trim().strip_prefix("Up ") else {
        return Duration::ZERO;
    };

    if let Some(about) = rest.strip_prefix("About ") {
        return if about.contains("minute") {
            Duration::from_secs(60)
        } else if about.contains("hour") {
            Duration::from_secs(3600)
        } else {
            Duration::ZERO
        };
    }

    if rest.starts_with("Less than") {
        return Duration::from_secs(1);
    }

    let mut words = rest.split_whitespace();
    let (Some(n), Some(unit)) = (words.next(), words.next()) else {
        return Duration::ZERO;
    };
    let Ok(n) = n.parse::<u64>() else {
        return Duration::ZERO;
    };

    let unit_secs = match unit.trim_end_matches('s') {
        "second" => 1,
        "minute" => 60,
        "hour" => 3600,
        "day" => 86_400,
        "week" => 7 * 86_400,
        "month" => 30 * 86_400,
        "year" => 365 * 86_400,
        _ => return Duration::ZERO,
    };

    Duration::from_secs(n.saturating_mul(unit_secs))
}

/// Parses `<FinishedAt>\t<ExitCode>` into time since the run finished and
/// its exit code
///
/// Returns `None` for containers that never ran.
pub fn parse_finish_info(output: &str, now: DateTime<Utc>) -> Option<(Duration, i32)> {
    let (finished, code) = output.trim().split_once('\t')?;
    let finished = DateTime::parse_from_rfc3339(finished.trim()).ok()?.with_timezone(&Utc);

    // docker reports the zero time for containers that never finished
    if finished.timestamp() <= 0 {
        return None;
    }

    let code = code.trim().parse::<i32>().ok()?;
    let since = (now - finished).to_std().unwrap_or(Duration::ZERO);
    Some((since, code))
}
