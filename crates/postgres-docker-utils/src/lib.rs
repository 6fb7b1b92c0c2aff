//! Ephemeral Postgres container for the lock-store and recovery-journal
//! integration tests (`tests/lock_and_journal_postgres.rs`): `DistributedLock`
//! and `RecoveryJournal` run their own `CREATE TABLE IF NOT EXISTS` migrations
//! on connect, so this crate only has to hand back a reachable instance.

use std::collections::HashSet;
use std::net::TcpStream;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use anyhow::Context;
use tracing::warn;

const READY_POLL_TIMEOUT: Duration = Duration::from_secs(10);
const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct PostgresGuard {
    container_id: String,
    container_port: u16,
}

impl PostgresGuard {
    pub fn port(&self) -> u16 {
        self.container_port
    }

    pub fn database_url(&self) -> String {
        format!("postgres://postgres@localhost:{}/postgres", self.container_port)
    }
}

impl Drop for PostgresGuard {
    fn drop(&mut self) {
        if let Err(err) = run_cmd(&format!("docker stop {}", &self.container_id)) {
            warn!(%err, "failed to stop postgres test container");
        }
        if let Err(err) = run_cmd(&format!("docker rm {}", &self.container_id)) {
            warn!(%err, "failed to remove postgres test container");
        }
    }
}

/// Starts a Postgres container accepting all connections on a random
/// OS-assigned port, then blocks (sync; the caller is expected to be on a
/// dedicated test thread) until the port actually accepts TCP connections.
/// The container is stopped and removed when the guard is dropped.
pub async fn setup() -> anyhow::Result<PostgresGuard> {
    let container_id =
        run_cmd_to_output("docker run --rm -d -e POSTGRES_HOST_AUTH_METHOD=trust -p 5432 postgres")
            .context("starting the Postgres container")?;

    let exposed_port = run_cmd_to_output(&format!("docker container port {container_id} 5432"))
        .context("fetching container exposed port")?;
    let container_port = parse_exposed_port(&exposed_port)?;

    wait_until_accepting_connections(container_port)?;

    Ok(PostgresGuard {
        container_id,
        container_port,
    })
}

fn wait_until_accepting_connections(port: u16) -> anyhow::Result<()> {
    let deadline = Instant::now() + READY_POLL_TIMEOUT;
    loop {
        if TcpStream::connect(("127.0.0.1", port)).is_ok() {
            return Ok(());
        }
        if Instant::now() >= deadline {
            anyhow::bail!("postgres container did not accept connections on port {port} within {READY_POLL_TIMEOUT:?}");
        }
        std::thread::sleep(READY_POLL_INTERVAL);
    }
}

fn run_cmd_to_output(cmd_str: &str) -> anyhow::Result<String> {
    let args: Vec<_> = cmd_str.split(' ').collect();
    let mut command = Command::new(args[0]);

    for arg in &args[1..] {
        command.arg(arg);
    }

    command.stdout(Stdio::piped());
    command.stderr(Stdio::null());

    let Ok(output) = command.output() else {
        return Ok(String::new());
    };

    let utf = String::from_utf8(output.stdout)?;

    Ok(utf.trim().to_string())
}

fn run_cmd(cmd_str: &str) -> anyhow::Result<()> {
    run_cmd_to_output(cmd_str)?;

    Ok(())
}

fn parse_exposed_port(s: &str) -> anyhow::Result<u16> {
    let parts: Vec<_> = s
        .split_whitespace()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect();

    let ports: Vec<_> = parts.into_iter().filter_map(extract_port).collect();

    let mut parsed_port = None;

    for port in ports {
        let port: u16 = port.parse().with_context(|| format!("parsing `{port}`"))?;

        if let Some(current) = parsed_port {
            if current != port {
                anyhow::bail!(
                    "multiple different ports exposed: `{}` and `{}`",
                    current,
                    port
                );
            }
        } else {
            parsed_port = Some(port);
        }
    }

    parsed_port.context("no ports parsed")
}

fn extract_port(s: &str) -> Option<&str> {
    s.split(':').last()
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case("0.0.0.0:55837" => 55837 ; "base case")]
    #[test_case("   0.0.0.0:55837    " => 55837 ; "ignore whitespace")]
    #[test_case("[::]:12345" => 12345 ; "works with ipv6")]
    #[test_case("0.0.0.0:12345 \n [::]:12345" => 12345 ; "works with multiple ips")]
    fn test_parse_exposed_port(s: &str) -> u16 {
        parse_exposed_port(s).unwrap()
    }

    #[test]
    fn different_ports_result_in_failure() {
        const S: &str = "0.0.0.0:12345 [::]:54321";

        let _err = parse_exposed_port(S).unwrap_err();
    }
}
