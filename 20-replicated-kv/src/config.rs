//! Validated, immutable replica configuration.
//!
//! [`ReplicaConfig`] is resolved once from the command line (or built directly
//! in tests) before the server loop starts, then shared read-only by every
//! connection handler.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Result, bail, ensure};
use rand::Rng;

use crate::cli::ServerArgs;
use crate::topology::{Membership, Role};

/// Bounds applied to every blocking network operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    pub io: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_millis(1000),
            io: Duration::from_millis(2000),
        }
    }
}

impl Timeouts {
    /// Longest a leader running with these timeouts and `delay` can take to
    /// answer a PUT: the delay, a fan-out whose slowest secondary uses its full
    /// connect, write and read bounds, then the write of the reply itself.
    pub fn leader_put_budget(&self, delay: ReplicationDelay) -> Duration {
        delay.max + self.connect + self.io * 3
    }
}

/// Random pause inserted by the leader between its local apply and fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReplicationDelay {
    min: Duration,
    max: Duration,
}

impl ReplicationDelay {
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn new(min: Duration, max: Duration) -> Result<Self> {
        ensure!(
            min <= max,
            "replication delay minimum {min:?} exceeds maximum {max:?}"
        );
        Ok(Self { min, max })
    }

    pub fn is_enabled(&self) -> bool {
        !self.max.is_zero()
    }

    /// Draws a delay uniformly from `[min, max]`, or `None` when disabled.
    pub fn sample(&self) -> Option<Duration> {
        if !self.is_enabled() {
            return None;
        }
        let min = self.min.as_millis() as u64;
        let max = self.max.as_millis() as u64;
        Some(Duration::from_millis(rand::thread_rng().gen_range(min..=max)))
    }
}

/// How a secondary treats a REPLICATION older than what it already stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplicationPolicy {
    /// Apply every REPLICATION as received.
    #[default]
    Unconditional,
    /// Keep the stored entry when it is strictly newer.
    RejectStale,
}

#[derive(Debug, Clone)]
pub struct ReplicaConfig {
    pub role: Role,
    /// Address this node is reachable at, used for logging.
    pub address: String,
    /// Leader address; `Some` exactly when the role is secondary.
    pub leader: Option<String>,
    pub membership: Membership,
    pub timeouts: Timeouts,
    pub delay: ReplicationDelay,
    pub policy: ReplicationPolicy,
    /// Explicit bound on waiting for a forwarded PUT's reply.
    forward_timeout: Option<Duration>,
}

impl ReplicaConfig {
    pub fn leader(address: impl Into<String>, secondaries: &[String]) -> Result<Self> {
        let address = address.into();
        let membership = Membership::leader(address.clone(), secondaries)?;
        Ok(Self {
            role: Role::Leader,
            address,
            leader: None,
            membership,
            timeouts: Timeouts::default(),
            delay: ReplicationDelay::disabled(),
            policy: ReplicationPolicy::default(),
            forward_timeout: None,
        })
    }

    pub fn secondary(address: impl Into<String>, leader: impl Into<String>) -> Result<Self> {
        let address = address.into();
        let leader = leader.into();
        ensure!(!leader.trim().is_empty(), "leader address cannot be empty");
        ensure!(
            leader != address,
            "secondary {address} cannot point at itself as leader"
        );
        Ok(Self {
            role: Role::Secondary,
            address,
            leader: Some(leader),
            membership: Membership::empty(),
            timeouts: Timeouts::default(),
            delay: ReplicationDelay::disabled(),
            policy: ReplicationPolicy::default(),
            forward_timeout: None,
        })
    }

    /// Resolves command-line arguments against the address actually bound.
    pub fn from_args(args: &ServerArgs, bound: SocketAddr) -> Result<Self> {
        let address = bound.to_string();
        let config = match args.role {
            Role::Leader => {
                if let Some(leader) = &args.leader {
                    bail!("--leader ({leader}) is only valid for secondaries");
                }
                Self::leader(address, &args.secondaries)?
            }
            Role::Secondary => {
                ensure!(
                    args.secondaries.is_empty(),
                    "--secondary is only valid for the leader"
                );
                let Some(leader) = &args.leader else {
                    bail!("--leader is required for secondaries");
                };
                Self::secondary(address, leader.clone())?
            }
        };

        let delay = ReplicationDelay::new(
            Duration::from_millis(args.replication_delay_min_ms),
            Duration::from_millis(args.replication_delay_max_ms),
        )?;
        let policy = if args.reject_stale_replication {
            ReplicationPolicy::RejectStale
        } else {
            ReplicationPolicy::Unconditional
        };

        let config = config
            .with_timeouts(Timeouts {
                connect: Duration::from_millis(args.connect_timeout_ms),
                io: Duration::from_millis(args.io_timeout_ms),
            })
            .with_delay(delay)
            .with_policy(policy);

        match args.forward_timeout_ms {
            Some(millis) => {
                let forward_timeout = Duration::from_millis(millis);
                let budget = config.timeouts.leader_put_budget(config.delay);
                ensure!(
                    forward_timeout >= budget,
                    "--forward-timeout-ms ({millis}) is below the leader PUT budget of {budget:?}"
                );
                Ok(config.with_forward_timeout(forward_timeout))
            }
            None => Ok(config),
        }
    }

    /// How long a secondary waits for the leader to answer a forwarded PUT.
    ///
    /// Unless set explicitly this is the PUT budget of a leader running with
    /// the same timeouts and replication delay as this node.
    pub fn forward_timeout(&self) -> Duration {
        self.forward_timeout.unwrap_or_else(|| self.timeouts.leader_put_budget(self.delay))
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_delay(mut self, delay: ReplicationDelay) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_policy(mut self, policy: ReplicationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_forward_timeout(mut self, forward_timeout: Duration) -> Self {
        self.forward_timeout = Some(forward_timeout);
        self
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;
    use crate::cli::{Cli, Command};

    fn server_args(args: &[&str]) -> ServerArgs {
        let mut argv = vec!["replicated-kv", "server"];
        argv.extend_from_slice(args);
        match Cli::try_parse_from(argv).expect("valid arguments").command {
            Command::Server(args) => args,
            other => panic!("unexpected subcommand: {other:?}"),
        }
    }

    fn bound() -> SocketAddr {
        "127.0.0.1:8000".parse().expect("socket address")
    }

    #[test]
    fn leader_from_args() {
        let args = server_args(&[
            "--role",
            "leader",
            "--secondary",
            "127.0.0.1:8001",
            "--replication-delay-min-ms",
            "5",
            "--replication-delay-max-ms",
            "10",
            "--reject-stale-replication",
        ]);
        let config = ReplicaConfig::from_args(&args, bound()).expect("valid config");

        assert_eq!(config.role, Role::Leader);
        assert_eq!(config.leader, None);
        assert_eq!(config.membership.role_of("127.0.0.1:8000"), Some(Role::Leader));
        assert_eq!(config.membership.secondary_count(), 1);
        assert!(config.delay.is_enabled());
        assert_eq!(config.policy, ReplicationPolicy::RejectStale);
    }

    #[test]
    fn secondary_from_args() {
        let args = server_args(&["--role", "secondary", "--leader", "127.0.0.1:7000"]);
        let config = ReplicaConfig::from_args(&args, bound()).expect("valid config");

        assert_eq!(config.role, Role::Secondary);
        assert_eq!(config.leader.as_deref(), Some("127.0.0.1:7000"));
        assert_eq!(config.membership.secondary_count(), 0);
        assert!(!config.delay.is_enabled());
    }

    #[test]
    fn rejects_mismatched_role_flags() {
        let args = server_args(&["--role", "secondary"]);
        assert!(ReplicaConfig::from_args(&args, bound()).is_err());

        let args = server_args(&["--role", "leader", "--leader", "127.0.0.1:7000"]);
        assert!(ReplicaConfig::from_args(&args, bound()).is_err());

        let args = server_args(&[
            "--role",
            "secondary",
            "--leader",
            "127.0.0.1:7000",
            "--secondary",
            "127.0.0.1:8001",
        ]);
        assert!(ReplicaConfig::from_args(&args, bound()).is_err());

        let args = server_args(&["--role", "secondary", "--leader", "127.0.0.1:8000"]);
        assert!(ReplicaConfig::from_args(&args, bound()).is_err());
    }

    #[test]
    fn rejects_inverted_delay_bounds() {
        let args = server_args(&[
            "--role",
            "leader",
            "--replication-delay-min-ms",
            "10",
            "--replication-delay-max-ms",
            "5",
        ]);
        assert!(ReplicaConfig::from_args(&args, bound()).is_err());
    }

    #[test]
    fn delay_samples_stay_in_bounds() {
        assert_eq!(ReplicationDelay::disabled().sample(), None);

        let delay = ReplicationDelay::new(Duration::from_millis(3), Duration::from_millis(7))
            .expect("valid");
        for _ in 0..100 {
            let sample = delay.sample().expect("enabled");
            assert!(sample >= Duration::from_millis(3) && sample <= Duration::from_millis(7));
        }
    }

    #[test]
    fn forward_timeout_covers_a_slow_leader_put() {
        let args = server_args(&[
            "--role",
            "secondary",
            "--leader",
            "127.0.0.1:7000",
            "--replication-delay-max-ms",
            "2500",
        ]);
        let config = ReplicaConfig::from_args(&args, bound()).expect("valid config");

        // 2500 ms delay, 1000 ms connect, 3 x 2000 ms io.
        assert_eq!(config.forward_timeout(), Duration::from_millis(9500));
        assert!(config.forward_timeout() > config.timeouts.io);
    }

    #[test]
    fn explicit_forward_timeout_must_cover_the_leader_budget() {
        let args = server_args(&[
            "--role",
            "secondary",
            "--leader",
            "127.0.0.1:7000",
            "--forward-timeout-ms",
            "20000",
        ]);
        let config = ReplicaConfig::from_args(&args, bound()).expect("valid config");
        assert_eq!(config.forward_timeout(), Duration::from_secs(20));

        let args = server_args(&[
            "--role",
            "secondary",
            "--leader",
            "127.0.0.1:7000",
            "--forward-timeout-ms",
            "2000",
        ]);
        assert!(ReplicaConfig::from_args(&args, bound()).is_err());
    }
}
