//! Process configuration.
//!
//! Values come from `BCHAIN_*` environment variables and may be overridden
//! on the command line. Nothing here touches the network; every problem is a
//! [`ConfigError`] raised before the node starts.

use std::time::Duration;

use bchain_topology::{ChainTopology, ConfigError, LocalIdentity};

/// Default queue capacity for both mailboxes.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

/// How long a replica waits for its successor to come up.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

/// Runtime knobs for a single replica.
#[derive(Debug, Clone)]
pub struct NodeOptions {
    /// Deadline for the outbound connection attempt.
    pub connect_timeout: Duration,
    /// Capacity of the message and ack mailboxes.
    pub queue_capacity: usize,
    /// Buffer of the local operation feed (see `ChainNode::subscribe_operations`).
    pub operation_buffer: usize,
}

impl Default for NodeOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            operation_buffer: 1024,
        }
    }
}

/// Reference workload run at the head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workload {
    /// Number of messages to submit.
    pub count: u32,
    /// Pause between submissions.
    pub delay: Duration,
}

impl Default for Workload {
    fn default() -> Self {
        Self {
            count: 10,
            delay: Duration::from_millis(10),
        }
    }
}

/// Complete configuration of a replica process.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Replica addresses in chain order.
    pub addrs: Vec<String>,
    /// Which entry is this process.
    pub identity: LocalIdentity,
    pub options: NodeOptions,
    pub workload: Workload,
}

impl NodeConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    ///
    /// Recognized keys: `BCHAIN_ADDRS`, `BCHAIN_INDEX`,
    /// `BCHAIN_CONNECT_TIMEOUT_SECS`, `BCHAIN_QUEUE_CAPACITY`,
    /// `BCHAIN_WORKLOAD_COUNT`, `BCHAIN_WORKLOAD_DELAY_MS`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let addrs = lookup("BCHAIN_ADDRS")
            .map(|s| parse_addrs(&s))
            .unwrap_or_default();

        let identity = match lookup("BCHAIN_INDEX") {
            Some(v) => parse_identity("BCHAIN_INDEX", &v)?,
            None => local_host_identity(),
        };

        let mut options = NodeOptions::default();
        if let Some(v) = lookup("BCHAIN_CONNECT_TIMEOUT_SECS") {
            options.connect_timeout = Duration::from_secs(parse_num("BCHAIN_CONNECT_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = lookup("BCHAIN_QUEUE_CAPACITY") {
            options.queue_capacity = parse_capacity("BCHAIN_QUEUE_CAPACITY", &v)?;
        }

        let mut workload = Workload::default();
        if let Some(v) = lookup("BCHAIN_WORKLOAD_COUNT") {
            workload.count = parse_num("BCHAIN_WORKLOAD_COUNT", &v)?;
        }
        if let Some(v) = lookup("BCHAIN_WORKLOAD_DELAY_MS") {
            workload.delay = Duration::from_millis(parse_num("BCHAIN_WORKLOAD_DELAY_MS", &v)?);
        }

        Ok(Self {
            addrs,
            identity,
            options,
            workload,
        })
    }

    /// Apply command line flags on top of the loaded values.
    ///
    /// `--addrs a,b,c,d`, `--idx N` (negative: match the host name),
    /// `--connect-timeout SECS`, `--queue-capacity N`, `--workload N`,
    /// `--delay-ms MS`.
    pub fn apply_args<I>(mut self, args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = String>,
    {
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            let flag = Flag::parse(&arg).ok_or_else(|| ConfigError::InvalidValue {
                key: "argument",
                value: arg.clone(),
            })?;
            let key = flag.name();
            let value = args.next().ok_or(ConfigError::InvalidValue {
                key,
                value: String::from("<missing>"),
            })?;
            match flag {
                Flag::Addrs => self.addrs = parse_addrs(&value),
                Flag::Idx => self.identity = parse_identity(key, &value)?,
                Flag::ConnectTimeout => {
                    self.options.connect_timeout = Duration::from_secs(parse_num(key, &value)?)
                }
                Flag::QueueCapacity => self.options.queue_capacity = parse_capacity(key, &value)?,
                Flag::Workload => self.workload.count = parse_num(key, &value)?,
                Flag::DelayMs => self.workload.delay = Duration::from_millis(parse_num(key, &value)?),
            }
        }
        Ok(self)
    }

    /// Derive this replica's roles. Must succeed before any network activity.
    pub fn resolve(&self) -> Result<ChainTopology, ConfigError> {
        ChainTopology::from_identity(self.addrs.clone(), &self.identity)
    }
}

#[derive(Debug, Clone, Copy)]
enum Flag {
    Addrs,
    Idx,
    ConnectTimeout,
    QueueCapacity,
    Workload,
    DelayMs,
}

impl Flag {
    const ALL: [Flag; 6] = [
        Flag::Addrs,
        Flag::Idx,
        Flag::ConnectTimeout,
        Flag::QueueCapacity,
        Flag::Workload,
        Flag::DelayMs,
    ];

    fn name(self) -> &'static str {
        match self {
            Flag::Addrs => "--addrs",
            Flag::Idx => "--idx",
            Flag::ConnectTimeout => "--connect-timeout",
            Flag::QueueCapacity => "--queue-capacity",
            Flag::Workload => "--workload",
            Flag::DelayMs => "--delay-ms",
        }
    }

    fn parse(arg: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.name() == arg)
    }
}

fn parse_addrs(s: &str) -> Vec<String> {
    s.split(',')
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

fn parse_identity(key: &'static str, value: &str) -> Result<LocalIdentity, ConfigError> {
    let idx: i64 = value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })?;
    if idx < 0 {
        Ok(local_host_identity())
    } else {
        usize::try_from(idx)
            .map(LocalIdentity::Index)
            .map_err(|_| ConfigError::InvalidValue {
                key,
                value: value.to_string(),
            })
    }
}

fn parse_num<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}

fn parse_capacity(key: &'static str, value: &str) -> Result<usize, ConfigError> {
    match parse_num(key, value)? {
        0 => Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        }),
        n => Ok(n),
    }
}

/// Identify this process by the machine's host name.
pub fn local_host_identity() -> LocalIdentity {
    let host = gethostname::gethostname().to_string_lossy().into_owned();
    tracing::debug!("hostname: {}", host);
    LocalIdentity::Host(host)
}
