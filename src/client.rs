// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the modbus-pseudo-sensor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Client probe
//!
//! Connects to a pseudo-sensor server, performs exactly one job and disconnects.
//! The jobs mirror the operator actions on the device:
//!
//! | Job | Name         | Request                                  |
//! |-----|--------------|------------------------------------------|
//! | 0   | `low`        | write holding register 0 with 18         |
//! | 1   | `high`       | write holding register 0 with 27         |
//! | 2   | `read-base`  | read holding register 0                  |
//! | 3   | `read-value` | read input register 0 (default)          |

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context as _, Result};
use log::{debug, warn};
use thiserror::Error;
use tokio::net::lookup_host;
use tokio::time::timeout;
use tokio_modbus::client::{tcp, Context};
use tokio_modbus::prelude::*;

use crate::modbus::{APP_BASE_ADDR, APP_BASE_HIGH, APP_BASE_LOW, APP_VAL_ADDR};

/// Time allowed for a single request/response exchange
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(1);

/// One action of the client probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Job {
    WriteBaseLow,
    WriteBaseHigh,
    ReadBase,
    #[default]
    ReadValue,
}

impl Job {
    /// Register address the job targets
    pub fn address(&self) -> u16 {
        match self {
            Job::WriteBaseLow | Job::WriteBaseHigh | Job::ReadBase => APP_BASE_ADDR,
            Job::ReadValue => APP_VAL_ADDR,
        }
    }

    /// Value written by the job, if it is a write
    pub fn written_value(&self) -> Option<u16> {
        match self {
            Job::WriteBaseLow => Some(APP_BASE_LOW),
            Job::WriteBaseHigh => Some(APP_BASE_HIGH),
            Job::ReadBase | Job::ReadValue => None,
        }
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.written_value() {
            Some(value) => write!(
                f,
                "write_single_register(addr={} value={})",
                self.address(),
                value
            ),
            None if *self == Job::ReadBase => {
                write!(f, "read_holding_registers(addr={})", self.address())
            }
            None => write!(f, "read_input_registers(addr={})", self.address()),
        }
    }
}

impl FromStr for Job {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "0" | "low" => Ok(Job::WriteBaseLow),
            "1" | "high" => Ok(Job::WriteBaseHigh),
            "2" | "read-base" => Ok(Job::ReadBase),
            "3" | "read-value" => Ok(Job::ReadValue),
            _ => Err(JobError::UnknownJob(s.to_string())),
        }
    }
}

/// Failure of a client job
#[derive(Debug, Error)]
pub enum JobError {
    #[error("unknown job {0:?}, expected 0-3 or one of low, high, read-base, read-value")]
    UnknownJob(String),

    #[error("{job}: {source}")]
    Transport {
        job: Job,
        #[source]
        source: tokio_modbus::Error,
    },

    #[error("{job}: server replied with exception {code:?}")]
    Exception { job: Job, code: ExceptionCode },

    #[error("{job}: no response within {}ms", .after.as_millis())]
    Timeout { job: Job, after: Duration },
}

/// Result of a successful job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Written { addr: u16, value: u16 },
    Read { addr: u16, value: u16 },
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobOutcome::Read { addr, value } => write!(f, "reg[{}] = {}", addr, value),
            JobOutcome::Written { addr, value } => write!(f, "reg[{}] <- {}", addr, value),
        }
    }
}

/// Perform `job` on an established connection
pub async fn run_job(
    ctx: &mut Context,
    job: Job,
    response_timeout: Duration,
) -> Result<JobOutcome, JobError> {
    let addr = job.address();
    debug!("Running {}", job);

    let exchange = async {
        match job {
            Job::WriteBaseLow | Job::WriteBaseHigh => {
                let value = job.written_value().unwrap_or(APP_BASE_LOW);
                ctx.write_single_register(addr, value)
                    .await
                    .map(|reply| reply.map(|()| JobOutcome::Written { addr, value }))
            }
            Job::ReadBase => ctx
                .read_holding_registers(addr, 1)
                .await
                .map(|reply| reply.map(|words| read_outcome(addr, &words))),
            Job::ReadValue => ctx
                .read_input_registers(addr, 1)
                .await
                .map(|reply| reply.map(|words| read_outcome(addr, &words))),
        }
    };

    match timeout(response_timeout, exchange).await {
        Ok(Ok(Ok(outcome))) => Ok(outcome),
        Ok(Ok(Err(code))) => Err(JobError::Exception { job, code }),
        Ok(Err(source)) => Err(JobError::Transport { job, source }),
        Err(_) => Err(JobError::Timeout {
            job,
            after: response_timeout,
        }),
    }
}

fn read_outcome(addr: u16, words: &[u16]) -> JobOutcome {
    JobOutcome::Read {
        addr,
        value: words.first().copied().unwrap_or_default(),
    }
}

/// Resolve `host` and open a Modbus TCP connection to the first address that accepts it
pub async fn connect(host: &str, port: u16) -> Result<Context> {
    let candidates: Vec<_> = lookup_host((host, port))
        .await
        .with_context(|| format!("Failed to resolve {}:{}", host, port))?
        .collect();

    let mut last_error = None;
    for addr in candidates {
        debug!("Connecting to {}", addr);
        match tcp::connect(addr).await {
            Ok(ctx) => return Ok(ctx),
            Err(err) => {
                debug!("Connection to {} failed: {}", addr, err);
                last_error = Some(err);
            }
        }
    }

    match last_error {
        Some(err) => {
            Err(err).with_context(|| format!("Failed to connect to {}:{}", host, port))
        }
        None => anyhow::bail!("No address found for {}:{}", host, port),
    }
}

/// Connect, run one job and disconnect
///
/// The connection is closed whether the job succeeded or not. Connection
/// failures are returned as the outer error, job failures as the inner one.
pub async fn execute(
    host: &str,
    port: u16,
    job: Job,
    response_timeout: Duration,
) -> Result<Result<JobOutcome, JobError>> {
    let mut ctx = connect(host, port).await?;
    let outcome = run_job(&mut ctx, job, response_timeout).await;

    if let Err(err) = ctx.disconnect().await {
        warn!("Failed to close the connection cleanly: {}", err);
    }

    Ok(outcome)
}
