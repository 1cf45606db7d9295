// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the modbus-pseudo-sensor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::{Context, Result};
use futures::future::select_all;
use log::{debug, error, info};
use tokio::task::JoinHandle;

use crate::acquisition::PseudoSensor;
use crate::config::Config;
use crate::modbus::{ModbusServer, RegisterMap};

/// Represents the set of background tasks making up the device
pub struct Daemon {
    tasks: Vec<JoinHandle<Result<()>>>,
    running: Arc<AtomicBool>,
    registers: Arc<RegisterMap>,
    local_addrs: Vec<SocketAddr>,
}

impl Default for Daemon {
    fn default() -> Self {
        Self::new()
    }
}

impl Daemon {
    /// Create a new daemon instance with a zeroed register map
    pub fn new() -> Self {
        Daemon {
            tasks: Vec::new(),
            running: Arc::new(AtomicBool::new(true)),
            registers: Arc::new(RegisterMap::new()),
            local_addrs: Vec::new(),
        }
    }

    /// Register map shared by the server sessions and the pseudo sensor
    pub fn registers(&self) -> Arc<RegisterMap> {
        Arc::clone(&self.registers)
    }

    /// Addresses the Modbus server is listening on, once launched
    pub fn local_addrs(&self) -> &[SocketAddr] {
        &self.local_addrs
    }

    /// Launch all configured tasks based on configuration
    ///
    /// The listening sockets are bound before anything is spawned, so an
    /// unresolvable host or a busy port is reported here.
    pub async fn launch(&mut self, config: &Config) -> Result<()> {
        let server = ModbusServer::bind(&config.modbus, self.registers())
            .await
            .context("Failed to start the Modbus server")?;
        self.local_addrs = server.local_addrs();

        if config.simulation.enabled {
            self.start_pseudo_sensor(config)?;
        } else {
            info!("Pseudo sensor disabled, the input register stays at 0");
        }

        self.start_modbus_server(server)?;

        Ok(())
    }

    /// Start the pseudo sensor refreshing the input register
    ///
    /// The base level is preset to low before the task is spawned.
    fn start_pseudo_sensor(&mut self, config: &Config) -> Result<()> {
        info!(
            "Starting pseudo sensor, tick every {} ms",
            config.simulation.tick_interval_ms
        );

        let sensor = PseudoSensor::from_config(&config.simulation, self.registers())
            .with_running_flag(self.running.clone());

        let task = tokio::spawn(async move {
            sensor.run().await;
            Ok(())
        });

        self.tasks.push(task);
        Ok(())
    }

    /// Start the Modbus TCP server on its already bound endpoints
    fn start_modbus_server(&mut self, server: ModbusServer) -> Result<()> {
        info!(
            "Starting Modbus server on {}",
            self.local_addrs
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        );

        let task = tokio::spawn(async move {
            server.run().await?;
            Ok(())
        });

        self.tasks.push(task);
        Ok(())
    }

    /// Wait until one of the tasks ends
    ///
    /// None of the tasks is expected to end while the daemon is running, so
    /// any completion is reported as an error. Returns immediately when no
    /// task was launched.
    pub async fn run_until_failure(&mut self) -> Result<()> {
        if self.tasks.is_empty() {
            return Ok(());
        }

        let tasks = std::mem::take(&mut self.tasks);
        let (finished, index, remaining) = select_all(tasks).await;
        self.tasks = remaining;

        match finished {
            Ok(Ok(())) => anyhow::bail!("Daemon task {} stopped unexpectedly", index),
            Ok(Err(err)) => {
                error!("Daemon task {} failed: {:#}", index, err);
                Err(err)
            }
            Err(join_err) => {
                error!("Daemon task {} panicked: {}", index, join_err);
                Err(join_err).context("Daemon task panicked")
            }
        }
    }

    /// Stop all running tasks
    ///
    /// The pseudo sensor stops on the running flag; the server has no stop
    /// signal and is aborted, which closes the listeners and drops the
    /// sessions it owns.
    pub fn shutdown(&self) {
        info!("Shutting down daemon tasks");
        self.running.store(false, Ordering::SeqCst);
        for task in &self.tasks {
            task.abort();
        }
    }

    /// Wait for all tasks to complete
    pub async fn join(self) -> Result<()> {
        for task in self.tasks {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => error!("Task failed: {:#}", err),
                Err(err) if err.is_cancelled() => debug!("Task cancelled"),
                Err(err) => error!("Task panicked: {}", err),
            }
        }
        Ok(())
    }
}
