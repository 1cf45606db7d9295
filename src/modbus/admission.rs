// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the modbus-pseudo-sensor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Session admission control
//!
//! The [`AdmissionController`] bounds the number of concurrently running sessions.
//! Slots are the permits of a `tokio` semaphore: a session holds one permit for its
//! whole life and gives it back when its connection is dropped.
//!
//! When every slot is taken, the connection is handled according to the configured
//! [`OverloadPolicy`] and the rejection is reported through a [`RejectionThrottle`],
//! so that sustained overload produces one warning per reporting window instead of
//! one per connection.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use log::{debug, warn};
use tokio::net::TcpStream;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::modbus_server::PseudoSensorService;
use super::register_map::RegisterMap;
use super::session::{SessionGuard, SessionStream};
use crate::config::{ModbusConfig, OverloadPolicy};

/// Rate limiter for overload warnings
///
/// The first rejection is reported. Later rejections are reported only once
/// `window` has elapsed since the last reported one; the ones in between are
/// counted and the count is handed to the next report.
#[derive(Debug)]
pub struct RejectionThrottle {
    window: Duration,
    last_report: Option<Instant>,
    suppressed: u64,
}

impl RejectionThrottle {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_report: None,
            suppressed: 0,
        }
    }

    /// Register a rejection at `now`
    ///
    /// Returns `Some(suppressed)` when the rejection must be reported, where
    /// `suppressed` is the number of silent rejections since the previous report,
    /// or `None` when it falls inside the current window.
    pub fn register(&mut self, now: Instant) -> Option<u64> {
        let due = match self.last_report {
            Some(last) => now.saturating_duration_since(last) >= self.window,
            None => true,
        };
        if due {
            self.last_report = Some(now);
            Some(std::mem::take(&mut self.suppressed))
        } else {
            self.suppressed += 1;
            None
        }
    }
}

/// Gatekeeper creating sessions for incoming connections
#[derive(Debug)]
pub struct AdmissionController {
    slots: Arc<Semaphore>,
    max_sessions: usize,
    policy: OverloadPolicy,
    throttle: Mutex<RejectionThrottle>,
    next_session_id: AtomicU64,
    registers: Arc<RegisterMap>,
}

impl AdmissionController {
    /// Create a controller with `max_sessions` slots
    pub fn new(
        max_sessions: usize,
        policy: OverloadPolicy,
        report_window: Duration,
        registers: Arc<RegisterMap>,
    ) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(max_sessions)),
            max_sessions,
            policy,
            throttle: Mutex::new(RejectionThrottle::new(report_window)),
            next_session_id: AtomicU64::new(1),
            registers,
        }
    }

    /// Create a controller from the Modbus section of the configuration
    pub fn from_config(config: &ModbusConfig, registers: Arc<RegisterMap>) -> Self {
        Self::new(
            config.max_sessions,
            config.overload_policy,
            Duration::from_secs(config.rejection_report_interval_secs),
            registers,
        )
    }

    /// Maximum number of concurrent sessions
    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    /// Number of sessions currently holding a slot
    pub fn active_sessions(&self) -> usize {
        self.max_sessions - self.slots.available_permits()
    }

    /// Decide what happens to a connection just taken off a listening endpoint
    ///
    /// Returns the service and transport of the new session, or `None` when the
    /// connection is turned away. This never fails: an error here would stop the
    /// whole listening endpoint.
    pub async fn admit(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
    ) -> Option<(PseudoSensorService, SessionStream<TcpStream>)> {
        let permit = match Arc::clone(&self.slots).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                self.report_rejection(peer);
                match self.policy {
                    OverloadPolicy::Drop => {
                        debug!("Dropping connection from {}", peer);
                        return None;
                    }
                    OverloadPolicy::Defer => self.wait_for_slot(peer).await?,
                }
            }
        };
        self.start_session(stream, peer, permit)
    }

    async fn wait_for_slot(&self, peer: SocketAddr) -> Option<OwnedSemaphorePermit> {
        debug!("Connection from {} waits for a free session slot", peer);
        match Arc::clone(&self.slots).acquire_owned().await {
            Ok(permit) => Some(permit),
            Err(_) => {
                // Only happens if the semaphore was closed
                warn!("Session slots are closed, dropping connection from {}", peer);
                None
            }
        }
    }

    fn start_session(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        permit: OwnedSemaphorePermit,
    ) -> Option<(PseudoSensorService, SessionStream<TcpStream>)> {
        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);

        // Dropping the permit on this path gives the slot back
        if let Err(err) = stream.set_nodelay(true) {
            warn!("Cannot configure connection from {}: {}", peer, err);
            return None;
        }

        let guard = SessionGuard::new(id, peer, permit);
        let service = PseudoSensorService::new(id, Arc::clone(&self.registers));
        Some((service, SessionStream::new(stream, guard)))
    }

    fn report_rejection(&self, peer: SocketAddr) {
        let report = self
            .throttle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .register(Instant::now());
        match report {
            Some(0) => warn!(
                "The number of sessions has reached the maximum {}, connection from {} is not served",
                self.max_sessions, peer
            ),
            Some(suppressed) => warn!(
                "The number of sessions has reached the maximum {}, connection from {} is not served ({} more rejections since the last report)",
                self.max_sessions, peer, suppressed
            ),
            None => debug!("Session limit reached, connection from {} is not served", peer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throttle_reports_once_per_window() {
        let mut throttle = RejectionThrottle::new(Duration::from_secs(10));
        let start = Instant::now();

        assert_eq!(throttle.register(start), Some(0));
        assert_eq!(throttle.register(start + Duration::from_secs(3)), None);
        assert_eq!(throttle.register(start + Duration::from_secs(9)), None);
        // Two silent rejections are handed to the next report
        assert_eq!(throttle.register(start + Duration::from_secs(11)), Some(2));
        assert_eq!(throttle.register(start + Duration::from_secs(22)), Some(0));
    }

    #[test]
    fn test_throttle_window_restarts_at_each_report() {
        let mut throttle = RejectionThrottle::new(Duration::from_secs(10));
        let start = Instant::now();

        assert!(throttle.register(start).is_some());
        assert!(throttle.register(start + Duration::from_secs(10)).is_some());
        assert!(throttle.register(start + Duration::from_secs(19)).is_none());
        assert!(throttle.register(start + Duration::from_secs(20)).is_some());
    }

    #[test]
    fn test_new_controller_is_idle() {
        let controller = AdmissionController::new(
            4,
            OverloadPolicy::Defer,
            Duration::from_secs(10),
            Arc::new(RegisterMap::new()),
        );
        assert_eq!(controller.max_sessions(), 4);
        assert_eq!(controller.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_drop_policy_turns_away_excess_connection() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let controller = AdmissionController::new(
            1,
            OverloadPolicy::Drop,
            Duration::from_secs(10),
            Arc::new(RegisterMap::new()),
        );

        let _first_client = TcpStream::connect(addr).await.unwrap();
        let (stream, peer) = listener.accept().await.unwrap();
        let first = controller.admit(stream, peer).await;
        assert!(first.is_some());
        assert_eq!(controller.active_sessions(), 1);

        let _second_client = TcpStream::connect(addr).await.unwrap();
        let (stream, peer) = listener.accept().await.unwrap();
        assert!(controller.admit(stream, peer).await.is_none());
        assert_eq!(controller.active_sessions(), 1);

        drop(first);
        assert_eq!(controller.active_sessions(), 0);
    }
}
