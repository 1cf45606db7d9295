// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the modbus-pseudo-sensor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Listening endpoints of the Modbus server
//!
//! [`ModbusServer::bind`] resolves the configured host and binds every address it
//! can. [`ModbusServer::run`] then serves all endpoints from a single future:
//! each endpoint has its own `tokio-modbus` accept loop, and every accepted
//! connection goes through the shared [`AdmissionController`] before a session is
//! spawned for it.

use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;

use futures::future::select_all;
use log::{debug, error, info, trace, warn};
use thiserror::Error;
use tokio::net::{lookup_host, TcpListener, TcpStream};
use tokio_modbus::server::tcp::Server;

use super::admission::AdmissionController;
use super::register_map::RegisterMap;
use super::session::SessionEnd;
use crate::config::ModbusConfig;

/// Errors raised while setting up or running the listening endpoints
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("cannot resolve listening address {host}:{port}: {source}")]
    Resolve {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("no listening endpoint could be bound on {host}:{port}")]
    NoEndpoint { host: String, port: u16 },

    #[error("accept failed on {addr}: {source}")]
    Accept {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}

/// Modbus TCP server bound to one or more endpoints
pub struct ModbusServer {
    endpoints: Vec<(SocketAddr, Server)>,
    admission: Arc<AdmissionController>,
}

impl ModbusServer {
    /// Bind every endpoint resolved from the configuration
    ///
    /// Without a configured address, the IPv6 and IPv4 wildcard addresses are
    /// tried in that order. Endpoints that cannot be bound are skipped; it is an
    /// error only if none could be bound.
    pub async fn bind(
        config: &ModbusConfig,
        registers: Arc<RegisterMap>,
    ) -> Result<Self, ServerError> {
        let host = config.address.clone().unwrap_or_else(|| "any".to_string());
        let candidates = resolve(config).await?;

        let mut endpoints = Vec::new();
        for candidate in candidates {
            match TcpListener::bind(candidate).await {
                Ok(listener) => {
                    let local = listener.local_addr().unwrap_or(candidate);
                    info!("Modbus server listening on {}", local);
                    endpoints.push((local, Server::new(listener)));
                }
                // On dual-stack hosts the IPv6 wildcard already covers IPv4
                Err(err) => info!("Skipping endpoint {}: {}", candidate, err),
            }
        }

        if endpoints.is_empty() {
            return Err(ServerError::NoEndpoint {
                host,
                port: config.port,
            });
        }

        Ok(Self {
            endpoints,
            admission: Arc::new(AdmissionController::from_config(config, registers)),
        })
    }

    /// Addresses actually bound (useful when the configured port is 0)
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.endpoints.iter().map(|(addr, _)| *addr).collect()
    }

    /// Admission controller shared by every endpoint
    pub fn admission(&self) -> Arc<AdmissionController> {
        Arc::clone(&self.admission)
    }

    /// Serve all endpoints until one of them fails for good
    ///
    /// This only returns on a non-transient accept failure.
    pub async fn run(self) -> Result<(), ServerError> {
        let admission = self.admission;
        let loops: Vec<Pin<Box<dyn Future<Output = ServerError> + Send + '_>>> = self
            .endpoints
            .iter()
            .map(|(addr, server)| {
                Box::pin(serve_endpoint(*addr, server, Arc::clone(&admission)))
                    as Pin<Box<dyn Future<Output = ServerError> + Send + '_>>
            })
            .collect();

        let (err, _, _) = select_all(loops).await;
        error!("Modbus server stopped: {}", err);
        Err(err)
    }
}

/// Accept loop of one endpoint; returns the error that stopped it
async fn serve_endpoint(
    addr: SocketAddr,
    server: &Server,
    admission: Arc<AdmissionController>,
) -> ServerError {
    let on_connected = move |stream: TcpStream, peer: SocketAddr| {
        let admission = Arc::clone(&admission);
        async move { Ok::<_, io::Error>(admission.admit(stream, peer).await) }
    };

    let on_process_error = |err: io::Error| {
        report_process_error(&err);
    };

    loop {
        debug!("Accepting connections on {}", addr);
        match server.serve(&on_connected, on_process_error).await {
            Err(err) if is_transient(&err) => {
                warn!("Transient accept error on {}: {}", addr, err);
            }
            Err(err) => return ServerError::Accept { addr, source: err },
            Ok(_) => {
                return ServerError::Accept {
                    addr,
                    source: io::Error::new(io::ErrorKind::Other, "accept loop terminated"),
                }
            }
        }
    }
}

/// Log a session error raised by the protocol layer
///
/// Transport failures were already recorded by the session stream and show up
/// in its closing line; only frames the library could not decode are reported
/// here. Returns the end reported at debug level, if any.
fn report_process_error(err: &io::Error) -> Option<SessionEnd> {
    match SessionEnd::from_io_error(err) {
        SessionEnd::MalformedFrame => {
            debug!("Session terminated: {} ({})", SessionEnd::MalformedFrame, err);
            Some(SessionEnd::MalformedFrame)
        }
        end => {
            trace!("Session error after {}: {}", end, err);
            None
        }
    }
}

fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
    )
}

async fn resolve(config: &ModbusConfig) -> Result<Vec<SocketAddr>, ServerError> {
    let port = config.port;
    let Some(host) = &config.address else {
        return Ok(vec![
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, port)),
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
        ]);
    };

    let mut addrs: Vec<SocketAddr> = lookup_host((host.as_str(), port))
        .await
        .map_err(|source| ServerError::Resolve {
            host: host.clone(),
            port,
            source,
        })?
        .collect();
    addrs.dedup();
    debug!("{}:{} resolves to {:?}", host, port, addrs);
    Ok(addrs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_malformed_frames_are_reported_by_listener() {
        assert_eq!(
            report_process_error(&io::Error::new(io::ErrorKind::InvalidData, "bad protocol id")),
            Some(SessionEnd::MalformedFrame)
        );
        assert_eq!(
            report_process_error(&io::Error::from(io::ErrorKind::ConnectionReset)),
            None
        );
        assert_eq!(
            report_process_error(&io::Error::from(io::ErrorKind::UnexpectedEof)),
            None
        );
    }

    #[test]
    fn test_transient_accept_errors() {
        assert!(is_transient(&io::Error::from(io::ErrorKind::ConnectionAborted)));
        assert!(is_transient(&io::Error::from(io::ErrorKind::Interrupted)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::PermissionDenied)));
    }

    #[tokio::test]
    async fn test_wildcard_resolves_to_both_families() {
        let config = ModbusConfig {
            address: None,
            port: 50200,
            ..ModbusConfig::default()
        };
        let addrs = resolve(&config).await.unwrap();
        assert_eq!(addrs.len(), 2);
        assert!(addrs.iter().all(|addr| addr.port() == 50200));
        assert!(addrs.iter().any(SocketAddr::is_ipv4));
        assert!(addrs.iter().any(SocketAddr::is_ipv6));
    }

    #[tokio::test]
    async fn test_bind_reports_local_port() {
        let config = ModbusConfig {
            address: Some("127.0.0.1".to_string()),
            port: 0,
            ..ModbusConfig::default()
        };
        let server = ModbusServer::bind(&config, Arc::new(RegisterMap::new()))
            .await
            .unwrap();
        let addrs = server.local_addrs();
        assert_eq!(addrs.len(), 1);
        assert_ne!(addrs[0].port(), 0);
        assert_eq!(server.admission().active_sessions(), 0);
    }
}
