//! Ephemeral port allocation.

use crate::server::{ServerError, ServerResult};

use std::net::TcpListener;
use std::panic::Location;

use error_location::ErrorLocation;

const HOST: &str = "127.0.0.1";

pub struct PortAllocator;

impl PortAllocator {
    /// Allocate an ephemeral loopback port.
    ///
    /// Binds port 0, reads back the OS-assigned port, and releases
    /// the socket. The port is free at the moment of return; the
    /// caller is expected to hand it to the backend promptly.
    pub fn allocate() -> ServerResult<u16> {
        let listener =
            TcpListener::bind((HOST, 0)).map_err(|e| ServerError::PortAllocation {
                source: e,
                location: ErrorLocation::from(Location::caller()),
            })?;

        let port = listener
            .local_addr()
            .map_err(|e| ServerError::PortAllocation {
                source: e,
                location: ErrorLocation::from(Location::caller()),
            })?
            .port();

        drop(listener);
        Ok(port)
    }

    /// Check whether a previously allocated port can still be bound.
    ///
    /// Used by the restart path to decide between reusing the prior
    /// generation's port and allocating a fresh one.
    pub fn is_free(port: u16) -> bool {
        TcpListener::bind((HOST, port)).is_ok()
    }
}
