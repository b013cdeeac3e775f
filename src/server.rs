//! The field-bus side of the bridge.
//!
//! The modbus wire protocol itself is tokio-modbus territory; this module
//! only answers register reads out of [`RegisterStore`] snapshots. A read
//! never triggers re-encoding and never waits on the update path beyond the
//! store's handle swap.

use crate::store::RegisterStore;
use std::future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_modbus::prelude::*;
use tokio_modbus::server::tcp::{Server, accept_tcp_connection};
use tracing::{debug, info, warn};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not bind the modbus listener to {1}")]
    Bind(#[source] std::io::Error, SocketAddr),
    #[error("the modbus server failed")]
    Serve(#[source] std::io::Error),
}

#[derive(Clone)]
pub struct RegisterService {
    store: Arc<RegisterStore>,
}

impl RegisterService {
    pub fn new(store: Arc<RegisterStore>) -> Self {
        Self { store }
    }

    fn read(&self, address: u16, count: u16) -> Result<Vec<u16>, ExceptionCode> {
        let image = self.store.snapshot();
        let Some(words) = image.read(address, count) else {
            debug!(address, count, "read outside of the published register image");
            return Err(ExceptionCode::IllegalDataAddress);
        };
        Ok(words.to_vec())
    }
}

impl tokio_modbus::server::Service for RegisterService {
    type Request = Request<'static>;
    type Response = Response;
    type Exception = ExceptionCode;
    type Future = future::Ready<Result<Self::Response, Self::Exception>>;

    fn call(&self, request: Self::Request) -> Self::Future {
        let result = match request {
            Request::ReadHoldingRegisters(address, count) => {
                self.read(address, count).map(Response::ReadHoldingRegisters)
            }
            Request::ReadInputRegisters(address, count) => {
                self.read(address, count).map(Response::ReadInputRegisters)
            }
            // The register map is strictly read-only.
            other => {
                debug!(request = ?other, "rejecting an unsupported modbus function");
                Err(ExceptionCode::IllegalFunction)
            }
        };
        future::ready(result)
    }
}

pub async fn serve(listen: SocketAddr, store: Arc<RegisterStore>) -> Result<(), Error> {
    let listener = TcpListener::bind(listen).await.map_err(|e| Error::Bind(e, listen))?;
    info!(address = %listen, "serving the register image over modbus TCP");
    let server = Server::new(listener);
    let service = RegisterService::new(store);
    let on_connected = |stream, socket_addr: SocketAddr| {
        let service = service.clone();
        async move {
            debug!(peer = %socket_addr, "modbus client connected");
            accept_tcp_connection(stream, socket_addr, move |_socket_addr| {
                Ok(Some(service.clone()))
            })
        }
    };
    let on_process_error = |e: std::io::Error| {
        warn!(error = (&e as &dyn std::error::Error), "a modbus connection failed");
    };
    server.serve(&on_connected, on_process_error).await.map_err(Error::Serve)
}
