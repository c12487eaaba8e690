use super::request::read_request;
use super::response::write_response;
use super::service::AppService;
use crate::response::{Response, ResponseInit};
use may::coroutine::JoinHandle;
use may::net::{TcpListener, TcpStream as CoTcpStream};
use serde_json::json;
use std::io::{self, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// HTTP/1.1 server: one coroutine per connection, one request per
/// connection, streamed bodies sent with chunked transfer encoding.
pub struct HttpServer(pub AppService);

/// Handle to a running HTTP server
///
/// Provides methods for waiting until the server is ready, stopping it gracefully,
/// or joining the server thread.
pub struct ServerHandle {
    addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl ServerHandle {
    /// Address the server is bound to (useful after binding port 0).
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Wait for the server to be ready to accept connections
    ///
    /// Polls the server address by attempting TCP connections until successful.
    ///
    /// # Errors
    ///
    /// Returns `TimedOut` error if the server doesn't become ready within ~250ms (50 attempts × 5ms).
    pub fn wait_ready(&self) -> io::Result<()> {
        for _ in 0..50 {
            if TcpStream::connect(self.addr).is_ok() {
                return Ok(());
            }
            thread::sleep(Duration::from_millis(5));
        }
        Err(io::Error::new(io::ErrorKind::TimedOut, "server not ready"))
    }

    /// Stop accepting connections and wait for the accept loop to end.
    /// Connections already being served run to completion.
    pub fn stop(self) {
        // SAFETY: cancel() is unsafe in may because the coroutine may hold
        // resources mid-operation; the accept loop owns only the listener,
        // which is dropped on unwind.
        unsafe {
            self.handle.coroutine().cancel();
        }
        let _ = self.handle.join();
        info!(addr = %self.addr, "Server stopped");
    }

    /// Block until the accept loop ends.
    ///
    /// # Errors
    ///
    /// Returns an error if the accept coroutine panicked.
    pub fn join(self) -> std::thread::Result<()> {
        self.handle.join()
    }
}

impl HttpServer {
    /// Bind `addr` and start accepting connections.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid or the port cannot be bound.
    pub fn start<A: ToSocketAddrs>(self, addr: A) -> io::Result<ServerHandle> {
        let addr = addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid address"))?;
        let listener = TcpListener::bind(addr)?;
        let addr = listener.local_addr()?;
        let service = Arc::new(self.0);
        info!(addr = %addr, routes = service.routes.len(), "Server listening");
        let handle = may::go!(move || {
            for stream in listener.incoming() {
                match stream {
                    Ok(stream) => {
                        let service = Arc::clone(&service);
                        let _ = may::go!(move || serve_connection(&service, stream));
                    }
                    Err(e) => warn!(error = %e, "Accept failed"),
                }
            }
        });
        Ok(ServerHandle { addr, handle })
    }
}

fn serve_connection(service: &AppService, mut stream: CoTcpStream) {
    let peer = stream.peer_addr().ok();
    let request = match read_request(&mut stream) {
        Ok(Some(request)) => request,
        Ok(None) => return,
        Err(e) => {
            debug!(peer = ?peer, error = %e, "Malformed request");
            let res = Response::json_with_init(
                &json!({ "error": "Bad Request" }),
                ResponseInit::status(400),
            );
            let _ = write_response(&mut stream, &res);
            return;
        }
    };
    if let Err(e) = service.handle(request, &mut stream) {
        error!(peer = ?peer, error = %e, "Response write failed");
    }
    let _ = stream.flush();
    let _ = stream.shutdown(Shutdown::Write);
}
