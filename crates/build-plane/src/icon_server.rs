//! Ephemeral loopback server that lets the project generator fetch the job icon
//! over HTTP.
//!
//! [`IconServer`] is a guard: the listener lives on its own thread with a private
//! runtime and is torn down when the guard drops, whichever way the build exits.
use std::{io, net::{Ipv4Addr, SocketAddr}, path::PathBuf, sync::Arc, thread::JoinHandle};
use axum::{Router, routing::get, extract::State, http::{StatusCode, header}, response::IntoResponse};
use tokio::sync::oneshot;
use tracing::{debug, warn};

pub struct IconServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

async fn serve_icon(State(icon): State<Arc<PathBuf>>) -> impl IntoResponse {
    match tokio::fs::read(icon.as_ref()).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, "image/png")], bytes).into_response(),
        Err(e) => { warn!(error=%e, "icon_server.read_failed"); StatusCode::NOT_FOUND.into_response() }
    }
}

impl IconServer {
    pub fn start(icon: PathBuf) -> io::Result<Self> {
        let listener = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
        let (tx, rx) = oneshot::channel::<()>();
        let app = Router::new().route("/icon.png", get(serve_icon)).with_state(Arc::new(icon));
        let thread = std::thread::Builder::new().name("icon-server".into()).spawn(move || {
            runtime.block_on(async move {
                let listener = match tokio::net::TcpListener::from_std(listener) {
                    Ok(l) => l,
                    Err(e) => { warn!(error=%e, "icon_server.listener_failed"); return; }
                };
                tokio::select! {
                    res = std::future::IntoFuture::into_future(axum::serve(listener, app)) => { if let Err(e) = res { warn!(error=%e, "icon_server.serve_failed"); } }
                    _ = rx => {}
                }
            });
            // Dropping the runtime here cancels any in-flight connection tasks.
        })?;
        debug!(%addr, "icon_server.started");
        Ok(Self { addr, shutdown: Some(tx), thread: Some(thread) })
    }

    pub fn addr(&self) -> SocketAddr { self.addr }

    pub fn icon_url(&self) -> String { format!("http://{}/icon.png", self.addr) }
}

impl Drop for IconServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() { let _ = tx.send(()); }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() { warn!(addr=%self.addr, "icon_server.thread_panicked"); }
        }
        debug!(addr=%self.addr, "icon_server.closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use crate::test_support::tiny_png;

    fn raw_get(addr: SocketAddr, path: &str) -> io::Result<Vec<u8>> {
        let mut stream = std::net::TcpStream::connect(addr)?;
        write!(stream, "GET {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n")?;
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf)?;
        Ok(buf)
    }

    #[test]
    fn serves_icon_until_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let icon = dir.path().join("icon.png");
        std::fs::write(&icon, tiny_png()).unwrap();
        let server = IconServer::start(icon).unwrap();
        let addr = server.addr();
        assert!(server.icon_url().ends_with("/icon.png"));
        let response = raw_get(addr, "/icon.png").unwrap();
        let text = String::from_utf8_lossy(&response);
        assert!(text.starts_with("HTTP/1.1 200"), "{text}");
        assert!(text.to_ascii_lowercase().contains("content-type: image/png"), "{text}");
        assert!(response.ends_with(&tiny_png()));
        drop(server);
        assert!(std::net::TcpStream::connect(addr).is_err());
    }

    #[test]
    fn missing_icon_is_404() {
        let server = IconServer::start(PathBuf::from("/nonexistent/icon.png")).unwrap();
        let response = raw_get(server.addr(), "/icon.png").unwrap();
        assert!(String::from_utf8_lossy(&response).starts_with("HTTP/1.1 404"));
    }
}
