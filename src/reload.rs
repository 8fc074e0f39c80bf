//! Live-reload channel.
//!
//! HTML served in development carries a small client script that opens a
//! WebSocket to [`LIVERELOAD_PATH`]. After every watched rebuild the
//! server sends `reload` to each open socket and the page refreshes.

use crate::log;
use anyhow::{Result, anyhow};
use parking_lot::Mutex;
use tiny_http::{Header, ReadWrite, Request, Response, StatusCode};
use tungstenite::{Message, WebSocket, handshake::derive_accept_key, protocol::Role};

/// WebSocket endpoint the client script connects to.
pub const LIVERELOAD_PATH: &str = "/__kiln/livereload";

/// Client script injected into served HTML.
const CLIENT_SCRIPT: &str = include_str!("embed/livereload.js");

type Client = WebSocket<Box<dyn ReadWrite + Send>>;

/// Connected browser tabs.
#[derive(Default)]
pub struct LiveReload {
    clients: Mutex<Vec<Client>>,
}

impl LiveReload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `request` asks for the live-reload socket.
    pub fn is_upgrade(request: &Request) -> bool {
        request.url() == LIVERELOAD_PATH
            && request
                .headers()
                .iter()
                .any(|h| h.field.equiv("Upgrade") && h.value.as_str().eq_ignore_ascii_case("websocket"))
    }

    /// Complete the WebSocket handshake and keep the connection.
    pub fn accept(&self, request: Request) -> Result<()> {
        let key = request
            .headers()
            .iter()
            .find(|h| h.field.equiv("Sec-WebSocket-Key"))
            .map(|h| h.value.as_str().to_owned())
            .ok_or_else(|| anyhow!("WebSocket request without Sec-WebSocket-Key"))?;

        let response = Response::new_empty(StatusCode(101))
            .with_header(header("Upgrade", "websocket")?)
            .with_header(header("Connection", "Upgrade")?)
            .with_header(header("Sec-WebSocket-Accept", &derive_accept_key(key.as_bytes()))?);

        let stream = request.upgrade("websocket", response);
        let socket = WebSocket::from_raw_socket(stream, Role::Server, None);
        self.clients.lock().push(socket);
        Ok(())
    }

    /// Tell every client to reload; drop those that went away.
    ///
    /// Sends happen outside the lock, so a slow tab never holds up
    /// [`accept`](Self::accept). Returns the number of clients reached.
    pub fn broadcast(&self) -> usize {
        let batch = std::mem::take(&mut *self.clients.lock());
        let reached = self.deliver(batch);
        if reached > 0 {
            log!("reload"; "reloading {reached} page(s)");
        }
        reached
    }

    /// Send `reload` to `batch` and put the live sockets back.
    fn deliver(&self, batch: Vec<Client>) -> usize {
        let survivors: Vec<_> = batch
            .into_iter()
            .filter_map(|mut client| client.send(Message::text("reload")).is_ok().then_some(client))
            .collect();
        let reached = survivors.len();
        self.clients.lock().extend(survivors);
        reached
    }

    #[cfg(test)]
    pub fn client_count(&self) -> usize {
        self.clients.lock().len()
    }
}

fn header(field: &str, value: &str) -> Result<Header> {
    Header::from_bytes(field.as_bytes(), value.as_bytes())
        .map_err(|()| anyhow!("invalid header `{field}: {value}`"))
}

/// Insert the client script before `</body>`, or append it when the page has none.
pub fn inject_client(html: &str) -> String {
    let tag = format!("<script>{CLIENT_SCRIPT}</script>");
    match html.rfind("</body>") {
        Some(pos) => format!("{}{tag}{}", &html[..pos], &html[pos..]),
        None => format!("{html}{tag}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, thread};
    use tiny_http::Server;

    #[test]
    fn test_inject_before_body_end() {
        let html = inject_client("<html><body><p>hi</p></body></html>");
        let script = html.find("<script>").unwrap();
        assert!(script > html.find("<p>hi</p>").unwrap());
        assert!(script < html.find("</body>").unwrap());
        assert!(html.contains(LIVERELOAD_PATH));
    }

    #[test]
    fn test_inject_without_body() {
        let html = inject_client("<p>fragment</p>");
        assert!(html.starts_with("<p>fragment</p><script>"));
    }

    #[test]
    fn test_broadcast_without_clients() {
        assert_eq!(LiveReload::new().broadcast(), 0);
    }

    #[test]
    fn test_websocket_round_trip() {
        let server = Server::http("127.0.0.1:0").unwrap();
        let port = server.server_addr().to_ip().unwrap().port();
        let reload = Arc::new(LiveReload::new());

        let accepting = Arc::clone(&reload);
        let handle = thread::spawn(move || {
            let request = server.recv().unwrap();
            assert!(LiveReload::is_upgrade(&request));
            accepting.accept(request).unwrap();
        });

        let url = format!("ws://127.0.0.1:{port}{LIVERELOAD_PATH}");
        let (mut client, _) = tungstenite::connect(url).unwrap();
        handle.join().unwrap();
        assert_eq!(reload.client_count(), 1);

        assert_eq!(reload.broadcast(), 1);
        let message = client.read().unwrap();
        assert_eq!(message.into_text().unwrap().as_str(), "reload");
    }

    type Tab = WebSocket<tungstenite::stream::MaybeTlsStream<std::net::TcpStream>>;

    fn connect(server: &Arc<Server>, reload: &Arc<LiveReload>) -> Tab {
        let port = server.server_addr().to_ip().unwrap().port();
        let (server, accepting) = (Arc::clone(server), Arc::clone(reload));
        let handle = thread::spawn(move || {
            let request = server.recv().unwrap();
            accepting.accept(request).unwrap();
        });
        let (client, _) = tungstenite::connect(format!("ws://127.0.0.1:{port}{LIVERELOAD_PATH}")).unwrap();
        handle.join().unwrap();
        client
    }

    #[test]
    fn test_accept_while_broadcast_in_flight() {
        let server = Arc::new(Server::http("127.0.0.1:0").unwrap());
        let reload = Arc::new(LiveReload::new());
        let mut first = connect(&server, &reload);

        // a broadcast has taken the sockets and is still sending
        let batch = std::mem::take(&mut *reload.clients.lock());
        let mut second = connect(&server, &reload);
        assert_eq!(reload.client_count(), 1);

        assert_eq!(reload.deliver(batch), 1);
        assert_eq!(reload.client_count(), 2);
        assert_eq!(first.read().unwrap().into_text().unwrap().as_str(), "reload");

        assert_eq!(reload.broadcast(), 2);
        assert_eq!(second.read().unwrap().into_text().unwrap().as_str(), "reload");
        assert_eq!(first.read().unwrap().into_text().unwrap().as_str(), "reload");
    }
}
