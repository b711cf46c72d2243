//! Newline-delimited JSON-RPC connection loop, shared by the STDIO and TCP
//! transports.
//!
//! One message per line. The reader handles messages in order; tool calls
//! run on their own tasks and their responses are funnelled through a
//! single writer task, so replies may come back out of order.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, instrument, warn};

use super::TransportResult;
use crate::core::McpServer;
use crate::core::protocol::{JsonRpcResponse, Reply, decode_message};

/// Responses buffered ahead of a slow writer before handlers wait.
const OUTBOUND_BUFFER: usize = 64;

/// Serve one client connection until EOF, a read error or session close.
#[instrument(skip_all, fields(client_ip = client_ip.as_deref().unwrap_or("local")))]
pub async fn serve_lines<R, W>(
    server: &McpServer,
    reader: R,
    writer: W,
    client_ip: Option<String>,
) -> TransportResult<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let session = server.open_session(client_ip);
    let (tx, rx) = mpsc::channel::<JsonRpcResponse>(OUTBOUND_BUFFER);
    let writer_task = tokio::spawn(write_responses(writer, rx));

    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut read_result = Ok(());

    loop {
        buf.clear();
        let n = match reader.read_until(b'\n', &mut buf).await {
            Ok(n) => n,
            Err(e) => {
                error!("Read failed: {}", e);
                read_result = Err(e.into());
                break;
            }
        };

        if n == 0 {
            debug!("Client closed the connection");
            break;
        }
        if buf.last() != Some(&b'\n') {
            warn!(bytes = n, "Discarding truncated final line");
            break;
        }

        let line = match std::str::from_utf8(&buf) {
            Ok(line) => line.trim(),
            Err(e) => {
                warn!("Line is not valid UTF-8");
                if tx.send(JsonRpcResponse::parse_error(e)).await.is_err() {
                    break;
                }
                continue;
            }
        };
        if line.is_empty() {
            continue;
        }

        let request = match decode_message(line) {
            Ok(request) => request,
            Err(response) => {
                warn!("Rejected message: {:?}", response.error.as_ref().map(|e| &e.message));
                if tx.send(response).await.is_err() {
                    break;
                }
                continue;
            }
        };

        let handled = server.handle(&session, request);
        match handled.reply {
            Reply::Immediate(Some(response)) => {
                if tx.send(response).await.is_err() {
                    break;
                }
            }
            Reply::Immediate(None) => {}
            Reply::Deferred(future) => {
                let tx = tx.clone();
                tokio::spawn(async move {
                    let mut completion = future.await;
                    if let Some(response) = completion.take_response() {
                        let _ = tx.send(response).await;
                    }
                    drop(completion);
                });
            }
        }

        if handled.close {
            server.close_session(&session).await;
            break;
        }
    }

    server.disconnect(&session);
    drop(tx);

    match writer_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Writer stopped: {}", e),
        Err(e) => error!("Writer task failed: {}", e),
    }

    read_result
}

async fn write_responses<W>(
    mut writer: W,
    mut rx: mpsc::Receiver<JsonRpcResponse>,
) -> TransportResult<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(response) = rx.recv().await {
        let mut line = serde_json::to_vec(&response)?;
        line.push(b'\n');
        writer.write_all(&line).await?;
        writer.flush().await?;
    }
    writer.shutdown().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Config;
    use crate::core::protocol::message::codes;
    use serde_json::{Value, json};
    use tokio::io::{AsyncBufReadExt, BufReader, DuplexStream, duplex};
    use tokio::task::JoinHandle;

    struct Client {
        lines: tokio::io::Lines<BufReader<tokio::io::ReadHalf<DuplexStream>>>,
        writer: tokio::io::WriteHalf<DuplexStream>,
        server: JoinHandle<TransportResult<()>>,
    }

    impl Client {
        fn connect() -> Self {
            let (client, server_side) = duplex(64 * 1024);
            let server = McpServer::new(Config::default()).unwrap();
            let handle = tokio::spawn(async move {
                let (reader, writer) = tokio::io::split(server_side);
                serve_lines(&server, reader, writer, Some("127.0.0.1".to_string())).await
            });
            let (reader, writer) = tokio::io::split(client);
            Self {
                lines: BufReader::new(reader).lines(),
                writer,
                server: handle,
            }
        }

        async fn send(&mut self, message: Value) {
            self.send_raw(&format!("{}\n", message)).await;
        }

        async fn send_raw(&mut self, raw: &str) {
            self.writer.write_all(raw.as_bytes()).await.unwrap();
        }

        async fn recv(&mut self) -> Value {
            let line = self.lines.next_line().await.unwrap().unwrap();
            serde_json::from_str(&line).unwrap()
        }

        async fn handshake(&mut self) {
            self.send(json!({
                "jsonrpc": "2.0", "id": 0, "method": "initialize",
                "params": { "protocolVersion": "2025-06-18", "capabilities": {} }
            }))
            .await;
            let response = self.recv().await;
            assert_eq!(response["result"]["protocolVersion"], "2025-06-18");
            self.send(json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }))
                .await;
        }
    }

    #[tokio::test]
    async fn test_calculator_over_lines() {
        let mut client = Client::connect();
        client.handshake().await;

        client
            .send(json!({
                "jsonrpc": "2.0", "id": 1, "method": "tools/call",
                "params": { "name": "calculator", "arguments": { "expr": "2+2" } }
            }))
            .await;
        let response = client.recv().await;
        assert_eq!(response["id"], 1);
        assert_eq!(response["result"]["structuredContent"]["result"], 4);
    }

    #[tokio::test]
    async fn test_parse_error_then_valid_message() {
        let mut client = Client::connect();

        client.send_raw("{this is not json\n").await;
        let response = client.recv().await;
        assert_eq!(response["id"], Value::Null);
        assert_eq!(response["error"]["code"], codes::PARSE_ERROR);

        client
            .send(json!([{ "jsonrpc": "2.0", "id": 1, "method": "ping" }]))
            .await;
        let response = client.recv().await;
        assert_eq!(response["error"]["code"], codes::INVALID_REQUEST);

        client.send(json!({ "jsonrpc": "2.0", "id": 2, "method": "ping" })).await;
        let response = client.recv().await;
        assert_eq!(response["id"], 2);
        assert_eq!(response["result"], json!({}));
    }

    #[tokio::test]
    async fn test_truncated_final_line_is_discarded() {
        let mut client = Client::connect();

        client.send(json!({ "jsonrpc": "2.0", "id": 1, "method": "ping" })).await;
        client
            .send_raw(r#"{"jsonrpc":"2.0","id":2,"method":"ping"}"#)
            .await;
        client.writer.shutdown().await.unwrap();

        let response = client.recv().await;
        assert_eq!(response["id"], 1);
        assert!(client.lines.next_line().await.unwrap().is_none());
        tokio_test::assert_ok!(client.server.await.unwrap());
    }

    #[tokio::test]
    async fn test_shutdown_closes_connection() {
        let mut client = Client::connect();
        client.handshake().await;

        client
            .send(json!({ "jsonrpc": "2.0", "id": 5, "method": "shutdown" }))
            .await;
        let response = client.recv().await;
        assert_eq!(response["id"], 5);
        assert_eq!(response["result"], json!({}));

        assert!(client.lines.next_line().await.unwrap().is_none());
        tokio_test::assert_ok!(client.server.await.unwrap());
    }

    #[tokio::test]
    async fn test_call_before_initialized_is_rejected() {
        let mut client = Client::connect();

        client
            .send(json!({
                "jsonrpc": "2.0", "id": "a", "method": "tools/call",
                "params": { "name": "calculator", "arguments": { "expr": "1" } }
            }))
            .await;
        let response = client.recv().await;
        assert_eq!(response["id"], "a");
        assert_eq!(response["error"]["code"], codes::PROTOCOL_SEQUENCE);
    }
}
