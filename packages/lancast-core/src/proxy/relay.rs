//! Per-connection request handling: logo serving and stream relaying.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{ACCEPT, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, RANGE, USER_AGENT};
use reqwest::{Client, StatusCode};
use tokio::io::{AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use super::http::{read_request_head, HeadError, RequestHead, ResponseHead};
use crate::artwork::ArtworkStore;
use crate::protocol_constants::{
    DLNA_CONTENT_FEATURES, DLNA_TRANSFER_MODE, LOGO_PATH, MAX_REQUEST_HEAD_SIZE, ORIGIN_ACCEPT,
    RELAY_CHUNK_SIZE, STREAM_PATH, USER_AGENT as LANCAST_USER_AGENT,
};

/// Everything a connection worker needs. Shared read-only across workers.
pub(crate) struct RelayContext {
    pub client: Client,
    pub artwork: Arc<ArtworkStore>,
    pub head_timeout: Duration,
}

/// Serves one connection and closes it.
pub(crate) async fn handle_connection(stream: TcpStream, peer: SocketAddr, ctx: &RelayContext) {
    let (read_half, mut writer) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let head = match tokio::time::timeout(
        ctx.head_timeout,
        read_request_head(&mut reader, MAX_REQUEST_HEAD_SIZE),
    )
    .await
    {
        Err(_) => {
            log::debug!("[Proxy] {} sent no request head in time", peer);
            return;
        }
        Ok(Ok(None)) => return,
        Ok(Ok(Some(head))) => head,
        Ok(Err(e)) => {
            log::debug!("[Proxy] Bad request from {}: {}", peer, e);
            let status = match e {
                HeadError::TooLarge(_) => 431,
                _ => 400,
            };
            let _ = write_head(&mut writer, ResponseHead::new(status)).await;
            return;
        }
    };

    log::debug!("[Proxy] {} {} from {}", head.method, head.target, peer);

    if let Err(e) = route(&head, &mut writer, ctx).await {
        // Renderer hung up mid-response; nothing to report upstream.
        log::debug!("[Proxy] Connection from {} ended: {}", peer, e);
    }
    let _ = writer.shutdown().await;
}

async fn route<W>(head: &RequestHead, writer: &mut W, ctx: &RelayContext) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    if !head.method.eq_ignore_ascii_case("GET") && !head.is_head() {
        return write_head(writer, ResponseHead::new(405).header("Allow", "GET, HEAD")).await;
    }

    let path = head.path();
    if path.ends_with(LOGO_PATH.trim_start_matches('/')) {
        return serve_logo(writer, ctx.artwork.logo(), head.is_head()).await;
    }

    if path.starts_with(STREAM_PATH) {
        if let Some(origin) = head.query_param("url") {
            return relay(head, &origin, writer, &ctx.client).await;
        }
        log::debug!("[Proxy] Stream request without url parameter");
    }

    write_head(writer, ResponseHead::new(400)).await
}

async fn serve_logo<W>(writer: &mut W, logo: Option<Bytes>, head_only: bool) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let Some(bytes) = logo else {
        return write_head(writer, ResponseHead::new(404)).await;
    };

    let head = ResponseHead::new(200)
        .header("Content-Type", "image/jpeg")
        .header("Content-Length", bytes.len().to_string());
    write_head(writer, head).await?;
    if !head_only {
        writer.write_all(&bytes).await?;
    }
    writer.flush().await
}

fn is_relayable(origin: &str) -> bool {
    url::Url::parse(origin)
        .map(|u| matches!(u.scheme(), "http" | "https"))
        .unwrap_or(false)
}

async fn relay<W>(head: &RequestHead, origin: &str, writer: &mut W, client: &Client) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    if !is_relayable(origin) {
        log::warn!("[Proxy] Refusing to relay {:?}", origin);
        return write_head(writer, ResponseHead::new(400)).await;
    }

    let mut request = client
        .get(origin)
        .header(USER_AGENT, LANCAST_USER_AGENT)
        .header(ACCEPT, ORIGIN_ACCEPT);
    if let Some(range) = head.header("Range") {
        log::debug!("[Proxy] Forwarding Range: {}", range);
        request = request.header(RANGE, range);
    }

    let mut response = match request.send().await {
        Ok(r) => r,
        Err(e) => {
            log::warn!("[Proxy] Origin unreachable {}: {}", origin, e);
            return write_head(writer, ResponseHead::new(502)).await;
        }
    };

    let origin_status = response.status();
    if origin_status == StatusCode::RANGE_NOT_SATISFIABLE {
        // Passed through so the renderer can restart its range.
        log::debug!("[Proxy] Origin {} rejected the requested range", origin);
        let mut out = ResponseHead::new(416);
        if let Some(v) = header_str(&response, CONTENT_RANGE) {
            out = out.header("Content-Range", v);
        }
        return write_head(writer, out).await;
    }
    if origin_status.is_client_error() || origin_status.is_server_error() {
        log::warn!("[Proxy] Origin {} answered {}", origin, origin_status);
        return write_head(writer, ResponseHead::new(502)).await;
    }

    let status = if origin_status == StatusCode::PARTIAL_CONTENT {
        206
    } else {
        200
    };
    let mut out = ResponseHead::new(status);
    if let Some(v) = header_str(&response, CONTENT_TYPE) {
        out = out.header("Content-Type", v);
    }
    if let Some(v) = header_str(&response, CONTENT_LENGTH) {
        out = out.header("Content-Length", v);
    }
    if let Some(v) = header_str(&response, CONTENT_RANGE) {
        out = out.header("Content-Range", v);
    }
    let out = out
        .header("Accept-Ranges", "bytes")
        .header("transferMode.dlna.org", DLNA_TRANSFER_MODE)
        .header("contentFeatures.dlna.org", DLNA_CONTENT_FEATURES);

    log::info!("[Proxy] Relaying {} ({} from origin)", origin, out.status());
    write_head(writer, out).await?;
    if head.is_head() {
        return Ok(());
    }

    let mut sent: u64 = 0;
    loop {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                for piece in chunk.chunks(RELAY_CHUNK_SIZE) {
                    writer.write_all(piece).await?;
                }
                sent += chunk.len() as u64;
            }
            Ok(None) => break,
            Err(e) => {
                log::debug!("[Proxy] Origin read ended: {}", e);
                break;
            }
        }
    }
    writer.flush().await?;

    log::info!("[Proxy] Relay finished: {} KiB sent", sent / 1024);
    Ok(())
}

fn header_str(
    response: &reqwest::Response,
    name: reqwest::header::HeaderName,
) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn write_head<W>(writer: &mut W, head: ResponseHead) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&head.to_bytes()).await?;
    writer.flush().await
}
