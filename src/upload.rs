//! Multipart upload of audio containers to the detection service
//!
//! The request is written by hand so the body can be streamed straight from
//! the staged container without buffering it:
//!
//! ```text
//! POST <path> HTTP/1.1\r\n
//! Host: <host>:<port>\r\n
//! Content-Type: multipart/form-data; boundary=<boundary>\r\n
//! Accept-Charset: utf-8\r\n
//! gps-data: <latitude>,<longitude>,<timestamp>\r\n
//! Content-Length: <preamble + payload + terminator>\r\n
//! \r\n
//! --<boundary>\r\n
//! Content-Disposition: form-data; name="<field>"; filename="<filename>"\r\n
//! Content-Type: <content type>\r\n
//! \r\n
//! <container bytes>\r\n
//! --<boundary>--\r\n
//! ```

use std::io;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::config::{Endpoint, UploadConfig};
use crate::error::{RelayError, Result};
use crate::location::LocationFix;
use crate::transport::Transport;

/// File part of the form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormFile {
    pub boundary: String,
    pub field_name: String,
    pub filename: String,
    pub content_type: String,
}

impl From<&UploadConfig> for FormFile {
    fn from(config: &UploadConfig) -> Self {
        Self {
            boundary: config.boundary.clone(),
            field_name: config.field_name.clone(),
            filename: config.filename.clone(),
            content_type: config.content_type.clone(),
        }
    }
}

/// A fully framed request around a payload of known length
///
/// Content-Length is accumulated while the body sections are built, so it
/// cannot disagree with what is sent.
#[derive(Debug, Clone)]
pub struct MultipartRequest {
    head: String,
    preamble: String,
    terminator: String,
    content_length: u64,
}

impl MultipartRequest {
    pub fn new(endpoint: &Endpoint, form: &FormFile, gps_data: &str, payload_len: u64) -> Self {
        let mut content_length = 0u64;

        let preamble = format!(
            "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
            form.boundary, form.field_name, form.filename, form.content_type
        );
        content_length += preamble.len() as u64;
        content_length += payload_len;
        let terminator = format!("\r\n--{}--\r\n", form.boundary);
        content_length += terminator.len() as u64;

        let head = format!(
            "POST {} HTTP/1.1\r\n\
             Host: {}:{}\r\n\
             Content-Type: multipart/form-data; boundary={}\r\n\
             Accept-Charset: utf-8\r\n\
             gps-data: {}\r\n\
             Content-Length: {}\r\n\r\n",
            endpoint.path, endpoint.host, endpoint.port, form.boundary, gps_data, content_length
        );

        Self {
            head,
            preamble,
            terminator,
            content_length,
        }
    }

    pub fn head(&self) -> &str {
        &self.head
    }

    pub fn preamble(&self) -> &str {
        &self.preamble
    }

    pub fn terminator(&self) -> &str {
        &self.terminator
    }

    pub fn content_length(&self) -> u64 {
        self.content_length
    }
}

/// What the detection service answered
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadResponse {
    pub status: Option<u16>,
    pub body_lines: Vec<String>,
}

/// Sends containers to one endpoint over a `Transport`
pub struct Uploader<T> {
    transport: T,
    endpoint: Endpoint,
    form: FormFile,
}

impl<T: Transport> Uploader<T> {
    pub fn new(transport: T, endpoint: Endpoint, form: FormFile) -> Self {
        Self {
            transport,
            endpoint,
            form,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Check the endpoint accepts connections; the connection is dropped unused
    pub async fn probe(&self) -> Result<()> {
        self.connect().await.map(drop)
    }

    async fn connect(&self) -> Result<T::Conn> {
        self.transport
            .connect(&self.endpoint.host, self.endpoint.port)
            .await
            .map_err(|source| RelayError::UploadConnectFailed {
                host: self.endpoint.host.clone(),
                port: self.endpoint.port,
                source,
            })
    }

    /// Upload `payload_len` bytes streamed from `payload` with the current fix
    pub async fn send<R>(
        &self,
        fix: Option<&LocationFix>,
        payload: &mut R,
        payload_len: u64,
    ) -> Result<UploadResponse>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        let gps_data = fix.map(LocationFix::raw).unwrap_or_default();
        let request = MultipartRequest::new(&self.endpoint, &self.form, &gps_data, payload_len);

        info!(
            host = %self.endpoint.host,
            port = self.endpoint.port,
            content_length = request.content_length(),
            "Sending data to API"
        );

        let mut conn = self.connect().await?;

        let sent = async {
            conn.write_all(request.head().as_bytes()).await?;
            conn.write_all(request.preamble().as_bytes()).await?;
            let copied = tokio::io::copy(&mut payload.take(payload_len), &mut conn).await?;
            if copied != payload_len {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("payload ended after {} of {} bytes", copied, payload_len),
                ));
            }
            conn.write_all(request.terminator().as_bytes()).await?;
            conn.flush().await?;
            Ok::<_, io::Error>(())
        };
        sent.await
            .map_err(|source| RelayError::UploadSendFailed { source })?;

        let response = read_response(&mut conn)
            .await
            .map_err(|source| RelayError::UploadSendFailed { source })?;

        info!(status = ?response.status, "Response received");
        for line in &response.body_lines {
            info!(line = %line, "Detection service response");
        }

        Ok(response)
    }
}

/// Read status line, skip headers up to the blank line, collect body lines
///
/// The body is delimited by `Transfer-Encoding: chunked`, then by
/// `Content-Length`, and otherwise by the server closing the connection.
async fn read_response<C>(conn: &mut C) -> io::Result<UploadResponse>
where
    C: tokio::io::AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let mut response = UploadResponse::default();

    if conn.read_line(&mut line).await? == 0 {
        warn!("Connection closed before a response was received");
        return Ok(response);
    }
    response.status = parse_status(&line);

    let mut content_length = None;
    let mut chunked = false;
    loop {
        line.clear();
        if conn.read_line(&mut line).await? == 0 {
            return Ok(response);
        }
        let header = line.trim_end_matches(['\r', '\n']);
        if header.is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':') {
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse::<u64>().ok();
            } else if name.eq_ignore_ascii_case("transfer-encoding") {
                chunked = value.trim().eq_ignore_ascii_case("chunked");
            }
        }
        debug!(header, "Response header");
    }

    let mut body = Vec::new();
    match (chunked, content_length) {
        (true, _) => read_chunked(conn, &mut body).await?,
        (false, Some(len)) => {
            conn.take(len).read_to_end(&mut body).await?;
        }
        (false, None) => {
            conn.read_to_end(&mut body).await?;
        }
    }

    response.body_lines = String::from_utf8_lossy(&body)
        .lines()
        .map(str::to_string)
        .collect();
    Ok(response)
}

/// Decode a chunked body up to and including the zero-size last chunk
async fn read_chunked<C>(conn: &mut C, body: &mut Vec<u8>) -> io::Result<()>
where
    C: tokio::io::AsyncBufRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        if conn.read_line(&mut line).await? == 0 {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        // "<hex size>[;extensions]\r\n"
        let size = line.split(';').next().unwrap_or_default().trim();
        let size = u64::from_str_radix(size, 16).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidData, format!("invalid chunk size {:?}", size))
        })?;

        if size == 0 {
            // Trailer section ends at a blank line
            loop {
                line.clear();
                if conn.read_line(&mut line).await? == 0 || line.trim_end().is_empty() {
                    return Ok(());
                }
            }
        }

        let read = (&mut *conn).take(size).read_to_end(body).await?;
        if read as u64 != size {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        line.clear();
        conn.read_line(&mut line).await?;
    }
}

fn parse_status(line: &str) -> Option<u16> {
    let mut parts = line.split_whitespace();
    let version = parts.next()?;
    if !version.starts_with("HTTP/") {
        return None;
    }
    parts.next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::update_fix;
    use crate::transport::testing::LoopbackTransport;
    use proptest::prelude::*;
    use std::time::Duration;

    fn endpoint() -> Endpoint {
        Endpoint {
            host: "192.168.43.48".to_string(),
            port: 8000,
            path: "/detect".to_string(),
        }
    }

    fn form(boundary: &str) -> FormFile {
        FormFile {
            boundary: boundary.to_string(),
            field_name: "file".to_string(),
            filename: "audio.wav".to_string(),
            content_type: "audio/x-wav".to_string(),
        }
    }

    fn fix() -> LocationFix {
        LocationFix::parse(b"12.34,56.78,2024-01-01T00:00:00").unwrap()
    }

    #[test]
    fn test_request_wire_format() {
        let request = MultipartRequest::new(&endpoint(), &form("SaJeBoundary"), &fix().raw(), 364);

        assert_eq!(
            request.head(),
            "POST /detect HTTP/1.1\r\n\
             Host: 192.168.43.48:8000\r\n\
             Content-Type: multipart/form-data; boundary=SaJeBoundary\r\n\
             Accept-Charset: utf-8\r\n\
             gps-data: 12.34,56.78,2024-01-01T00:00:00\r\n\
             Content-Length: 496\r\n\r\n"
        );
        assert_eq!(
            request.preamble(),
            "--SaJeBoundary\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"audio.wav\"\r\n\
             Content-Type: audio/x-wav\r\n\r\n"
        );
        assert_eq!(request.terminator(), "\r\n--SaJeBoundary--\r\n");
        // 112 + 364 + 20
        assert_eq!(request.content_length(), 496);
    }

    #[test]
    fn test_parse_status() {
        assert_eq!(parse_status("HTTP/1.1 200 OK\r\n"), Some(200));
        assert_eq!(parse_status("HTTP/1.0 503 Service Unavailable\r\n"), Some(503));
        assert_eq!(parse_status("garbage\r\n"), None);
        assert_eq!(parse_status("\r\n"), None);
    }

    #[tokio::test]
    async fn test_send_streams_exact_body() {
        let transport = LoopbackTransport::responding(
            b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 27\r\n\r\n{\"detected\":\"chainsaw\"}\r\nok",
        );
        let uploader = Uploader::new(transport.clone(), endpoint(), form("SaJeBoundary"));
        let container = vec![0xA5u8; 364];

        let response = uploader
            .send(Some(&fix()), &mut &container[..], container.len() as u64)
            .await
            .unwrap();
        assert_eq!(response.status, Some(200));
        assert_eq!(response.body_lines, vec!["{\"detected\":\"chainsaw\"}", "ok"]);

        transport.settle().await;
        let requests = transport.captured();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];

        let head_end = request.windows(4).position(|w| w == b"\r\n\r\n").unwrap() + 4;
        assert_eq!(request.len() - head_end, 496);
        assert!(request.ends_with(b"\r\n--SaJeBoundary--\r\n"));
        assert_eq!(&request[head_end + 112..head_end + 112 + 364], &container[..]);
    }

    #[tokio::test]
    async fn test_send_without_fix_sends_empty_gps_header() {
        let transport = LoopbackTransport::responding(b"HTTP/1.1 200 OK\r\n\r\nbody line\n");
        let uploader = Uploader::new(transport.clone(), endpoint(), form("b"));

        let response = uploader.send(None, &mut &b"RIFF"[..], 4).await.unwrap();
        assert_eq!(response.body_lines, vec!["body line"]);

        transport.settle().await;
        let request = String::from_utf8(transport.captured().remove(0)).unwrap();
        assert!(request.contains("\r\ngps-data: \r\n"));
    }

    #[tokio::test]
    async fn test_rejected_fix_never_splits_the_header_block() {
        let transport = LoopbackTransport::responding(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n");
        let uploader = Uploader::new(transport.clone(), endpoint(), form("SaJeBoundary"));

        let mut current = Some(fix());
        assert!(update_fix(&mut current, b"1.0,2.0,t\r\n\r\nX").is_err());

        let container = vec![0u8; 364];
        uploader
            .send(current.as_ref(), &mut &container[..], 364)
            .await
            .unwrap();

        transport.settle().await;
        let request = transport.captured().remove(0);
        let head_end = request.windows(4).position(|w| w == b"\r\n\r\n").unwrap() + 4;
        let head = String::from_utf8_lossy(&request[..head_end]);
        assert!(head.ends_with("gps-data: 12.34,56.78,2024-01-01T00:00:00\r\nContent-Length: 496\r\n\r\n"));
        assert_eq!(request.len() - head_end, 496);
    }

    #[tokio::test]
    async fn test_chunked_response_is_decoded_without_waiting_for_close() {
        let (client, mut server) = tokio::io::duplex(1024);
        server
            .write_all(
                b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n\
                  6\r\nlabel=\r\n6;ext=1\r\nsaw\nok\r\n0\r\n\r\n",
            )
            .await
            .unwrap();

        // The server keeps the connection open, as a keep-alive peer would
        let mut conn = tokio::io::BufReader::new(client);
        let response = tokio::time::timeout(Duration::from_secs(5), read_response(&mut conn))
            .await
            .expect("chunked body should end at the last chunk")
            .unwrap();
        assert_eq!(response.status, Some(200));
        assert_eq!(response.body_lines, vec!["label=saw", "ok"]);
        drop(server);
    }

    #[tokio::test]
    async fn test_invalid_chunk_size_is_an_error() {
        let mut conn = &b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\nzz\r\n"[..];
        assert!(read_response(&mut conn).await.is_err());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let uploader = Uploader::new(LoopbackTransport::refusing(), endpoint(), form("b"));
        let err = uploader.send(None, &mut &b"x"[..], 1).await.unwrap_err();
        assert!(matches!(err, RelayError::UploadConnectFailed { port: 8000, .. }));
        assert!(uploader.probe().await.is_err());
    }

    #[tokio::test]
    async fn test_short_payload_is_send_failure() {
        let uploader = Uploader::new(LoopbackTransport::responding(b""), endpoint(), form("b"));
        let err = uploader.send(None, &mut &b"abc"[..], 10).await.unwrap_err();
        assert!(matches!(err, RelayError::UploadSendFailed { .. }));
    }

    proptest! {
        #[test]
        fn prop_content_length_matches_sections(
            boundary in "[A-Za-z0-9'()+_,./:=?-]{1,70}",
            gps in "[0-9.,:-]{0,40}",
            payload_len in 0u64..1_000_000
        ) {
            let request = MultipartRequest::new(&endpoint(), &form(&boundary), &gps, payload_len);
            let expected = request.preamble().len() as u64 + payload_len + request.terminator().len() as u64;
            prop_assert_eq!(request.content_length(), expected);
            let header = format!("Content-Length: {}\r\n\r\n", expected);
            prop_assert!(request.head().ends_with(&header));
        }

        #[test]
        fn prop_accepted_fix_keeps_head_intact(payload in prop::collection::vec(any::<u8>(), 0..64)) {
            if let Ok(fix) = LocationFix::parse(&payload) {
                let request = MultipartRequest::new(&endpoint(), &form("SaJeBoundary"), &fix.raw(), 364);
                let head = request.head();
                prop_assert_eq!(head.find("\r\n\r\n"), Some(head.len() - 4));
                prop_assert_eq!(head.lines().count(), 7);
                prop_assert!(head.ends_with("Content-Length: 496\r\n\r\n"));
            }
        }
    }
}
