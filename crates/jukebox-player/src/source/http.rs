//! HTTP network reader with inline (ICY) metadata support.
//!
//! Internet radio servers interleave metadata blocks into the audio byte stream when the
//! client sends `Icy-MetaData: 1`. The block interval comes back in the `icy-metaint` header.
//! [`IcyReader`] removes those blocks so the decoder only sees audio, and reports
//! `StreamTitle` values to the metadata handler.

use std::io::{self, Read};
use std::sync::Arc;
use std::time::Duration;

use super::{ByteSource, MetadataEvent, MetadataHandler, NetworkReader};

/// Configuration for HTTP stream requests.
#[derive(Clone, Debug)]
pub struct HttpReaderConfig {
    /// Per-request timeout (connect and each read).
    pub timeout: Duration,
    /// Request inline ICY metadata from the server.
    pub request_icy_metadata: bool,
    /// Value of the `User-Agent` header.
    pub user_agent: String,
}

impl Default for HttpReaderConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            request_icy_metadata: true,
            user_agent: concat!("jukebox/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Network reader backed by `ureq`.
#[derive(Clone, Debug, Default)]
pub struct HttpStreamReader {
    config: HttpReaderConfig,
}

impl HttpStreamReader {
    pub fn new(config: HttpReaderConfig) -> Self {
        Self { config }
    }
}

impl NetworkReader for HttpStreamReader {
    fn open(
        &self,
        url: &str,
        metadata: Arc<dyn MetadataHandler>,
    ) -> io::Result<Box<dyn ByteSource>> {
        let start = std::time::Instant::now();
        let mut req = ureq::get(url)
            .config()
            .timeout_per_call(Some(self.config.timeout))
            .build()
            .header("User-Agent", &self.config.user_agent);
        if self.config.request_icy_metadata {
            req = req.header("Icy-MetaData", "1");
        }
        let resp = req
            .call()
            .map_err(|e| io::Error::other(format!("http stream request failed: {e}")))?;

        let metaint = resp
            .headers()
            .get("icy-metaint")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_metaint);
        let content_type = resp
            .headers()
            .get("Content-Type")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let station = resp
            .headers()
            .get("icy-name")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        tracing::info!(
            url,
            took_ms = start.elapsed().as_millis() as u64,
            metaint = ?metaint,
            content_type = content_type.as_deref().unwrap_or(""),
            "http stream opened"
        );
        if let Some(name) = station {
            metadata.on_metadata(&MetadataEvent {
                locator: url.to_string(),
                key: "icy-name".to_string(),
                value: name,
            });
        }

        let (_, body) = resp.into_parts();
        let reader: Box<dyn Read + Send> = Box::new(body.into_reader());
        Ok(Box::new(IcyReader::new(reader, metaint, url, metadata)))
    }
}

fn parse_metaint(value: &str) -> Option<usize> {
    value.trim().parse::<usize>().ok().filter(|v| *v > 0)
}

/// Strips interleaved ICY metadata blocks from a byte stream.
pub struct IcyReader<R> {
    inner: Option<R>,
    metaint: Option<usize>,
    until_meta: usize,
    locator: String,
    metadata: Arc<dyn MetadataHandler>,
    last_title: Option<String>,
}

impl<R: Read> IcyReader<R> {
    /// `metaint` of `None` means the server sends plain audio.
    pub fn new(
        inner: R,
        metaint: Option<usize>,
        locator: &str,
        metadata: Arc<dyn MetadataHandler>,
    ) -> Self {
        Self {
            inner: Some(inner),
            metaint,
            until_meta: metaint.unwrap_or(0),
            locator: locator.to_string(),
            metadata,
            last_title: None,
        }
    }

    fn consume_metadata_block(&mut self) -> io::Result<()> {
        let Some(inner) = self.inner.as_mut() else {
            return Ok(());
        };
        let mut len_byte = [0u8; 1];
        if inner.read(&mut len_byte)? == 0 {
            return Ok(());
        }
        let len = usize::from(len_byte[0]) * 16;
        if len == 0 {
            return Ok(());
        }
        let mut block = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            match inner.read(&mut block[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        let text = String::from_utf8_lossy(&block[..filled]);
        if let Some(title) = parse_stream_title(&text) {
            if self.last_title.as_deref() != Some(title.as_str()) {
                self.metadata.on_metadata(&MetadataEvent {
                    locator: self.locator.clone(),
                    key: "StreamTitle".to_string(),
                    value: title.clone(),
                });
                self.last_title = Some(title);
            }
        }
        Ok(())
    }
}

impl<R: Read> Read for IcyReader<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        let Some(metaint) = self.metaint else {
            return match self.inner.as_mut() {
                Some(inner) => inner.read(out),
                None => Ok(0),
            };
        };
        if self.until_meta == 0 {
            self.consume_metadata_block()?;
            self.until_meta = metaint;
        }
        let want = out.len().min(self.until_meta);
        let n = match self.inner.as_mut() {
            Some(inner) => inner.read(&mut out[..want])?,
            None => 0,
        };
        self.until_meta -= n;
        Ok(n)
    }
}

impl<R: Read + Send> ByteSource for IcyReader<R> {
    fn close(&mut self) {
        if self.inner.take().is_some() {
            tracing::debug!(url = %self.locator, "http stream closed");
        }
    }
}

/// Extract the value of `StreamTitle='...';` from an ICY metadata block.
fn parse_stream_title(block: &str) -> Option<String> {
    let start = block.find("StreamTitle='")? + "StreamTitle='".len();
    let rest = &block[start..];
    let end = rest.find("';").or_else(|| rest.rfind('\''))?;
    let title = rest[..end].trim();
    if title.is_empty() {
        None
    } else {
        Some(title.to_string())
    }
}
