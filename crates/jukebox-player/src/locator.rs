//! Item locators: bounded-length strings naming a local path or a network URL.

use std::fmt;

use crate::error::QueueError;

/// Where a locator points.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LocatorKind {
    /// A path readable through the local reader.
    Local,
    /// An `http://` or `https://` URL readable through the network reader.
    Network,
    /// Any other `scheme://` locator; nothing can open it.
    Unsupported,
}

/// A validated item locator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Locator {
    raw: String,
}

impl Locator {
    /// Validate `raw` against the maximum length and wrap it.
    pub fn parse(raw: &str, max_len: usize) -> Result<Self, QueueError> {
        validate(raw, max_len)?;
        Ok(Self {
            raw: raw.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn kind(&self) -> LocatorKind {
        if is_network(&self.raw) {
            LocatorKind::Network
        } else if self.raw.contains("://") {
            LocatorKind::Unsupported
        } else {
            LocatorKind::Local
        }
    }

    /// Lowercase extension of the path component, ignoring query and fragment on URLs.
    pub fn extension(&self) -> Option<String> {
        match self.kind() {
            LocatorKind::Network => infer_ext_from_url(&self.raw),
            LocatorKind::Local => infer_ext_from_path(strip_codec_fragment(&self.raw)),
            LocatorKind::Unsupported => None,
        }
    }

    /// Trailing codec hint: `codec=<name>` in the query or fragment.
    pub fn codec_hint(&self) -> Option<String> {
        codec_hint(&self.raw)
    }

    /// Local path with a trailing `#codec=` fragment removed. Other `#`s are part of the name.
    pub fn local_path(&self) -> &str {
        strip_codec_fragment(&self.raw)
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Length and emptiness check applied before anything touches the queue.
pub(crate) fn validate(raw: &str, max_len: usize) -> Result<(), QueueError> {
    if raw.trim().is_empty() {
        return Err(QueueError::EmptyLocator);
    }
    if raw.len() > max_len {
        return Err(QueueError::LocatorTooLong {
            len: raw.len(),
            max: max_len,
        });
    }
    Ok(())
}

fn is_network(raw: &str) -> bool {
    let lower = raw.get(..8).unwrap_or(raw).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

fn strip_fragment(raw: &str) -> &str {
    raw.split('#').next().unwrap_or(raw)
}

fn strip_codec_fragment(raw: &str) -> &str {
    match raw.rsplit_once('#') {
        Some((path, fragment)) if find_codec(fragment).is_some() => path,
        _ => raw,
    }
}

/// Infer a file extension from the URL path if present.
fn infer_ext_from_url(url: &str) -> Option<String> {
    let tail = strip_fragment(url);
    let tail = tail.split('?').next().unwrap_or(tail);
    let after_scheme = tail.split_once("://").map(|(_, rest)| rest).unwrap_or(tail);
    // A bare host ("radio.example.com") has no path and therefore no extension.
    let (_, path) = after_scheme.split_once('/')?;
    infer_ext_from_path(path)
}

fn infer_ext_from_path(path: &str) -> Option<String> {
    let file = path.rsplit(['/', '\\']).next().unwrap_or(path);
    let mut parts = file.rsplit('.');
    let ext = parts.next()?;
    if parts.next().is_some() && !ext.is_empty() {
        Some(ext.to_ascii_lowercase())
    } else {
        None
    }
}

fn codec_hint(raw: &str) -> Option<String> {
    let fragment = raw.rsplit_once('#').and_then(|(_, f)| find_codec(f));
    let query = || {
        strip_fragment(raw)
            .split_once('?')
            .and_then(|(_, q)| find_codec(q))
    };
    fragment
        .or_else(query)
        .map(|v| v.trim().to_ascii_lowercase())
        .filter(|v| !v.is_empty())
}

/// Value of the `codec` key in an `a=b&c=d` parameter list.
fn find_codec(params: &str) -> Option<&str> {
    params
        .split('&')
        .filter_map(|kv| kv.split_once('='))
        .find(|(k, _)| k.eq_ignore_ascii_case("codec"))
        .map(|(_, v)| v)
}
