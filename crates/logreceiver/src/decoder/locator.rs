// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Resolving a path or URL into the text of a log stream.
//!
//! Resources whose name ends in `.zip` are archives: the stream is the
//! first entry of the archive.

use std::fmt;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::errors::SourceError;

/// Upper bound on the number of physical lines handed to the decoder at once.
pub const LINES_PER_CHUNK: usize = 1000;

const ARCHIVE_SUFFIX: &str = ".zip";

/// Where a log stream lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    Path(PathBuf),
    Url(String),
}

impl Locator {
    /// `http://` and `https://` values become URLs; `file://` values and
    /// anything else are treated as local paths.
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        if value.starts_with("http://") || value.starts_with("https://") {
            Locator::Url(value.to_string())
        } else if let Some(path) = value.strip_prefix("file://") {
            Locator::Path(PathBuf::from(path))
        } else {
            Locator::Path(PathBuf::from(value))
        }
    }

    pub fn is_archive(&self) -> bool {
        let name = match self {
            Locator::Path(path) => path.to_string_lossy().to_ascii_lowercase(),
            Locator::Url(url) => url.to_ascii_lowercase(),
        };
        name.ends_with(ARCHIVE_SUFFIX)
    }

    /// Host for URLs, `None` for local paths.
    pub fn host(&self) -> Option<String> {
        match self {
            Locator::Path(_) => None,
            Locator::Url(url) => reqwest::Url::parse(url)
                .ok()
                .and_then(|url| url.host_str().map(str::to_string)),
        }
    }

    pub fn as_path(&self) -> Option<&Path> {
        match self {
            Locator::Path(path) => Some(path),
            Locator::Url(_) => None,
        }
    }

    pub async fn read_bytes(&self) -> Result<Vec<u8>, SourceError> {
        match self {
            Locator::Path(path) => Ok(tokio::fs::read(path).await?),
            Locator::Url(url) => {
                let response = reqwest::get(url).await?.error_for_status()?;
                Ok(response.bytes().await?.to_vec())
            }
        }
    }

    /// Reads the whole stream, unpacking the first archive entry when the
    /// resource is a `.zip`. Inflation runs on the blocking pool.
    pub async fn read_text(&self) -> Result<String, SourceError> {
        let bytes = self.read_bytes().await?;
        let bytes = if self.is_archive() {
            let name = self.to_string();
            tokio::task::spawn_blocking(move || first_archive_entry(bytes, &name)).await??
        } else {
            bytes
        };
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Path(path) => write!(f, "{}", path.display()),
            Locator::Url(url) => write!(f, "{}", url),
        }
    }
}

fn first_archive_entry(bytes: Vec<u8>, name: &str) -> Result<Vec<u8>, SourceError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    if archive.len() == 0 {
        return Err(SourceError::EmptyArchive(name.to_string()));
    }
    let mut entry = archive.by_index(0)?;
    debug!("Reading archive entry '{}' of {}", entry.name(), name);
    let mut contents = Vec::with_capacity(usize::try_from(entry.size()).unwrap_or_default());
    entry.read_to_end(&mut contents)?;
    Ok(contents)
}

/// Groups `text` into chunks of at most `lines_per_chunk` lines, each
/// terminated by a newline.
pub(crate) fn line_chunks(text: &str, lines_per_chunk: usize) -> Vec<String> {
    let lines: Vec<&str> = text.lines().collect();
    lines
        .chunks(lines_per_chunk.max(1))
        .map(|chunk| {
            let mut joined = chunk.join("\n");
            joined.push('\n');
            joined
        })
        .collect()
}
