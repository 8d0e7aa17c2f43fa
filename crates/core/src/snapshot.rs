use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::codec::{LineEnding, TextEncoding, TextFormat};
use crate::document::Document;

/// Current on-disk session format version.
pub const SESSION_FORMAT_VERSION: u32 = 1;

/// 單一分頁的時間點快照，不與即時緩衝共享記憶體。 / Point-in-time copy of one tab; never aliases a live buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTab {
    #[serde(
        default,
        with = "stored_path",
        skip_serializing_if = "Option::is_none"
    )]
    pub path: Option<PathBuf>,
    /// `None` once the content has been persisted to `path` and only the reference remains.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default)]
    pub cursor: usize,
    #[serde(default)]
    pub is_dirty: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_ending: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub has_bom: bool,
    /// Id of the tab this was captured from, meaningful only to the writing process.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<u64>,
}

impl SessionTab {
    pub fn capture(doc: &Document) -> Self {
        let format = doc.format();
        Self {
            path: doc.path().map(|p| p.to_path_buf()),
            content: Some(doc.content().to_owned()),
            cursor: doc.cursor(),
            is_dirty: doc.is_dirty(),
            encoding: (format.encoding != TextEncoding::Utf8)
                .then(|| format.encoding.name().to_owned()),
            line_ending: (format.line_ending != LineEnding::Lf)
                .then(|| format.line_ending.token().to_owned()),
            has_bom: format.has_bom,
            origin: Some(doc.id().get()),
        }
    }

    /// Unknown names fall back to UTF-8 / LF.
    pub fn format(&self) -> TextFormat {
        TextFormat {
            encoding: self
                .encoding
                .as_deref()
                .and_then(TextEncoding::from_name)
                .unwrap_or_default(),
            line_ending: self
                .line_ending
                .as_deref()
                .and_then(LineEnding::from_token)
                .unwrap_or_default(),
            has_bom: self.has_bom,
        }
    }
}

/// 整個工作階段的快照。 / Snapshot of the whole session: tabs in display order plus the active index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionData {
    #[serde(default = "default_format_version")]
    pub format_version: u32,
    #[serde(default)]
    pub tabs: Vec<SessionTab>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_tab_index: Option<usize>,
    #[serde(default)]
    pub saved_at_unix_ms: i64,
    #[serde(default)]
    pub clean_shutdown: bool,
}

fn default_format_version() -> u32 {
    SESSION_FORMAT_VERSION
}

impl SessionData {
    pub fn new(tabs: Vec<SessionTab>, current_tab_index: Option<usize>) -> Self {
        let mut data = Self {
            format_version: SESSION_FORMAT_VERSION,
            tabs,
            current_tab_index,
            saved_at_unix_ms: now_unix_ms(),
            clean_shutdown: false,
        };
        data.sanitize();
        data
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), None)
    }

    pub fn is_empty(&self) -> bool {
        self.tabs.is_empty()
    }

    pub fn current_tab(&self) -> Option<&SessionTab> {
        self.current_tab_index.and_then(|idx| self.tabs.get(idx))
    }

    pub fn with_clean_shutdown(mut self, clean: bool) -> Self {
        self.clean_shutdown = clean;
        self
    }

    /// Tabs that still carry unsaved content.
    pub fn dirty_tabs(&self) -> impl Iterator<Item = &SessionTab> {
        self.tabs.iter().filter(|tab| tab.is_dirty)
    }

    /// Restores the index invariant: valid when tabs exist, absent otherwise.
    pub fn sanitize(&mut self) {
        if self.format_version == 0 {
            self.format_version = SESSION_FORMAT_VERSION;
        }
        self.current_tab_index = match (self.tabs.len(), self.current_tab_index) {
            (0, _) => None,
            (len, Some(idx)) => Some(idx.min(len - 1)),
            (_, None) => Some(0),
        };
    }

    /// 已手動儲存的分頁只保留路徑參考。 / Drops snapshot content for tabs that were saved to `path`, keeping the reference.
    ///
    /// Returns `true` while some tab still carries unsaved content.
    pub fn forget_saved_content(&mut self, saved: &[(u64, PathBuf)]) -> bool {
        for tab in &mut self.tabs {
            let hit = saved.iter().find(|(origin, path)| {
                tab.origin == Some(*origin) || tab.path.as_ref() == Some(path)
            });
            if let Some((_, path)) = hit {
                tab.path = Some(path.clone());
                tab.content = None;
                tab.is_dirty = false;
            }
        }
        self.dirty_tabs().next().is_some()
    }

    /// Rough serialized size, used for disk-space preflight.
    pub fn estimated_size(&self) -> u64 {
        let content: usize = self
            .tabs
            .iter()
            .map(|tab| {
                tab.content.as_ref().map_or(0, String::len)
                    + tab.path.as_ref().map_or(0, |p| p.as_os_str().len())
                    + 128
            })
            .sum();
        (content + 256) as u64
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        let mut data: SessionData = serde_json::from_slice(bytes)?;
        data.sanitize();
        Ok(data)
    }
}

pub fn now_unix_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// 路徑序列化：UTF-8 直接保存，否則以 base64 保存。 / Paths stay readable when UTF-8 and fall back to base64 otherwise.
mod stored_path {
    use std::path::{Path, PathBuf};

    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    const B64_PREFIX: &str = "b64:";

    pub fn serialize<S>(value: &Option<PathBuf>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(path) => serializer.serialize_some(&encode(path)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<PathBuf>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<String>::deserialize(deserializer)?
            .map(|text| decode(&text).map_err(serde::de::Error::custom))
            .transpose()
    }

    fn encode(path: &Path) -> String {
        match path.to_str() {
            Some(text) if !text.starts_with(B64_PREFIX) => text.to_owned(),
            _ => format!("{B64_PREFIX}{}", BASE64.encode(os_bytes(path))),
        }
    }

    fn decode(text: &str) -> Result<PathBuf, String> {
        let Some(payload) = text.strip_prefix(B64_PREFIX) else {
            return Ok(PathBuf::from(text));
        };
        let bytes = BASE64
            .decode(payload.as_bytes())
            .map_err(|err| format!("invalid base64 path: {err}"))?;
        from_os_bytes(bytes)
    }

    #[cfg(unix)]
    fn os_bytes(path: &Path) -> Vec<u8> {
        use std::os::unix::ffi::OsStrExt;
        path.as_os_str().as_bytes().to_vec()
    }

    #[cfg(unix)]
    fn from_os_bytes(bytes: Vec<u8>) -> Result<PathBuf, String> {
        use std::ffi::OsString;
        use std::os::unix::ffi::OsStringExt;
        Ok(PathBuf::from(OsString::from_vec(bytes)))
    }

    #[cfg(not(unix))]
    fn os_bytes(path: &Path) -> Vec<u8> {
        path.to_string_lossy().into_owned().into_bytes()
    }

    #[cfg(not(unix))]
    fn from_os_bytes(bytes: Vec<u8>) -> Result<PathBuf, String> {
        String::from_utf8(bytes)
            .map(PathBuf::from)
            .map_err(|err| format!("path is not valid UTF-8: {err}"))
    }
}
