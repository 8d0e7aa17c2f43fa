use std::fmt;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use thiserror::Error;

use crate::codec::{self, CodecError, DecodedText, TextFormat};

static NEXT_DOCUMENT_ID: AtomicU64 = AtomicU64::new(1);

/// 文件識別碼，同一程序內不會重複使用。 / Stable document identity, never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentId(u64);

impl DocumentId {
    fn next() -> Self {
        Self(NEXT_DOCUMENT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tab-{}", self.0)
    }
}

/// 以 1 為起點的行列位置（狀態列使用）。 / 1-based line/column pair as shown in the status bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineColumn {
    pub line: usize,
    pub column: usize,
}

/// 狀態列用的文件統計。 / Lightweight statistics for the status bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentStats {
    pub lines: usize,
    pub words: usize,
    pub chars: usize,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DocumentError {
    #[error("range {start}..{end} is out of bounds for content of length {len}")]
    RangeOutOfBounds { start: usize, end: usize, len: usize },
    #[error("offset {0} does not fall on a character boundary")]
    NotCharBoundary(usize),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// 一個開啟中的文件：內容、游標、修改旗標與關聯路徑。 / One open document: buffer, cursor, dirty flag and optional path.
///
/// Every content mutation goes through this type and is the only place that
/// raises `is_dirty`. The flag is cleared by [`Document::mark_saved`] and
/// [`Document::reload`] alone.
#[derive(Debug)]
pub struct Document {
    id: DocumentId,
    path: Option<PathBuf>,
    content: String,
    cursor: usize,
    is_dirty: bool,
    last_modified_at: SystemTime,
    format: TextFormat,
}

impl Document {
    /// 建立空白且未命名的文件。 / Creates an empty untitled buffer.
    pub fn new() -> Self {
        Self::with_content(String::new())
    }

    /// 建立帶初始內容的未命名文件；非空內容視為未儲存。 / Untitled buffer seeded with text; non-empty text counts as unsaved.
    pub fn with_content(content: impl Into<String>) -> Self {
        let content = content.into();
        let is_dirty = !content.is_empty();
        Self {
            id: DocumentId::next(),
            path: None,
            content,
            cursor: 0,
            is_dirty,
            last_modified_at: SystemTime::now(),
            format: TextFormat::default(),
        }
    }

    /// 由磁碟載入的內容建立乾淨文件。 / Clean document backed by freshly loaded file content.
    pub fn loaded(path: impl Into<PathBuf>, decoded: DecodedText) -> Self {
        Self {
            id: DocumentId::next(),
            path: Some(path.into()),
            content: decoded.text,
            cursor: 0,
            is_dirty: false,
            last_modified_at: SystemTime::now(),
            format: decoded.format,
        }
    }

    /// 從快照重建文件，保留快照中的修改旗標。 / Rebuilds a document from a snapshot, keeping its dirty flag.
    pub fn restored(
        path: Option<PathBuf>,
        content: impl Into<String>,
        cursor: usize,
        is_dirty: bool,
    ) -> Self {
        let mut doc = Self {
            id: DocumentId::next(),
            path,
            content: content.into(),
            cursor: 0,
            is_dirty,
            last_modified_at: SystemTime::now(),
            format: TextFormat::default(),
        };
        doc.set_cursor(cursor);
        doc
    }

    /// Sets the on-disk format without touching the dirty flag.
    pub fn with_format(mut self, format: TextFormat) -> Self {
        self.format = format;
        self
    }

    pub fn id(&self) -> DocumentId {
        self.id
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty
    }

    pub fn last_modified_at(&self) -> SystemTime {
        self.last_modified_at
    }

    pub fn format(&self) -> TextFormat {
        self.format
    }

    pub fn set_format(&mut self, format: TextFormat) {
        if self.format != format {
            self.format = format;
            self.touch();
        }
    }

    /// 移動游標並夾在 `[0, len]` 內的字元邊界上，回傳實際位置。 / Moves the cursor, clamped to `[0, len]` and snapped back to a char boundary.
    pub fn set_cursor(&mut self, offset: usize) -> usize {
        let mut offset = offset.min(self.content.len());
        while !self.content.is_char_boundary(offset) {
            offset -= 1;
        }
        self.cursor = offset;
        offset
    }

    /// 游標所在的行列（1 起算，欄位以字元計）。 / Cursor as a 1-based (line, column), columns counted in chars.
    pub fn line_column(&self) -> LineColumn {
        let before = &self.content[..self.cursor];
        let line = before.matches('\n').count() + 1;
        let line_start = before.rfind('\n').map(|idx| idx + 1).unwrap_or(0);
        LineColumn {
            line,
            column: before[line_start..].chars().count() + 1,
        }
    }

    /// 在游標處插入文字。 / Inserts text at the cursor and advances past it.
    pub fn insert_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.content.insert_str(self.cursor, text);
        self.cursor += text.len();
        self.touch();
    }

    /// Backspace. Returns `false` when the cursor is already at the start.
    pub fn delete_backward(&mut self) -> bool {
        let Some((start, _)) = self.content[..self.cursor].char_indices().next_back() else {
            return false;
        };
        self.content.replace_range(start..self.cursor, "");
        self.cursor = start;
        self.touch();
        true
    }

    /// Forward delete. Returns `false` at the end of the buffer.
    pub fn delete_forward(&mut self) -> bool {
        let Some(ch) = self.content[self.cursor..].chars().next() else {
            return false;
        };
        let end = self.cursor + ch.len_utf8();
        self.content.replace_range(self.cursor..end, "");
        self.touch();
        true
    }

    /// 取代指定範圍，游標移到插入文字之後。 / Replaces a byte range; the cursor lands after the inserted text.
    pub fn replace_range(&mut self, range: Range<usize>, text: &str) -> Result<(), DocumentError> {
        let len = self.content.len();
        if range.start > range.end || range.end > len {
            return Err(DocumentError::RangeOutOfBounds {
                start: range.start,
                end: range.end,
                len,
            });
        }
        for offset in [range.start, range.end] {
            if !self.content.is_char_boundary(offset) {
                return Err(DocumentError::NotCharBoundary(offset));
            }
        }
        self.content.replace_range(range.clone(), text);
        self.cursor = range.start + text.len();
        self.touch();
        Ok(())
    }

    /// 以新文字取代整份內容。 / Replaces the whole buffer.
    pub fn set_content(&mut self, text: impl Into<String>) {
        self.content = text.into();
        let cursor = self.cursor;
        self.set_cursor(cursor);
        self.touch();
    }

    /// 儲存成功後呼叫：更新路徑並清除修改旗標。 / Save completion: records the target path and clears the dirty flag.
    pub fn mark_saved(&mut self, path: PathBuf) {
        self.path = Some(path);
        self.is_dirty = false;
    }

    /// 以磁碟上的新內容取代緩衝並清除修改旗標。 / Successful (re)load from disk: replaces the buffer and clears the dirty flag.
    pub fn reload(&mut self, decoded: DecodedText) {
        self.content = decoded.text;
        self.format = decoded.format;
        let cursor = self.cursor;
        self.set_cursor(cursor);
        self.is_dirty = false;
        self.last_modified_at = SystemTime::now();
    }

    /// 依原始格式編碼內容以便寫入。 / Encodes the buffer in its on-disk format.
    pub fn encode(&self) -> Result<Vec<u8>, DocumentError> {
        Ok(codec::encode(&self.content, self.format)?)
    }

    /// 分頁標題：檔名或 `Untitled`，修改時加上 ` *`。 / Tab label: file name or `Untitled`, with ` *` while dirty.
    pub fn display_title(&self) -> String {
        let name = self
            .path
            .as_deref()
            .and_then(Path::file_name)
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "Untitled".to_string());
        if self.is_dirty {
            format!("{name} *")
        } else {
            name
        }
    }

    pub fn stats(&self) -> DocumentStats {
        let mut words = 0usize;
        let mut chars = 0usize;
        let mut in_word = false;
        for ch in self.content.chars() {
            chars += 1;
            if ch.is_whitespace() {
                in_word = false;
            } else if !in_word {
                in_word = true;
                words += 1;
            }
        }
        let lines = if self.content.is_empty() {
            0
        } else {
            self.content.lines().count()
        };
        DocumentStats {
            lines,
            words,
            chars,
        }
    }

    fn touch(&mut self) {
        self.is_dirty = true;
        self.last_modified_at = SystemTime::now();
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}
