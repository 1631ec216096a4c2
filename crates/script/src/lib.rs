/// Batch separator recognised by SQL tooling.
pub const DEFAULT_SEPARATOR: &str = "GO";

/// Appended after every line copied into a batch.
pub const DEFAULT_TERMINATOR: &str = "\n\r";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// 1-based line of the first line in the batch.
    pub lineno: usize,
    /// Number of script lines copied into the batch.
    pub lines: usize,
    pub content: String,
}

impl Batch {
    /// True when the batch holds nothing but whitespace.
    pub fn is_blank(&self) -> bool {
        self.content.trim().is_empty()
    }
}

pub struct Splitter<'a> {
    content: &'a str,
    pos: usize,
    line: usize,
    separator: String,
    terminator: String,
    trim_leading: bool,
}

impl<'a> Splitter<'a> {
    pub fn new(content: &'a str) -> Self {
        Self {
            content,
            pos: 0,
            line: 1,
            separator: DEFAULT_SEPARATOR.to_string(),
            terminator: DEFAULT_TERMINATOR.to_string(),
            trim_leading: false,
        }
    }

    pub fn separator(mut self, token: impl Into<String>) -> Self {
        self.separator = token.into();
        self
    }

    pub fn terminator(mut self, terminator: impl Into<String>) -> Self {
        self.terminator = terminator.into();
        self
    }

    /// Also ignore indentation when matching the separator. Off by default:
    /// only trailing whitespace is trimmed, so `"  GO"` stays script content.
    pub fn trim_leading(mut self, trim: bool) -> Self {
        self.trim_leading = trim;
        self
    }

    pub fn set_content(&mut self, content: &'a str) {
        self.content = content;
        self.pos = 0;
        self.line = 1;
    }

    pub fn split(&mut self) -> Vec<Batch> {
        self.pos = 0;
        self.line = 1;

        let mut batches = Vec::new();
        let mut buf = String::new();
        let mut start = 1;
        let mut count = 0;

        while let Some((lineno, text)) = self.next_line() {
            if self.is_separator(text) {
                if !buf.is_empty() {
                    batches.push(Batch {
                        lineno: start,
                        lines: count,
                        content: std::mem::take(&mut buf),
                    });
                }
                count = 0;
                continue;
            }
            if count == 0 {
                start = lineno;
            }
            buf.push_str(text);
            buf.push_str(&self.terminator);
            count += 1;
        }

        if !buf.is_empty() {
            batches.push(Batch {
                lineno: start,
                lines: count,
                content: buf,
            });
        }
        batches
    }

    fn is_separator(&self, text: &str) -> bool {
        let candidate = if self.trim_leading {
            text.trim()
        } else {
            text.trim_end()
        };
        candidate.eq_ignore_ascii_case(&self.separator)
    }

    /// Next line without its terminator. `\r\n`, `\n` and a lone `\r` all end
    /// a line; a terminator at the very end does not open an empty line.
    fn next_line(&mut self) -> Option<(usize, &'a str)> {
        let content: &'a str = self.content;
        if self.pos >= content.len() {
            return None;
        }
        let rest = &content[self.pos..];
        let (text, consumed) = match rest.find(|c: char| c == '\r' || c == '\n') {
            Some(idx) => {
                let width = if rest[idx..].starts_with("\r\n") { 2 } else { 1 };
                (&rest[..idx], idx + width)
            }
            None => (rest, rest.len()),
        };
        let lineno = self.line;
        self.pos += consumed;
        self.line += 1;
        Some((lineno, text))
    }
}

/// Split a script with the default separator and terminator.
pub fn split(script: &str) -> Vec<Batch> {
    Splitter::new(script).split()
}
