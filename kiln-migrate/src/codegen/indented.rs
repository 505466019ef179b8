//! A string builder that tracks indentation.

const INDENT: &str = "    ";

/// Accumulates source text line by line at the current indentation.
#[derive(Debug, Default, Clone)]
pub struct IndentedStringBuilder {
    buf: String,
    level: usize,
    at_line_start: bool,
}

impl IndentedStringBuilder {
    pub fn new() -> Self {
        Self {
            buf: String::new(),
            level: 0,
            at_line_start: true,
        }
    }

    /// Append text. Embedded newlines start indented lines.
    pub fn append(&mut self, text: &str) -> &mut Self {
        let mut lines = text.split('\n').peekable();
        while let Some(line) = lines.next() {
            if !line.is_empty() {
                if self.at_line_start {
                    for _ in 0..self.level {
                        self.buf.push_str(INDENT);
                    }
                }
                self.buf.push_str(line);
                self.at_line_start = false;
            }
            if lines.peek().is_some() {
                self.buf.push('\n');
                self.at_line_start = true;
            }
        }
        self
    }

    /// Append text followed by a newline.
    pub fn append_line(&mut self, text: &str) -> &mut Self {
        self.append(text);
        self.buf.push('\n');
        self.at_line_start = true;
        self
    }

    /// Append an empty line.
    pub fn blank_line(&mut self) -> &mut Self {
        self.append_line("")
    }

    pub fn indent(&mut self) -> &mut Self {
        self.level += 1;
        self
    }

    pub fn dedent(&mut self) -> &mut Self {
        self.level = self.level.saturating_sub(1);
        self
    }

    /// Write `header {`, the indented body, then `}`.
    pub fn block(&mut self, header: &str, body: impl FnOnce(&mut Self)) -> &mut Self {
        self.block_closed(header, "}", body)
    }

    /// Like [`block`](Self::block) but closed with `close`, e.g. `});`.
    pub fn block_closed(&mut self, header: &str, close: &str, body: impl FnOnce(&mut Self)) -> &mut Self {
        self.append_line(&format!("{} {{", header));
        self.indent();
        body(self);
        self.dedent();
        self.append_line(close)
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.buf
    }

    pub fn into_string(self) -> String {
        self.buf
    }
}
