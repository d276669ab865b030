// scriplib.rs -- tokenizer for the textual map format
//
// Whitespace-separated tokens, double-quoted strings, // and /* */
// comments. Line numbers are tracked for diagnostics. Brush parsing
// distinguishes "next token on this line" from "next token anywhere",
// hence the crossline flag.

#[derive(Debug)]
pub struct Script {
    data: Vec<u8>,
    pos: usize,
    line: usize,
    /// Set when a token request hit end of script.
    end: bool,
}

impl Script {
    pub fn new(text: &str) -> Self {
        Script {
            data: text.as_bytes().to_vec(),
            pos: 0,
            line: 1,
            end: false,
        }
    }

    pub fn line(&self) -> usize {
        self.line
    }

    pub fn at_end(&self) -> bool {
        self.end
    }

    /// Skips whitespace and comments. Returns false on end of data, or
    /// if a newline was crossed while crossline is not allowed.
    fn skip_space(&mut self, crossline: bool) -> bool {
        loop {
            while self.pos < self.data.len() && self.data[self.pos].is_ascii_whitespace() {
                if self.data[self.pos] == b'\n' {
                    if !crossline {
                        return false;
                    }
                    self.line += 1;
                }
                self.pos += 1;
            }
            if self.pos >= self.data.len() {
                self.end = true;
                return false;
            }

            if self.data[self.pos] == b'/' && self.pos + 1 < self.data.len() {
                match self.data[self.pos + 1] {
                    b'/' => {
                        if !crossline {
                            return false;
                        }
                        while self.pos < self.data.len() && self.data[self.pos] != b'\n' {
                            self.pos += 1;
                        }
                        continue;
                    }
                    b'*' => {
                        if !crossline {
                            return false;
                        }
                        self.pos += 2;
                        while self.pos + 1 < self.data.len()
                            && !(self.data[self.pos] == b'*' && self.data[self.pos + 1] == b'/')
                        {
                            if self.data[self.pos] == b'\n' {
                                self.line += 1;
                            }
                            self.pos += 1;
                        }
                        self.pos = (self.pos + 2).min(self.data.len());
                        continue;
                    }
                    _ => {}
                }
            }
            return true;
        }
    }

    /// Reads the next token; crossline controls whether the token may
    /// come from a later line.
    pub fn token(&mut self, crossline: bool) -> Option<String> {
        if !self.skip_space(crossline) {
            return None;
        }

        // quoted string
        if self.data[self.pos] == b'"' {
            self.pos += 1;
            let start = self.pos;
            while self.pos < self.data.len() && self.data[self.pos] != b'"' {
                if self.data[self.pos] == b'\n' {
                    self.line += 1;
                }
                self.pos += 1;
            }
            let tok = String::from_utf8_lossy(&self.data[start..self.pos]).into_owned();
            if self.pos < self.data.len() {
                self.pos += 1; // closing quote
            }
            return Some(tok);
        }

        let start = self.pos;
        while self.pos < self.data.len()
            && !self.data[self.pos].is_ascii_whitespace()
        {
            self.pos += 1;
        }
        Some(String::from_utf8_lossy(&self.data[start..self.pos]).into_owned())
    }

    /// True if another token exists on the current line.
    pub fn token_available(&self) -> bool {
        let mut p = self.pos;
        while p < self.data.len() {
            let c = self.data[p];
            if c == b'\n' {
                return false;
            }
            if !c.is_ascii_whitespace() {
                // a trailing comment means no more data on this line
                return !(c == b'/' && p + 1 < self.data.len() && self.data[p + 1] == b'/');
            }
            p += 1;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_tokens() {
        let mut s = Script::new("{\n\"classname\" \"worldspawn\"\n}\n");
        assert_eq!(s.token(true).unwrap(), "{");
        assert_eq!(s.token(true).unwrap(), "classname");
        assert_eq!(s.token(true).unwrap(), "worldspawn");
        assert_eq!(s.token(true).unwrap(), "}");
        assert!(s.token(true).is_none());
        assert!(s.at_end());
    }

    #[test]
    fn test_comments_skipped() {
        let mut s = Script::new("// header\nfoo /* inline */ bar\n");
        assert_eq!(s.token(true).unwrap(), "foo");
        assert_eq!(s.token(true).unwrap(), "bar");
    }

    #[test]
    fn test_crossline_refused() {
        let mut s = Script::new("foo\nbar");
        assert_eq!(s.token(true).unwrap(), "foo");
        assert!(s.token(false).is_none());
        assert_eq!(s.token(true).unwrap(), "bar");
    }

    #[test]
    fn test_line_tracking() {
        let mut s = Script::new("a\nb\nc");
        s.token(true);
        s.token(true);
        s.token(true);
        assert_eq!(s.line(), 3);
    }

    #[test]
    fn test_token_available() {
        let mut s = Script::new("( 1 2 3 )\nnext");
        assert_eq!(s.token(true).unwrap(), "(");
        assert!(s.token_available());
        for _ in 0..4 {
            s.token(false);
        }
        assert!(!s.token_available());
    }
}
