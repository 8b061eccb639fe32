// Configuration strings.
//
// A configuration string is a comma-separated list of `key=value` pairs
// (`:` also separates a key from its value). A key with no value is boolean
// true. Values are booleans, integers with optional K/M/G/T multipliers,
// double-quoted strings, parenthesized or bracketed lists (kept as text), or
// bare identifiers. Lookups take a stack of strings, defaults first; later
// strings override earlier ones.

use memchr::memchr;

use strata_error::{Result, StrataError};

/// Defaults for the cursor-open configuration keys.
pub const OPEN_CURSOR_DEFAULTS: &str = "append=false,checkpoint=,dump=,next_random=false,\
                                        overwrite=true,raw=false,readonly=false";

/// Syntactic class of a configuration value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKind {
    /// `true`, `false`, or a bare key.
    Bool,
    /// Integer, possibly with a multiplier suffix.
    Num,
    /// Quoted string, or an empty value.
    Str,
    /// Bare identifier.
    Id,
    /// Parenthesized or bracketed list; `str` holds the inner text.
    Struct,
}

/// The value found for a configuration key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigItem {
    /// Whether any configuration string set the key.
    pub found: bool,
    /// Integer value: booleans are 0/1, numbers are their value, strings 0.
    pub val: i64,
    /// Text of the value, without quotes or brackets.
    pub str: String,
    pub kind: ConfigKind,
}

impl ConfigItem {
    fn missing(default: i64) -> Self {
        Self {
            found: false,
            val: default,
            str: String::new(),
            kind: ConfigKind::Num,
        }
    }

    /// Length of the value text.
    #[must_use]
    pub fn len(&self) -> usize {
        self.str.len()
    }

    /// Whether the value text is empty (`checkpoint=`).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.str.is_empty()
    }

    /// The value as a boolean.
    #[must_use]
    pub const fn as_bool(&self) -> bool {
        self.val != 0
    }
}

// ---------------------------------------------------------------------------
// Scanner
// ---------------------------------------------------------------------------

struct Scanner<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Scanner<'a> {
    const fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn peek(&self) -> Option<u8> {
        self.src.as_bytes().get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(|c| c.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn skip_separators(&mut self) {
        while self
            .peek()
            .is_some_and(|c| c == b',' || c.is_ascii_whitespace())
        {
            self.pos += 1;
        }
    }

    fn error(&self, detail: impl Into<String>) -> StrataError {
        StrataError::config(self.pos, detail)
    }

    /// Next `key[=value]` pair, or `None` at the end of the string.
    fn next_pair(&mut self) -> Result<Option<(&'a str, ConfigItem)>> {
        self.skip_separators();
        if self.peek().is_none() {
            return Ok(None);
        }

        let key = match self.peek() {
            Some(b'"') => self.quoted()?,
            _ => self.bare(),
        };
        if key.is_empty() {
            return Err(self.error("expected a key"));
        }

        self.skip_whitespace();
        let item = if matches!(self.peek(), Some(b'=' | b':')) {
            self.pos += 1;
            self.skip_whitespace();
            self.value()?
        } else {
            ConfigItem {
                found: true,
                val: 1,
                str: String::new(),
                kind: ConfigKind::Bool,
            }
        };

        self.skip_whitespace();
        match self.peek() {
            None | Some(b',') => Ok(Some((key, item))),
            Some(c) => Err(self.error(format!("unexpected '{}'", char::from(c)))),
        }
    }

    fn value(&mut self) -> Result<ConfigItem> {
        let (text, kind) = match self.peek() {
            None | Some(b',') => ("", ConfigKind::Str),
            Some(b'"') => (self.quoted()?, ConfigKind::Str),
            Some(b'(' | b'[') => (self.nested()?, ConfigKind::Struct),
            Some(_) => {
                let start = self.pos;
                let token = self.bare();
                return classify(token).map_err(|detail| StrataError::config(start, detail));
            }
        };
        Ok(ConfigItem {
            found: true,
            val: 0,
            str: text.to_owned(),
            kind,
        })
    }

    fn bare(&mut self) -> &'a str {
        let start = self.pos;
        while self.peek().is_some_and(|c| {
            !c.is_ascii_whitespace() && !matches!(c, b',' | b'=' | b':' | b'(' | b')' | b'[' | b']')
        }) {
            self.pos += 1;
        }
        &self.src[start..self.pos]
    }

    /// A double-quoted string starting at the current position.
    fn quoted(&mut self) -> Result<&'a str> {
        let start = self.pos + 1;
        let Some(len) = memchr(b'"', &self.src.as_bytes()[start..]) else {
            return Err(self.error("unterminated string"));
        };
        self.pos = start + len + 1;
        Ok(&self.src[start..start + len])
    }

    /// A bracketed list starting at the current position; returns the text
    /// between the outer brackets.
    fn nested(&mut self) -> Result<&'a str> {
        let open = self.pos;
        let mut stack = Vec::new();
        while let Some(c) = self.peek() {
            match c {
                b'(' => stack.push(b')'),
                b'[' => stack.push(b']'),
                b')' | b']' => {
                    if stack.pop() != Some(c) {
                        return Err(self.error("unbalanced brackets"));
                    }
                    if stack.is_empty() {
                        self.pos += 1;
                        return Ok(&self.src[open + 1..self.pos - 1]);
                    }
                }
                b'"' => {
                    self.quoted()?;
                    continue;
                }
                _ => {}
            }
            self.pos += 1;
        }
        Err(StrataError::config(open, "unbalanced brackets"))
    }
}

fn classify(token: &str) -> std::result::Result<ConfigItem, String> {
    let item = |val, kind| ConfigItem {
        found: true,
        val,
        str: token.to_owned(),
        kind,
    };
    match token {
        "true" => return Ok(item(1, ConfigKind::Bool)),
        "false" => return Ok(item(0, ConfigKind::Bool)),
        _ => {}
    }

    let digits = token.strip_prefix('-').unwrap_or(token);
    if !digits.starts_with(|c: char| c.is_ascii_digit()) {
        return Ok(item(0, ConfigKind::Id));
    }

    let (number, shift) = match token.as_bytes()[token.len() - 1] {
        b'k' | b'K' => (&token[..token.len() - 1], 10),
        b'm' | b'M' => (&token[..token.len() - 1], 20),
        b'g' | b'G' => (&token[..token.len() - 1], 30),
        b't' | b'T' => (&token[..token.len() - 1], 40),
        _ => (token, 0),
    };
    let val = number
        .parse::<i64>()
        .ok()
        .and_then(|v| v.checked_mul(1_i64 << shift))
        .ok_or_else(|| format!("invalid number '{token}'"))?;
    Ok(item(val, ConfigKind::Num))
}

// ---------------------------------------------------------------------------
// Lookup
// ---------------------------------------------------------------------------

/// Parse a whole configuration string into its pairs, in order.
pub fn parse(cfg: &str) -> Result<Vec<(String, ConfigItem)>> {
    let mut scanner = Scanner::new(cfg);
    let mut pairs = Vec::new();
    while let Some((key, item)) = scanner.next_pair()? {
        pairs.push((key.to_owned(), item));
    }
    Ok(pairs)
}

/// Look up `key` in a stack of configuration strings.
///
/// Every string is parsed, so a syntax error anywhere is reported even when
/// the key is found earlier. When no string sets the key the result has
/// `found == false` and `val == default`.
pub fn gets_def(cfg: &[&str], key: &str, default: i64) -> Result<ConfigItem> {
    let mut found = None;
    for s in cfg {
        let mut scanner = Scanner::new(s);
        while let Some((k, item)) = scanner.next_pair()? {
            if k == key {
                found = Some(item);
            }
        }
    }
    Ok(found.unwrap_or_else(|| ConfigItem::missing(default)))
}

/// Look up `key`, which must be set by one of the strings (usually the
/// defaults).
pub fn gets(cfg: &[&str], key: &str) -> Result<ConfigItem> {
    let item = gets_def(cfg, key, 0)?;
    if item.found {
        Ok(item)
    } else {
        Err(StrataError::invalid_argument(format!(
            "unknown configuration key '{key}'"
        )))
    }
}
