//! Lossless deb822 stanzas.
//!
//! A [`Stanza`] is an ordered list of `Name: value` fields. Multi-line values
//! keep their continuation lines verbatim (including the leading whitespace),
//! so a stanza written back out is byte-identical to the one that was read,
//! modulo whitespace around the first line of each value.

use std::fmt;

/// Error produced when a stanza cannot be split into fields.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("line {line}: {message}")]
pub struct ParseError {
    /// One-based line number within the parsed text.
    pub line: usize,
    /// What was wrong with the line.
    pub message: String,
}

/// An ordered set of control fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stanza {
    fields: Vec<(String, String)>,
}

impl Stanza {
    /// Create an empty stanza.
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Parse a single stanza. Blank lines are ignored.
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let mut stanza = Stanza::new();
        for (i, line) in text.lines().enumerate() {
            stanza.push_line(line, i + 1)?;
        }
        Ok(stanza)
    }

    /// Parse blank-line separated stanzas.
    pub fn parse_all(text: &str) -> Result<Vec<Self>, ParseError> {
        let mut stanzas = Vec::new();
        let mut current = Stanza::new();

        for (i, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                if !current.is_empty() {
                    stanzas.push(std::mem::take(&mut current));
                }
                continue;
            }
            current.push_line(line, i + 1)?;
        }

        if !current.is_empty() {
            stanzas.push(current);
        }

        Ok(stanzas)
    }

    fn push_line(&mut self, line: &str, lineno: usize) -> Result<(), ParseError> {
        if line.trim().is_empty() || line.starts_with('#') {
            return Ok(());
        }

        if line.starts_with(' ') || line.starts_with('\t') {
            match self.fields.last_mut() {
                Some((_, value)) => {
                    value.push('\n');
                    value.push_str(line.trim_end());
                    Ok(())
                }
                None => Err(ParseError {
                    line: lineno,
                    message: "continuation line without a field".to_string(),
                }),
            }
        } else if let Some((name, value)) = line.split_once(':') {
            let name = name.trim();
            if name.is_empty() {
                return Err(ParseError {
                    line: lineno,
                    message: format!("empty field name: {}", line),
                });
            }
            self.fields.push((name.to_string(), value.trim().to_string()));
            Ok(())
        } else {
            Err(ParseError {
                line: lineno,
                message: format!("invalid line format: {}", line),
            })
        }
    }

    /// Look up a field, ignoring case.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Set a field, replacing an existing one in place.
    pub fn insert<K: Into<String>, V: Into<String>>(&mut self, name: K, value: V) {
        let name = name.into();
        let value = value.into();
        match self
            .fields
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(&name))
        {
            Some(field) => field.1 = value,
            None => self.fields.push((name, value)),
        }
    }

    /// Remove a field, ignoring case.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        let pos = self
            .fields
            .iter()
            .position(|(k, _)| k.eq_ignore_ascii_case(name))?;
        Some(self.fields.remove(pos).1)
    }

    /// Iterate over fields in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the stanza has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl FromIterator<(String, String)> for Stanza {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        let mut stanza = Stanza::new();
        for (k, v) in iter {
            stanza.insert(k, v);
        }
        stanza
    }
}

/// Write one `Name: value` field, keeping continuation lines as they are.
pub(crate) fn write_field(out: &mut String, name: &str, value: &str) {
    out.push_str(name);
    out.push(':');
    if !value.starts_with('\n') {
        out.push(' ');
    }
    out.push_str(value);
    out.push('\n');
}

impl fmt::Display for Stanza {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        for (name, value) in &self.fields {
            write_field(&mut out, name, value);
        }
        f.write_str(&out)
    }
}
