//! Git remote helper protocol.
//!
//! Implements the stdin/stdout protocol described in git-remote-helpers(7).
//! Commands are read from stdin, responses written to stdout.

use std::io::{BufRead, Write};

use crate::error::HelperError;

/// One side-effecting ref update requested by `push`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushSpec {
    /// Local source; empty for a delete
    pub src: String,
    pub dst: String,
    pub force: bool,
}

impl PushSpec {
    /// Parse `[+]<src>:<dst>`.
    ///
    /// A `+` at either end of either side forces the update. The spec splits
    /// on the first colon not escaped with a backslash; `\:` stands for a
    /// literal colon. A spec without a colon is a usage error.
    pub fn parse(spec: &str) -> Result<Self, HelperError> {
        let Some((src, dst)) = split_unescaped_colon(spec) else {
            return Err(HelperError::Usage(format!(
                "push spec '{}' must have the form <src>:<dst>",
                spec
            )));
        };

        let mut force = false;
        let mut trim = |side: &str| -> String {
            let mut side = side;
            if let Some(rest) = side.strip_prefix('+') {
                force = true;
                side = rest;
            }
            if let Some(rest) = side.strip_suffix('+') {
                force = true;
                side = rest;
            }
            side.replace("\\:", ":")
        };
        let src = trim(src);
        let dst = trim(dst);

        if dst.is_empty() {
            return Err(HelperError::Usage(format!("push spec '{}' has no destination", spec)));
        }
        Ok(Self { src, dst, force })
    }

    pub fn is_delete(&self) -> bool {
        self.src.is_empty()
    }
}

fn split_unescaped_colon(spec: &str) -> Option<(&str, &str)> {
    let bytes = spec.as_bytes();
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'\\' if !escaped => escaped = true,
            b':' if !escaped => return Some((&spec[..i], &spec[i + 1..])),
            _ => escaped = false,
        }
    }
    None
}

/// A parsed command from the git remote helper protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Capabilities,

    /// List refs; `for_push` when git is about to push
    List { for_push: bool },

    Option { name: String, value: String },

    Fetch { oid: String, ref_name: String },

    Push(PushSpec),

    /// Blank line: end of a batch
    Empty,

    Unknown(String),
}

impl Command {
    /// Parse a command from a line of input.
    pub fn parse(line: &str) -> Result<Self, HelperError> {
        let line = line.trim_end_matches(['\r', '\n']).trim();

        if line.is_empty() {
            return Ok(Self::Empty);
        }

        match line {
            "capabilities" => return Ok(Self::Capabilities),
            "list" => return Ok(Self::List { for_push: false }),
            "list for-push" => return Ok(Self::List { for_push: true }),
            _ => {}
        }

        if let Some(rest) = line.strip_prefix("option ") {
            let (name, value) = rest.split_once(' ').unwrap_or((rest, ""));
            return Ok(Self::Option {
                name: name.to_string(),
                value: value.to_string(),
            });
        }

        if let Some(rest) = line.strip_prefix("fetch ") {
            return match rest.split_once(' ') {
                Some((oid, ref_name)) => Ok(Self::Fetch {
                    oid: oid.to_string(),
                    ref_name: ref_name.to_string(),
                }),
                None => Err(HelperError::Protocol(format!("malformed fetch line '{}'", line))),
            };
        }

        if let Some(rest) = line.strip_prefix("push ") {
            return PushSpec::parse(rest).map(Self::Push);
        }

        Ok(Self::Unknown(line.to_string()))
    }
}

/// Capabilities supported by this remote helper.
pub const CAPABILITIES: &[&str] = &["fetch", "push", "option"];

/// Response writer for the git remote helper protocol.
pub struct ProtocolWriter<W: Write> {
    writer: W,
}

impl<W: Write> ProtocolWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    pub fn write_capabilities(&mut self) -> std::io::Result<()> {
        for cap in CAPABILITIES {
            writeln!(self.writer, "{}", cap)?;
        }
        self.write_end()
    }

    pub fn write_ref(&mut self, oid: &str, ref_name: &str) -> std::io::Result<()> {
        writeln!(self.writer, "{} {}", oid, ref_name)
    }

    /// `@<target> HEAD`
    pub fn write_head_symref(&mut self, target: &str) -> std::io::Result<()> {
        writeln!(self.writer, "@{} HEAD", target)
    }

    /// Empty line terminating a response
    pub fn write_end(&mut self) -> std::io::Result<()> {
        writeln!(self.writer)?;
        self.writer.flush()
    }

    pub fn write_option_response(&mut self, supported: bool) -> std::io::Result<()> {
        if supported {
            writeln!(self.writer, "ok")?;
        } else {
            writeln!(self.writer, "unsupported")?;
        }
        self.writer.flush()
    }

    pub fn write_push_ok(&mut self, ref_name: &str) -> std::io::Result<()> {
        writeln!(self.writer, "ok {}", ref_name)
    }

    pub fn write_push_error(&mut self, ref_name: &str, message: &str) -> std::io::Result<()> {
        let message = message.replace(['\r', '\n'], " ");
        writeln!(self.writer, "error {} {}", ref_name, message)
    }
}

/// Protocol reader for the git remote helper protocol.
pub struct ProtocolReader<R: BufRead> {
    reader: R,
    line_buffer: String,
}

impl<R: BufRead> ProtocolReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line_buffer: String::new(),
        }
    }

    /// Read the next command; `None` at end of input
    pub fn read_command(&mut self) -> Result<Option<Command>, HelperError> {
        self.line_buffer.clear();
        let bytes_read = self.reader.read_line(&mut self.line_buffer)?;
        if bytes_read == 0 {
            return Ok(None);
        }
        Command::parse(&self.line_buffer).map(Some)
    }

    /// Read commands until an empty line or end of input
    pub fn read_batch(&mut self) -> Result<Vec<Command>, HelperError> {
        let mut commands = Vec::new();
        while let Some(cmd) = self.read_command()? {
            if cmd == Command::Empty {
                break;
            }
            commands.push(cmd);
        }
        Ok(commands)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(s: &str) -> PushSpec {
        PushSpec::parse(s).unwrap()
    }

    #[test]
    fn test_parse_basic_commands() {
        assert_eq!(Command::parse("capabilities\n").unwrap(), Command::Capabilities);
        assert_eq!(Command::parse("list").unwrap(), Command::List { for_push: false });
        assert_eq!(Command::parse("list for-push").unwrap(), Command::List { for_push: true });
        assert_eq!(Command::parse("  \n").unwrap(), Command::Empty);
        assert_eq!(
            Command::parse("option verbosity 1").unwrap(),
            Command::Option {
                name: "verbosity".to_string(),
                value: "1".to_string()
            }
        );
        assert!(matches!(Command::parse("connect git-upload-pack").unwrap(), Command::Unknown(_)));
    }

    #[test]
    fn test_parse_fetch() {
        match Command::parse("fetch abc123 refs/heads/main").unwrap() {
            Command::Fetch { oid, ref_name } => {
                assert_eq!(oid, "abc123");
                assert_eq!(ref_name, "refs/heads/main");
            }
            other => panic!("expected Fetch, got {:?}", other),
        }
        assert!(Command::parse("fetch abc123").is_err());
    }

    #[test]
    fn test_push_spec_force_markers() {
        assert!(!spec("refs/heads/main:refs/heads/main").force);
        assert!(spec("+refs/heads/main:refs/heads/main").force);
        assert!(spec("refs/heads/main+:refs/heads/main").force);
        assert!(spec("refs/heads/main:+refs/heads/main").force);
        let s = spec("refs/heads/main:refs/heads/main+");
        assert!(s.force);
        assert_eq!(s.dst, "refs/heads/main");
    }

    #[test]
    fn test_push_spec_escaped_colon() {
        let s = spec(r"refs/heads/a\:b:refs/heads/c");
        assert_eq!(s.src, "refs/heads/a:b");
        assert_eq!(s.dst, "refs/heads/c");
    }

    #[test]
    fn test_push_spec_errors() {
        let err = PushSpec::parse("refs/heads/main").unwrap_err();
        assert!(matches!(err, HelperError::Usage(_)));
        assert!(PushSpec::parse("refs/heads/main:").is_err());
        assert!(matches!(Command::parse("push main"), Err(HelperError::Usage(_))));
    }

    #[test]
    fn test_push_delete_spec() {
        let s = spec("+:refs/heads/old");
        assert!(s.is_delete());
        assert!(s.force);
    }

    #[test]
    fn test_read_batches() {
        let input = b"fetch aaa refs/heads/main\nfetch bbb refs/heads/dev\n\ncapabilities\n";
        let mut reader = ProtocolReader::new(&input[..]);
        let batch = reader.read_batch().unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(reader.read_command().unwrap(), Some(Command::Capabilities));
        assert_eq!(reader.read_command().unwrap(), None);
    }

    #[test]
    fn test_writer_output() {
        let mut writer = ProtocolWriter::new(Vec::new());
        writer.write_ref("abc", "refs/heads/main").unwrap();
        writer.write_head_symref("refs/heads/main").unwrap();
        writer.write_push_error("refs/heads/x", "line one\nline two").unwrap();
        writer.write_end().unwrap();
        let out = String::from_utf8(writer.into_inner()).unwrap();
        assert_eq!(
            out,
            "abc refs/heads/main\n@refs/heads/main HEAD\nerror refs/heads/x line one line two\n\n"
        );
    }
}
