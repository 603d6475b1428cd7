//! Error types for model stream reading.

use thiserror::Error;

/// Errors that can occur while reading a model stream.
#[derive(Error, Debug)]
pub enum ReadError {
    /// I/O error on the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream does not begin with the magic header line.
    #[error("not a carve model stream (header line: {line:?})")]
    BadHeader {
        /// What the first line actually was.
        line: String,
    },

    /// The header names a version this reader does not speak.
    #[error("unsupported stream version {0} (supported: {min}..={max})", min = super::VERSION_PREVIOUS, max = super::VERSION_CURRENT)]
    UnsupportedVersion(u32),

    /// A token was not what the grammar requires.
    #[error("line {line}: expected {expected}, got {got:?}")]
    UnexpectedToken {
        /// What the grammar wanted.
        expected: &'static str,
        /// What was read.
        got: String,
        /// 1-based line number.
        line: usize,
    },

    /// The stream ended mid-entity.
    #[error("unexpected end of stream at line {line}")]
    UnexpectedEnd {
        /// 1-based line number.
        line: usize,
    },

    /// A number failed to parse.
    #[error("line {line}: bad {what} token {got:?}")]
    BadNumber {
        /// What kind of number was wanted.
        what: &'static str,
        /// The offending token.
        got: String,
        /// 1-based line number.
        line: usize,
    },

    /// An operator / kind code outside the closed sets.
    #[error("line {line}: unknown {what} code {code:?}")]
    UnknownCode {
        /// Which code table was consulted.
        what: &'static str,
        /// The offending code.
        code: String,
        /// 1-based line number.
        line: usize,
    },

    /// A shared-node reference to an address never defined on this
    /// stream.
    #[error("line {line}: reference to unknown {what} address {addr}")]
    MissingAddress {
        /// The entity table consulted.
        what: &'static str,
        /// The dangling address.
        addr: u64,
        /// 1-based line number.
        line: usize,
    },
}
