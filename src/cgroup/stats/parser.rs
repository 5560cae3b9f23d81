//! Generic parsing of cgroup `*.stat` style files into typed structs.
//!
//! [`KeyValueStat`] covers files made of `key value` lines (`cpu.stat`, `memory.stat`) as well as
//! the `key=value` pairs of a single `io.stat` device line. [`SingleLineStat`] covers files holding
//! one number, such as `memory.swap.current`.
//!
//! # Example
//!
//! ```rust
//! use std::collections::HashMap;
//! use std::sync::LazyLock;
//! use service_metrics::cgroup::stats::KeyValueStat;
//!
//! #[derive(Default)]
//! struct Pressure {
//!     some: u64,
//! }
//!
//! static HANDLERS: LazyLock<HashMap<&'static str, fn(&mut Pressure, u64)>> =
//!     LazyLock::new(|| {
//!         let mut m: HashMap<&'static str, fn(&mut Pressure, u64)> = HashMap::new();
//!         m.insert("some", |stat: &mut Pressure, value: u64| stat.some = value);
//!         m
//!     });
//!
//! impl KeyValueStat for Pressure {
//!     const SPLIT_CHAR: Option<char> = None;
//!     const ALLOW_DUPLICATE_KEYS: bool = false;
//!     const ALLOW_MULTIPLE_KV_PER_LINE: bool = false;
//!     const REQUIRED_KEYS: &'static [&'static str] = &["some"];
//!
//!     fn field_handlers() -> &'static HashMap<&'static str, fn(&mut Self, u64)> {
//!         &HANDLERS
//!     }
//! }
//!
//! let stat = Pressure::from_reader(&mut "some 42\n".as_bytes()).unwrap();
//! assert_eq!(stat.some, 42);
//! ```

use std::collections::{HashMap, HashSet};
use std::io::BufRead;

use super::StatParseError;

type Handlers<T> = HashMap<&'static str, fn(&mut T, u64)>;

/// A stat file made of key/value pairs.
///
/// Implementors declare the known keys with a handler for each of them; unknown keys are ignored,
/// since the kernel adds new entries over time.
pub trait KeyValueStat: Default + 'static {
    /// Character joining a key to its value (`key=value`), or `None` for whitespace-separated
    /// `key value` tokens.
    const SPLIT_CHAR: Option<char>;

    /// Whether a key may be repeated; handlers of repeated keys usually accumulate.
    const ALLOW_DUPLICATE_KEYS: bool;

    /// Whether a line may carry more than one pair.
    const ALLOW_MULTIPLE_KV_PER_LINE: bool;

    /// Keys which must be present. Only checked when duplicate keys are disallowed.
    const REQUIRED_KEYS: &'static [&'static str] = &[];

    fn field_handlers() -> &'static HashMap<&'static str, fn(&mut Self, u64)>;

    /// Parses the whole input.
    ///
    /// # Errors
    ///
    /// Returns an `InvalidData` I/O error wrapping a [`StatParseError`] if a known key carries a
    /// non-numeric value, is duplicated, or a required key is absent.
    fn from_reader<R: BufRead>(buf: &mut R) -> std::io::Result<Self> {
        let handlers = Self::field_handlers();
        let mut stat = Self::default();
        let mut seen = HashSet::with_capacity(handlers.len());

        let mut line = String::new();
        let mut lineno = 0;

        while buf.read_line(&mut line)? != 0 {
            lineno += 1;
            Self::parse_line(&mut stat, &line, lineno, handlers, &mut seen)?;
            line.clear();
        }

        if !Self::ALLOW_DUPLICATE_KEYS {
            Self::check_required(&seen)?;
        }

        Ok(stat)
    }

    /// Fails with [`StatParseError::MissingField`] if a required key hasn't been seen.
    fn check_required(seen: &HashSet<&'static str>) -> std::io::Result<()> {
        match Self::REQUIRED_KEYS.iter().copied().find(|key| !seen.contains(key)) {
            Some(field) => Err(StatParseError::MissingField { field }.into()),
            None => Ok(()),
        }
    }

    /// Parses the pairs of one line into `stat`.
    fn parse_line(
        stat: &mut Self,
        line: &str,
        lineno: usize,
        handlers: &Handlers<Self>,
        seen: &mut HashSet<&'static str>,
    ) -> std::io::Result<()> {
        let mut tokens = line.split_whitespace();

        loop {
            let pair = match Self::SPLIT_CHAR {
                Some(split_char) => match tokens.next() {
                    // Tokens without the separator are skipped
                    Some(token) => token.split_once(split_char),
                    None => break,
                },
                None => match (tokens.next(), tokens.next()) {
                    (Some(key), Some(value)) => Some((key, value)),
                    _ => break,
                },
            };

            if let Some((key, value)) = pair {
                Self::apply(stat, key, value, lineno, handlers, seen)?;
            }

            if !Self::ALLOW_MULTIPLE_KV_PER_LINE {
                break;
            }
        }

        Ok(())
    }

    /// Parses `value` and hands it to the handler registered for `key`, if any.
    fn apply(
        stat: &mut Self,
        key: &str,
        value: &str,
        lineno: usize,
        handlers: &Handlers<Self>,
        seen: &mut HashSet<&'static str>,
    ) -> std::io::Result<()> {
        let Some((&known_key, handler)) = handlers.get_key_value(key) else {
            return Ok(());
        };

        let parsed = value
            .parse::<u64>()
            .map_err(|source| StatParseError::InvalidKeyValue {
                key: key.to_owned(),
                value: value.to_owned(),
                line: lineno,
                source,
            })?;

        if !Self::ALLOW_DUPLICATE_KEYS && !seen.insert(known_key) {
            return Err(StatParseError::DuplicateField {
                field: key.to_owned(),
                line: lineno,
            }
            .into());
        }

        handler(stat, parsed);
        Ok(())
    }
}

/// A stat file holding a single value on its first line.
pub trait SingleLineStat: Sized {
    fn from_reader<R: BufRead>(buf: &mut R) -> std::io::Result<Self>;
}
