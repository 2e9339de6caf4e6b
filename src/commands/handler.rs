//! Command Handler Module
//!
//! Turns a decoded [`Command`] into a reply, reading and writing the shared
//! storage engine as needed.
//!
//! ## Supported Commands
//!
//! - `PING` - Test connection
//! - `ECHO message` - Echo message, nil when the message is missing
//! - `GET key` - Get a key's value
//! - `SET key value [PX milliseconds]` - Set a key, optionally with a TTL
//!
//! The verb is matched case-insensitively; arguments are used exactly as sent.
//!
//! ## Errors
//!
//! A missing required argument or an unknown verb produces a [`CommandError`].
//! There is no error reply in this protocol subset, so the connection layer
//! treats these as fatal to the session.

use crate::protocol::{Command, RespValue};
use crate::storage::StorageEngine;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::trace;

/// Errors produced while dispatching a command.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// A required argument was not supplied
    #[error("wrong number of arguments for '{0}' command")]
    WrongArity(&'static str),

    /// The verb is not one this server implements
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
}

/// Handles commands by dispatching them against the shared storage engine.
#[derive(Debug, Clone)]
pub struct CommandHandler {
    storage: Arc<StorageEngine>,
}

impl CommandHandler {
    /// Creates a new command handler with the given storage engine.
    pub fn new(storage: Arc<StorageEngine>) -> Self {
        Self { storage }
    }

    /// Executes a command and returns the reply.
    ///
    /// The command must be non-empty; callers skip empty commands without
    /// replying. An empty command here is reported as an unknown command.
    pub fn execute(&self, command: Command) -> Result<RespValue, CommandError> {
        let Some((verb, args)) = command.split_first() else {
            return Err(CommandError::UnknownCommand(String::new()));
        };

        let verb = verb.to_ascii_uppercase();
        trace!(
            command = %String::from_utf8_lossy(&verb),
            args = args.len(),
            "Dispatching command"
        );

        match verb.as_slice() {
            b"PING" => Ok(self.cmd_ping()),
            b"ECHO" => Ok(self.cmd_echo(args)),
            b"GET" => self.cmd_get(args),
            b"SET" => self.cmd_set(args),
            _ => Err(CommandError::UnknownCommand(
                String::from_utf8_lossy(&verb).into_owned(),
            )),
        }
    }

    /// PING
    fn cmd_ping(&self) -> RespValue {
        RespValue::pong()
    }

    /// ECHO message
    fn cmd_echo(&self, args: &[Bytes]) -> RespValue {
        match args.first() {
            Some(message) => RespValue::bulk_string(message.clone()),
            None => RespValue::null(),
        }
    }

    /// GET key
    fn cmd_get(&self, args: &[Bytes]) -> Result<RespValue, CommandError> {
        let key = args.first().ok_or(CommandError::WrongArity("GET"))?;

        Ok(match self.storage.get(key) {
            Some(value) => RespValue::bulk_string(value),
            None => RespValue::null(),
        })
    }

    /// SET key value [PX milliseconds]
    fn cmd_set(&self, args: &[Bytes]) -> Result<RespValue, CommandError> {
        let [key, value, options @ ..] = args else {
            return Err(CommandError::WrongArity("SET"));
        };

        self.storage
            .set(key.clone(), value.clone(), parse_px_option(options));

        Ok(RespValue::ok())
    }
}

/// Reads the TTL from the options following `SET key value`.
///
/// Only `PX <milliseconds>` is recognised. A missing or unparsable
/// millisecond count yields no TTL rather than an error, and anything other
/// than `PX` in the option slot is ignored.
fn parse_px_option(options: &[Bytes]) -> Option<Duration> {
    match options {
        [flag, rest @ ..] if flag.eq_ignore_ascii_case(b"PX") => rest
            .first()
            .and_then(|ms| std::str::from_utf8(ms).ok())
            .and_then(|ms| ms.trim().parse::<u64>().ok())
            .filter(|&ms| ms > 0)
            .map(Duration::from_millis),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn create_handler() -> CommandHandler {
        let storage = Arc::new(StorageEngine::new());
        CommandHandler::new(storage)
    }

    fn make_command(args: &[&str]) -> Command {
        args.iter().map(|s| Bytes::from(s.to_string())).collect()
    }

    #[test]
    fn test_ping() {
        let handler = create_handler();

        let response = handler.execute(make_command(&["PING"])).unwrap();
        assert_eq!(response, RespValue::pong());
        assert_eq!(response.serialize(), b"+PONG\r\n");
    }

    #[test]
    fn test_ping_ignores_arguments() {
        let handler = create_handler();

        let response = handler.execute(make_command(&["ping", "hello"])).unwrap();
        assert_eq!(response, RespValue::pong());
    }

    #[test]
    fn test_echo() {
        let handler = create_handler();

        let response = handler.execute(make_command(&["ECHO", "hello"])).unwrap();
        assert_eq!(response.serialize(), b"$5\r\nhello\r\n");
    }

    #[test]
    fn test_echo_without_message() {
        let handler = create_handler();

        let response = handler.execute(make_command(&["echo"])).unwrap();
        assert_eq!(response, RespValue::null());
    }

    #[test]
    fn test_set_get() {
        let handler = create_handler();

        let response = handler.execute(make_command(&["SET", "key", "value"])).unwrap();
        assert_eq!(response, RespValue::ok());

        let response = handler.execute(make_command(&["GET", "key"])).unwrap();
        assert_eq!(response, RespValue::bulk_string(Bytes::from("value")));
    }

    #[test]
    fn test_verb_is_case_insensitive_values_are_not() {
        let handler = create_handler();

        handler.execute(make_command(&["sEt", "Key", "Value"])).unwrap();

        assert_eq!(
            handler.execute(make_command(&["get", "Key"])).unwrap(),
            RespValue::bulk_string(Bytes::from("Value"))
        );
        assert_eq!(
            handler.execute(make_command(&["GET", "key"])).unwrap(),
            RespValue::null()
        );
    }

    #[test]
    fn test_get_nonexistent() {
        let handler = create_handler();

        let response = handler.execute(make_command(&["GET", "nonexistent"])).unwrap();
        assert_eq!(response.serialize(), b"$-1\r\n");
    }

    #[test]
    fn test_get_missing_key_argument() {
        let handler = create_handler();

        assert_eq!(
            handler.execute(make_command(&["GET"])),
            Err(CommandError::WrongArity("GET"))
        );
    }

    #[test]
    fn test_set_missing_arguments() {
        let handler = create_handler();

        assert_eq!(
            handler.execute(make_command(&["SET"])),
            Err(CommandError::WrongArity("SET"))
        );
        assert_eq!(
            handler.execute(make_command(&["SET", "key"])),
            Err(CommandError::WrongArity("SET"))
        );
    }

    #[test]
    fn test_set_with_px() {
        let handler = create_handler();

        handler
            .execute(make_command(&["SET", "key", "value", "px", "50"]))
            .unwrap();
        assert_eq!(
            handler.execute(make_command(&["GET", "key"])).unwrap(),
            RespValue::bulk_string(Bytes::from("value"))
        );

        thread::sleep(Duration::from_millis(100));

        assert_eq!(
            handler.execute(make_command(&["GET", "key"])).unwrap(),
            RespValue::null()
        );
    }

    #[test]
    fn test_set_without_px_clears_ttl() {
        let handler = create_handler();

        handler
            .execute(make_command(&["SET", "key", "v1", "PX", "10"]))
            .unwrap();
        thread::sleep(Duration::from_millis(20));
        handler.execute(make_command(&["SET", "key", "v2"])).unwrap();

        assert_eq!(
            handler.execute(make_command(&["GET", "key"])).unwrap(),
            RespValue::bulk_string(Bytes::from("v2"))
        );
    }

    #[test]
    fn test_set_with_malformed_px_stores_without_ttl() {
        let handler = create_handler();

        let response = handler
            .execute(make_command(&["SET", "key", "value", "PX", "soon"]))
            .unwrap();
        assert_eq!(response, RespValue::ok());

        thread::sleep(Duration::from_millis(20));
        assert_eq!(
            handler.execute(make_command(&["GET", "key"])).unwrap(),
            RespValue::bulk_string(Bytes::from("value"))
        );
    }

    #[test]
    fn test_parse_px_option() {
        let opts = |parts: &[&str]| parse_px_option(&make_command(parts));

        assert_eq!(opts(&[]), None);
        assert_eq!(opts(&["PX", "1500"]), Some(Duration::from_millis(1500)));
        assert_eq!(opts(&["pX", "7"]), Some(Duration::from_millis(7)));
        assert_eq!(opts(&["PX"]), None);
        assert_eq!(opts(&["PX", "-5"]), None);
        assert_eq!(opts(&["PX", "0"]), None);
        assert_eq!(opts(&["PX", "1.5"]), None);
        assert_eq!(opts(&["EX", "10"]), None);
    }

    #[test]
    fn test_unknown_command() {
        let handler = create_handler();

        assert_eq!(
            handler.execute(make_command(&["flushall"])),
            Err(CommandError::UnknownCommand("FLUSHALL".to_string()))
        );
    }

    #[test]
    fn test_handlers_share_storage() {
        let storage = Arc::new(StorageEngine::new());
        let first = CommandHandler::new(Arc::clone(&storage));
        let second = CommandHandler::new(Arc::clone(&storage));

        first.execute(make_command(&["SET", "k", "v"])).unwrap();

        assert_eq!(
            second.execute(make_command(&["GET", "k"])).unwrap(),
            RespValue::bulk_string(Bytes::from("v"))
        );
        assert_eq!(storage.len(), 1);
    }
}
