//! Decode inbound KRPC messages into a closed set of variants, and encode outbound ones.

pub(crate) mod internal;
mod validate;

use std::collections::HashMap;
use std::fmt::{self, Debug, Formatter};

use serde_bencode::value::Value;

use crate::common::{Id, ID_SIZE};

pub use validate::validate;

/// Size of the transaction ids this node generates and expects in replies.
pub const TID_SIZE: usize = 4;
/// Largest transaction id accepted on an inbound request.
pub const TID_SIZE_MAX: usize = 20;
/// Largest token accepted from, or echoed back to, a remote node.
pub const TOKEN_SIZE_MAX: usize = 20;
/// Longest error description logged from an error message.
pub const ERROR_MESSAGE_MAX: usize = 100;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
/// Reasons for dropping an inbound message.
pub enum MessageError {
    #[error("Packet is not valid bencode")]
    Malformed,

    #[error("Packet is not a dictionary")]
    NotADictionary,

    #[error("Message type missing or broken")]
    MissingType,

    #[error("Invalid message type {0:?}")]
    InvalidType(u8),

    #[error("{0} missing or broken")]
    InvalidField(&'static str),

    #[error("Transaction ID too big ({0} bytes)")]
    TransactionIdTooBig(usize),

    #[error("Broken transaction ID ({0} bytes)")]
    BrokenTransactionId(usize),

    #[error("Error message too big ({0} bytes)")]
    ErrorMessageTooBig(usize),
}

#[derive(Debug, Clone, PartialEq)]
/// A structurally valid KRPC message, discriminated by its `y` field.
pub enum Message {
    Request(Request),
    Reply(Reply),
    Error(ErrorMessage),
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Query verbs this node knows of.
pub enum Verb {
    Ping,
    FindNode,
    GetPeers,
    AnnouncePeer,
    /// Sent by some uTorrent versions, always ignored.
    Vote,
    Unknown(Vec<u8>),
}

impl From<&[u8]> for Verb {
    fn from(verb: &[u8]) -> Self {
        match verb {
            b"ping" => Verb::Ping,
            b"find_node" => Verb::FindNode,
            b"get_peers" => Verb::GetPeers,
            b"announce_peer" => Verb::AnnouncePeer,
            b"vote" => Verb::Vote,
            other => Verb::Unknown(other.to_vec()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub transaction_id: Vec<u8>,
    pub requester_id: Id,
    pub verb: Verb,
    pub arguments: Arguments,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub transaction_id: Vec<u8>,
    pub responder_id: Id,
    pub arguments: Arguments,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorMessage {
    pub code: i64,
    pub description: String,
}

impl Message {
    /// Decodes a message that already passed [validate].
    pub fn from_bytes(bytes: &[u8]) -> Result<Message, MessageError> {
        let value: Value = serde_bencode::from_bytes(bytes).map_err(|_| MessageError::Malformed)?;

        let dict = match value {
            Value::Dict(dict) => Arguments(dict),
            _ => return Err(MessageError::NotADictionary),
        };

        let kind = match dict.get("y") {
            Some(Value::Bytes(y)) if y.len() == 1 => y[0],
            _ => return Err(MessageError::MissingType),
        };

        match kind {
            b'q' => Request::from_dict(dict).map(Message::Request),
            b'r' => Reply::from_dict(dict).map(Message::Reply),
            b'e' => ErrorMessage::from_dict(&dict).map(Message::Error),
            other => Err(MessageError::InvalidType(other)),
        }
    }
}

impl Request {
    fn from_dict(mut dict: Arguments) -> Result<Request, MessageError> {
        let verb = Verb::from(dict.bytes("q")?);

        let arguments = dict.take_dict("a")?;
        let requester_id = arguments.id("id")?;

        let transaction_id = dict.bytes("t")?.to_vec();

        Ok(Request {
            transaction_id,
            requester_id,
            verb,
            arguments,
        })
    }

    /// Requests may carry any transaction id up to [TID_SIZE_MAX] bytes.
    pub fn check_transaction_id(&self) -> Result<(), MessageError> {
        if self.transaction_id.len() > TID_SIZE_MAX {
            return Err(MessageError::TransactionIdTooBig(
                self.transaction_id.len(),
            ));
        }

        Ok(())
    }
}

impl Reply {
    fn from_dict(mut dict: Arguments) -> Result<Reply, MessageError> {
        let arguments = dict.take_dict("r")?;
        let responder_id = arguments.id("id")?;

        let transaction_id = dict.bytes("t")?.to_vec();

        Ok(Reply {
            transaction_id,
            responder_id,
            arguments,
        })
    }

    /// Replies must echo one of our own [TID_SIZE] transaction ids.
    pub fn check_transaction_id(&self) -> Result<[u8; TID_SIZE], MessageError> {
        self.transaction_id
            .as_slice()
            .try_into()
            .map_err(|_| MessageError::BrokenTransactionId(self.transaction_id.len()))
    }
}

impl ErrorMessage {
    fn from_dict(dict: &Arguments) -> Result<ErrorMessage, MessageError> {
        let list = dict.list("e")?;

        let code = match list.first() {
            Some(Value::Int(code)) => *code,
            _ => return Err(MessageError::InvalidField("error code")),
        };

        let description = match list.last() {
            Some(Value::Bytes(description)) => description,
            _ => return Err(MessageError::InvalidField("error message")),
        };

        if description.len() > ERROR_MESSAGE_MAX {
            return Err(MessageError::ErrorMessageTooBig(description.len()));
        }

        Ok(ErrorMessage {
            code,
            description: String::from_utf8_lossy(description).into_owned(),
        })
    }
}

#[derive(Clone, PartialEq, Default)]
/// A bencoded dictionary with typed accessors.
pub struct Arguments(HashMap<Vec<u8>, Value>);

impl Arguments {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key.as_bytes())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key.as_bytes())
    }

    /// A byte string field.
    pub fn bytes(&self, key: &'static str) -> Result<&[u8], MessageError> {
        match self.get(key) {
            Some(Value::Bytes(bytes)) => Ok(bytes),
            _ => Err(MessageError::InvalidField(key)),
        }
    }

    /// A byte string field of exactly [ID_SIZE] bytes.
    pub fn id(&self, key: &'static str) -> Result<Id, MessageError> {
        match self.bytes(key)? {
            bytes if bytes.len() == ID_SIZE => {
                Id::from_bytes(bytes).map_err(|_| MessageError::InvalidField(key))
            }
            _ => Err(MessageError::InvalidField(key)),
        }
    }

    pub fn int(&self, key: &'static str) -> Result<i64, MessageError> {
        match self.get(key) {
            Some(Value::Int(int)) => Ok(*int),
            _ => Err(MessageError::InvalidField(key)),
        }
    }

    pub fn list(&self, key: &'static str) -> Result<&[Value], MessageError> {
        match self.get(key) {
            Some(Value::List(list)) => Ok(list),
            _ => Err(MessageError::InvalidField(key)),
        }
    }

    fn take_dict(&mut self, key: &'static str) -> Result<Arguments, MessageError> {
        match self.0.remove(key.as_bytes()) {
            Some(Value::Dict(dict)) => Ok(Arguments(dict)),
            _ => Err(MessageError::InvalidField(key)),
        }
    }
}

impl Debug for Arguments {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<String> = self
            .0
            .keys()
            .map(|key| String::from_utf8_lossy(key).into_owned())
            .collect();
        keys.sort();

        write!(f, "Arguments({})", keys.join(","))
    }
}

impl From<HashMap<Vec<u8>, Value>> for Arguments {
    fn from(dict: HashMap<Vec<u8>, Value>) -> Self {
        Arguments(dict)
    }
}
