use crate::error::{Result, RpcError};

use super::Value;

pub const MSGTYPE_REQUEST: u64 = 0;
pub const MSGTYPE_RESPONSE: u64 = 1;
pub const MSGTYPE_NOTIFICATION: u64 = 2;

/// One protocol message. On the wire every envelope is a positional array whose
/// first element is the message type tag.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// `[0, msgid, method, params]`
    Request {
        msgid: u64,
        method: String,
        params: Vec<Value>,
    },
    /// `[1, msgid, error, result]`; a nil error on the wire is `None` here.
    Response {
        msgid: u64,
        error: Option<Value>,
        result: Value,
    },
    /// `[2, method, params]`
    Notification { method: String, params: Vec<Value> },
}

impl Envelope {
    pub fn request(msgid: u64, method: impl Into<String>, params: Vec<Value>) -> Self {
        Envelope::Request {
            msgid,
            method: method.into(),
            params,
        }
    }

    pub fn msgid(&self) -> Option<u64> {
        match *self {
            Envelope::Request { msgid, .. } | Envelope::Response { msgid, .. } => Some(msgid),
            Envelope::Notification { .. } => None,
        }
    }

    /// Lowers the envelope into its positional wire shape.
    pub fn into_value(self) -> Value {
        let fields = match self {
            Envelope::Request {
                msgid,
                method,
                params,
            } => vec![
                Value::UInt(MSGTYPE_REQUEST),
                Value::UInt(msgid),
                Value::Str(method),
                Value::Array(params),
            ],
            Envelope::Response {
                msgid,
                error,
                result,
            } => vec![
                Value::UInt(MSGTYPE_RESPONSE),
                Value::UInt(msgid),
                error.unwrap_or(Value::Nil),
                result,
            ],
            Envelope::Notification { method, params } => vec![
                Value::UInt(MSGTYPE_NOTIFICATION),
                Value::Str(method),
                Value::Array(params),
            ],
        };
        Value::Array(fields)
    }

    /// Lifts a decoded value back into an envelope, rejecting anything that does
    /// not have the exact positional shape for its type tag.
    pub fn from_value(value: Value) -> Result<Self> {
        let fields = match value {
            Value::Array(fields) => fields,
            other => return Err(invalid("envelope is not an array", &other)),
        };

        let tag = fields.first().and_then(Value::as_u64);
        match (tag, fields.len()) {
            (Some(MSGTYPE_REQUEST), 4) => {
                let mut fields = fields.into_iter().skip(1);
                let msgid = take_msgid(fields.next())?;
                let method = take_method(fields.next())?;
                let params = take_params(fields.next())?;
                Ok(Envelope::Request {
                    msgid,
                    method,
                    params,
                })
            }
            (Some(MSGTYPE_RESPONSE), 4) => {
                let mut fields = fields.into_iter().skip(1);
                let msgid = take_msgid(fields.next())?;
                let error = fields.next().filter(|e| !e.is_nil());
                let result = fields.next().unwrap_or(Value::Nil);
                Ok(Envelope::Response {
                    msgid,
                    error,
                    result,
                })
            }
            (Some(MSGTYPE_NOTIFICATION), 3) => {
                let mut fields = fields.into_iter().skip(1);
                let method = take_method(fields.next())?;
                let params = take_params(fields.next())?;
                Ok(Envelope::Notification { method, params })
            }
            _ => Err(invalid("unexpected envelope shape", &Value::Array(fields))),
        }
    }
}

fn invalid(reason: &str, value: &Value) -> RpcError {
    RpcError::Protocol(format!("invalid message, {reason}: {value}"))
}

fn take_msgid(field: Option<Value>) -> Result<u64> {
    match field {
        Some(Value::UInt(msgid)) => Ok(msgid),
        Some(other) => other
            .as_u64()
            .ok_or_else(|| invalid("msgid is not an unsigned integer", &other)),
        None => Err(RpcError::Protocol("invalid message, missing msgid".into())),
    }
}

fn take_method(field: Option<Value>) -> Result<String> {
    match field {
        Some(Value::Str(method)) => Ok(method),
        Some(other) => Err(invalid("method is not a string", &other)),
        None => Err(RpcError::Protocol("invalid message, missing method".into())),
    }
}

fn take_params(field: Option<Value>) -> Result<Vec<Value>> {
    match field {
        Some(Value::Array(params)) => Ok(params),
        Some(other) => Err(invalid("params is not an array", &other)),
        None => Err(RpcError::Protocol("invalid message, missing params".into())),
    }
}
