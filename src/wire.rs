// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 zerocp contributors
//
// The router wire protocol: ASCII datagrams with colon-separated fields,
// one request per datagram, one reply per datagram. Inbound dispatch is a
// tagged decode over a closed set of verbs.

use thiserror::Error;

use crate::fixed_string::FixedString;
use crate::service::ServiceDescription;

/// Maximum datagram size in bytes, requests and replies alike.
pub const MAX_DATAGRAM_SIZE: usize = 1024;

/// A process's runtime name. Sized to fit `sockaddr_un` paths derived
/// from it.
pub type RuntimeName = FixedString<108>;

/// Protocol-level error kinds, as they appear on the wire after `ERROR:`.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("message has no recognizable command")]
    InvalidFormat,
    #[error("message fields could not be parsed")]
    ParseFailed,
    #[error("pid field is not a valid process id")]
    InvalidPid,
    #[error("heartbeat slot pool is exhausted")]
    PoolFull,
    #[error("resource allocation failed")]
    AllocationFailed,
    #[error("unknown command verb")]
    UnknownCommand,
    #[error("sender is not a registered process")]
    NotRegistered,
    #[error("offer already exists for this process and service")]
    DuplicateOffer,
}

impl ProtocolError {
    pub fn wire_token(&self) -> &'static str {
        match self {
            ProtocolError::InvalidFormat => "INVALID_FORMAT",
            ProtocolError::ParseFailed => "PARSE_FAILED",
            ProtocolError::InvalidPid => "INVALID_PID",
            ProtocolError::PoolFull => "POOL_FULL",
            ProtocolError::AllocationFailed => "ALLOCATION_FAILED",
            ProtocolError::UnknownCommand => "UNKNOWN_COMMAND",
            ProtocolError::NotRegistered => "NOT_REGISTERED",
            ProtocolError::DuplicateOffer => "DUPLICATE_OFFER",
        }
    }

    pub fn from_wire_token(token: &str) -> Option<Self> {
        Some(match token {
            "INVALID_FORMAT" => ProtocolError::InvalidFormat,
            "PARSE_FAILED" => ProtocolError::ParseFailed,
            "INVALID_PID" => ProtocolError::InvalidPid,
            "POOL_FULL" => ProtocolError::PoolFull,
            "ALLOCATION_FAILED" => ProtocolError::AllocationFailed,
            "UNKNOWN_COMMAND" => ProtocolError::UnknownCommand,
            "NOT_REGISTERED" => ProtocolError::NotRegistered,
            "DUPLICATE_OFFER" => ProtocolError::DuplicateOffer,
            _ => return None,
        })
    }
}

/// A request datagram, decoded.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// `REGISTER:<name>:<pid>:<monitored>`
    Register { name: RuntimeName, pid: u32, monitored: bool },
    /// `PUBLISHER:<name>:<pid>:<service>:<instance>:<event>`
    OfferPublisher { name: RuntimeName, pid: u32, service: ServiceDescription },
    /// `SUBSCRIBER:<name>:<pid>:<service>:<instance>:<event>`
    OfferSubscriber { name: RuntimeName, pid: u32, service: ServiceDescription },
    /// `ROUTE:<publisher-slot>:<service>:<instance>:<event>:<pool-id>:<chunk-mgmt-index>`
    Route { publisher_slot: u32, service: ServiceDescription, pool_id: u64, chunk_index: u32 },
    /// `UNREGISTER:<slot>`: clean shutdown, releases the heartbeat slot.
    Unregister { slot: u32 },
    /// `PING`: liveness diagnostic.
    Ping,
    /// `DUMP`: occupancy diagnostic.
    Dump,
}

impl Request {
    /// Decode one datagram.
    pub fn parse(message: &str) -> Result<Self, ProtocolError> {
        let message = message.trim_end_matches(['\n', '\0']);
        if message.is_empty() {
            return Err(ProtocolError::InvalidFormat);
        }
        let fields: Vec<&str> = message.split(':').collect();
        match fields[0] {
            "REGISTER" => {
                if fields.len() != 4 {
                    return Err(ProtocolError::ParseFailed);
                }
                let monitored = match fields[3] {
                    "1" => true,
                    "0" => false,
                    _ => return Err(ProtocolError::ParseFailed),
                };
                Ok(Request::Register {
                    name: parse_name(fields[1])?,
                    pid: parse_pid(fields[2])?,
                    monitored,
                })
            }
            "PUBLISHER" => {
                if fields.len() != 6 {
                    return Err(ProtocolError::ParseFailed);
                }
                Ok(Request::OfferPublisher {
                    name: parse_name(fields[1])?,
                    pid: parse_pid(fields[2])?,
                    service: parse_service(fields[3], fields[4], fields[5])?,
                })
            }
            "SUBSCRIBER" => {
                if fields.len() != 6 {
                    return Err(ProtocolError::ParseFailed);
                }
                Ok(Request::OfferSubscriber {
                    name: parse_name(fields[1])?,
                    pid: parse_pid(fields[2])?,
                    service: parse_service(fields[3], fields[4], fields[5])?,
                })
            }
            "ROUTE" => {
                if fields.len() != 7 {
                    return Err(ProtocolError::ParseFailed);
                }
                Ok(Request::Route {
                    publisher_slot: fields[1].parse().map_err(|_| ProtocolError::ParseFailed)?,
                    service: parse_service(fields[2], fields[3], fields[4])?,
                    pool_id: fields[5].parse().map_err(|_| ProtocolError::ParseFailed)?,
                    chunk_index: fields[6].parse().map_err(|_| ProtocolError::ParseFailed)?,
                })
            }
            "UNREGISTER" => {
                if fields.len() != 2 {
                    return Err(ProtocolError::ParseFailed);
                }
                Ok(Request::Unregister {
                    slot: fields[1].parse().map_err(|_| ProtocolError::ParseFailed)?,
                })
            }
            "PING" if fields.len() == 1 => Ok(Request::Ping),
            "DUMP" if fields.len() == 1 => Ok(Request::Dump),
            _ => Err(ProtocolError::UnknownCommand),
        }
    }

    /// Encode for transmission.
    pub fn encode(&self) -> String {
        match self {
            Request::Register { name, pid, monitored } => {
                format!("REGISTER:{name}:{pid}:{}", if *monitored { 1 } else { 0 })
            }
            Request::OfferPublisher { name, pid, service } => format!(
                "PUBLISHER:{name}:{pid}:{}:{}:{}",
                service.service(),
                service.instance(),
                service.event()
            ),
            Request::OfferSubscriber { name, pid, service } => format!(
                "SUBSCRIBER:{name}:{pid}:{}:{}:{}",
                service.service(),
                service.instance(),
                service.event()
            ),
            Request::Route { publisher_slot, service, pool_id, chunk_index } => format!(
                "ROUTE:{publisher_slot}:{}:{}:{}:{pool_id}:{chunk_index}",
                service.service(),
                service.instance(),
                service.event()
            ),
            Request::Unregister { slot } => format!("UNREGISTER:{slot}"),
            Request::Ping => "PING".to_string(),
            Request::Dump => "DUMP".to_string(),
        }
    }
}

fn parse_name(name: &str) -> Result<RuntimeName, ProtocolError> {
    if name.is_empty() {
        return Err(ProtocolError::ParseFailed);
    }
    RuntimeName::try_from_str(name).map_err(|_| ProtocolError::ParseFailed)
}

fn parse_pid(pid: &str) -> Result<u32, ProtocolError> {
    let pid: u32 = pid.parse().map_err(|_| ProtocolError::InvalidPid)?;
    if pid == 0 {
        return Err(ProtocolError::InvalidPid);
    }
    Ok(pid)
}

fn parse_service(
    service: &str,
    instance: &str,
    event: &str,
) -> Result<ServiceDescription, ProtocolError> {
    ServiceDescription::new(service, instance, event).map_err(|_| ProtocolError::ParseFailed)
}

/// A reply datagram, decoded.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// `OK:OFFSET:<slot>`: registration succeeded, heartbeat slot index.
    Registered { slot: u32 },
    /// `OK:PUBLISHER`
    PublisherAck,
    /// `OK:QUEUE_OFFSET:<offset>`: byte offset of the receive queue within
    /// the daemon's shared segment.
    SubscriberAck { queue_offset: u64 },
    /// `OK:ROUTED`
    Routed,
    /// `WARN:NO_SUBSCRIBERS`: nothing matched; the chunk reservation was
    /// released.
    NoSubscribers,
    /// `OK:UNREGISTERED`
    Unregistered,
    /// `OK:PONG`
    Pong,
    /// `OK:DUMP:<text>`: free-form occupancy report.
    Dump { report: String },
    /// `ERROR:<kind>`
    Error(ProtocolError),
}

impl Reply {
    pub fn encode(&self) -> String {
        match self {
            Reply::Registered { slot } => format!("OK:OFFSET:{slot}"),
            Reply::PublisherAck => "OK:PUBLISHER".to_string(),
            Reply::SubscriberAck { queue_offset } => format!("OK:QUEUE_OFFSET:{queue_offset}"),
            Reply::Routed => "OK:ROUTED".to_string(),
            Reply::NoSubscribers => "WARN:NO_SUBSCRIBERS".to_string(),
            Reply::Unregistered => "OK:UNREGISTERED".to_string(),
            Reply::Pong => "OK:PONG".to_string(),
            Reply::Dump { report } => format!("OK:DUMP:{report}"),
            Reply::Error(kind) => format!("ERROR:{}", kind.wire_token()),
        }
    }

    /// Decode a reply. Unknown shapes come back as `None` so the caller can
    /// report the raw text.
    pub fn parse(message: &str) -> Option<Self> {
        let message = message.trim_end_matches(['\n', '\0']);
        if let Some(kind) = message.strip_prefix("ERROR:") {
            return ProtocolError::from_wire_token(kind).map(Reply::Error);
        }
        if message == "WARN:NO_SUBSCRIBERS" {
            return Some(Reply::NoSubscribers);
        }
        if let Some(rest) = message.strip_prefix("OK:") {
            if let Some(slot) = rest.strip_prefix("OFFSET:") {
                return slot.parse().ok().map(|slot| Reply::Registered { slot });
            }
            if let Some(offset) = rest.strip_prefix("QUEUE_OFFSET:") {
                return offset.parse().ok().map(|queue_offset| Reply::SubscriberAck { queue_offset });
            }
            if let Some(report) = rest.strip_prefix("DUMP:") {
                return Some(Reply::Dump { report: report.to_string() });
            }
            return match rest {
                "PUBLISHER" => Some(Reply::PublisherAck),
                "ROUTED" => Some(Reply::Routed),
                "UNREGISTERED" => Some(Reply::Unregistered),
                "PONG" => Some(Reply::Pong),
                _ => None,
            };
        }
        None
    }
}
