use std::fmt::Write as _;
use std::str::FromStr;

use super::error::WireError;
use crate::membership::types::{NodeId, NodeRecord};

const TAG_JOIN: &str = "JOIN";
const TAG_HEARTBEAT: &str = "HEARTBEAT";
const TAG_LEAVE: &str = "LEAVE";
const TAG_MEMBERSHIP_REQUEST: &str = "MEMBERSHIP_REQUEST";
const TAG_MEMBERSHIP_RESPONSE: &str = "MEMBERSHIP_RESPONSE";

/// The membership control plane. All variants are colon-separated ASCII.
///
/// - `Join`: `JOIN:<nodeId>:<port>`. The host is taken from the packet source, never from the frame.
/// - `Heartbeat`: `HEARTBEAT:<nodeId>:<ip>:<port>`. The endpoint lets unknown senders self-announce.
/// - `Leave`: `LEAVE:<nodeId>`.
/// - `MembershipRequest`: the bare literal.
/// - `MembershipResponse`: the literal followed by `:<nodeId>:<ip>:<port>` per member.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    Join {
        node_id: NodeId,
        port: u16,
    },

    Heartbeat {
        node_id: NodeId,
        endpoint: Option<(String, u16)>,
    },

    Leave {
        node_id: NodeId,
    },

    MembershipRequest,

    MembershipResponse {
        members: Vec<NodeRecord>,
    },
}

impl ControlMessage {
    pub fn heartbeat(node_id: NodeId, host: &str, port: u16) -> Self {
        ControlMessage::Heartbeat {
            node_id,
            endpoint: Some((host.to_string(), port)),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ControlMessage::Join { .. } => TAG_JOIN,
            ControlMessage::Heartbeat { .. } => TAG_HEARTBEAT,
            ControlMessage::Leave { .. } => TAG_LEAVE,
            ControlMessage::MembershipRequest => TAG_MEMBERSHIP_REQUEST,
            ControlMessage::MembershipResponse { .. } => TAG_MEMBERSHIP_RESPONSE,
        }
    }

    pub fn encode(&self) -> String {
        match self {
            ControlMessage::Join { node_id, port } => format!("{TAG_JOIN}:{node_id}:{port}"),
            ControlMessage::Heartbeat { node_id, endpoint } => match endpoint {
                Some((host, port)) => format!("{TAG_HEARTBEAT}:{node_id}:{host}:{port}"),
                None => format!("{TAG_HEARTBEAT}:{node_id}"),
            },
            ControlMessage::Leave { node_id } => format!("{TAG_LEAVE}:{node_id}"),
            ControlMessage::MembershipRequest => TAG_MEMBERSHIP_REQUEST.to_string(),
            ControlMessage::MembershipResponse { members } => {
                let mut out = String::from(TAG_MEMBERSHIP_RESPONSE);
                for member in members {
                    let _ = write!(out, ":{}:{}:{}", member.id, member.host, member.port);
                }
                out
            }
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let text = std::str::from_utf8(bytes).map_err(|_| WireError::NotText)?;
        let text = text.trim_end_matches(['\0', '\r', '\n', ' ']);
        let parts: Vec<&str> = text.split(':').collect();

        match parts[0] {
            TAG_JOIN => Ok(ControlMessage::Join {
                node_id: parse_node_id(TAG_JOIN, parts.get(1))?,
                port: parse_field(TAG_JOIN, "port", parts.get(2))?,
            }),

            TAG_HEARTBEAT => {
                let node_id = parse_node_id(TAG_HEARTBEAT, parts.get(1))?;
                let endpoint = match (parts.get(2), parts.get(3)) {
                    (Some(host), Some(_)) if !host.is_empty() => Some((
                        host.to_string(),
                        parse_field(TAG_HEARTBEAT, "port", parts.get(3))?,
                    )),
                    _ => None,
                };
                Ok(ControlMessage::Heartbeat { node_id, endpoint })
            }

            TAG_LEAVE => Ok(ControlMessage::Leave {
                node_id: parse_node_id(TAG_LEAVE, parts.get(1))?,
            }),

            TAG_MEMBERSHIP_REQUEST => Ok(ControlMessage::MembershipRequest),

            TAG_MEMBERSHIP_RESPONSE => Ok(ControlMessage::MembershipResponse {
                members: decode_members(&parts[1..]),
            }),

            other => Err(WireError::UnknownFrame(other.to_string())),
        }
    }
}

/// Incomplete trailing groups are ignored and unparsable triples are skipped,
/// so one bad entry does not discard the whole snapshot.
fn decode_members(fields: &[&str]) -> Vec<NodeRecord> {
    fields
        .chunks_exact(3)
        .filter_map(|triple| {
            let id = triple[0].parse::<i32>();
            let port = triple[2].parse::<u16>();
            match (id, port) {
                (Ok(id), Ok(port)) if !triple[1].is_empty() => {
                    Some(NodeRecord::new(NodeId(id), triple[1], port))
                }
                _ => {
                    tracing::warn!("Skipping malformed member entry {:?}", triple);
                    None
                }
            }
        })
        .collect()
}

fn parse_node_id(frame: &'static str, raw: Option<&&str>) -> Result<NodeId, WireError> {
    parse_field(frame, "nodeId", raw).map(NodeId)
}

fn parse_field<T: FromStr>(
    frame: &'static str,
    field: &'static str,
    raw: Option<&&str>,
) -> Result<T, WireError> {
    let raw = raw.ok_or(WireError::MissingField { frame, field })?;
    raw.trim().parse().map_err(|_| WireError::InvalidField {
        field,
        value: raw.to_string(),
    })
}
