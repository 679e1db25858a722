use std::net::SocketAddrV4;

use grapefruit_models::{
    decode_nodes, decode_peers, encode_nodes, encode_peer, GrapefruitError, Id20, InfoHash, Node, NodeId,
};
use rand::RngCore;

use crate::bencode::{self, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub transaction_id: Vec<u8>,
    pub body: Body,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    Query(Query),
    Response(Response),
    Error { code: i64, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    Ping {
        id: NodeId,
    },
    FindNode {
        id: NodeId,
        target: NodeId,
    },
    GetPeers {
        id: NodeId,
        info_hash: InfoHash,
    },
    AnnouncePeer {
        id: NodeId,
        info_hash: InfoHash,
        port: Option<u16>,
        implied_port: bool,
        token: Vec<u8>,
    },
}

impl Query {
    pub fn sender_id(&self) -> &NodeId {
        match self {
            Query::Ping { id }
            | Query::FindNode { id, .. }
            | Query::GetPeers { id, .. }
            | Query::AnnouncePeer { id, .. } => id,
        }
    }

    pub fn method(&self) -> &'static str {
        match self {
            Query::Ping { .. } => "ping",
            Query::FindNode { .. } => "find_node",
            Query::GetPeers { .. } => "get_peers",
            Query::AnnouncePeer { .. } => "announce_peer",
        }
    }

    fn args(&self) -> Value {
        match self {
            Query::Ping { id } => Value::dict().insert("id", id_value(id)).build(),
            Query::FindNode { id, target } => Value::dict()
                .insert("id", id_value(id))
                .insert("target", id_value(target))
                .build(),
            Query::GetPeers { id, info_hash } => Value::dict()
                .insert("id", id_value(id))
                .insert("info_hash", id_value(info_hash))
                .build(),
            Query::AnnouncePeer { id, info_hash, port, implied_port, token } => Value::dict()
                .insert("id", id_value(id))
                .insert("info_hash", id_value(info_hash))
                .insert_opt("port", port.map(|p| Value::Int(p as i64)))
                .insert_opt("implied_port", implied_port.then_some(Value::Int(1)))
                .insert("token", Value::bytes(token.clone()))
                .build(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    pub id: Option<NodeId>,
    pub nodes: Vec<Node>,
    pub values: Vec<SocketAddrV4>,
    pub token: Option<Vec<u8>>,
}

impl Response {
    pub fn new(id: NodeId) -> Self {
        Self { id: Some(id), ..Default::default() }
    }

    pub fn with_nodes(mut self, nodes: Vec<Node>) -> Self {
        self.nodes = nodes;
        self
    }

    pub fn with_values(mut self, values: Vec<SocketAddrV4>) -> Self {
        self.values = values;
        self
    }

    pub fn with_token(mut self, token: Vec<u8>) -> Self {
        self.token = Some(token);
        self
    }

    fn to_value(&self) -> Value {
        let values = (!self.values.is_empty()).then(|| {
            Value::List(
                self.values
                    .iter()
                    .map(|addr| {
                        let mut b = Vec::with_capacity(6);
                        encode_peer(addr, &mut b);
                        Value::Bytes(b)
                    })
                    .collect(),
            )
        });
        // A bare find_node answer still carries an empty "nodes" string.
        let nodes = (!self.nodes.is_empty() || self.values.is_empty())
            .then(|| Value::Bytes(encode_nodes(&self.nodes)));

        Value::dict()
            .insert_opt("id", self.id.as_ref().map(id_value))
            .insert_opt("nodes", nodes)
            .insert_opt("values", values)
            .insert_opt("token", self.token.clone().map(Value::Bytes))
            .build()
    }
}

impl Message {
    pub fn query(transaction_id: Vec<u8>, query: Query) -> Self {
        Self { transaction_id, body: Body::Query(query) }
    }

    pub fn response(transaction_id: Vec<u8>, response: Response) -> Self {
        Self { transaction_id, body: Body::Response(response) }
    }

    pub fn error(transaction_id: Vec<u8>, code: i64, message: impl Into<String>) -> Self {
        Self { transaction_id, body: Body::Error { code, message: message.into() } }
    }

    /// Builds the error reply a remote node gets when handling its query failed.
    pub fn error_for(transaction_id: Vec<u8>, e: &GrapefruitError) -> Self {
        Self::error(transaction_id, e.krpc_code(), e.krpc_message())
    }

    pub fn to_value(&self) -> Value {
        let base = Value::dict().insert("t", Value::bytes(self.transaction_id.clone()));
        match &self.body {
            Body::Query(q) => base
                .insert("y", Value::bytes("q"))
                .insert("q", Value::bytes(q.method()))
                .insert("a", q.args())
                .build(),
            Body::Response(r) => base.insert("y", Value::bytes("r")).insert("r", r.to_value()).build(),
            Body::Error { code, message } => base
                .insert("y", Value::bytes("e"))
                .insert("e", Value::List(vec![Value::Int(*code), Value::bytes(message.as_bytes())]))
                .build(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_value().to_bytes()
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, GrapefruitError> {
        Self::from_value(&bencode::decode(data)?)
    }

    pub fn from_value(value: &Value) -> Result<Self, GrapefruitError> {
        if value.as_dict().is_none() {
            return Err(krpc_err("message is not a dictionary"));
        }
        let transaction_id = value
            .get_bytes("t")
            .ok_or_else(|| krpc_err("missing transaction id"))?
            .to_vec();
        let kind = value.get_bytes("y").ok_or_else(|| krpc_err("missing message type"))?;

        let body = match kind {
            b"q" => Body::Query(parse_query(value, &transaction_id)?),
            b"r" => Body::Response(parse_response(value.get("r").ok_or_else(|| krpc_err("missing r"))?)?),
            b"e" => {
                let list = value
                    .get("e")
                    .and_then(Value::as_list)
                    .ok_or_else(|| krpc_err("missing error list"))?;
                let code = list.first().and_then(Value::as_int).unwrap_or(0);
                let message = list
                    .get(1)
                    .and_then(Value::as_bytes)
                    .map(|b| String::from_utf8_lossy(b).into_owned())
                    .unwrap_or_default();
                Body::Error { code, message }
            }
            other => {
                return Err(krpc_err(&format!("unknown message type {:?}", String::from_utf8_lossy(other))));
            }
        };

        Ok(Self { transaction_id, body })
    }
}

fn parse_query(value: &Value, transaction_id: &[u8]) -> Result<Query, GrapefruitError> {
    let method = value.get_bytes("q").ok_or_else(|| krpc_err("missing query method"))?;
    if !matches!(method, b"ping" | b"find_node" | b"get_peers" | b"announce_peer") {
        return Err(GrapefruitError::MethodUnknown {
            method: String::from_utf8_lossy(method).into_owned(),
            transaction_id: transaction_id.to_vec(),
        });
    }
    let args = value.get("a").ok_or_else(|| krpc_err("missing query arguments"))?;
    let id = required_id(args, "id")?;

    match method {
        b"ping" => Ok(Query::Ping { id }),
        b"find_node" => Ok(Query::FindNode { id, target: required_id(args, "target")? }),
        b"get_peers" => Ok(Query::GetPeers { id, info_hash: required_id(args, "info_hash")? }),
        b"announce_peer" => Ok(Query::AnnouncePeer {
            id,
            info_hash: required_id(args, "info_hash")?,
            port: args.get_int("port").and_then(|p| u16::try_from(p).ok()),
            implied_port: args.get_int("implied_port").unwrap_or(0) != 0,
            token: args.get_bytes("token").map(<[u8]>::to_vec).unwrap_or_default(),
        }),
        other => Err(GrapefruitError::MethodUnknown {
            method: String::from_utf8_lossy(other).into_owned(),
            transaction_id: transaction_id.to_vec(),
        }),
    }
}

fn parse_response(r: &Value) -> Result<Response, GrapefruitError> {
    if r.as_dict().is_none() {
        return Err(krpc_err("response body is not a dictionary"));
    }
    let id = match r.get_bytes("id") {
        Some(b) => Some(Id20::from_bytes(b)?),
        None => None,
    };
    let nodes = r.get_bytes("nodes").map(decode_nodes).unwrap_or_default();
    let values = r
        .get("values")
        .and_then(Value::as_list)
        .map(|list| decode_peers(list.iter().filter_map(Value::as_bytes)))
        .unwrap_or_default();
    let token = r.get_bytes("token").map(<[u8]>::to_vec);

    Ok(Response { id, nodes, values, token })
}

fn required_id(args: &Value, key: &str) -> Result<Id20, GrapefruitError> {
    let bytes = args
        .get_bytes(key)
        .ok_or_else(|| krpc_err(&format!("missing {}", key)))?;
    Id20::from_bytes(bytes)
}

fn id_value(id: &Id20) -> Value {
    Value::bytes(id.as_bytes().to_vec())
}

fn krpc_err(reason: &str) -> GrapefruitError {
    GrapefruitError::Krpc { reason: reason.to_string() }
}

/// Random transaction id for fire-and-forget queries.
pub fn random_transaction_id() -> Vec<u8> {
    let mut t = vec![0u8; 2];
    rand::thread_rng().fill_bytes(&mut t);
    t
}

#[cfg(test)]
mod tests {
    use super::*;
    use grapefruit_models::krpc_code;
    use std::net::Ipv4Addr;

    #[test]
    fn test_ping_wire_format() {
        let id = Id20::new([b'a'; 20]);
        let msg = Message::query(b"aa".to_vec(), Query::Ping { id });
        assert_eq!(
            msg.to_bytes(),
            b"d1:ad2:id20:aaaaaaaaaaaaaaaaaaaae1:q4:ping1:t2:aa1:y1:qe".to_vec()
        );
    }

    #[test]
    fn test_parse_get_peers_response_with_values() {
        let peer = SocketAddrV4::new(Ipv4Addr::new(1, 2, 3, 4), 6881);
        let resp = Response::new(Id20::new([9; 20]))
            .with_values(vec![peer])
            .with_token(b"tok".to_vec());
        let bytes = Message::response(b"xy".to_vec(), resp).to_bytes();

        let parsed = Message::from_bytes(&bytes).unwrap();
        match parsed.body {
            Body::Response(r) => {
                assert_eq!(r.values, vec![peer]);
                assert!(r.nodes.is_empty());
                assert_eq!(r.token.as_deref(), Some(&b"tok"[..]));
            }
            other => panic!("unexpected body {:?}", other),
        }
    }

    #[test]
    fn test_unknown_method_keeps_transaction_id() {
        let raw = b"d1:ad2:id20:aaaaaaaaaaaaaaaaaaaae1:q4:vote1:t2:zz1:y1:qe";
        match Message::from_bytes(raw) {
            Err(GrapefruitError::MethodUnknown { method, transaction_id }) => {
                assert_eq!(method, "vote");
                assert_eq!(transaction_id, b"zz".to_vec());
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_unknown_method_wins_over_bad_arguments() {
        for raw in [&b"d1:ad2:id3:abce1:q4:vote1:t2:zz1:y1:qe"[..], &b"d1:q4:vote1:t2:zz1:y1:qe"[..]] {
            match Message::from_bytes(raw) {
                Err(e @ GrapefruitError::MethodUnknown { .. }) => assert_eq!(e.krpc_code(), krpc_code::METHOD_UNKNOWN),
                other => panic!("unexpected result {:?}", other),
            }
        }
    }

    #[test]
    fn test_query_with_short_id_is_rejected() {
        let raw = b"d1:ad2:id3:abce1:q4:ping1:t2:aa1:y1:qe";
        assert!(Message::from_bytes(raw).is_err());
    }

    #[test]
    fn test_error_message() {
        let raw = b"d1:eli202e12:Server Errore1:t2:aa1:y1:ee";
        let msg = Message::from_bytes(raw).unwrap();
        assert_eq!(msg.body, Body::Error { code: 202, message: "Server Error".into() });
        assert_eq!(msg.to_bytes(), raw.to_vec());
    }

    #[test]
    fn test_announce_peer_fields() {
        let raw = b"d1:ad2:id20:aaaaaaaaaaaaaaaaaaaa12:implied_porti1e9:info_hash20:bbbbbbbbbbbbbbbbbbbb4:porti6881e5:token2:tke1:q13:announce_peer1:t2:aa1:y1:qe";
        let msg = Message::from_bytes(raw).unwrap();
        match msg.body {
            Body::Query(Query::AnnouncePeer { port, implied_port, token, .. }) => {
                assert_eq!(port, Some(6881));
                assert!(implied_port);
                assert_eq!(token, b"tk".to_vec());
            }
            other => panic!("unexpected body {:?}", other),
        }
    }
}
