use std::net::{Ipv4Addr, SocketAddrV4};

use grapefruit_krpc::{Body, Message, Query, Response};
use grapefruit_models::{GrapefruitError, Id20, Node};

fn node(last: u8) -> Node {
    let mut id = [0u8; 20];
    id[19] = last;
    Node::new(Id20::new(id), SocketAddrV4::new(Ipv4Addr::new(192, 168, 0, last), 6000 + last as u16))
}

#[test]
fn find_node_response_carries_compact_nodes() {
    let nodes = vec![node(1), node(2), node(3)];
    let msg = Message::response(b"t1".to_vec(), Response::new(Id20::new([7; 20])).with_nodes(nodes.clone()));
    let parsed = Message::from_bytes(&msg.to_bytes()).unwrap();

    assert_eq!(parsed.transaction_id, b"t1".to_vec());
    match parsed.body {
        Body::Response(r) => {
            assert_eq!(r.id, Some(Id20::new([7; 20])));
            assert_eq!(r.nodes, nodes);
        }
        other => panic!("expected response, got {:?}", other),
    }
}

#[test]
fn empty_find_node_response_still_has_nodes_key() {
    let msg = Message::response(b"t1".to_vec(), Response::new(Id20::new([7; 20])));
    let value = msg.to_value();
    assert_eq!(value.get("r").and_then(|r| r.get_bytes("nodes")), Some(&b""[..]));
}

#[test]
fn get_peers_query_roundtrips_through_wire() {
    let query = Query::GetPeers { id: Id20::new([1; 20]), info_hash: Id20::new([2; 20]) };
    let msg = Message::query(vec![0, 0, 0, 5], query.clone());
    let parsed = Message::from_bytes(&msg.to_bytes()).unwrap();

    assert_eq!(parsed.transaction_id, vec![0, 0, 0, 5]);
    assert_eq!(parsed.body, Body::Query(query));
}

#[test]
fn error_reply_uses_krpc_codes() {
    let e = GrapefruitError::InternalError { reason: "store offline".into() };
    let msg = Message::error_for(b"aa".to_vec(), &e);
    assert_eq!(msg.body, Body::Error { code: 202, message: "Server Error".into() });
}

#[test]
fn non_dictionary_payload_is_rejected() {
    assert!(Message::from_bytes(b"li1ei2ee").is_err());
    assert!(Message::from_bytes(b"not bencode").is_err());
    assert!(Message::from_bytes(b"d1:t2:aa1:y1:xe").is_err());
}
