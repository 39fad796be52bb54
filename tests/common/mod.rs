//! Shared test infrastructure for resolution integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use hickory_proto::op::{Header, Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::{DNSClass, Name, RData, RecordType};
use hickory_proto::serialize::binary::{BinDecodable, BinDecoder, BinEncoder};
use hickory_server::authority::{MessageRequest, MessageResponse, MessageResponseBuilder};
use hickory_server::proto::rr::Record;
use hickory_server::proto::xfer::Protocol;
use hickory_server::server::{Request, RequestHandler, ResponseHandler, ResponseInfo};

use kube_gateway_dns::config::DnsConfig;
use kube_gateway_dns::handler::DnsHandler;
use kube_gateway_dns::kubernetes::SyncFlag;
use kube_gateway_dns::registry::{AddressBundle, Lookup, Registry, ResourceKind};

// --- Constants ---

pub const ZONE: &str = "example.com.";
pub const APEX: &str = "dns1.kube-system";

// --- TestResponseHandler ---

/// Captures the serialized DNS response for inspection in tests.
///
/// Implements `ResponseHandler` so it can be passed to
/// `DnsHandler::handle_request()`. The response is serialized via
/// `MessageResponse::destructive_emit()` and stored as raw wire-format
/// bytes, which can then be parsed with `Message::from_vec()`.
#[derive(Clone)]
pub struct TestResponseHandler {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl TestResponseHandler {
    pub fn new() -> Self {
        Self {
            buf: Arc::new(Mutex::new(Vec::with_capacity(512))),
        }
    }

    /// Parse the captured wire bytes into a `Message` for assertions.
    pub fn into_message(self) -> Message {
        let buf = self.buf.lock().unwrap();
        assert!(!buf.is_empty(), "no response was captured");
        Message::from_vec(&buf).expect("failed to parse captured DNS response")
    }
}

#[async_trait]
impl ResponseHandler for TestResponseHandler {
    async fn send_response<'a>(
        &mut self,
        response: MessageResponse<
            '_,
            'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
        >,
    ) -> io::Result<ResponseInfo> {
        let mut buf = self.buf.lock().unwrap();
        buf.clear();
        let mut encoder = BinEncoder::new(&mut *buf);
        encoder.set_max_size(u16::MAX);
        let info = response
            .destructive_emit(&mut encoder)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        Ok(info)
    }
}

// --- Next handler probe ---

/// Records how often the query fell through to it and answers NOERROR with
/// no records.
#[derive(Clone, Default)]
pub struct NextProbe {
    hits: Arc<AtomicUsize>,
}

impl NextProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RequestHandler for NextProbe {
    async fn handle_request<R: ResponseHandler>(
        &self,
        request: &Request,
        mut response_handle: R,
    ) -> ResponseInfo {
        self.hits.fetch_add(1, Ordering::SeqCst);
        let response = MessageResponseBuilder::from_message_request(request);
        let header = Header::response_from_request(request.header());
        match response_handle
            .send_response(response.build_no_records(header))
            .await
        {
            Ok(info) => info,
            Err(_) => header.into(),
        }
    }
}

// --- Static lookups ---

/// Lookup answering from a fixed hostname table, merging the bundles of
/// every key that matches.
pub struct StaticLookup(HashMap<String, AddressBundle>);

impl StaticLookup {
    pub fn new(entries: Vec<(&str, AddressBundle)>) -> Arc<Self> {
        Arc::new(Self(
            entries
                .into_iter()
                .map(|(host, bundle)| (host.to_string(), bundle))
                .collect(),
        ))
    }
}

#[async_trait]
impl Lookup for StaticLookup {
    async fn lookup(&self, keys: &[String]) -> AddressBundle {
        let mut result = AddressBundle::default();
        for key in keys {
            if let Some(bundle) = self.0.get(&key.to_ascii_lowercase()) {
                result.merge(bundle.clone());
            }
        }
        result
    }
}

pub fn bundle(a: &[&str], aaaa: &[&str], txt: &[&str]) -> AddressBundle {
    AddressBundle {
        a: a.iter().map(|ip| ip.parse().unwrap()).collect(),
        aaaa: aaaa.iter().map(|ip| ip.parse().unwrap()).collect(),
        txt: txt.iter().map(|s| s.to_string()).collect(),
    }
}

/// Registry with the full catalog in default order and fixed per-kind
/// tables covering every test scenario.
pub fn build_registry() -> Arc<Registry> {
    let mut registry = Registry::from_names(&[
        "HTTPRoute",
        "TLSRoute",
        "GRPCRoute",
        "Ingress",
        "Service",
        "DNSEndpoint",
    ]);

    let routes = StaticLookup::new(vec![
        ("domain.gw.example.com", bundle(&["192.0.2.1"], &[], &[])),
        ("shadow.example.com", bundle(&["192.0.2.4"], &[], &[])),
    ]);
    registry.set_lookup(ResourceKind::HttpRoute, routes.clone());
    registry.set_lookup(ResourceKind::TlsRoute, routes.clone());
    registry.set_lookup(ResourceKind::GrpcRoute, routes);

    registry.set_lookup(
        ResourceKind::Ingress,
        StaticLookup::new(vec![
            ("domain.example.com", bundle(&["192.0.0.1"], &[], &[])),
            ("svc2.ns1.example.com", bundle(&["192.0.0.2"], &[], &[])),
            ("example.com", bundle(&["192.0.0.3"], &[], &[])),
            ("shadow.example.com", bundle(&["192.0.0.4"], &[], &[])),
            ("*.wildcard.example.com", bundle(&["192.0.0.6"], &[], &[])),
            (
                "specific-subdomain.wildcard.example.com",
                bundle(&["192.0.0.7"], &[], &[]),
            ),
            ("both.example.com", bundle(&["192.0.0.8"], &[], &[])),
            (
                "dup.example.com",
                bundle(&["192.0.0.9", "192.0.0.9"], &[], &[]),
            ),
        ]),
    );

    registry.set_lookup(
        ResourceKind::Service,
        StaticLookup::new(vec![
            (
                "svc1.ns1",
                bundle(
                    &["192.0.1.1", "192.0.1.2"],
                    &["fd12:3456:789a:1::"],
                    &[],
                ),
            ),
            ("svc2.ns1", bundle(&["192.0.1.3"], &[], &[])),
            ("dns1.kube-system", bundle(&["192.0.1.53"], &[], &[])),
        ]),
    );

    let big_txt = "t".repeat(300);
    registry.set_lookup(
        ResourceKind::DnsEndpoint,
        StaticLookup::new(vec![
            ("domain.endpoint.example.com", bundle(&["192.0.4.1"], &[], &[])),
            (
                "endpoint.example.com",
                bundle(&["192.0.4.4"], &[], &["challenge"]),
            ),
            ("both.example.com", bundle(&[], &["fd00::8"], &[])),
            (
                "big.endpoint.example.com",
                bundle(&[], &[], &[big_txt.as_str()]),
            ),
        ]),
    );

    Arc::new(registry)
}

// --- Config and handler builders ---

pub fn test_dns_config() -> DnsConfig {
    DnsConfig {
        listen_addr: "127.0.0.1:5353".parse().unwrap(),
        zones: vec![ZONE.to_string()],
        resources: vec![
            "HTTPRoute".to_string(),
            "TLSRoute".to_string(),
            "GRPCRoute".to_string(),
            "Ingress".to_string(),
            "Service".to_string(),
            "DNSEndpoint".to_string(),
        ],
        ttl: 60,
        ttl_soa: 60,
        apex: APEX.to_string(),
        hostmaster: "hostmaster".to_string(),
        second_ns: None,
        ingress_classes: Vec::new(),
        gateway_classes: Vec::new(),
        fallthrough_zones: Vec::new(),
        kubeconfig: None,
        kube_context: None,
        sync_timeout_secs: 60,
    }
}

pub fn synced_flag() -> SyncFlag {
    let flag = SyncFlag::new();
    flag.mark_synced();
    flag
}

/// Handler without a next handler, serving the static registry.
pub fn build_handler() -> DnsHandler {
    DnsHandler::new(&test_dns_config(), build_registry(), synced_flag())
}

/// Handler whose caches have not synced yet.
pub fn build_unsynced_handler() -> DnsHandler {
    DnsHandler::new(&test_dns_config(), build_registry(), SyncFlag::new())
}

/// Handler chained to a [`NextProbe`], with the given fallthrough zones.
pub fn build_handler_with_next(fallthrough_zones: &[&str]) -> (DnsHandler<NextProbe>, NextProbe) {
    let mut config = test_dns_config();
    config.fallthrough_zones = fallthrough_zones.iter().map(|z| z.to_string()).collect();
    let probe = NextProbe::new();
    let handler =
        DnsHandler::new(&config, build_registry(), synced_flag()).with_next(probe.clone());
    (handler, probe)
}

// --- Query/Request construction ---

/// Build wire-format bytes for a DNS query.
pub fn build_query_bytes(name: &str, record_type: RecordType, id: u16) -> Vec<u8> {
    let mut msg = Message::new();
    msg.set_id(id);
    msg.set_message_type(MessageType::Query);
    msg.set_op_code(OpCode::Query);
    msg.set_recursion_desired(true);
    let mut query = Query::new();
    query.set_name(Name::from_ascii(name).unwrap());
    query.set_query_type(record_type);
    query.set_query_class(DNSClass::IN);
    msg.add_query(query);
    msg.to_vec().unwrap()
}

/// Parse wire bytes into a MessageRequest.
pub fn parse_message_request(bytes: &[u8]) -> MessageRequest {
    let mut decoder = BinDecoder::new(bytes);
    MessageRequest::read(&mut decoder).expect("failed to parse MessageRequest")
}

/// Build a full `Request` for a UDP query.
pub fn build_request(name: &str, record_type: RecordType, id: u16) -> Request {
    let src: SocketAddr = "127.0.0.1:12345".parse().unwrap();
    let bytes = build_query_bytes(name, record_type, id);
    let msg = parse_message_request(&bytes);
    Request::new(msg, src, Protocol::Udp)
}

// --- Response helpers ---

/// Execute a query through the handler and return the parsed response.
pub async fn execute_query<N: RequestHandler>(
    handler: &DnsHandler<N>,
    name: &str,
    record_type: RecordType,
) -> Message {
    let request = build_request(name, record_type, 42);
    let response_handle = TestResponseHandler::new();
    handler.handle_request(&request, response_handle.clone()).await;
    response_handle.into_message()
}

/// Extract A addresses from a response, sorted.
pub fn extract_a_ips(msg: &Message) -> Vec<Ipv4Addr> {
    let mut ips: Vec<Ipv4Addr> = msg
        .answers()
        .iter()
        .filter_map(|r| match r.data() {
            RData::A(a) => Some(Ipv4Addr::from(*a)),
            _ => None,
        })
        .collect();
    ips.sort();
    ips
}

/// Extract AAAA addresses from a response, sorted.
pub fn extract_aaaa_ips(msg: &Message) -> Vec<Ipv6Addr> {
    let mut ips: Vec<Ipv6Addr> = msg
        .answers()
        .iter()
        .filter_map(|r| match r.data() {
            RData::AAAA(aaaa) => Some(Ipv6Addr::from(*aaaa)),
            _ => None,
        })
        .collect();
    ips.sort();
    ips
}

/// Assert response code.
pub fn assert_response_code(msg: &Message, expected: ResponseCode) {
    assert_eq!(
        msg.response_code(),
        expected,
        "expected {:?}, got {:?}",
        expected,
        msg.response_code()
    );
}

/// Assert the response is authoritative; every response must be.
pub fn assert_authoritative(msg: &Message) {
    assert!(
        msg.header().authoritative(),
        "response is not authoritative"
    );
}

/// Assert a successful response carrying exactly the expected A records.
pub fn assert_a_response(msg: &Message, name: &str, expected_ips: &[&str]) {
    assert_response_code(msg, ResponseCode::NoError);
    assert_authoritative(msg);

    let mut expected: Vec<Ipv4Addr> = expected_ips.iter().map(|ip| ip.parse().unwrap()).collect();
    expected.sort();
    assert_eq!(extract_a_ips(msg), expected, "A records mismatch");

    let expected_name = Name::from_ascii(name).unwrap();
    for record in msg.answers() {
        assert_eq!(record.name(), &expected_name);
        assert_eq!(record.ttl(), 60);
    }
}

/// Assert the authority section carries the zone SOA.
pub fn assert_soa_authority(msg: &Message) {
    let soas: Vec<_> = msg
        .name_servers()
        .iter()
        .filter_map(|r| match r.data() {
            RData::SOA(soa) => Some(soa),
            _ => None,
        })
        .collect();
    assert_eq!(soas.len(), 1, "expected exactly one SOA in authority");
    let soa = soas[0];
    assert_eq!(soa.serial(), 1_499_347_823);
    assert_eq!(soa.refresh(), 7200);
    assert_eq!(soa.retry(), 1800);
    assert_eq!(soa.expire(), 86400);
    assert_eq!(soa.minimum(), 5);
    assert_eq!(
        soa.mname(),
        &Name::from_ascii("dns1.kube-system.example.com.").unwrap()
    );
}
