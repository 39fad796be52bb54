//! DNS request handler: authoritative responses for the configured zones,
//! built from the resource registry, with fallthrough to an optional next
//! handler.

use async_trait::async_trait;
use hickory_proto::op::{Header, MessageType, OpCode, ResponseCode};
use hickory_proto::rr::rdata::{A, AAAA, NS, SOA, TXT};
use hickory_proto::rr::{DNSClass, Name, RData, Record, RecordType};
use hickory_server::authority::MessageResponseBuilder;
use hickory_server::server::{Request, RequestHandler, ResponseHandler, ResponseInfo};
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use tracing::{debug, error, trace};

use crate::config::DnsConfig;
use crate::hostname::split255;
use crate::kubernetes::SyncFlag;
use crate::metrics::{self, QueryOutcome, Timer};
use crate::query::{index_key_sets, matching_addresses};
use crate::registry::{AddressBundle, Registry};

/// SOA serial; static because zone content is derived, not versioned.
pub const SOA_SERIAL: u32 = 1_499_347_823;
const SOA_REFRESH: i32 = 7200;
const SOA_RETRY: i32 = 1800;
const SOA_EXPIRE: i32 = 86400;
const SOA_MINIMUM: u32 = 5;

/// Override hook yielding the server's own addresses for a zone, used to
/// fill the additional section of apex NS answers. The default derives them
/// from the per-kind lookups on the apex label.
pub type ExternalAddrFn = dyn Fn(&str) -> Vec<IpAddr> + Send + Sync;

/// Terminates a handler chain: answers SERVFAIL for everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoNextHandler;

#[async_trait]
impl RequestHandler for NoNextHandler {
    async fn handle_request<R: ResponseHandler>(
        &self,
        request: &Request,
        mut response_handle: R,
    ) -> ResponseInfo {
        let response = MessageResponseBuilder::from_message_request(request);
        let mut header = Header::response_from_request(request.header());
        header.set_response_code(ResponseCode::ServFail);
        match response_handle
            .send_response(response.build_no_records(header))
            .await
        {
            Ok(info) => info,
            Err(err) => {
                error!(%err, "failed to send a response");
                header.into()
            }
        }
    }
}

struct Reply {
    rcode: ResponseCode,
    answers: Vec<Record>,
    authorities: Vec<Record>,
    additionals: Vec<Record>,
}

impl Reply {
    fn new() -> Self {
        Self {
            rcode: ResponseCode::NoError,
            answers: Vec::new(),
            authorities: Vec::new(),
            additionals: Vec::new(),
        }
    }
}

/// Authoritative handler over the hostname indexes of the resource
/// registry.
pub struct DnsHandler<N = NoNextHandler> {
    zones: Vec<String>,
    registry: Arc<Registry>,
    sync_flag: SyncFlag,
    fallthrough_zones: Vec<String>,
    apex: String,
    second_ns: Option<String>,
    hostmaster: String,
    ttl: u32,
    ttl_soa: u32,
    external_addrs: Option<Box<ExternalAddrFn>>,
    next: Option<N>,
}

impl DnsHandler<NoNextHandler> {
    /// Creates a handler without a next handler; unanswered out-of-zone and
    /// fallthrough queries then fail with SERVFAIL.
    pub fn new(config: &DnsConfig, registry: Arc<Registry>, sync_flag: SyncFlag) -> Self {
        Self {
            zones: config
                .zones
                .iter()
                .map(|z| crate::config::normalize_zone(z))
                .collect(),
            registry,
            sync_flag,
            fallthrough_zones: config
                .fallthrough_zones
                .iter()
                .map(|z| crate::config::normalize_zone(z))
                .collect(),
            apex: config.apex.clone(),
            second_ns: config.second_ns.clone(),
            hostmaster: config.hostmaster.clone(),
            ttl: config.ttl,
            ttl_soa: config.ttl_soa,
            external_addrs: None,
            next: None,
        }
    }
}

impl<N: RequestHandler> DnsHandler<N> {
    /// Chains a next handler for out-of-zone and fallthrough queries.
    pub fn with_next<M: RequestHandler>(self, next: M) -> DnsHandler<M> {
        DnsHandler {
            zones: self.zones,
            registry: self.registry,
            sync_flag: self.sync_flag,
            fallthrough_zones: self.fallthrough_zones,
            apex: self.apex,
            second_ns: self.second_ns,
            hostmaster: self.hostmaster,
            ttl: self.ttl,
            ttl_soa: self.ttl_soa,
            external_addrs: self.external_addrs,
            next: Some(next),
        }
    }

    /// Overrides how the server's own addresses are obtained.
    pub fn with_external_addrs(mut self, f: Box<ExternalAddrFn>) -> Self {
        self.external_addrs = Some(f);
        self
    }

    fn match_zone(&self, qname: &str) -> Option<&str> {
        self.zones
            .iter()
            .map(String::as_str)
            .filter(|zone| name_within(qname, zone))
            .max_by_key(|zone| zone.len())
    }

    fn falls_through(&self, qname: &str) -> bool {
        self.fallthrough_zones
            .iter()
            .any(|zone| name_within(qname, zone))
    }

    // --- record construction ---

    fn a_records(&self, name: &Name, addrs: &[Ipv4Addr], ttl: u32) -> Vec<Record> {
        let mut seen = HashSet::new();
        addrs
            .iter()
            .filter(|ip| seen.insert(**ip))
            .map(|ip| in_record(name.clone(), ttl, RData::A(A::from(*ip))))
            .collect()
    }

    fn aaaa_records(&self, name: &Name, addrs: &[Ipv6Addr], ttl: u32) -> Vec<Record> {
        let mut seen = HashSet::new();
        addrs
            .iter()
            .filter(|ip| seen.insert(**ip))
            .map(|ip| in_record(name.clone(), ttl, RData::AAAA(AAAA::from(*ip))))
            .collect()
    }

    fn txt_records(&self, name: &Name, values: &[String]) -> Vec<Record> {
        let mut seen = HashSet::new();
        values
            .iter()
            .filter(|value| seen.insert((*value).clone()))
            .map(|value| in_record(name.clone(), self.ttl, RData::TXT(TXT::new(split255(value)))))
            .collect()
    }

    fn soa(&self, zone: &str) -> Record {
        let owner = Name::from_ascii(zone).unwrap_or_else(|_| Name::root());
        let mname =
            Name::from_ascii(format!("{}.{}", self.apex, zone)).unwrap_or_else(|_| Name::root());
        let rname = Name::from_ascii(format!("{}.{}", self.hostmaster, zone))
            .unwrap_or_else(|_| Name::root());
        let soa = SOA::new(
            mname,
            rname,
            SOA_SERIAL,
            SOA_REFRESH,
            SOA_RETRY,
            SOA_EXPIRE,
            SOA_MINIMUM,
        );
        in_record(owner, self.ttl_soa, RData::SOA(soa))
    }

    fn ns_records(&self, zone: &str) -> Vec<Record> {
        let Ok(owner) = Name::from_ascii(zone) else {
            return Vec::new();
        };

        let mut records = Vec::new();
        let labels = std::iter::once(&self.apex).chain(self.second_ns.iter());
        for label in labels {
            if let Ok(target) = Name::from_ascii(format!("{label}.{zone}")) {
                records.push(in_record(
                    owner.clone(),
                    self.ttl_soa,
                    RData::NS(NS(target)),
                ));
            }
        }
        records
    }

    /// Merges the bundles of every registry entry for one index key. Unlike
    /// query resolution, self-address lookups combine all kinds.
    async fn lookup_all(&self, key: &str) -> AddressBundle {
        let keys = vec![key.to_string()];
        let mut bundle = AddressBundle::default();
        for entry in self.registry.entries() {
            bundle.merge(entry.lookup.lookup(&keys).await);
        }
        bundle
    }

    /// A/AAAA records for the server itself, named under the apex label
    /// (plus the second NS label for NS answers).
    async fn self_address_records(&self, zone: &str, include_second_ns: bool) -> Vec<Record> {
        let apex_name = match Name::from_ascii(format!("{}.{}", self.apex, zone)) {
            Ok(name) => name,
            Err(err) => {
                debug!(%err, "apex label does not form a valid name");
                return Vec::new();
            }
        };

        if let Some(external) = &self.external_addrs {
            let mut bundle = AddressBundle::default();
            for ip in external(zone) {
                bundle.push_ip(ip);
            }
            let mut records = self.a_records(&apex_name, &bundle.a, self.ttl_soa);
            records.extend(self.aaaa_records(&apex_name, &bundle.aaaa, self.ttl_soa));
            return records;
        }

        let bundle = self.lookup_all(&self.apex).await;
        let mut records = self.a_records(&apex_name, &bundle.a, self.ttl_soa);
        records.extend(self.aaaa_records(&apex_name, &bundle.aaaa, self.ttl_soa));

        if include_second_ns {
            if let Some(second) = &self.second_ns {
                if let Ok(name) = Name::from_ascii(format!("{second}.{zone}")) {
                    let bundle = self.lookup_all(second).await;
                    records.extend(self.a_records(&name, &bundle.a, self.ttl_soa));
                    records.extend(self.aaaa_records(&name, &bundle.aaaa, self.ttl_soa));
                }
            }
        }

        records
    }

    // --- responders ---

    /// Answers for names under `<apex>.<zone>`: the server's own addresses.
    /// These never fall through.
    async fn sub_apex_reply(&self, name: &Name, qtype: RecordType, zone: &str) -> Reply {
        let mut reply = Reply::new();
        match qtype {
            RecordType::A => {
                let bundle = self.lookup_all(&self.apex).await;
                if bundle.a.is_empty() {
                    reply.authorities.push(self.soa(zone));
                } else {
                    reply.answers = self.a_records(name, &bundle.a, self.ttl);
                }
            }
            RecordType::AAAA => {
                let bundle = self.lookup_all(&self.apex).await;
                if bundle.aaaa.is_empty() {
                    reply.authorities.push(self.soa(zone));
                } else {
                    reply.answers = self.aaaa_records(name, &bundle.aaaa, self.ttl);
                }
            }
            RecordType::NS => {
                reply.answers = self.ns_records(zone);
                reply.additionals = self.self_address_records(zone, true).await;
            }
            RecordType::SOA => reply.answers.push(self.soa(zone)),
            _ => reply.authorities.push(self.soa(zone)),
        }
        reply
    }

    /// Builds the reply for an in-zone query from the engine's bundle,
    /// following authoritative zone semantics.
    async fn zone_reply(
        &self,
        name: &Name,
        qtype: RecordType,
        zone: &str,
        is_apex: bool,
        bundle: &AddressBundle,
    ) -> Reply {
        let mut reply = Reply::new();
        match qtype {
            RecordType::A => {
                if bundle.a.is_empty() {
                    if !is_apex {
                        reply.rcode = ResponseCode::NXDomain;
                    }
                    reply.authorities.push(self.soa(zone));
                } else {
                    reply.answers = self.a_records(name, &bundle.a, self.ttl);
                }
            }
            RecordType::AAAA => {
                if bundle.aaaa.is_empty() {
                    if !is_apex {
                        reply.rcode = ResponseCode::NXDomain;
                    }
                    // RFC 4074 section 3: a name with A records must not
                    // answer AAAA with NXDOMAIN.
                    if !bundle.a.is_empty() {
                        reply.rcode = ResponseCode::NoError;
                    }
                    reply.authorities.push(self.soa(zone));
                } else {
                    reply.answers = self.aaaa_records(name, &bundle.aaaa, self.ttl);
                }
            }
            RecordType::TXT => {
                if bundle.txt.is_empty() {
                    if !is_apex {
                        reply.rcode = ResponseCode::NXDomain;
                    }
                    reply.authorities.push(self.soa(zone));
                } else {
                    reply.answers = self.txt_records(name, &bundle.txt);
                }
            }
            RecordType::SOA => reply.answers.push(self.soa(zone)),
            RecordType::NS => {
                if is_apex {
                    reply.answers = self.ns_records(zone);
                    reply.additionals = self.self_address_records(zone, true).await;
                } else {
                    reply.authorities.push(self.soa(zone));
                }
            }
            _ => reply.authorities.push(self.soa(zone)),
        }
        reply
    }

    // --- response plumbing ---

    async fn send_reply<R: ResponseHandler>(
        &self,
        request: &Request,
        mut response_handle: R,
        reply: Reply,
    ) -> ResponseInfo {
        let response = MessageResponseBuilder::from_message_request(request);
        let mut header = Header::response_from_request(request.header());
        // Forced on to keep legacy glibc getaddrinfo happy.
        header.set_authoritative(true);
        header.set_recursion_available(false);
        header.set_response_code(reply.rcode);

        let message = response.build(
            header,
            reply.answers.iter(),
            reply.authorities.iter(),
            std::iter::empty(),
            reply.additionals.iter(),
        );

        match response_handle.send_response(message).await {
            Ok(info) => info,
            Err(err) => {
                // The handler promised a reply; a failed write is logged and
                // otherwise swallowed.
                error!(%err, "failed to send a response");
                header.into()
            }
        }
    }

    async fn serve_failed<R: ResponseHandler>(
        &self,
        request: &Request,
        mut response_handle: R,
        rcode: ResponseCode,
    ) -> ResponseInfo {
        let response = MessageResponseBuilder::from_message_request(request);
        let mut header = Header::response_from_request(request.header());
        header.set_authoritative(true);
        header.set_response_code(rcode);
        match response_handle
            .send_response(response.build_no_records(header))
            .await
        {
            Ok(info) => info,
            Err(err) => {
                error!(%err, "failed to send a response");
                header.into()
            }
        }
    }

    async fn next_or_fail<R: ResponseHandler>(
        &self,
        request: &Request,
        response_handle: R,
    ) -> ResponseInfo {
        match &self.next {
            Some(next) => next.handle_request(request, response_handle).await,
            None => {
                debug!("no next handler configured");
                self.serve_failed(request, response_handle, ResponseCode::ServFail)
                    .await
            }
        }
    }
}

#[async_trait]
impl<N: RequestHandler> RequestHandler for DnsHandler<N> {
    async fn handle_request<R: ResponseHandler>(
        &self,
        request: &Request,
        response_handle: R,
    ) -> ResponseInfo {
        if request.message_type() != MessageType::Query || request.op_code() != OpCode::Query {
            return self
                .serve_failed(request, response_handle, ResponseCode::Refused)
                .await;
        }

        let request_info = match request.request_info() {
            Ok(info) => info,
            Err(err) => {
                debug!(%err, "malformed query");
                return self
                    .serve_failed(request, response_handle, ResponseCode::FormErr)
                    .await;
            }
        };

        let timer = Timer::start();
        let query = request_info.query;
        let qtype = query.query_type();
        let qtype_str = format!("{qtype:?}");
        // Lowercased for index probing; the original spelling is preserved
        // in response names.
        let qname = query.name().to_string().to_ascii_lowercase();
        let name = query.original().name().clone();

        let Some(zone) = self.match_zone(&qname) else {
            debug!(qname = %qname, "request has not matched any zones");
            metrics::record_query(&qtype_str, QueryOutcome::Delegated, timer.elapsed());
            return self.next_or_fail(request, response_handle).await;
        };

        if !self.sync_flag.is_synced() {
            debug!("resource caches not synced, returning SERVFAIL");
            metrics::record_query(&qtype_str, QueryOutcome::NotReady, timer.elapsed());
            return self
                .serve_failed(request, response_handle, ResponseCode::ServFail)
                .await;
        }

        let is_apex = qname == zone;
        let sub_apex = format!("{}.{}", self.apex, zone);
        if !is_apex && name_within(&qname, &sub_apex) {
            trace!(qname = %qname, "answering from the sub-apex responder");
            let reply = self.sub_apex_reply(&name, qtype, zone).await;
            let outcome = reply_outcome(&reply);
            metrics::record_query(&qtype_str, outcome, timer.elapsed());
            return self.send_reply(request, response_handle, reply).await;
        }

        let key_sets = index_key_sets(&qname, zone);
        trace!(qname = %qname, key_sets = ?key_sets, "computed index key sets");

        let bundle = matching_addresses(&self.registry, &key_sets).await;
        debug!(qname = %qname, a = bundle.a.len(), aaaa = bundle.aaaa.len(), txt = bundle.txt.len(), "computed response addresses");

        if bundle.is_empty() && self.falls_through(&qname) {
            metrics::record_query(&qtype_str, QueryOutcome::Delegated, timer.elapsed());
            return self.next_or_fail(request, response_handle).await;
        }

        let reply = self.zone_reply(&name, qtype, zone, is_apex, &bundle).await;
        if !reply.answers.is_empty() {
            metrics::record_answer_size(&qtype_str, reply.answers.len());
        }
        metrics::record_query(&qtype_str, reply_outcome(&reply), timer.elapsed());
        self.send_reply(request, response_handle, reply).await
    }
}

fn reply_outcome(reply: &Reply) -> QueryOutcome {
    if !reply.answers.is_empty() {
        QueryOutcome::Answered
    } else if reply.rcode == ResponseCode::NXDomain {
        QueryOutcome::NxDomain
    } else {
        QueryOutcome::NoData
    }
}

fn in_record(name: Name, ttl: u32, rdata: RData) -> Record {
    let mut record = Record::from_rdata(name, ttl, rdata);
    record.set_dns_class(DNSClass::IN);
    record
}

/// Whether `name` equals `ancestor` or sits below it. Both are lowercase
/// and fully qualified.
fn name_within(name: &str, ancestor: &str) -> bool {
    if ancestor == "." {
        return true;
    }
    name == ancestor
        || name
            .strip_suffix(ancestor)
            .is_some_and(|head| head.ends_with('.'))
}
