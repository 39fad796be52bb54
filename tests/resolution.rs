//! End-to-end resolution tests: queries flow through the handler, get
//! serialized to wire format, and are parsed back for assertions.

mod common;

use common::*;
use hickory_proto::op::ResponseCode;
use hickory_proto::rr::{Name, RData, RecordType};

#[tokio::test]
async fn test_service_a_records() {
    let handler = build_handler();
    let msg = execute_query(&handler, "svc1.ns1.example.com.", RecordType::A).await;
    assert_a_response(&msg, "svc1.ns1.example.com.", &["192.0.1.1", "192.0.1.2"]);
}

#[tokio::test]
async fn test_service_aaaa_record() {
    let handler = build_handler();
    let msg = execute_query(&handler, "svc1.ns1.example.com.", RecordType::AAAA).await;
    assert_response_code(&msg, ResponseCode::NoError);
    assert_authoritative(&msg);
    assert_eq!(
        extract_aaaa_ips(&msg),
        vec!["fd12:3456:789a:1::".parse::<std::net::Ipv6Addr>().unwrap()]
    );
}

#[tokio::test]
async fn test_ingress_a_record() {
    let handler = build_handler();
    let msg = execute_query(&handler, "domain.example.com.", RecordType::A).await;
    assert_a_response(&msg, "domain.example.com.", &["192.0.0.1"]);
}

#[tokio::test]
async fn test_mixed_case_query_resolves() {
    let handler = build_handler();
    let msg = execute_query(&handler, "dOmAiN.eXamPLe.cOm.", RecordType::A).await;
    assert_a_response(&msg, "domain.example.com.", &["192.0.0.1"]);

    let msg = execute_query(&handler, "svC1.Ns1.exAmplE.Com.", RecordType::A).await;
    assert_a_response(&msg, "svc1.ns1.example.com.", &["192.0.1.1", "192.0.1.2"]);
}

#[tokio::test]
async fn test_ingress_takes_precedence_over_service() {
    // svc2.ns1 is served by both kinds; Ingress is registered first.
    let handler = build_handler();
    let msg = execute_query(&handler, "svc2.ns1.example.com.", RecordType::A).await;
    assert_a_response(&msg, "svc2.ns1.example.com.", &["192.0.0.2"]);
}

#[tokio::test]
async fn test_route_takes_precedence_over_ingress() {
    let handler = build_handler();
    let msg = execute_query(&handler, "shadow.example.com.", RecordType::A).await;
    assert_a_response(&msg, "shadow.example.com.", &["192.0.2.4"]);
}

#[tokio::test]
async fn test_gateway_route_lookup() {
    let handler = build_handler();
    let msg = execute_query(&handler, "domain.gw.example.com.", RecordType::A).await;
    assert_a_response(&msg, "domain.gw.example.com.", &["192.0.2.1"]);
}

#[tokio::test]
async fn test_unknown_name_is_nxdomain_with_soa() {
    let handler = build_handler();
    let msg = execute_query(&handler, "svcx.ns1.example.com.", RecordType::A).await;
    assert_response_code(&msg, ResponseCode::NXDomain);
    assert_authoritative(&msg);
    assert!(msg.answers().is_empty());
    assert_soa_authority(&msg);
}

#[tokio::test]
async fn test_existing_name_wrong_type_is_noerror() {
    // CNAME is not a served type: the reply is NOERROR with the SOA in
    // authority even though the bundle is empty.
    let handler = build_handler();
    let msg = execute_query(&handler, "svc3.ns1.example.com.", RecordType::CNAME).await;
    assert_response_code(&msg, ResponseCode::NoError);
    assert_soa_authority(&msg);
}

#[tokio::test]
async fn test_apex_a_record() {
    let handler = build_handler();
    let msg = execute_query(&handler, "example.com.", RecordType::A).await;
    assert_a_response(&msg, "example.com.", &["192.0.0.3"]);
}

#[tokio::test]
async fn test_apex_aaaa_is_noerror() {
    // No AAAA at the apex: NOERROR (not NXDOMAIN) with SOA in authority.
    let handler = build_handler();
    let msg = execute_query(&handler, "example.com.", RecordType::AAAA).await;
    assert_response_code(&msg, ResponseCode::NoError);
    assert!(msg.answers().is_empty());
    assert_soa_authority(&msg);
}

#[tokio::test]
async fn test_aaaa_with_only_a_records_is_noerror() {
    // RFC 4074 section 3: a name with A records answers AAAA with NOERROR.
    let handler = build_handler();
    let msg = execute_query(&handler, "svc2.ns1.example.com.", RecordType::AAAA).await;
    assert_response_code(&msg, ResponseCode::NoError);
    assert!(msg.answers().is_empty());
    assert_soa_authority(&msg);
}

#[tokio::test]
async fn test_a_only_bundle_settles_aaaa_before_later_kinds() {
    // Ingress holds A records for the name, DNSEndpoint holds AAAA. The
    // search stops at the first non-empty bundle, so the AAAA never
    // surfaces.
    let handler = build_handler();
    let msg = execute_query(&handler, "both.example.com.", RecordType::AAAA).await;
    assert_response_code(&msg, ResponseCode::NoError);
    assert!(msg.answers().is_empty());
    assert_soa_authority(&msg);
}

#[tokio::test]
async fn test_wildcard_fallback() {
    let handler = build_handler();
    let msg = execute_query(
        &handler,
        "not-explicitly-defined-label.wildcard.example.com.",
        RecordType::A,
    )
    .await;
    assert_a_response(
        &msg,
        "not-explicitly-defined-label.wildcard.example.com.",
        &["192.0.0.6"],
    );
}

#[tokio::test]
async fn test_specific_entry_beats_wildcard() {
    let handler = build_handler();
    let msg = execute_query(
        &handler,
        "specific-subdomain.wildcard.example.com.",
        RecordType::A,
    )
    .await;
    assert_a_response(
        &msg,
        "specific-subdomain.wildcard.example.com.",
        &["192.0.0.7"],
    );
}

#[tokio::test]
async fn test_dns_endpoint_a_and_txt() {
    let handler = build_handler();

    let msg = execute_query(&handler, "domain.endpoint.example.com.", RecordType::A).await;
    assert_a_response(&msg, "domain.endpoint.example.com.", &["192.0.4.1"]);

    let msg = execute_query(&handler, "endpoint.example.com.", RecordType::A).await;
    assert_a_response(&msg, "endpoint.example.com.", &["192.0.4.4"]);

    let msg = execute_query(&handler, "endpoint.example.com.", RecordType::TXT).await;
    assert_response_code(&msg, ResponseCode::NoError);
    assert_eq!(msg.answers().len(), 1);
    match msg.answers()[0].data() {
        RData::TXT(txt) => {
            assert_eq!(txt.txt_data(), &[Box::from("challenge".as_bytes())]);
        }
        other => panic!("expected TXT rdata, got {other:?}"),
    }
}

#[tokio::test]
async fn test_long_txt_value_is_chunked() {
    let handler = build_handler();
    let msg = execute_query(&handler, "big.endpoint.example.com.", RecordType::TXT).await;
    assert_response_code(&msg, ResponseCode::NoError);
    assert_eq!(msg.answers().len(), 1);
    match msg.answers()[0].data() {
        RData::TXT(txt) => {
            let chunks = txt.txt_data();
            assert_eq!(chunks.len(), 2);
            assert_eq!(chunks[0].len(), 255);
            assert_eq!(chunks[1].len(), 45);
        }
        other => panic!("expected TXT rdata, got {other:?}"),
    }
}

#[tokio::test]
async fn test_duplicate_addresses_answered_once() {
    let handler = build_handler();
    let msg = execute_query(&handler, "dup.example.com.", RecordType::A).await;
    assert_a_response(&msg, "dup.example.com.", &["192.0.0.9"]);
    assert_eq!(msg.answers().len(), 1);
}

#[tokio::test]
async fn test_soa_query() {
    let handler = build_handler();
    let msg = execute_query(&handler, "domain.example.com.", RecordType::SOA).await;
    assert_response_code(&msg, ResponseCode::NoError);
    assert_authoritative(&msg);
    assert_eq!(msg.answers().len(), 1);
    match msg.answers()[0].data() {
        RData::SOA(soa) => assert_eq!(soa.serial(), 1_499_347_823),
        other => panic!("expected SOA rdata, got {other:?}"),
    }
}

#[tokio::test]
async fn test_apex_ns_query_with_self_address_extra() {
    let handler = build_handler();
    let msg = execute_query(&handler, "example.com.", RecordType::NS).await;
    assert_response_code(&msg, ResponseCode::NoError);
    assert_authoritative(&msg);

    assert_eq!(msg.answers().len(), 1);
    match msg.answers()[0].data() {
        RData::NS(ns) => {
            assert_eq!(
                &ns.0,
                &Name::from_ascii("dns1.kube-system.example.com.").unwrap()
            );
        }
        other => panic!("expected NS rdata, got {other:?}"),
    }

    let extra_a: Vec<_> = msg
        .additionals()
        .iter()
        .filter_map(|r| match r.data() {
            RData::A(a) => Some(std::net::Ipv4Addr::from(*a)),
            _ => None,
        })
        .collect();
    assert_eq!(extra_a, vec!["192.0.1.53".parse::<std::net::Ipv4Addr>().unwrap()]);
}

#[tokio::test]
async fn test_external_addr_override_fills_ns_extra() {
    let handler = build_handler()
        .with_external_addrs(Box::new(|_zone| vec!["192.0.9.9".parse().unwrap()]));
    let msg = execute_query(&handler, "example.com.", RecordType::NS).await;

    let extra_a: Vec<_> = msg
        .additionals()
        .iter()
        .filter_map(|r| match r.data() {
            RData::A(a) => Some(std::net::Ipv4Addr::from(*a)),
            _ => None,
        })
        .collect();
    assert_eq!(extra_a, vec!["192.0.9.9".parse::<std::net::Ipv4Addr>().unwrap()]);
}

#[tokio::test]
async fn test_non_apex_ns_query_gets_soa_authority() {
    let handler = build_handler();
    let msg = execute_query(&handler, "domain.example.com.", RecordType::NS).await;
    assert_response_code(&msg, ResponseCode::NoError);
    assert!(msg.answers().is_empty());
    assert_soa_authority(&msg);
}

#[tokio::test]
async fn test_sub_apex_a_query_answers_self_address() {
    let handler = build_handler();
    let msg = execute_query(&handler, "dns1.kube-system.example.com.", RecordType::A).await;
    assert_a_response(&msg, "dns1.kube-system.example.com.", &["192.0.1.53"]);
}

#[tokio::test]
async fn test_unsynced_handler_returns_servfail() {
    let handler = build_unsynced_handler();
    let msg = execute_query(&handler, "svc1.ns1.example.com.", RecordType::A).await;
    assert_response_code(&msg, ResponseCode::ServFail);
    assert!(msg.answers().is_empty());
}

#[tokio::test]
async fn test_every_response_is_authoritative() {
    let handler = build_handler();
    for (name, rtype) in [
        ("svc1.ns1.example.com.", RecordType::A),
        ("svcx.ns1.example.com.", RecordType::A),
        ("example.com.", RecordType::AAAA),
        ("domain.example.com.", RecordType::SOA),
        ("example.com.", RecordType::NS),
        ("svc3.ns1.example.com.", RecordType::CNAME),
    ] {
        let msg = execute_query(&handler, name, rtype).await;
        assert_authoritative(&msg);
    }
}
