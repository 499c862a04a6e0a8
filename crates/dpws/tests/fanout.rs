// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test/bench code readability over pedantic
#![allow(clippy::missing_panics_doc)] // Tests/examples panic on failure

//! Protocol version fan-out tests
//!
//! Requests to endpoints whose version is still unknown go out once per
//! supported version; the reference must see exactly one outcome.

mod common;

use common::*;
use dpws::types::DeviceDescription;
use dpws::{
    AppSequence, DiscoveryMetadata, Error, InboundMessage, MessageBody, ProtocolVersion,
};
use std::time::Duration;

fn all_versions() -> dpws::FrameworkConfig {
    test_config().with_supported_versions(ProtocolVersion::ALL.to_vec())
}

#[test]
fn test_all_copies_failing_report_one_failure() {
    let transport = MockTransport::new();
    transport.respond_with(|_, _| Reply::Fault);
    let fw = framework(&transport, all_versions());
    let device = fw.device(&ep("dev"));
    fw.receive(hello(
        device_metadata("dev", 1, &["10.0.0.1:5357/dev"]),
        AppSequence::new(1, 1),
    ))
    .unwrap();

    assert_eq!(device.resolve_object(true).unwrap_err(), Error::Timeout);

    let gets = transport.sent_named("Get");
    let mut versions: Vec<_> = gets.iter().filter_map(|(m, _)| m.version).collect();
    versions.sort();
    assert_eq!(versions, ProtocolVersion::ALL.to_vec());

    let stats = fw.stats();
    assert_eq!(stats.fanouts, 1);
    assert_eq!(stats.unicast_sends, 3);
    // One aggregated failure on the only candidate.
    assert_eq!(stats.addresses_exhausted, 1);
    assert_eq!(stats.failovers, 0);
}

#[test]
fn test_one_answering_version_wins() {
    let transport = MockTransport::new();
    transport.respond_with(|msg, _| match (&msg.body, msg.version) {
        (MessageBody::Get, Some(ProtocolVersion::Dpws2011)) => Reply::Body(MessageBody::GetResponse(
            DeviceDescription::default().with_friendly_name("Modern"),
        )),
        (MessageBody::Get, _) => Reply::Fault,
        _ => Reply::Silent,
    });
    let fw = framework(&transport, all_versions());
    let device = fw.device(&ep("dev"));
    fw.receive(hello(
        device_metadata("dev", 1, &["10.0.0.1:5357/dev"]),
        AppSequence::new(1, 1),
    ))
    .unwrap();

    let proxy = device.resolve_object(true).unwrap().unwrap();
    assert_eq!(proxy.friendly_name(), "Modern");
    assert_eq!(proxy.version(), Some(ProtocolVersion::Dpws2011));
    assert_eq!(
        device.preferred_candidate().unwrap().version,
        Some(ProtocolVersion::Dpws2011)
    );
    assert_eq!(fw.stats().addresses_exhausted, 0);
    assert_eq!(fw.stats().failovers, 0);

    // The learned version is used directly for the rebuild.
    transport.clear();
    fw.receive(hello(
        device_metadata("dev", 2, &["10.0.0.1:5357/dev"]),
        AppSequence::new(1, 2),
    ))
    .unwrap();
    device.resolve_object(true).unwrap();
    let gets = transport.sent_named("Get");
    assert_eq!(gets.len(), 1);
    assert_eq!(gets[0].0.version, Some(ProtocolVersion::Dpws2011));
    assert_eq!(fw.stats().fanouts, 1);
}

#[test]
fn test_looped_back_announcement_dropped() {
    let transport = MockTransport::new();
    let fw = framework(&transport, all_versions());
    let local = fw
        .register_local_device(
            DiscoveryMetadata::new(ep("me"), 1).with_candidate(candidate("10.0.0.2:5357/me")),
            DeviceDescription::default().with_friendly_name("Me"),
        )
        .unwrap();

    fw.announce_hello(&local).unwrap();
    assert!(wait_until(Duration::from_secs(2), || transport.sent_named("Hello").len() == 3));
    assert_eq!(fw.stats().multicast_sends, 3);

    for (copy, _) in transport.sent_named("Hello") {
        assert!(matches!(copy.body, MessageBody::Hello(_)));
        assert_eq!(
            fw.receive(InboundMessage::new(copy, Some("10.0.0.2:3702".parse().unwrap()))),
            Err(Error::DuplicateMessage)
        );
    }
    assert_eq!(fw.stats().duplicates_dropped, 3);
}

#[test]
fn test_known_version_sends_single_copy() {
    let transport = MockTransport::new();
    transport.respond_with(|msg, _| match msg.body {
        MessageBody::Get => Reply::Body(MessageBody::GetResponse(DeviceDescription::default())),
        _ => Reply::Silent,
    });
    let fw = framework(&transport, all_versions());
    let device = fw.device(&ep("dev"));
    let metadata = DiscoveryMetadata::new(ep("dev"), 1)
        .with_type(dpws::types::QName::dpws_device())
        .with_candidate(candidate("10.0.0.1:5357/dev").with_version(ProtocolVersion::Dpws2006));
    fw.receive(hello(metadata, AppSequence::new(1, 1))).unwrap();

    device.resolve_object(true).unwrap();
    let gets = transport.sent_named("Get");
    assert_eq!(gets.len(), 1);
    assert_eq!(gets[0].0.version, Some(ProtocolVersion::Dpws2006));
    assert_eq!(fw.stats().fanouts, 0);
}
