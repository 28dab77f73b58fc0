// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 zerocp contributors
//
// Fixed-capacity string and service-description tests. Overflow must be
// reported, never silently truncated.

use zerocp::{FixedString, ServiceDescription};

#[test]
fn empty_by_default() {
    let s: FixedString<16> = FixedString::new();
    assert!(s.is_empty());
    assert_eq!(s.len(), 0);
    assert_eq!(s.as_str(), "");
}

#[test]
fn stores_content_up_to_capacity() {
    let s = FixedString::<8>::try_from_str("radar").unwrap();
    assert_eq!(s.as_str(), "radar");
    assert_eq!(s.len(), 5);

    let full = FixedString::<8>::try_from_str("12345678").unwrap();
    assert_eq!(full.len(), 8);
}

#[test]
fn overflow_is_reported_not_truncated() {
    let err = FixedString::<8>::try_from_str("123456789").unwrap_err();
    assert_eq!(err.requested, 9);
    assert_eq!(err.capacity, 8);
}

#[test]
fn equality_is_byte_equality() {
    let a = FixedString::<16>::try_from_str("Front").unwrap();
    let b = FixedString::<16>::try_from_str("Front").unwrap();
    let c = FixedString::<16>::try_from_str("front").unwrap();
    assert_eq!(a, b);
    assert_ne!(a, c);
}

#[test]
fn display_and_debug() {
    let s = FixedString::<16>::try_from_str("Cloud").unwrap();
    assert_eq!(format!("{s}"), "Cloud");
    assert_eq!(format!("{s:?}"), "\"Cloud\"");
}

#[test]
fn service_description_componentwise_equality() {
    let a = ServiceDescription::new("Radar", "Front", "Cloud").unwrap();
    let b = ServiceDescription::new("Radar", "Front", "Cloud").unwrap();
    let c = ServiceDescription::new("Radar", "Rear", "Cloud").unwrap();
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(a.service(), "Radar");
    assert_eq!(a.instance(), "Front");
    assert_eq!(a.event(), "Cloud");
}

#[test]
fn service_description_rejects_oversized_component() {
    let long = "x".repeat(65);
    assert!(ServiceDescription::new(&long, "i", "e").is_err());
    assert!(ServiceDescription::new("s", &long, "e").is_err());
    assert!(ServiceDescription::new("s", "i", &long).is_err());
    // 64 bytes exactly still fits.
    let max = "y".repeat(64);
    assert!(ServiceDescription::new(&max, "i", "e").is_ok());
}

#[test]
fn service_description_display() {
    let s = ServiceDescription::new("Radar", "Front", "Cloud").unwrap();
    assert_eq!(format!("{s}"), "Radar/Front/Cloud");
}
