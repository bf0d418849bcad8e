//! Volume identifier codec exercised through the public API.

use blobvol::VolumeId;
use rstest::rstest;

#[rstest]
#[case::minimal(VolumeId::new("rg", "acct", "pvc-1"))]
#[case::empty_resource_group(VolumeId::new("", "acct", "pvc-1"))]
#[case::everything(
    VolumeId::new("rg", "acct", "data-pvc-1")
        .with_suffix(Some(String::from("pvc-1")))
        .with_secret_namespace(Some(String::from("team")))
        .with_subscription_id(Some(String::from("sub-2")))
)]
#[case::subscription_without_namespace(
    VolumeId::new("rg", "acct", "pvc-1").with_subscription_id(Some(String::from("sub-2")))
)]
fn encoded_ids_decode_to_the_same_fields(#[case] id: VolumeId) {
    let encoded = id.encode();
    assert_eq!(encoded.matches('#').count(), 5, "{encoded}");
    assert_eq!(VolumeId::decode(&encoded), Ok(id));
}

#[test]
fn legacy_three_segment_ids_still_decode() {
    let id = VolumeId::decode("rg#acct#pvc-1").unwrap_or_else(|err| panic!("{err}"));
    assert_eq!(id, VolumeId::new("rg", "acct", "pvc-1"));
    assert_eq!(id.logical_name(), "pvc-1");
}

#[test]
fn suffix_is_the_logical_name_when_recorded() {
    let id = VolumeId::decode("rg#acct#data-pvc-1#pvc-1#default#")
        .unwrap_or_else(|err| panic!("{err}"));
    assert_eq!(id.logical_name(), "pvc-1");
    assert_eq!(id.secret_namespace.as_deref(), Some("default"));
    assert_eq!(id.subscription_id, None);
}

#[rstest]
#[case("")]
#[case("no-separators")]
#[case("rg#acct")]
#[case("rg##pvc-1")]
#[case("rg#acct#")]
#[case("a#b#c#d#e#f#g")]
fn malformed_ids_are_not_parseable(#[case] raw: &str) {
    let err = VolumeId::decode(raw).expect_err("should not decode");
    assert_eq!(err.volume_id, raw);
}
