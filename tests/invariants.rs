//! Black-box tests for the quantified invariants a validator session must
//! hold, exercised purely through the public `Session` API with synthetic
//! streams built by `tests/common`.

mod common;

use common::{build_stream, i_frame, p_frame, TestSigner};
use signed_video_validator::hash::{hash_nalu, GopHasher};
use signed_video_validator::nalu::parse_nalu;
use signed_video_validator::tlv::{self, decode_hash_list_value, encode_hash_list_value, GeneralInfo, Tag, TlvRecord};
use signed_video_validator::verifier::EchoVerifier;
use signed_video_validator::{AuthenticityLevel, Authenticity, Codec, Session, SessionConfig};

fn new_session(level: AuthenticityLevel) -> Session {
    let mut config = SessionConfig::new(Codec::H264);
    config.authenticity_level = level;
    let mut s = Session::with_config(config);
    s.set_verifier(Box::new(EchoVerifier));
    s
}

fn feed_all(session: &mut Session, stream: &[Vec<u8>]) -> Vec<signed_video_validator::AuthenticityReport> {
    let mut reports = Vec::new();
    for nalu in stream {
        if let Some(report) = session.add_nalu_and_authenticate(nalu).unwrap() {
            reports.push(report);
        }
    }
    reports
}

/// Invariant 1: every GOP produced by a well-behaved signer settles `OK`
/// with zero missed NALUs. Between consecutive closed GOPs exactly one item
/// is left pending: the shared boundary frame, not yet folded into its own
/// (still open) GOP's verdict.
#[test]
fn signer_stream_settles_ok_with_one_pending_boundary_frame_between_gops() {
    let stream = build_stream(3, 3, &[b"steady-key"]);
    let mut session = new_session(AuthenticityLevel::Gop);
    let reports = feed_all(&mut session, &stream);

    assert_eq!(reports.len(), 3);
    for report in &reports {
        assert_eq!(report.latest_validation.authenticity, Authenticity::Ok);
        assert_eq!(report.latest_validation.missed_nalus, 0);
        assert_eq!(report.latest_validation.number_of_received_picture_nalus, 3);
        assert_eq!(report.latest_validation.number_of_pending_picture_nalus, 1);
    }
}

/// Invariant 2 (non-propagating case): flipping a bit in a middle P-frame
/// (not the GOP's first/chained NALU) only affects the GOP that contains it.
#[test]
fn tampering_a_middle_frame_does_not_affect_the_neighbouring_gop() {
    let mut session = new_session(AuthenticityLevel::Gop);
    let mut signer = TestSigner::new(AuthenticityLevel::Gop);

    let gop0 = vec![i_frame(true), p_frame(1), p_frame(2)];
    let mut tampered_gop0 = gop0.clone();
    let last = tampered_gop0.last_mut().unwrap();
    let tamper_at = last.len() - 1;
    last[tamper_at] ^= 0x01;

    for n in &tampered_gop0 {
        session.add_nalu_and_authenticate(n).unwrap();
    }
    let gop1_first = i_frame(true);
    session.add_nalu_and_authenticate(&gop1_first).unwrap();
    let sei0 = signer.sei(&gop0, Some(&gop1_first));
    let report0 = session.add_nalu_and_authenticate(&sei0).unwrap().expect("gop0 settles");
    assert_eq!(report0.latest_validation.authenticity, Authenticity::NotOk);

    let gop1_rest = vec![p_frame(3), p_frame(4)];
    for n in &gop1_rest {
        session.add_nalu_and_authenticate(n).unwrap();
    }
    let gop2_first = i_frame(true);
    session.add_nalu_and_authenticate(&gop2_first).unwrap();
    let mut gop1_full = vec![gop1_first.clone()];
    gop1_full.extend(gop1_rest);
    let sei1 = signer.sei(&gop1_full, Some(&gop2_first));
    let report1 = session.add_nalu_and_authenticate(&sei1).unwrap().expect("gop1 settles");
    assert_eq!(report1.latest_validation.authenticity, Authenticity::Ok);
}

/// Invariant 2 (propagating case): the shared boundary frame is chained
/// into *both* the GOP it closes and the GOP it opens. Tampering it flips
/// both verdicts to `NotOk`, unlike a tampered middle frame.
#[test]
fn tampering_the_shared_boundary_frame_propagates_to_the_previous_gop() {
    let mut session = new_session(AuthenticityLevel::Gop);
    let mut signer = TestSigner::new(AuthenticityLevel::Gop);

    let gop0 = vec![i_frame(true), p_frame(1), p_frame(2)];
    let clean_gop1_first = i_frame(true);
    let mut tampered_gop1_first = clean_gop1_first.clone();
    let tamper_at = tampered_gop1_first.len() - 1;
    tampered_gop1_first[tamper_at] ^= 0x01;

    for n in &gop0 {
        session.add_nalu_and_authenticate(n).unwrap();
    }
    // The session only ever sees the tampered copy of the boundary frame.
    session.add_nalu_and_authenticate(&tampered_gop1_first).unwrap();
    // The signer's declared hashes are computed over the clean copy, as a
    // genuine signer (upstream of any tampering) would have seen it.
    let sei0 = signer.sei(&gop0, Some(&clean_gop1_first));
    let report0 = session.add_nalu_and_authenticate(&sei0).unwrap().expect("gop0 settles");
    assert_eq!(report0.latest_validation.authenticity, Authenticity::NotOk);

    let gop1_rest = vec![p_frame(3), p_frame(4)];
    for n in &gop1_rest {
        session.add_nalu_and_authenticate(n).unwrap();
    }
    let gop2_first = i_frame(true);
    session.add_nalu_and_authenticate(&gop2_first).unwrap();
    let mut gop1_full = vec![clean_gop1_first];
    gop1_full.extend(gop1_rest);
    let sei1 = signer.sei(&gop1_full, Some(&gop2_first));
    let report1 = session.add_nalu_and_authenticate(&sei1).unwrap().expect("gop1 settles");
    assert_eq!(
        report1.latest_validation.authenticity,
        Authenticity::NotOk,
        "gop1's own first member differs from what was actually received, so it cannot be OK either"
    );
}

/// Invariant 3: removing one P-NALU from the middle of a GOP is `NotOk` at
/// GOP level (no way to localize the damage) but `OK_WITH_MISSING_INFO`
/// with exactly one recorded position at FRAME level, because the signer's
/// per-position hash list survives the drop even though the bulk GOP hash
/// does not.
#[test]
fn removing_a_p_nalu_is_not_ok_at_gop_level_but_localized_at_frame_level() {
    for (level, expect) in [
        (AuthenticityLevel::Gop, Authenticity::NotOk),
        (AuthenticityLevel::Frame, Authenticity::OkWithMissingInfo),
    ] {
        let mut session = new_session(level);
        let mut signer = TestSigner::new(level);

        let full_gop0 = vec![i_frame(true), p_frame(1), p_frame(2)];
        // Drop the middle P-frame: the session never sees it, but the
        // signer declares the GOP as if it had.
        session.add_nalu_and_authenticate(&full_gop0[0]).unwrap();
        session.add_nalu_and_authenticate(&full_gop0[2]).unwrap();

        let gop1_first = i_frame(true);
        session.add_nalu_and_authenticate(&gop1_first).unwrap();
        let sei0 = signer.sei(&full_gop0, Some(&gop1_first));
        let report = session.add_nalu_and_authenticate(&sei0).unwrap().expect("gop0 settles");

        assert_eq!(report.latest_validation.authenticity, expect, "level={level:?}");
        assert_eq!(report.latest_validation.missed_nalus, 1);
        if level == AuthenticityLevel::Frame {
            assert_eq!(report.latest_validation.list_of_missing_nalus, vec![1]);
        }
    }
}

/// Invariant 4: TLV round-trips, including the emulation-prevention case,
/// purely through the public `tlv` module.
#[test]
fn tlv_round_trips_through_the_public_api() {
    let general = GeneralInfo {
        gop_idx: 7,
        num_nalus_in_gop: 12,
        level: AuthenticityLevel::Frame,
        version_on_signing_side: Some("9.9.9".to_string()),
    };
    let gop_hash = [0x00u8; 32]; // forces emulation-prevention escaping
    let hash_list = vec![[0x00u8; 32], [0x01u8; 32]];
    let hash_list_value = encode_hash_list_value(&gop_hash, Some(&hash_list));

    let records = vec![
        TlvRecord { tag: Tag::General, value: general.encode() },
        TlvRecord { tag: Tag::HashList, value: hash_list_value },
        TlvRecord { tag: Tag::Signature, value: vec![0xAB; 8] },
    ];
    let wire = tlv::encode(&records);
    assert!(wire.windows(3).any(|w| w == [0x00, 0x00, 0x03]), "should escape runs of zero bytes");

    let unescaped = signed_video_validator::nalu::remove_emulation_prevention(&wire);
    let decoded = tlv::decode(&unescaped).unwrap();
    assert_eq!(decoded.len(), 3);

    let decoded_general = GeneralInfo::decode(&decoded[0].value).unwrap();
    assert_eq!(decoded_general, general);
    let (decoded_hash, decoded_list) = decode_hash_list_value(&decoded[1].value).unwrap();
    assert_eq!(decoded_hash, gop_hash);
    assert_eq!(decoded_list, Some(hash_list));
    assert_eq!(decoded[2].value, vec![0xAB; 8]);
}

/// Invariant 5: `reset` followed by a full replay of the stream from
/// scratch produces the same per-GOP verdicts as validating it on a fresh
/// session — reset must not leave any state a second pass could trip on.
#[test]
fn reset_then_replay_matches_a_fresh_session() {
    let stream = build_stream(3, 3, &[b"steady-key"]);

    let mut fresh = new_session(AuthenticityLevel::Gop);
    let fresh_reports = feed_all(&mut fresh, &stream);

    let mut reused = new_session(AuthenticityLevel::Gop);
    // Drive it partway through an unrelated pass first.
    let warm_up = build_stream(1, 2, &[b"other-key"]);
    feed_all(&mut reused, &warm_up);
    reused.reset();
    let replayed_reports = feed_all(&mut reused, &stream);

    assert_eq!(fresh_reports.len(), replayed_reports.len());
    for (fresh_r, replayed_r) in fresh_reports.iter().zip(replayed_reports.iter()) {
        assert_eq!(fresh_r.latest_validation.authenticity, replayed_r.latest_validation.authenticity);
        assert_eq!(
            fresh_r.latest_validation.number_of_received_picture_nalus,
            replayed_r.latest_validation.number_of_received_picture_nalus
        );
        assert_eq!(fresh_r.latest_validation.missed_nalus, replayed_r.latest_validation.missed_nalus);
    }
}

/// Invariant 6: a public-key change latches `public_key_has_changed` on
/// exactly one report — the first one signed by the new key — and never
/// again afterwards, including the initial key establishment (which is not
/// a "change" at all, since there was no prior key to differ from).
#[test]
fn public_key_change_latches_exactly_once() {
    let stream = build_stream(4, 3, &[b"key-a", b"key-a", b"key-b", b"key-b"]);
    let mut session = new_session(AuthenticityLevel::Gop);
    let reports = feed_all(&mut session, &stream);

    assert_eq!(reports.len(), 4);
    let changed_flags: Vec<bool> = reports.iter().map(|r| r.latest_validation.public_key_has_changed).collect();
    assert_eq!(changed_flags, vec![false, false, true, false]);
    assert_eq!(reports.last().unwrap().accumulated_validation.public_key_changes, 1);
}

/// Sanity check on the shared harness itself: two signers given the same
/// frames produce the same declared GOP hash, so any divergence asserted
/// above really does come from the session, not from nondeterminism in the
/// test helper.
#[test]
fn harness_signer_is_deterministic() {
    let gop = vec![i_frame(true), p_frame(1)];
    let mut hasher = GopHasher::init();
    for n in &gop {
        let info = parse_nalu(n, Codec::H264);
        hasher.update(&hash_nalu(&info.hashable_data));
    }
    let expected = hasher.finalize();

    let mut signer = TestSigner::new(AuthenticityLevel::Gop);
    let sei = signer.sei(&gop, None);
    // The SEI's SIGNATURE record equals the declared GOP hash by this
    // harness's construction (`EchoVerifier`'s convention).
    let info = parse_nalu(&sei, Codec::H264);
    let tlv_bytes = info.tlv_data.expect("sei carries tlv data");
    let records = tlv::decode(&tlv_bytes).unwrap();
    let signature = records.iter().find(|r| r.tag == Tag::Signature).unwrap();
    assert_eq!(signature.value, expected.to_vec());
}
