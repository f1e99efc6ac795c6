//! Key agreement and channel properties across both handshake roles.

use keyline_core::{SecurePayload, WireMessage};
use keyline_crypto::dh::{choose_parameters, generate_private, public_value, shared_secret};
use keyline_crypto::{
    derive_keys, respond, xor_stream, Admission, ClientHandshake, DhParams, KeyAgreementError,
    Session, SessionState, TerminateOutcome,
};

#[test]
fn dh_agreement_holds_for_random_parameters() {
    for _ in 0..200 {
        let (p, g) = choose_parameters();
        assert!(keyline_crypto::dh::is_prime(p));
        assert!((2_000..10_000).contains(&p));
        assert!(g >= 2 && g <= p - 2);

        let a = generate_private(p).unwrap();
        let b = generate_private(p).unwrap();
        let big_a = public_value(g, &a, p);
        let big_b = public_value(g, &b, p);

        let s1 = shared_secret(big_b, &a, p);
        let s2 = shared_secret(big_a, &b, p);
        assert_eq!(s1, s2);
        assert_eq!(derive_keys(&s1).enc_key(), derive_keys(&s2).enc_key());
    }
}

#[test]
fn private_exponent_needs_room() {
    for p in [0u64, 1, 2, 3, 4] {
        assert_eq!(
            generate_private(p).unwrap_err(),
            KeyAgreementError::ParameterTooSmall(p)
        );
    }
    for _ in 0..100 {
        let a = generate_private(5).unwrap();
        assert!((2..=3).contains(&a.expose()));
    }
}

#[test]
fn sessions_exchange_sealed_messages_after_handshake() {
    let (client_hs, hello) = ClientHandshake::start(DhParams::generate()).unwrap();
    let mut server = Session::new();
    assert_eq!(
        server.admit(&WireMessage::ClientHello(hello)),
        Admission::Accept
    );

    let (reply, server_keys) = respond(&hello).unwrap();
    let client_keys = client_hs.finish(&reply).unwrap();

    let mut client = Session::new();
    client.on_handshake_complete(&client_keys.keys, true).unwrap();
    server.on_handshake_complete(&server_keys.keys, true).unwrap();

    let frame = client.seal(&SecurePayload::data("ping")).unwrap();
    assert_eq!(
        server.admit(&WireMessage::Secure(frame.clone())),
        Admission::Accept
    );
    assert_eq!(server.open(&frame).unwrap(), SecurePayload::data("ping"));

    let end = client.seal(&SecurePayload::EndSession).unwrap();
    assert_eq!(server.open(&end).unwrap(), SecurePayload::EndSession);
    assert!(matches!(server.on_terminate(), TerminateOutcome::Terminated(_)));
    assert_eq!(server.state(), SessionState::Unauthenticated);

    // A stale frame after termination is a violation.
    assert_eq!(
        server.admit(&WireMessage::Secure(frame)),
        Admission::Violation
    );
}

#[test]
fn logged_key_decrypts_captured_ciphertext() {
    use base64::{engine::general_purpose::STANDARD, Engine as _};

    let (client_hs, hello) = ClientHandshake::start(DhParams::generate()).unwrap();
    let (reply, _) = respond(&hello).unwrap();
    let derivation = client_hs.finish(&reply).unwrap();

    let mut session = Session::new();
    session.on_handshake_complete(&derivation.keys, false).unwrap();
    let frame = session.seal(&SecurePayload::data("captured")).unwrap();

    let enc_key = hex::decode(hex::encode(derivation.keys.enc_key())).unwrap();
    let ciphertext = STANDARD.decode(&frame.ciphertext).unwrap();
    let plaintext = xor_stream(&ciphertext, &enc_key).unwrap();
    assert_eq!(
        String::from_utf8(plaintext).unwrap(),
        r#"{"type":"DATA","text":"captured"}"#
    );
}
