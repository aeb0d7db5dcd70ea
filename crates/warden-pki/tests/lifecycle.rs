mod common;

use common::{fake_fixture, fake_key_pem, Fixture};
use warden_common::cache::KvStore;
use warden_crypto::otp;
use warden_pki::events::LifecycleEvent;
use warden_pki::layout::IdentityPaths;
use warden_pki::{
    CertState, Identity, IdentityKind, PkiError, RevocationReason, CA_IDENTITY_ID,
};

fn with_ca(f: &Fixture) -> Identity {
    f.manager
        .create(&f.org, IdentityKind::Ca, "Acme CA")
        .unwrap()
}

fn users_updated() -> LifecycleEvent {
    LifecycleEvent::UsersUpdated {
        org_id: "org1".to_string(),
    }
}

#[test]
fn create_client_requests_then_signs() {
    let (f, engine) = fake_fixture("lc-create");
    with_ca(&f);
    engine.clear();
    f.sink.clear();

    let alice = f
        .manager
        .create(&f.org, IdentityKind::Client, "alice")
        .unwrap();

    assert_eq!(engine.ops(), vec!["create_signing_request", "sign_certificate"]);
    assert!(engine.calls().iter().all(|c| c.identity_id == alice.id));
    assert!(engine.calls().iter().all(|c| c.config_present));

    let paths = IdentityPaths::new(&f.root, &alice.id);
    assert!(paths.request.is_file());
    assert!(paths.key.is_file());
    assert!(paths.cert.is_file());
    assert!(paths.record.is_file());
    assert!(!paths.ssl_conf.exists(), "signing config must not outlive creation");

    assert_eq!(alice.id.len(), 32);
    assert_eq!(alice.kind, IdentityKind::Client);
    assert_eq!(alice.org_id, "org1");
    assert_eq!(alice.org_name, "Acme");
    assert_eq!(alice.otp_secret.len(), otp::OTP_SECRET_LEN);
    assert_eq!(f.manager.cert_state(&f.org, &alice), CertState::Signed);

    assert_eq!(
        f.sink.events(),
        vec![users_updated(), LifecycleEvent::ServersUpdated]
    );
    assert_eq!(
        f.sink.audits(),
        vec![(
            "user_created".to_string(),
            "org1".to_string(),
            "Created new user \"alice\".".to_string()
        )]
    );
}

#[cfg(unix)]
#[test]
fn created_key_and_record_are_owner_only() {
    use std::os::unix::fs::PermissionsExt;

    let (f, _) = fake_fixture("lc-mode");
    with_ca(&f);
    let alice = f
        .manager
        .create(&f.org, IdentityKind::Client, "alice")
        .unwrap();

    let paths = IdentityPaths::new(&f.root, &alice.id);
    for path in [&paths.key, &paths.record] {
        let mode = std::fs::metadata(path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600, "{}", path.display());
    }
}

#[test]
fn ca_is_self_signed_and_not_audited() {
    let (f, engine) = fake_fixture("lc-ca");
    let ca = with_ca(&f);

    assert_eq!(ca.id, CA_IDENTITY_ID);
    assert_eq!(ca.kind, IdentityKind::Ca);
    let calls = engine.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls.iter().all(|c| c.kind == Some(IdentityKind::Ca)));
    assert!(f.sink.audits().is_empty());
    assert_eq!(
        f.sink.events(),
        vec![users_updated(), LifecycleEvent::ServersUpdated]
    );

    let err = f
        .manager
        .create(&f.org, IdentityKind::Ca, "again")
        .unwrap_err();
    assert!(matches!(err, PkiError::AlreadyExists(_)));
}

#[test]
fn server_identities_are_not_audited() {
    let (f, _) = fake_fixture("lc-server");
    with_ca(&f);
    f.sink.clear();

    let server = f
        .manager
        .create(&f.org, IdentityKind::Server, "edge-1")
        .unwrap();
    assert_eq!(server.kind, IdentityKind::Server);
    assert!(f.sink.audits().is_empty());
    assert_eq!(f.sink.events().len(), 2);
}

#[test]
fn client_without_ca_is_rejected_before_any_engine_call() {
    let (f, engine) = fake_fixture("lc-noca");
    let err = f
        .manager
        .create(&f.org, IdentityKind::Client, "alice")
        .unwrap_err();

    assert!(matches!(err, PkiError::CaNotInitialized(_)));
    assert!(engine.calls().is_empty());
}

#[test]
fn engine_failure_is_fatal_and_carries_ids() {
    let (f, engine) = fake_fixture("lc-fail");
    with_ca(&f);
    engine.clear();
    f.sink.clear();
    engine.fail_on("sign_certificate");

    let err = f
        .manager
        .create(&f.org, IdentityKind::Client, "alice")
        .unwrap_err();

    let PkiError::Engine {
        op,
        org_id,
        identity_id,
        ..
    } = err
    else {
        panic!("expected an engine error");
    };
    assert_eq!(op, "sign_certificate");
    assert_eq!(org_id, "org1");
    assert_eq!(identity_id.len(), 32);

    // No record, no notification, no automatic cleanup of the request.
    let paths = IdentityPaths::new(&f.root, &identity_id);
    assert!(!paths.record.exists());
    assert!(paths.request.exists());
    assert!(f.sink.events().is_empty());
    assert!(f.sink.audits().is_empty());
}

#[test]
fn revoking_the_ca_fails_without_engine_calls() {
    let (f, engine) = fake_fixture("lc-revoke-ca");
    let mut ca = with_ca(&f);
    engine.clear();

    let err = f
        .manager
        .revoke(&f.org, &mut ca, RevocationReason::Unspecified)
        .unwrap_err();
    assert!(matches!(err, PkiError::CaNotRevocable));
    assert!(engine.calls().is_empty());

    let err = f
        .manager
        .remove(&f.org, ca, RevocationReason::Unspecified)
        .unwrap_err();
    assert!(matches!(err, PkiError::CaNotRevocable));
    assert!(engine.calls().is_empty());
}

#[test]
fn revoke_without_certificate_is_a_noop() {
    let (f, engine) = fake_fixture("lc-revoke-nocert");
    with_ca(&f);
    let mut alice = f
        .manager
        .create(&f.org, IdentityKind::Client, "alice")
        .unwrap();
    std::fs::remove_file(IdentityPaths::new(&f.root, &alice.id).cert).unwrap();
    engine.clear();

    f.manager
        .revoke(&f.org, &mut alice, RevocationReason::KeyCompromise)
        .unwrap();

    assert!(engine.calls().is_empty());
    assert!(alice.revoked_at.is_none());
}

#[test]
fn revoke_signed_client_regenerates_crl() {
    let (f, engine) = fake_fixture("lc-revoke");
    with_ca(&f);
    let mut alice = f
        .manager
        .create(&f.org, IdentityKind::Client, "alice")
        .unwrap();
    engine.clear();

    f.manager
        .revoke(&f.org, &mut alice, RevocationReason::KeyCompromise)
        .unwrap();

    let calls = engine.calls();
    assert_eq!(
        calls.iter().map(|c| c.op).collect::<Vec<_>>(),
        vec!["revoke_certificate", "generate_crl"]
    );
    assert!(calls.iter().all(|c| c.config_present));
    assert!(!IdentityPaths::new(&f.root, &alice.id).ssl_conf.exists());
    assert!(f.root.join("ca.crl").is_file());

    assert!(alice.revoked_at.is_some());
    assert_eq!(f.manager.cert_state(&f.org, &alice), CertState::Revoked);
    let reloaded = f.manager.load(&f.org, &alice.id).unwrap();
    assert_eq!(reloaded.revoked_at, alice.revoked_at);
}

#[test]
fn already_revoked_counts_as_success() {
    let (f, engine) = fake_fixture("lc-already");
    with_ca(&f);
    let mut alice = f
        .manager
        .create(&f.org, IdentityKind::Client, "alice")
        .unwrap();
    engine.report_already_revoked();

    f.manager
        .revoke(&f.org, &mut alice, RevocationReason::Unspecified)
        .unwrap();
    assert!(alice.revoked_at.is_some());
    assert!(engine.ops().contains(&"generate_crl"));
}

#[test]
fn revoke_engine_failure_propagates() {
    let (f, engine) = fake_fixture("lc-revoke-fail");
    with_ca(&f);
    let mut alice = f
        .manager
        .create(&f.org, IdentityKind::Client, "alice")
        .unwrap();
    engine.fail_on("revoke_certificate");

    let err = f
        .manager
        .revoke(&f.org, &mut alice, RevocationReason::Unspecified)
        .unwrap_err();
    assert!(matches!(
        err,
        PkiError::Engine {
            op: "revoke_certificate",
            ..
        }
    ));
    assert!(alice.revoked_at.is_none());
    assert!(!engine.ops().contains(&"generate_crl"));
}

#[test]
fn remove_with_missing_key_still_deletes_cert_and_record() {
    let (f, engine) = fake_fixture("lc-remove");
    with_ca(&f);
    let alice = f
        .manager
        .create(&f.org, IdentityKind::Client, "alice")
        .unwrap();
    let paths = IdentityPaths::new(&f.root, &alice.id);
    std::fs::remove_file(&paths.key).unwrap();
    engine.clear();
    f.sink.clear();

    let report = f
        .manager
        .remove(&f.org, alice.clone(), RevocationReason::Unspecified)
        .unwrap();

    assert!(report.is_clean());
    assert!(report.missing.contains(&paths.key));
    assert!(!paths.cert.exists());
    assert!(!paths.record.exists());
    assert!(!paths.request.exists());
    assert_eq!(engine.ops(), vec!["revoke_certificate", "generate_crl"]);

    assert_eq!(f.cache.get(&format!("user-{}", alice.id)).unwrap(), None);
    assert!(!f
        .cache
        .set_members("org-org1-users")
        .unwrap()
        .contains(&alice.id));

    assert_eq!(
        f.sink.events(),
        vec![users_updated(), LifecycleEvent::ServersUpdated]
    );
    assert_eq!(
        f.sink.audits(),
        vec![(
            "user_deleted".to_string(),
            "org1".to_string(),
            "Deleted user \"alice\".".to_string()
        )]
    );
    assert!(matches!(
        f.manager.load(&f.org, &alice.id),
        Err(PkiError::NotFound(_))
    ));
}

#[test]
fn rename_leaves_credentials_untouched() {
    let (f, engine) = fake_fixture("lc-rename");
    with_ca(&f);
    let mut alice = f
        .manager
        .create(&f.org, IdentityKind::Client, "alice")
        .unwrap();
    let paths = IdentityPaths::new(&f.root, &alice.id);
    let key_before = std::fs::read(&paths.key).unwrap();
    let cert_before = std::fs::read(&paths.cert).unwrap();
    engine.clear();
    f.sink.clear();

    f.manager.rename(&f.org, &mut alice, "Alice Smith").unwrap();

    assert_eq!(std::fs::read(&paths.key).unwrap(), key_before);
    assert_eq!(std::fs::read(&paths.cert).unwrap(), cert_before);
    assert_eq!(key_before, format!("{}\n", fake_key_pem(&alice.id)).into_bytes());
    assert!(engine.calls().is_empty());
    assert_eq!(f.sink.events(), vec![users_updated()]);
    assert_eq!(
        f.manager.load(&f.org, &alice.id).unwrap().name,
        "Alice Smith"
    );

    let err = f.manager.rename(&f.org, &mut alice, " ").unwrap_err();
    assert!(matches!(err, PkiError::InvalidName(_)));
    assert_eq!(alice.name, "Alice Smith");
}

#[test]
fn passcodes_verify_once_and_die_with_the_secret() {
    let (f, _) = fake_fixture("lc-otp");
    with_ca(&f);
    let mut alice = f
        .manager
        .create(&f.org, IdentityKind::Client, "alice")
        .unwrap();

    let now = 1_700_000_000;
    let code = otp::passcode_at(&alice.otp_secret, now).unwrap();
    assert!(f.manager.verify_otp_code_at(&alice, &code, now).unwrap());
    assert!(!f.manager.verify_otp_code_at(&alice, &code, now + 5).unwrap());

    let old_secret = alice.otp_secret.clone();
    let next = otp::passcode_at(&old_secret, now + 30).unwrap();
    f.manager.regenerate_otp_secret(&f.org, &mut alice).unwrap();
    assert_ne!(alice.otp_secret, old_secret);
    assert_eq!(alice.otp_secret.len(), otp::OTP_SECRET_LEN);
    assert_eq!(
        f.manager.load(&f.org, &alice.id).unwrap().otp_secret,
        alice.otp_secret
    );

    // The old secret's codes no longer verify. A code of the new secret does,
    // regardless of what the old secret's record holds.
    let fresh = otp::passcode_at(&alice.otp_secret, now + 30).unwrap();
    let new_candidates = otp::candidate_codes(&alice.otp_secret, now + 30).unwrap();
    if !new_candidates.contains(&next) {
        assert!(!f.manager.verify_otp_code_at(&alice, &next, now + 30).unwrap());
    }
    assert!(f.manager.verify_otp_code_at(&alice, &fresh, now + 30).unwrap());
}

#[test]
fn load_upgrades_records_without_kind() {
    let (f, _) = fake_fixture("lc-migrate");
    with_ca(&f);
    let edge = f
        .manager
        .create(&f.org, IdentityKind::Server, "edge")
        .unwrap();
    let paths = IdentityPaths::new(&f.root, &edge.id);

    let mut legacy = serde_json::to_value(&edge).unwrap();
    legacy.as_object_mut().unwrap().remove("type");
    std::fs::write(&paths.record, legacy.to_string()).unwrap();

    let loaded = f.manager.load(&f.org, &edge.id).unwrap();
    assert_eq!(loaded.kind, IdentityKind::Server);

    let on_disk: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&paths.record).unwrap()).unwrap();
    assert_eq!(on_disk["type"], "server");
}

#[test]
fn load_rejects_path_like_ids() {
    let (f, _) = fake_fixture("lc-badid");
    let err = f.manager.load(&f.org, "../org.json").unwrap_err();
    assert!(matches!(err, PkiError::InvalidId(_)));
}

#[test]
fn list_returns_identities_by_name() {
    let (f, _) = fake_fixture("lc-list");
    with_ca(&f);
    for name in ["carol", "alice", "bob"] {
        f.manager
            .create(&f.org, IdentityKind::Client, name)
            .unwrap();
    }

    let names: Vec<String> = f
        .manager
        .list(&f.org)
        .unwrap()
        .into_iter()
        .map(|i| i.name)
        .collect();
    assert_eq!(names, vec!["Acme CA", "alice", "bob", "carol"]);
    assert_eq!(f.cache.set_members("org-org1-users").unwrap().len(), 4);
}

#[test]
fn cert_state_follows_files() {
    let (f, _) = fake_fixture("lc-state");
    with_ca(&f);
    let alice = f
        .manager
        .create(&f.org, IdentityKind::Client, "alice")
        .unwrap();
    let paths = IdentityPaths::new(&f.root, &alice.id);

    assert_eq!(f.manager.cert_state(&f.org, &alice), CertState::Signed);
    std::fs::remove_file(&paths.cert).unwrap();
    assert_eq!(f.manager.cert_state(&f.org, &alice), CertState::Requested);
    std::fs::remove_file(&paths.request).unwrap();
    assert_eq!(
        f.manager.cert_state(&f.org, &alice),
        CertState::Uninitialized
    );
}

#[test]
fn concurrent_creates_for_different_identities() {
    let (f, engine) = fake_fixture("lc-concurrent");
    with_ca(&f);
    engine.clear();

    let created: Vec<Identity> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let f = &f;
                s.spawn(move || {
                    f.manager
                        .create(&f.org, IdentityKind::Client, &format!("user-{i}"))
                        .unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(created.len(), 8);
    assert_eq!(engine.calls().len(), 16);
    for identity in &created {
        let ops: Vec<_> = engine
            .calls()
            .into_iter()
            .filter(|c| c.identity_id == identity.id)
            .map(|c| c.op)
            .collect();
        assert_eq!(ops, vec!["create_signing_request", "sign_certificate"]);
    }
}

#[test]
fn concurrent_ca_creates_issue_one_ca() {
    let (f, engine) = fake_fixture("lc-ca-race");

    let results: Vec<Result<Identity, PkiError>> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let f = &f;
                s.spawn(move || f.manager.create(&f.org, IdentityKind::Ca, "Acme CA"))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, PkiError::AlreadyExists(_))));
    assert_eq!(
        engine.ops(),
        vec!["create_signing_request", "sign_certificate"]
    );
}

#[test]
fn concurrent_revokes_each_regenerate_the_crl() {
    let (f, engine) = fake_fixture("lc-revoke-race");
    with_ca(&f);
    let mut identities: Vec<Identity> = (0..4)
        .map(|i| {
            f.manager
                .create(&f.org, IdentityKind::Client, &format!("user-{i}"))
                .unwrap()
        })
        .collect();
    engine.clear();

    std::thread::scope(|s| {
        for identity in identities.iter_mut() {
            let f = &f;
            s.spawn(move || {
                f.manager
                    .revoke(&f.org, identity, RevocationReason::Unspecified)
                    .unwrap()
            });
        }
    });

    let crl_calls: Vec<_> = engine
        .calls()
        .into_iter()
        .filter(|c| c.op == "generate_crl")
        .collect();
    assert_eq!(crl_calls.len(), 4);
    assert!(crl_calls.iter().all(|c| c.config_present));
    assert!(identities.iter().all(|i| i.revoked_at.is_some()));
}

#[test]
fn failed_create_is_unwound_by_id() {
    let (f, engine) = fake_fixture("lc-unwind");
    with_ca(&f);
    engine.fail_on("sign_certificate");
    let err = f
        .manager
        .create(&f.org, IdentityKind::Client, "alice")
        .unwrap_err();
    let PkiError::Engine { identity_id, .. } = err else {
        panic!("expected an engine error");
    };
    let paths = IdentityPaths::new(&f.root, &identity_id);
    assert!(paths.request.exists());
    assert!(paths.key.exists());
    engine.clear();
    f.sink.clear();

    let report = f
        .manager
        .remove_by_id(
            &f.org,
            &identity_id,
            IdentityKind::Client,
            RevocationReason::Unspecified,
        )
        .unwrap();

    assert!(report.is_clean());
    assert!(report.removed.contains(&paths.request));
    assert!(report.removed.contains(&paths.key));
    assert!(!paths.request.exists());
    assert!(!paths.key.exists());
    // Never announced, so nothing to revoke, notify or audit.
    assert!(engine.calls().is_empty());
    assert!(f.sink.events().is_empty());
    assert!(f.sink.audits().is_empty());
}

#[test]
fn remove_by_id_of_recorded_identity_is_a_full_remove() {
    let (f, engine) = fake_fixture("lc-remove-id");
    with_ca(&f);
    let alice = f
        .manager
        .create(&f.org, IdentityKind::Client, "alice")
        .unwrap();
    engine.clear();
    f.sink.clear();

    f.manager
        .remove_by_id(
            &f.org,
            &alice.id,
            IdentityKind::Client,
            RevocationReason::Unspecified,
        )
        .unwrap();

    assert_eq!(engine.ops(), vec!["revoke_certificate", "generate_crl"]);
    assert_eq!(f.sink.audits().len(), 1);
    assert!(matches!(
        f.manager.load(&f.org, &alice.id),
        Err(PkiError::NotFound(_))
    ));
}

#[test]
fn remove_by_id_rejects_path_like_ids() {
    let (f, _) = fake_fixture("lc-remove-badid");
    let err = f
        .manager
        .remove_by_id(
            &f.org,
            "../keys/ca",
            IdentityKind::Client,
            RevocationReason::Unspecified,
        )
        .unwrap_err();
    assert!(matches!(err, PkiError::InvalidId(_)));
}
