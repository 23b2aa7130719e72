//! Integration tests for the two-call certificate issuance flow
//!
//! Runs the orchestrator against the in-memory CA and DNS fakes from
//! `common`.

mod common;

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use common::{alice, chain_for, url, FailingBlobs, FakeCa, Harness};
use dnsproof_common::AcmePhase;
use dnsproof_config::Config;
use dnsproof_issuer::acme::{compute_challenge_value, RegistrationMode};
use dnsproof_issuer::store::{BlobStore, DomainStore};
use dnsproof_issuer::{CertError, CertificateStatus, RequestOutcome};

const DOMAIN: &str = "foo.example";
const ZONE: &str = "_acme-challenge.foo.example";

fn expected_value(order_id: usize) -> String {
    compute_challenge_value(&FakeCa::key_authorization(&format!("token-{}", order_id)))
}

async fn request(h: &Harness) -> Result<RequestOutcome, CertError> {
    h.issuer
        .orchestrator()
        .request_certificate(&alice(), DOMAIN, h.admin_email())
        .await
}

async fn complete(h: &Harness) -> Result<dnsproof_issuer::IssuedCertificate, CertError> {
    h.issuer
        .orchestrator()
        .complete_certificate_request(&alice(), DOMAIN, h.admin_email())
        .await
}

/// Record state of a certificate issued by order `id` in an earlier run
async fn seed_issued(h: &Harness, id: usize) {
    let mut record = h.register(DOMAIN).await;
    let state = &mut record.acme_state;
    state.begin_order(url("order", id));
    state.set_authz_url(url("authz", id)).unwrap();
    state.set_challenge_url(url("chall", id)).unwrap();
    state.set_finalize_url(url("finalize", id)).unwrap();
    state.mark_issued(url("cert", id)).unwrap();
    state.challenge_zone = Some(ZONE.to_string());
    state.challenge_token = Some(expected_value(id));
    h.store.put(&record).await.unwrap();
    h.lookup.publish_txt(ZONE, &expected_value(id));
}

fn utc(rfc3339: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(rfc3339)
        .unwrap()
        .with_timezone(&Utc)
}

// ============================================================================
// request_certificate
// ============================================================================

mod request {
    use super::*;

    #[tokio::test]
    async fn test_returns_pending_challenge_and_persists_urls() {
        let h = Harness::new();
        h.register(DOMAIN).await;

        let outcome = request(&h).await.unwrap();
        let RequestOutcome::Pending(challenge) = outcome else {
            panic!("expected pending challenge, got {:?}", outcome);
        };
        assert_eq!(challenge.zone, ZONE);
        assert_eq!(challenge.value, expected_value(1));

        let record = h.record(DOMAIN).await;
        let state = &record.acme_state;
        assert_eq!(state.phase(), AcmePhase::ChallengePending);
        assert_eq!(state.order_url(), Some(url("order", 1).as_str()));
        assert_eq!(state.authz_url(), Some(url("authz", 1).as_str()));
        assert_eq!(state.challenge_url(), Some(url("chall", 1).as_str()));
        assert_eq!(state.finalize_url(), Some(url("finalize", 1).as_str()));
        assert_eq!(state.challenge_zone.as_deref(), Some(ZONE));
        assert_eq!(state.challenge_token, Some(expected_value(1)));
        assert!(!state.verified);

        // Account created and stored on first use
        assert_eq!(h.ca.state().registrations, vec![RegistrationMode::Refresh]);
        assert!(h.blobs.read_bytes("acme/account.json").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_is_idempotent() {
        let h = Harness::new();
        h.register(DOMAIN).await;

        let first = request(&h).await.unwrap();
        let record_after_first = h.record(DOMAIN).await;
        let second = request(&h).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(h.record(DOMAIN).await, record_after_first);
        assert_eq!(h.ca.state().new_orders, 1);
        assert_eq!(h.ca.state().accounts_created, 1);
    }

    #[tokio::test]
    async fn test_already_validated_short_circuits() {
        let h = Harness::new();
        h.register(DOMAIN).await;
        h.ca.state().preauthorize = true;

        let outcome = request(&h).await.unwrap();
        assert!(outcome.is_validated());
        assert_eq!(outcome.challenge().zone, ZONE);
        assert_eq!(outcome.challenge().value, expected_value(1));

        let record = h.record(DOMAIN).await;
        assert!(record.acme_state.verified);
        assert_eq!(record.acme_state.phase(), AcmePhase::Validated);
    }

    #[tokio::test]
    async fn test_unknown_domain() {
        let h = Harness::new();
        let err = request(&h).await.unwrap_err();
        assert!(matches!(err, CertError::DomainNotFound { .. }));
        assert_eq!(h.ca.state().new_orders, 0);
    }

    #[tokio::test]
    async fn test_no_dns01_challenge() {
        let h = Harness::new();
        h.register(DOMAIN).await;
        h.ca.state().no_dns01 = true;

        let err = request(&h).await.unwrap_err();
        assert!(matches!(err, CertError::NoChallengeAvailable { .. }));
    }

    #[tokio::test]
    async fn test_invalid_order_is_replaced() {
        let h = Harness::new();
        h.register(DOMAIN).await;
        request(&h).await.unwrap();

        h.ca.invalidate(&url("order", 1));
        let outcome = request(&h).await.unwrap();

        assert_eq!(outcome.challenge().value, expected_value(2));
        assert_eq!(h.ca.state().new_orders, 2);
        let record = h.record(DOMAIN).await;
        assert_eq!(record.acme_state.order_url(), Some(url("order", 2).as_str()));
        assert_eq!(record.acme_state.phase(), AcmePhase::ChallengePending);
    }
}

// ============================================================================
// complete_certificate_request
// ============================================================================

mod complete {
    use super::*;

    #[tokio::test]
    async fn test_record_not_published_changes_nothing() {
        let h = Harness::new();
        h.register(DOMAIN).await;
        request(&h).await.unwrap();
        let before = h.record(DOMAIN).await;
        let connects = h.ca.state().connects;

        let err = complete(&h).await.unwrap_err();
        match &err {
            CertError::RecordNotReady { zone } => assert_eq!(zone, ZONE),
            other => panic!("expected RecordNotReady, got {:?}", other),
        }
        assert!(err.is_retryable());
        assert_eq!(h.record(DOMAIN).await, before);
        assert_eq!(h.ca.state().connects, connects);
    }

    #[tokio::test]
    async fn test_wrong_value_is_not_ready() {
        let h = Harness::new();
        h.register(DOMAIN).await;
        request(&h).await.unwrap();
        h.lookup.publish_txt(ZONE, &format!("{} ", expected_value(1)));

        assert!(matches!(
            complete(&h).await,
            Err(CertError::RecordNotReady { .. })
        ));
    }

    #[tokio::test]
    async fn test_without_request() {
        let h = Harness::new();
        h.register(DOMAIN).await;

        match complete(&h).await {
            Err(CertError::MissingAcmeState { field, .. }) => assert_eq!(field, "challenge_zone"),
            other => panic!("expected MissingAcmeState, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_challenge_url_changes_nothing() {
        let h = Harness::new();
        let mut record = h.register(DOMAIN).await;
        record.acme_state.begin_order(url("order", 1));
        record.acme_state.set_authz_url(url("authz", 1)).unwrap();
        record.acme_state.challenge_zone = Some(ZONE.to_string());
        record.acme_state.challenge_token = Some("value".to_string());
        h.store.put(&record).await.unwrap();
        h.lookup.publish_txt(ZONE, "value");

        match complete(&h).await {
            Err(CertError::MissingAcmeState { domain, field }) => {
                assert_eq!(domain, DOMAIN);
                assert_eq!(field, "challenge_url");
            }
            other => panic!("expected MissingAcmeState, got {:?}", other),
        }
        assert_eq!(h.record(DOMAIN).await, record);
        assert_eq!(h.ca.state().connects, 0);
    }

    #[tokio::test]
    async fn test_invalid_order_requires_new_request() {
        let h = Harness::new();
        h.register(DOMAIN).await;
        request(&h).await.unwrap();
        h.lookup.publish_txt(ZONE, &expected_value(1));
        h.ca.invalidate(&url("order", 1));

        let err = complete(&h).await.unwrap_err();
        assert!(matches!(err, CertError::OrderInvalid { .. }));
        assert!(err.requires_rerequest());

        let outcome = request(&h).await.unwrap();
        assert_eq!(outcome.challenge().value, expected_value(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_validation_times_out() {
        let h = Harness::new();
        h.register(DOMAIN).await;
        request(&h).await.unwrap();
        h.lookup.publish_txt(ZONE, &expected_value(1));
        h.ca.state().never_validate = true;

        match complete(&h).await {
            Err(CertError::IssuanceTimeout { stage, .. }) => assert_eq!(stage, "authorization"),
            other => panic!("expected IssuanceTimeout, got {:?}", other),
        }

        let record = h.record(DOMAIN).await;
        assert!(!record.acme_state.verified);
        assert_eq!(record.acme_state.phase(), AcmePhase::ChallengePending);
        assert_eq!(h.ca.state().finalized, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_validation_waits_at_least_propagation_timeout() {
        let mut config = Config::default_for_testing();
        config.polling.timeout_secs = 5;
        let h = Harness::with_config(config);
        h.register(DOMAIN).await;
        request(&h).await.unwrap();
        h.lookup.publish_txt(ZONE, &expected_value(1));
        h.ca.state().never_validate = true;

        match complete(&h).await {
            Err(CertError::IssuanceTimeout { stage, waited, .. }) => {
                assert_eq!(stage, "authorization");
                assert_eq!(waited, Duration::from_secs(60));
            }
            other => panic!("expected IssuanceTimeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_issues_and_writes_artifacts() {
        let h = Harness::new();
        h.register(DOMAIN).await;
        request(&h).await.unwrap();
        h.lookup.publish_txt(ZONE, &expected_value(1));

        let issued = complete(&h).await.unwrap();
        assert_eq!(issued.key_path, "mastodon_le_certs/foo.example/cert.key");
        assert_eq!(issued.chain_path, "mastodon_le_certs/foo.example/cert.crt");
        assert_eq!(issued.cert_url, url("cert", 1));

        let record = h.record(DOMAIN).await;
        assert!(record.acme_state.verified);
        assert_eq!(record.acme_state.cert_url(), Some(url("cert", 1).as_str()));
        assert_eq!(record.acme_state.phase(), AcmePhase::Issued);
        assert_eq!(h.ca.state().registrations.last(), Some(&RegistrationMode::Reuse));
        assert_eq!(h.ca.state().finalized, 1);

        let chain = h
            .blobs
            .read_bytes("mastodon_le_certs/foo.example/cert.crt")
            .await
            .unwrap()
            .unwrap();
        assert!(!chain.is_empty());
    }

    #[tokio::test]
    async fn test_key_write_failure_happens_before_finalize() {
        let h = Harness::with_blobs(Arc::new(FailingBlobs::failing_times(
            "mastodon_le_certs/",
            1,
        )));
        h.register(DOMAIN).await;
        request(&h).await.unwrap();
        h.lookup.publish_txt(ZONE, &expected_value(1));

        match complete(&h).await {
            Err(CertError::ArtifactWrite { path, .. }) => {
                assert_eq!(path, "mastodon_le_certs/foo.example/cert.key")
            }
            other => panic!("expected ArtifactWrite, got {:?}", other),
        }
        assert_eq!(h.ca.state().finalized, 0);
        assert_eq!(h.record(DOMAIN).await.acme_state.phase(), AcmePhase::Validated);

        let issued = complete(&h).await.unwrap();
        assert_eq!(issued.cert_url, url("cert", 1));
        assert_eq!(h.ca.state().finalized, 1);
        assert_eq!(h.record(DOMAIN).await.acme_state.phase(), AcmePhase::Issued);
    }

    #[tokio::test]
    async fn test_chain_write_failure_is_repaired_without_reissue() {
        let h = Harness::with_blobs(Arc::new(FailingBlobs::failing_times(
            "mastodon_le_certs/foo.example/cert.crt",
            1,
        )));
        h.register(DOMAIN).await;
        request(&h).await.unwrap();
        h.lookup.publish_txt(ZONE, &expected_value(1));

        match complete(&h).await {
            Err(CertError::ArtifactWrite { path, .. }) => {
                assert_eq!(path, "mastodon_le_certs/foo.example/cert.crt")
            }
            other => panic!("expected ArtifactWrite, got {:?}", other),
        }
        assert_eq!(h.record(DOMAIN).await.acme_state.phase(), AcmePhase::Issued);
        assert!(h
            .blobs
            .read_bytes("mastodon_le_certs/foo.example/cert.key")
            .await
            .unwrap()
            .is_some());

        let issued = complete(&h).await.unwrap();
        assert_eq!(issued.cert_url, url("cert", 1));
        assert_eq!(h.ca.state().finalized, 1);
        assert_eq!(h.ca.state().new_orders, 1);
        assert_eq!(h.record(DOMAIN).await.acme_state.phase(), AcmePhase::Issued);
        assert!(h
            .blobs
            .read_bytes("mastodon_le_certs/foo.example/cert.crt")
            .await
            .unwrap()
            .is_some());
    }
}

// ============================================================================
// Issued certificates
// ============================================================================

mod issued {
    use super::*;

    #[tokio::test]
    async fn test_fast_path_rewrites_chain_only() {
        let h = Harness::new();
        let key = rcgen::KeyPair::generate().unwrap();
        let chain = chain_for(DOMAIN, &key);
        let id = h.ca.insert_issued_order(DOMAIN, chain.clone());
        seed_issued(&h, id).await;
        h.blobs
            .write_bytes("mastodon_le_certs/foo.example/cert.key", key.serialize_pem().as_bytes())
            .await
            .unwrap();

        let issued = complete(&h).await.unwrap();
        assert_eq!(issued.cert_url, url("cert", id));

        let stored = h
            .blobs
            .read_bytes("mastodon_le_certs/foo.example/cert.crt")
            .await
            .unwrap();
        assert_eq!(stored, Some(chain.concat()));
        let stored_key = h
            .blobs
            .read_bytes("mastodon_le_certs/foo.example/cert.key")
            .await
            .unwrap();
        assert_eq!(stored_key, Some(key.serialize_pem().into_bytes()));

        let ca = h.ca.state();
        assert_eq!(ca.finalized, 0);
        assert_eq!(ca.accepted, 0);
        assert_eq!(ca.certificate_fetches, 1);
    }

    #[tokio::test]
    async fn test_fast_path_without_key_drops_order() {
        let h = Harness::new();
        let key = rcgen::KeyPair::generate().unwrap();
        let id = h.ca.insert_issued_order(DOMAIN, chain_for(DOMAIN, &key));
        seed_issued(&h, id).await;

        let err = complete(&h).await.unwrap_err();
        assert!(matches!(err, CertError::KeyMaterialLost { .. }));
        assert!(err.requires_rerequest());

        let record = h.record(DOMAIN).await;
        assert_eq!(record.acme_state.phase(), AcmePhase::NoOrder);
        assert!(h
            .blobs
            .read_bytes("mastodon_le_certs/foo.example/cert.crt")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_certificate_status() {
        let h = Harness::new();
        let orchestrator = h.issuer.orchestrator();
        assert_eq!(
            orchestrator
                .certificate_status(DOMAIN, Utc::now())
                .await
                .unwrap(),
            CertificateStatus::Missing
        );

        h.register(DOMAIN).await;
        request(&h).await.unwrap();
        h.lookup.publish_txt(ZONE, &expected_value(1));
        let issued = complete(&h).await.unwrap();

        assert_eq!(
            orchestrator
                .certificate_status(DOMAIN, utc("2029-06-01T00:00:00Z"))
                .await
                .unwrap(),
            CertificateStatus::Valid {
                not_after: issued.not_after
            }
        );
        assert_eq!(
            orchestrator
                .certificate_status(DOMAIN, issued.not_after)
                .await
                .unwrap(),
            CertificateStatus::Expired {
                not_after: issued.not_after
            }
        );
    }
}
