//! Tokens minted by the service drive the throttle gate.

use std::time::Duration;

use axum::http::Method;
use webguard::config::SigningConfig;
use webguard::{AppConfig, Webguard};
use webguard_auth::TokenClaims;
use webguard_cache::CacheBackend;
use webguard_throttle::{Decision, RequestContext, RuleDeclaration, RuleRegistry};

fn config(family_tracking: bool) -> AppConfig {
    let mut config = AppConfig {
        signing: SigningConfig {
            secret: Some("bearer-gate-secret-bearer-gate-secret!!".to_string()),
            private_key_path: None,
        },
        ..AppConfig::default()
    };
    config.token.family_tracking = family_tracking;
    config
}

fn rules() -> RuleRegistry {
    let mut rules = RuleRegistry::new();
    rules
        .declare(
            "orders",
            RuleDeclaration::new(2, Duration::from_secs(30)).scope(["user", "write"]),
        )
        .unwrap();
    rules
        .declare(
            "orders",
            RuleDeclaration::new(1, Duration::from_secs(30)).scope(["anno"]),
        )
        .unwrap();
    rules
}

fn request(access_token: &str) -> RequestContext {
    RequestContext::new(Method::GET, "/orders")
        .with_header("authorization", &format!("Bearer {access_token}"))
}

#[tokio::test]
async fn test_bearer_user_is_limited_by_scope() {
    for family_tracking in [false, true] {
        let guard = Webguard::with_cache(
            &config(family_tracking),
            rules(),
            CacheBackend::new_local(),
        )
        .unwrap();

        let writer = guard
            .tokens
            .create_token(&TokenClaims::new("w1").with_scope(["write"]))
            .await
            .unwrap();
        let reader = guard
            .tokens
            .create_token(&TokenClaims::new("r1").with_scope(["read"]))
            .await
            .unwrap();

        for _ in 0..2 {
            let decision = guard
                .gate
                .check("orders", &request(&writer.access_token))
                .await
                .unwrap();
            match decision {
                Decision::Admit { identity } => {
                    let identity = identity.unwrap();
                    assert!(identity.is_user());
                    assert_eq!(identity.identifier(), "w1");
                }
                other => panic!("expected admit, got {other:?}"),
            }
        }
        let decision = guard
            .gate
            .check("orders", &request(&writer.access_token))
            .await
            .unwrap();
        assert!(matches!(decision, Decision::Deny(ref denial) if denial.retry_after <= 30));

        for _ in 0..5 {
            let decision = guard
                .gate
                .check("orders", &request(&reader.access_token))
                .await
                .unwrap();
            assert!(decision.is_admitted());
        }
    }
}

#[tokio::test]
async fn test_revoked_token_falls_back_to_anonymous() {
    let guard = Webguard::with_cache(&config(false), rules(), CacheBackend::new_local()).unwrap();
    let pair = guard
        .tokens
        .create_token(&TokenClaims::new("w1").with_scope(["write"]))
        .await
        .unwrap();

    assert!(guard.tokens.invalidate_token(&pair.refresh_token).await.unwrap());

    let decision = guard
        .gate
        .check("orders", &request(&pair.access_token))
        .await
        .unwrap();
    let issued = match decision {
        Decision::Issue(issued) => issued,
        other => panic!("expected a new anonymous session, got {other:?}"),
    };
    assert_eq!(issued.location, "/orders");
    assert!(!issued.identity.is_user());

    let cookie = format!("th-session={}", issued.identity.identifier());
    let anonymous = request(&pair.access_token).with_header("cookie", &cookie);
    assert!(
        guard
            .gate
            .check("orders", &anonymous)
            .await
            .unwrap()
            .is_admitted()
    );
    assert!(matches!(
        guard.gate.check("orders", &anonymous).await.unwrap(),
        Decision::Deny(_)
    ));
}

#[tokio::test]
async fn test_build_rejects_missing_signing_key() {
    let err = Webguard::build(&AppConfig::default(), RuleRegistry::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("signing"));
}

#[tokio::test]
async fn test_disabled_throttle_admits_everyone() {
    let mut config = config(false);
    config.throttle.enabled = false;
    let guard = Webguard::build(&config, rules()).await.unwrap();
    assert_eq!(guard.cache.mode(), "local");

    let anonymous = RequestContext::new(Method::GET, "/orders");
    for _ in 0..3 {
        assert!(
            guard
                .gate
                .check("orders", &anonymous)
                .await
                .unwrap()
                .is_admitted()
        );
    }
}
