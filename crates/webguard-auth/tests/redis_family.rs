//! Token services against a real Redis, so the Lua procedures run. Without a
//! container runtime the tests return early.

use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::redis::Redis;
use tokio::sync::OnceCell;
use webguard_auth::{FamilyTokenService, KeyMaterial, TokenClaims, TokenConfig, TokenService};
use webguard_cache::{RedisConfig, create_cache_backend};

// Shared Redis container for all tests
static SHARED_REDIS: OnceCell<Option<(ContainerAsync<Redis>, String)>> = OnceCell::const_new();

async fn get_redis_url() -> Option<String> {
    SHARED_REDIS
        .get_or_init(|| async {
            let container = match Redis::default().start().await {
                Ok(container) => container,
                Err(err) => {
                    eprintln!("skipping Redis tests: {err}");
                    return None;
                }
            };
            let host_port = container.get_host_port_ipv4(6379).await.ok()?;
            Some((container, format!("redis://127.0.0.1:{host_port}")))
        })
        .await
        .as_ref()
        .map(|(_, url)| url.clone())
}

async fn family_service() -> Option<FamilyTokenService> {
    let config = RedisConfig {
        enabled: true,
        url: get_redis_url().await?,
        ..RedisConfig::default()
    };
    let cache = create_cache_backend(&config).await.expect("connect to redis");
    let key = KeyMaterial::symmetric(vec![42u8; 64]).unwrap();
    let config = TokenConfig::default().with_family_tracking(true);
    Some(FamilyTokenService::new(cache, &key, config).unwrap())
}

#[tokio::test]
async fn test_redis_family_rotation_and_revocation() {
    let Some(service) = family_service().await else {
        return;
    };
    let claims = TokenClaims::new("redis-user");

    let phone = service.create_token(&claims).await.unwrap();
    let laptop = service.create_token(&claims).await.unwrap();

    let members = service
        .search_token(&phone.refresh_token)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(members.len(), 2);

    let laptop_jti = service
        .validate_refresh_token(&laptop.refresh_token, true)
        .await
        .unwrap()
        .unwrap()
        .jti;
    assert!(service
        .invalidate_family_member(&phone.refresh_token, &laptop_jti)
        .await
        .unwrap());
    assert!(service
        .validate_access_token(&laptop.access_token, true)
        .await
        .unwrap()
        .is_none());

    let rotated = service
        .update_token(&claims, &phone.refresh_token)
        .await
        .unwrap()
        .unwrap();
    assert!(service
        .update_token(&claims, &phone.refresh_token)
        .await
        .unwrap()
        .is_none());

    let members = service
        .search_token(&rotated.refresh_token)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(members.len(), 1);
}
