//! Atomic procedures behind family tracking.
//!
//! A family is a sorted set `jwt_sub_<sub>` of refresh-token ids scored by
//! their issue time. Saving, revoking and listing family members each run as
//! one procedure so the record, the family index and the denylist never
//! disagree.

use std::sync::LazyLock;

use redis::Script;
use serde_json::Value;
use webguard_cache::{AtomicProcedure, CacheError, CacheResult, LocalTxn};

use crate::token::record::{self, ACCESS_JTI};

fn arg(value: impl ToString) -> Vec<u8> {
    value.to_string().into_bytes()
}

static SAVE_REFRESH_SCRIPT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
redis.call('SET', KEYS[1], ARGV[1], 'EXAT', ARGV[2])
redis.call('ZADD', KEYS[2], ARGV[3], ARGV[4])
redis.call('EXPIRE', KEYS[2], ARGV[5])
return 1
",
    )
});

/// Store a refresh record and index it in its subject's family.
#[derive(Debug, Clone)]
pub(crate) struct SaveRefresh {
    pub record_key: String,
    pub family_key: String,
    pub jti: String,
    pub record: Vec<u8>,
    pub issued_at: i64,
    pub expires_at: i64,
    pub family_ttl: i64,
}

impl AtomicProcedure for SaveRefresh {
    type Output = ();

    const NAME: &'static str = "save_refresh";

    fn script(&self) -> &'static Script {
        &SAVE_REFRESH_SCRIPT
    }

    fn keys(&self) -> Vec<String> {
        vec![self.record_key.clone(), self.family_key.clone()]
    }

    fn args(&self) -> Vec<Vec<u8>> {
        vec![
            self.record.clone(),
            arg(self.expires_at),
            arg(self.issued_at),
            arg(&self.jti),
            arg(self.family_ttl),
        ]
    }

    fn run_local(&self, txn: &mut LocalTxn<'_>) -> CacheResult<()> {
        txn.set(
            &self.record_key,
            self.record.clone(),
            Some(self.expires_at as f64),
        );
        txn.zadd(&self.family_key, self.issued_at as f64, &self.jti)?;
        let family_expiry = txn.now() + self.family_ttl as f64;
        txn.expire_at(&self.family_key, family_expiry);
        Ok(())
    }
}

static INVALIDATE_REFRESH_SCRIPT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
local now = tonumber(ARGV[1])
local access_ttl = tonumber(ARGV[2])
local jti = ARGV[3]
local issued_at
local access_jti
if ARGV[4] == 'member' then
    issued_at = redis.call('ZSCORE', KEYS[1], jti)
    if not issued_at then
        return 0
    end
    issued_at = tonumber(issued_at)
    local record = redis.call('GET', KEYS[2])
    if not record then
        redis.call('ZREM', KEYS[1], jti)
        return 0
    end
    access_jti = cmsgpack.unpack(record)['access_jti']
else
    if redis.call('EXISTS', KEYS[2]) == 0 then
        return 0
    end
    issued_at = tonumber(ARGV[5])
    access_jti = ARGV[6]
end
local access_exp = issued_at + access_ttl
if type(access_jti) == 'string' and access_jti ~= '' and access_exp > now then
    redis.call('SET', ARGV[7] .. access_jti, '1', 'EXAT', math.ceil(access_exp), 'NX')
end
redis.call('DEL', KEYS[2])
redis.call('ZREM', KEYS[1], jti)
return 1
",
    )
});

/// Which refresh token an [`InvalidateRefresh`] targets.
#[derive(Debug, Clone)]
pub(crate) enum InvalidateTarget {
    /// The presented, already validated token. Its issue time and access id
    /// are known to the caller.
    Own {
        issued_at: i64,
        access_jti: Option<String>,
    },
    /// Another member of the caller's family, looked up by id. Issue time
    /// comes from the family index, the access id from the stored record.
    Member,
}

/// Revoke one refresh token: denylist its access token while that could
/// still be live, delete the record and drop it from the family.
///
/// Yields `true` only when this call removed the record.
#[derive(Debug, Clone)]
pub(crate) struct InvalidateRefresh {
    pub family_key: String,
    pub record_key: String,
    pub denylist_prefix: &'static str,
    pub jti: String,
    pub target: InvalidateTarget,
    pub now: i64,
    pub access_ttl: i64,
}

impl AtomicProcedure for InvalidateRefresh {
    type Output = bool;

    const NAME: &'static str = "invalidate_refresh";

    fn script(&self) -> &'static Script {
        &INVALIDATE_REFRESH_SCRIPT
    }

    fn keys(&self) -> Vec<String> {
        vec![self.family_key.clone(), self.record_key.clone()]
    }

    fn args(&self) -> Vec<Vec<u8>> {
        let (mode, issued_at, access_jti) = match &self.target {
            InvalidateTarget::Own {
                issued_at,
                access_jti,
            } => ("own", *issued_at, access_jti.clone().unwrap_or_default()),
            InvalidateTarget::Member => ("member", 0, String::new()),
        };
        vec![
            arg(self.now),
            arg(self.access_ttl),
            arg(&self.jti),
            arg(mode),
            arg(issued_at),
            arg(access_jti),
            arg(self.denylist_prefix),
        ]
    }

    fn run_local(&self, txn: &mut LocalTxn<'_>) -> CacheResult<bool> {
        let (issued_at, access_jti) = match &self.target {
            InvalidateTarget::Member => {
                let Some(score) = txn.zscore(&self.family_key, &self.jti)? else {
                    return Ok(false);
                };
                let Some(bytes) = txn.get(&self.record_key)? else {
                    txn.zrem(&self.family_key, &self.jti)?;
                    return Ok(false);
                };
                let stored = record::decode(&bytes).map_err(|e| CacheError::codec(e.to_string()))?;
                let access_jti = stored
                    .get(ACCESS_JTI)
                    .and_then(Value::as_str)
                    .map(str::to_string);
                (score, access_jti)
            }
            InvalidateTarget::Own {
                issued_at,
                access_jti,
            } => {
                if txn.get(&self.record_key)?.is_none() {
                    return Ok(false);
                }
                (*issued_at as f64, access_jti.clone())
            }
        };

        let access_exp = issued_at + self.access_ttl as f64;
        if access_exp > self.now as f64 {
            if let Some(access_jti) = access_jti.filter(|jti| !jti.is_empty()) {
                let key = format!("{}{}", self.denylist_prefix, access_jti);
                txn.set_absent(&key, b"1".to_vec(), Some(access_exp.ceil()));
            }
        }

        txn.delete(&self.record_key);
        txn.zrem(&self.family_key, &self.jti)?;
        Ok(true)
    }
}

static SEARCH_FAMILY_SCRIPT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
local cutoff = tonumber(ARGV[1]) - tonumber(ARGV[2])
redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', '(' .. cutoff)
return redis.call('ZRANGE', KEYS[1], 0, -1)
",
    )
});

/// Prune family members older than the refresh lifetime and list the rest,
/// oldest first.
#[derive(Debug, Clone)]
pub(crate) struct SearchFamily {
    pub family_key: String,
    pub now: i64,
    pub refresh_ttl: i64,
}

impl AtomicProcedure for SearchFamily {
    type Output = Vec<String>;

    const NAME: &'static str = "search_family";

    fn script(&self) -> &'static Script {
        &SEARCH_FAMILY_SCRIPT
    }

    fn keys(&self) -> Vec<String> {
        vec![self.family_key.clone()]
    }

    fn args(&self) -> Vec<Vec<u8>> {
        vec![arg(self.now), arg(self.refresh_ttl)]
    }

    fn run_local(&self, txn: &mut LocalTxn<'_>) -> CacheResult<Vec<String>> {
        let cutoff = (self.now - self.refresh_ttl) as f64;
        txn.zrem_older_than(&self.family_key, cutoff)?;
        Ok(txn
            .zrange(&self.family_key)?
            .into_iter()
            .map(|(member, _)| member)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;
    use webguard_cache::LocalStore;

    fn save(store: &LocalStore, jti: &str, issued_at: i64, access_jti: &str) {
        let procedure = SaveRefresh {
            record_key: format!("jwt_{jti}"),
            family_key: "jwt_sub_u1".to_string(),
            jti: jti.to_string(),
            record: record::encode(&Map::new(), access_jti).unwrap(),
            issued_at,
            expires_at: issued_at + 600,
            family_ttl: 600,
        };
        procedure.run_local(&mut store.transaction()).unwrap();
    }

    fn search(store: &LocalStore, now: i64) -> Vec<String> {
        SearchFamily {
            family_key: "jwt_sub_u1".to_string(),
            now,
            refresh_ttl: 600,
        }
        .run_local(&mut store.transaction())
        .unwrap()
    }

    fn invalidate_member(store: &LocalStore, jti: &str, now: i64) -> bool {
        InvalidateRefresh {
            family_key: "jwt_sub_u1".to_string(),
            record_key: format!("jwt_{jti}"),
            denylist_prefix: "jwt_invalidate_",
            jti: jti.to_string(),
            target: InvalidateTarget::Member,
            now,
            access_ttl: 60,
        }
        .run_local(&mut store.transaction())
        .unwrap()
    }

    #[test]
    fn test_search_lists_oldest_first_and_prunes() {
        let now = webguard_cache::unix_now_secs();
        let store = LocalStore::new();
        save(&store, "b", now - 10, "ab");
        save(&store, "a", now - 20, "aa");
        save(&store, "stale", now - 601, "as");

        assert_eq!(search(&store, now), vec!["a", "b"]);
    }

    #[test]
    fn test_member_invalidation_denylists_live_access_token() {
        let now = webguard_cache::unix_now_secs();
        let store = LocalStore::new();
        save(&store, "a", now - 10, "access-a");

        assert!(invalidate_member(&store, "a", now));
        assert_eq!(store.get("jwt_invalidate_access-a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.get("jwt_a").unwrap(), None);
        assert!(search(&store, now).is_empty());

        // Second attempt finds nothing to remove.
        assert!(!invalidate_member(&store, "a", now));
    }

    #[test]
    fn test_member_invalidation_skips_expired_access_token() {
        let now = webguard_cache::unix_now_secs();
        let store = LocalStore::new();
        save(&store, "old", now - 120, "access-old");

        assert!(invalidate_member(&store, "old", now));
        assert_eq!(store.get("jwt_invalidate_access-old").unwrap(), None);
    }

    #[test]
    fn test_member_without_record_is_dropped() {
        let now = webguard_cache::unix_now_secs();
        let store = LocalStore::new();
        save(&store, "a", now - 10, "access-a");
        store.delete("jwt_a");

        assert!(!invalidate_member(&store, "a", now));
        assert!(search(&store, now).is_empty());
    }

    #[test]
    fn test_own_invalidation_requires_record() {
        let now = webguard_cache::unix_now_secs();
        let store = LocalStore::new();
        let procedure = InvalidateRefresh {
            family_key: "jwt_sub_u1".to_string(),
            record_key: "jwt_a".to_string(),
            denylist_prefix: "jwt_invalidate_",
            jti: "a".to_string(),
            target: InvalidateTarget::Own {
                issued_at: now,
                access_jti: Some("access-a".to_string()),
            },
            now,
            access_ttl: 60,
        };

        assert!(!procedure.run_local(&mut store.transaction()).unwrap());
        assert_eq!(store.get("jwt_invalidate_access-a").unwrap(), None);

        save(&store, "a", now, "access-a");
        assert!(procedure.run_local(&mut store.transaction()).unwrap());
        assert!(store.get("jwt_invalidate_access-a").unwrap().is_some());
    }

    #[test]
    fn test_invalidate_args_layout() {
        let procedure = InvalidateRefresh {
            family_key: "f".to_string(),
            record_key: "r".to_string(),
            denylist_prefix: "d_",
            jti: "j".to_string(),
            target: InvalidateTarget::Member,
            now: 100,
            access_ttl: 60,
        };
        assert_eq!(procedure.keys(), vec!["f", "r"]);
        let args = procedure.args();
        assert_eq!(args[0], b"100".to_vec());
        assert_eq!(args[3], b"member".to_vec());
        assert_eq!(args[6], b"d_".to_vec());
    }
}
