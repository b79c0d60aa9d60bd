//! In-process cache store.
//!
//! Entries live in a [`DashMap`]. Plain operations (get/set/delete) share a
//! read gate; atomic procedures take the gate exclusively through
//! [`LocalStore::transaction`], so no plain operation can observe a procedure
//! half-applied. Expired entries are dropped lazily on access.

use std::collections::HashMap;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::{RwLock, RwLockWriteGuard};

use crate::backend::SetOptions;
use crate::clock::unix_now;
use crate::error::CacheError;
use crate::CacheResult;

/// Value stored under a key.
#[derive(Clone, Debug, PartialEq)]
pub enum LocalValue {
    /// Opaque bytes written with `set`.
    Bytes(Vec<u8>),
    /// Sorted set of member -> score, as used by token families and windows.
    Sorted(HashMap<String, f64>),
}

/// A stored value with its absolute expiry (unix seconds).
#[derive(Clone, Debug)]
pub struct LocalEntry {
    pub value: LocalValue,
    pub expires_at: Option<f64>,
}

impl LocalEntry {
    /// Create a new entry.
    pub fn new(value: LocalValue, expires_at: Option<f64>) -> Self {
        Self { value, expires_at }
    }

    /// Check if this entry has expired at `now`.
    pub fn is_expired(&self, now: f64) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

/// Single-node cache store used for tests and single-instance deployments.
#[derive(Debug, Default)]
pub struct LocalStore {
    entries: DashMap<String, LocalEntry>,
    gate: RwLock<()>,
}

impl LocalStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, including ones that expired but were not
    /// touched since.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let now = unix_now();
        let _gate = self.gate.read();

        let expired = match self.entries.get(key) {
            None => return Ok(None),
            Some(entry) if entry.is_expired(now) => true,
            Some(entry) => {
                return match &entry.value {
                    LocalValue::Bytes(data) => Ok(Some(data.clone())),
                    LocalValue::Sorted(_) => Err(CacheError::wrong_type(key)),
                };
            }
        };

        if expired {
            self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        }
        Ok(None)
    }

    /// Store `value` under `key`. Returns `false` only when `only_if_absent`
    /// was requested and a live value already exists.
    pub fn set(&self, key: &str, value: &[u8], options: SetOptions) -> bool {
        let now = unix_now();
        let _gate = self.gate.read();

        let entry = LocalEntry::new(
            LocalValue::Bytes(value.to_vec()),
            options.expiry.map(|expiry| expiry.deadline(now)),
        );

        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if options.only_if_absent && !occupied.get().is_expired(now) {
                    return false;
                }
                occupied.insert(entry);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
            }
        }
        true
    }

    /// Remove `key`. Returns `true` if a live value was removed.
    pub fn delete(&self, key: &str) -> bool {
        let now = unix_now();
        let _gate = self.gate.read();

        self.entries
            .remove(key)
            .is_some_and(|(_, entry)| !entry.is_expired(now))
    }

    /// Open an exclusive transaction for running an atomic procedure.
    pub fn transaction(&self) -> LocalTxn<'_> {
        LocalTxn {
            _gate: self.gate.write(),
            entries: &self.entries,
            now: unix_now(),
        }
    }
}

/// Exclusive view of a [`LocalStore`] used by atomic procedures.
///
/// Mirrors the subset of Redis commands the procedures' Lua scripts use.
pub struct LocalTxn<'a> {
    _gate: RwLockWriteGuard<'a, ()>,
    entries: &'a DashMap<String, LocalEntry>,
    now: f64,
}

impl LocalTxn<'_> {
    /// Store clock at the moment the transaction was opened.
    pub fn now(&self) -> f64 {
        self.now
    }

    fn purge(&self, key: &str) {
        let now = self.now;
        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
    }

    pub fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        self.purge(key);
        match self.entries.get(key) {
            None => Ok(None),
            Some(entry) => match &entry.value {
                LocalValue::Bytes(data) => Ok(Some(data.clone())),
                LocalValue::Sorted(_) => Err(CacheError::wrong_type(key)),
            },
        }
    }

    pub fn set(&mut self, key: &str, value: Vec<u8>, expires_at: Option<f64>) {
        self.entries.insert(
            key.to_string(),
            LocalEntry::new(LocalValue::Bytes(value), expires_at),
        );
    }

    /// SET ... NX. Returns `false` if a live value is already present.
    pub fn set_absent(&mut self, key: &str, value: Vec<u8>, expires_at: Option<f64>) -> bool {
        self.purge(key);
        if self.entries.contains_key(key) {
            return false;
        }
        self.set(key, value, expires_at);
        true
    }

    pub fn delete(&mut self, key: &str) -> bool {
        let now = self.now;
        self.entries
            .remove(key)
            .is_some_and(|(_, entry)| !entry.is_expired(now))
    }

    /// Set an absolute expiry on an existing key.
    pub fn expire_at(&mut self, key: &str, at: f64) -> bool {
        self.purge(key);
        match self.entries.get_mut(key) {
            Some(mut entry) => {
                entry.expires_at = Some(at);
                true
            }
            None => false,
        }
    }

    pub fn zadd(&mut self, key: &str, score: f64, member: &str) -> CacheResult<()> {
        self.purge(key);
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| LocalEntry::new(LocalValue::Sorted(HashMap::new()), None));

        match &mut entry.value {
            LocalValue::Sorted(set) => {
                set.insert(member.to_string(), score);
                Ok(())
            }
            LocalValue::Bytes(_) => Err(CacheError::wrong_type(key)),
        }
    }

    pub fn zscore(&self, key: &str, member: &str) -> CacheResult<Option<f64>> {
        self.purge(key);
        match self.entries.get(key) {
            None => Ok(None),
            Some(entry) => match &entry.value {
                LocalValue::Sorted(set) => Ok(set.get(member).copied()),
                LocalValue::Bytes(_) => Err(CacheError::wrong_type(key)),
            },
        }
    }

    pub fn zrem(&mut self, key: &str, member: &str) -> CacheResult<bool> {
        self.retain_sorted(key, |candidate, _| candidate != member)
            .map(|removed| removed > 0)
    }

    /// Remove every member scored strictly below `cutoff`.
    pub fn zrem_older_than(&mut self, key: &str, cutoff: f64) -> CacheResult<usize> {
        self.retain_sorted(key, |_, score| score >= cutoff)
    }

    pub fn zcard(&self, key: &str) -> CacheResult<usize> {
        self.zrange(key).map(|members| members.len())
    }

    /// All members ordered by ascending score.
    pub fn zrange(&self, key: &str) -> CacheResult<Vec<(String, f64)>> {
        self.purge(key);
        let mut members: Vec<(String, f64)> = match self.entries.get(key) {
            None => return Ok(Vec::new()),
            Some(entry) => match &entry.value {
                LocalValue::Sorted(set) => set
                    .iter()
                    .map(|(member, score)| (member.clone(), *score))
                    .collect(),
                LocalValue::Bytes(_) => return Err(CacheError::wrong_type(key)),
            },
        };
        members.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        Ok(members)
    }

    // Empty sorted sets disappear, like in Redis.
    fn retain_sorted(
        &mut self,
        key: &str,
        keep: impl Fn(&str, f64) -> bool,
    ) -> CacheResult<usize> {
        self.purge(key);
        let (removed, now_empty) = match self.entries.get_mut(key) {
            None => return Ok(0),
            Some(mut entry) => match &mut entry.value {
                LocalValue::Sorted(set) => {
                    let before = set.len();
                    set.retain(|member, score| keep(member.as_str(), *score));
                    (before - set.len(), set.is_empty())
                }
                LocalValue::Bytes(_) => return Err(CacheError::wrong_type(key)),
            },
        };

        if now_empty {
            self.entries.remove(key);
        }
        Ok(removed)
    }
}
