//! Read-through redis cache of per-food profiles.
//!
//! The cache is best effort: every redis failure is logged and treated as a
//! miss, so reads fall back to the store.

use std::ops::DerefMut;
use std::time::Duration;

use log::warn;
use r2d2_redis::redis::{Commands, RedisError};
use r2d2_redis::{r2d2, RedisConnectionManager};

use crate::error::{Error, Result};
use crate::scoring::FoodProfile;

pub type RedisPool = r2d2::Pool<RedisConnectionManager>;

const CACHE_POOL_MAX_OPEN: u32 = 16;
const CACHE_POOL_MIN_IDLE: u32 = 8;
const CACHE_POOL_EXPIRE_SECONDS: u64 = 60;

#[derive(Clone)]
pub struct ProfileCache {
    pool: Option<RedisPool>,
    ttl_seconds: usize,
}

impl ProfileCache {
    pub fn disabled() -> Self {
        Self {
            pool: None,
            ttl_seconds: 0,
        }
    }

    pub fn connect(redis_url: &str, ttl_seconds: usize) -> Result<Self> {
        let manager = RedisConnectionManager::new(redis_url)
            .map_err(|e| Error::Storage(format!("redis: {e}")))?;
        let pool = r2d2::Pool::builder()
            .max_size(CACHE_POOL_MAX_OPEN)
            .max_lifetime(Some(Duration::from_secs(CACHE_POOL_EXPIRE_SECONDS)))
            .min_idle(Some(CACHE_POOL_MIN_IDLE))
            .build(manager)
            .map_err(|e| Error::Storage(format!("redis pool: {e}")))?;
        Ok(Self {
            pool: Some(pool),
            ttl_seconds,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.pool.is_some()
    }

    pub fn get(&self, food_id: i32) -> Option<FoodProfile> {
        let pool = self.pool.as_ref()?;
        let mut conn = pool
            .get()
            .map_err(|e| warn!("profile cache unavailable: {e}"))
            .ok()?;
        let bytes: std::result::Result<Vec<u8>, RedisError> = conn.deref_mut().get(key(food_id));
        match bytes {
            // redis answers a missing key with an empty value
            Ok(bytes) if bytes.is_empty() => None,
            Ok(bytes) => decode(&bytes),
            Err(e) => {
                warn!("profile cache read for food {food_id} failed: {e}");
                None
            }
        }
    }

    pub fn put(&self, profile: &FoodProfile) {
        let Some(pool) = self.pool.as_ref() else {
            return;
        };
        let bytes = match bincode::serialize(profile) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("cannot encode profile of food {}: {e}", profile.food.id);
                return;
            }
        };
        let written = pool
            .get()
            .map_err(|e| e.to_string())
            .and_then(|mut conn| {
                conn.deref_mut()
                    .set_ex::<_, _, ()>(key(profile.food.id), bytes, self.ttl_seconds)
                    .map_err(|e| e.to_string())
            });
        if let Err(e) = written {
            warn!("profile cache write for food {} failed: {e}", profile.food.id);
        }
    }

    /// Drops cached profiles of foods whose contents changed.
    pub fn invalidate<I>(&self, food_ids: I)
    where
        I: IntoIterator<Item = i32>,
    {
        let Some(pool) = self.pool.as_ref() else {
            return;
        };
        let keys: Vec<String> = food_ids.into_iter().map(key).collect();
        if keys.is_empty() {
            return;
        }
        let removed = pool
            .get()
            .map_err(|e| e.to_string())
            .and_then(|mut conn| conn.deref_mut().del::<_, ()>(keys).map_err(|e| e.to_string()));
        if let Err(e) = removed {
            warn!("profile cache invalidation failed: {e}");
        }
    }
}

fn key(food_id: i32) -> String {
    format!("food:profile:{food_id}")
}

fn decode(bytes: &[u8]) -> Option<FoodProfile> {
    bincode::deserialize(bytes)
        .map_err(|e| warn!("discarding undecodable cached profile: {e}"))
        .ok()
}
