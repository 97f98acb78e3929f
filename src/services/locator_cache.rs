//! 定位器缓存 - 业务能力层
//!
//! (页面 URL, 指令) → 之前由 AI 解析出来的定位器
//!
//! 并发模型：条目存放在 `DashMap` 中，所有修改都通过 `get_mut` 在条目所在分片的写锁内完成，
//! 因此同一个 key 的"解析结果写入"和"失败计数更新"天然串行，不会丢失更新。

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{AppError, AppResult};
use crate::services::ai_agent::ResolvedLocator;

/// 调试用元数据
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_text: Option<String>,
}

/// 缓存条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub page_url: String,
    pub instruction: String,
    pub locator: String,
    pub resolution_latency_ms: u64,
    pub hit_count: u64,
    pub consecutive_failures: u32,
    pub valid: bool,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub metadata: CacheMetadata,
}

/// 缓存统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub valid_entries: usize,
    pub hits: u64,
    pub misses: u64,
}

/// 规范化页面 URL：去掉 fragment 和路径末尾的 `/`，scheme/host 小写
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    match Url::parse(trimmed) {
        Ok(mut url) => {
            url.set_fragment(None);
            let path = url.path().to_string();
            if path.len() > 1 && path.ends_with('/') {
                url.set_path(path.trim_end_matches('/'));
            }
            let mut normalized = url.to_string();
            if url.path() == "/" && url.query().is_none() && normalized.ends_with('/') {
                normalized.pop();
            }
            normalized
        }
        Err(_) => trimmed.trim_end_matches('/').to_ascii_lowercase(),
    }
}

/// 规范化指令：折叠空白
pub fn normalize_instruction(instruction: &str) -> String {
    instruction.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// 缓存 key：规范化 URL 与指令的 SHA-256
///
/// 纯函数：同样的输入总是得到同样的 key。
pub fn cache_key(page_url: &str, instruction: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_url(page_url).as_bytes());
    hasher.update([0x1f]);
    hasher.update(normalize_instruction(instruction).as_bytes());
    hex::encode(hasher.finalize())
}

/// 定位器缓存
pub struct LocatorCache {
    entries: DashMap<String, CacheEntry>,
    ttl: chrono::Duration,
    failure_threshold: u32,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl LocatorCache {
    pub fn new(ttl: chrono::Duration, failure_threshold: u32) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            failure_threshold: failure_threshold.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// 查询缓存
    ///
    /// 失效或超过 TTL 的条目视为未命中；命中时 hit_count 加一，返回的快照包含本次计数。
    pub fn get(&self, page_url: &str, instruction: &str) -> Option<CacheEntry> {
        let key = cache_key(page_url, instruction);
        let now = Utc::now();

        let hit = match self.entries.get_mut(&key) {
            Some(mut entry) if entry.valid && !self.is_stale(&entry, now) => {
                entry.hit_count += 1;
                Some(entry.clone())
            }
            Some(entry) => {
                debug!(
                    "缓存条目不可用 (valid={}, 上次更新 {}): {}",
                    entry.valid, entry.last_updated, entry.instruction
                );
                None
            }
            None => None,
        };

        match &hit {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        hit
    }

    /// 读取条目但不计入命中
    pub fn peek(&self, page_url: &str, instruction: &str) -> Option<CacheEntry> {
        self.entries
            .get(&cache_key(page_url, instruction))
            .map(|entry| entry.clone())
    }

    /// 写入一次成功的解析结果
    ///
    /// 已有条目时视为重新解析：替换定位器、清零失败计数、恢复有效，保留命中次数。
    pub fn put(&self, page_url: &str, instruction: &str, resolved: &ResolvedLocator) -> CacheEntry {
        let key = cache_key(page_url, instruction);
        let now = Utc::now();
        let metadata = CacheMetadata {
            page_title: resolved.page_title.clone(),
            element_text: resolved.element_text.clone(),
        };

        let entry = self
            .entries
            .entry(key.clone())
            .and_modify(|existing| {
                existing.locator = resolved.locator.clone();
                existing.resolution_latency_ms = resolved.latency_ms;
                existing.consecutive_failures = 0;
                existing.valid = true;
                existing.last_updated = now;
                existing.metadata = metadata.clone();
            })
            .or_insert_with(|| CacheEntry {
                key,
                page_url: normalize_url(page_url),
                instruction: normalize_instruction(instruction),
                locator: resolved.locator.clone(),
                resolution_latency_ms: resolved.latency_ms,
                hit_count: 0,
                consecutive_failures: 0,
                valid: true,
                created_at: now,
                last_updated: now,
                metadata: metadata.clone(),
            })
            .clone();

        debug!("缓存写入: \"{}\" → {}", entry.instruction, entry.locator);
        entry
    }

    /// 记录一次使用缓存定位器后的执行结果
    ///
    /// 连续失败达到阈值后条目失效；任何一次成功都会清零失败计数。
    /// 条目不存在时返回 false。
    pub fn mark_outcome(&self, page_url: &str, instruction: &str, success: bool) -> bool {
        let key = cache_key(page_url, instruction);
        let Some(mut entry) = self.entries.get_mut(&key) else {
            return false;
        };

        if success {
            entry.consecutive_failures = 0;
        } else {
            entry.consecutive_failures += 1;
            if entry.valid && entry.consecutive_failures >= self.failure_threshold {
                entry.valid = false;
                warn!(
                    "缓存条目连续失败 {} 次，已失效: \"{}\" → {}",
                    entry.consecutive_failures, entry.instruction, entry.locator
                );
            }
        }
        true
    }

    /// 删除所有失效条目，返回删除数量
    pub fn purge_invalid(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.valid);
        before.saturating_sub(self.entries.len())
    }

    /// 删除上次更新早于 `max_age` 的条目，返回删除数量
    pub fn purge_stale(&self, max_age: chrono::Duration) -> usize {
        let now = Utc::now();
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| now.signed_duration_since(entry.last_updated) < max_age);
        before.saturating_sub(self.entries.len())
    }

    pub fn ttl(&self) -> chrono::Duration {
        self.ttl
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            valid_entries: self.entries.iter().filter(|e| e.valid).count(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// 将缓存保存为 JSON 快照
    pub fn save_snapshot(&self, path: &Path) -> AppResult<usize> {
        let entries: Vec<CacheEntry> = self.entries.iter().map(|e| e.value().clone()).collect();
        let json = serde_json::to_vec_pretty(&entries)?;

        let tmp_path = path.with_extension("tmp");
        std::fs::write(&tmp_path, json)
            .map_err(|e| AppError::file_failed(tmp_path.display().to_string(), e))?;
        std::fs::rename(&tmp_path, path)
            .map_err(|e| AppError::file_failed(path.display().to_string(), e))?;

        info!("💾 定位器缓存已保存: {} 条 → {}", entries.len(), path.display());
        Ok(entries.len())
    }

    /// 从 JSON 快照加载缓存；内存中已有的 key 不会被覆盖
    pub fn load_snapshot(&self, path: &Path) -> AppResult<usize> {
        let content = std::fs::read(path)
            .map_err(|e| AppError::file_failed(path.display().to_string(), e))?;
        let entries: Vec<CacheEntry> = serde_json::from_slice(&content)?;

        let mut loaded = 0;
        for entry in entries {
            let key = cache_key(&entry.page_url, &entry.instruction);
            if !self.entries.contains_key(&key) {
                self.entries.insert(key.clone(), CacheEntry { key, ..entry });
                loaded += 1;
            }
        }

        info!("📂 定位器缓存已加载: {} 条 ← {}", loaded, path.display());
        Ok(loaded)
    }

    fn is_stale(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(entry.last_updated) >= self.ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const PAGE: &str = "https://shop.example.com/cart/";
    const INSTRUCTION: &str = "the checkout button";

    fn resolved(locator: &str) -> ResolvedLocator {
        ResolvedLocator {
            locator: locator.to_string(),
            latency_ms: 120,
            page_title: Some("Cart".to_string()),
            element_text: Some("Checkout".to_string()),
        }
    }

    fn cache() -> LocatorCache {
        LocatorCache::new(chrono::Duration::hours(168), 3)
    }

    #[test]
    fn test_cache_key_is_pure() {
        assert_eq!(cache_key(PAGE, INSTRUCTION), cache_key(PAGE, INSTRUCTION));
        assert_eq!(
            cache_key("https://shop.example.com/cart#top", "the  checkout\tbutton"),
            cache_key(PAGE, INSTRUCTION)
        );
        assert_ne!(cache_key(PAGE, INSTRUCTION), cache_key(PAGE, "the cancel button"));
        assert_eq!(cache_key(PAGE, INSTRUCTION).len(), 64);
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(normalize_url("HTTPS://Example.com/"), "https://example.com");
        assert_eq!(normalize_url("https://example.com/a/b/#frag"), "https://example.com/a/b");
        assert_eq!(normalize_url("https://example.com/a?x=1"), "https://example.com/a?x=1");
        assert_eq!(normalize_url("about:blank"), "about:blank");
    }

    #[test]
    fn test_new_entry_has_zero_hits_and_get_counts_once() {
        let cache = cache();
        assert!(cache.get(PAGE, INSTRUCTION).is_none());

        let entry = cache.put(PAGE, INSTRUCTION, &resolved("#checkout"));
        assert_eq!(entry.hit_count, 0);
        assert!(entry.valid);

        let hit = cache.get(PAGE, INSTRUCTION).unwrap();
        assert_eq!(hit.locator, "#checkout");
        assert_eq!(hit.hit_count, 1);
        assert_eq!(cache.peek(PAGE, INSTRUCTION).unwrap().hit_count, 1);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_three_failures_invalidate_and_reput_revalidates() {
        let cache = cache();
        cache.put(PAGE, INSTRUCTION, &resolved("#old"));

        assert!(cache.mark_outcome(PAGE, INSTRUCTION, false));
        assert!(cache.mark_outcome(PAGE, INSTRUCTION, false));
        assert!(cache.get(PAGE, INSTRUCTION).is_some());
        assert!(cache.mark_outcome(PAGE, INSTRUCTION, false));

        assert!(cache.get(PAGE, INSTRUCTION).is_none());
        let entry = cache.peek(PAGE, INSTRUCTION).unwrap();
        assert!(!entry.valid);
        assert_eq!(entry.consecutive_failures, 3);

        let entry = cache.put(PAGE, INSTRUCTION, &resolved("#new"));
        assert!(entry.valid);
        assert_eq!(entry.consecutive_failures, 0);
        assert_eq!(entry.hit_count, 1);
        assert_eq!(cache.get(PAGE, INSTRUCTION).unwrap().locator, "#new");
    }

    #[test]
    fn test_success_resets_failure_counter() {
        let cache = cache();
        cache.put(PAGE, INSTRUCTION, &resolved("#go"));
        cache.mark_outcome(PAGE, INSTRUCTION, false);
        cache.mark_outcome(PAGE, INSTRUCTION, false);
        cache.mark_outcome(PAGE, INSTRUCTION, true);
        cache.mark_outcome(PAGE, INSTRUCTION, false);
        assert!(cache.peek(PAGE, INSTRUCTION).unwrap().valid);
        assert!(!cache.mark_outcome(PAGE, "unknown", true));
    }

    #[test]
    fn test_expired_entry_is_a_miss_and_purgeable() {
        let cache = LocatorCache::new(chrono::Duration::zero(), 3);
        cache.put(PAGE, INSTRUCTION, &resolved("#go"));
        assert!(cache.get(PAGE, INSTRUCTION).is_none());
        assert!(cache.peek(PAGE, INSTRUCTION).unwrap().valid);

        assert_eq!(cache.purge_stale(chrono::Duration::hours(1)), 0);
        assert_eq!(cache.purge_stale(chrono::Duration::zero()), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_purge_invalid_only_removes_invalid() {
        let cache = cache();
        cache.put(PAGE, INSTRUCTION, &resolved("#a"));
        cache.put(PAGE, "the search box", &resolved("#q"));
        for _ in 0..3 {
            cache.mark_outcome(PAGE, INSTRUCTION, false);
        }
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.purge_invalid(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.peek(PAGE, "the search box").is_some());
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let cache = Arc::new(LocatorCache::new(chrono::Duration::hours(1), 10_000));
        cache.put(PAGE, INSTRUCTION, &resolved("#go"));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        cache.get(PAGE, INSTRUCTION);
                        cache.mark_outcome(PAGE, INSTRUCTION, false);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let entry = cache.peek(PAGE, INSTRUCTION).unwrap();
        assert_eq!(entry.hit_count, 2_000);
        assert_eq!(entry.consecutive_failures, 2_000);
    }

    #[test]
    fn test_snapshot_round_trip_keeps_counters() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");

        let cache = cache();
        cache.put(PAGE, INSTRUCTION, &resolved("#go"));
        cache.get(PAGE, INSTRUCTION);
        assert_eq!(cache.save_snapshot(&path).unwrap(), 1);

        let restored = LocatorCache::new(chrono::Duration::hours(168), 3);
        assert_eq!(restored.load_snapshot(&path).unwrap(), 1);
        let entry = restored.peek(PAGE, INSTRUCTION).unwrap();
        assert_eq!(entry.locator, "#go");
        assert_eq!(entry.hit_count, 1);
        assert_eq!(entry.metadata.page_title.as_deref(), Some("Cart"));
    }
}
