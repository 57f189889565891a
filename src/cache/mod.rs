use anyhow::Result;
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs;

use crate::config::CacheConfig;

/// 模型回复的磁盘缓存，key为 模型名+prompt 的MD5
pub struct CacheManager {
    config: CacheConfig,
    hits: AtomicUsize,
    misses: AtomicUsize,
    writes: AtomicUsize,
}

/// 缓存条目
#[derive(Debug, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub data: T,
    pub timestamp: u64,
    /// prompt的MD5哈希值，用于缓存键的生成和验证
    pub prompt_hash: String,
    /// 生成该回复的模型
    pub model_name: String,
}

/// 命中与写入统计
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    pub writes: usize,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

impl CacheManager {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// 生成缓存键
    pub fn hash_prompt(&self, model_name: &str, prompt: &str) -> String {
        let mut hasher = Md5::new();
        hasher.update(model_name.as_bytes());
        hasher.update([0u8]);
        hasher.update(prompt.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// 获取缓存文件路径
    fn get_cache_path(&self, category: &str, hash: &str) -> PathBuf {
        self.config
            .cache_dir
            .join(category)
            .join(format!("{}.json", hash))
    }

    /// 检查缓存是否过期
    fn is_expired(&self, timestamp: u64) -> bool {
        let expire_seconds = self.config.expire_hours * 3600;
        now_secs().saturating_sub(timestamp) > expire_seconds
    }

    /// 获取缓存；读取或反序列化失败都按未命中处理
    pub async fn get<T>(&self, category: &str, model_name: &str, prompt: &str) -> Option<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        if !self.config.enabled {
            return None;
        }

        let hash = self.hash_prompt(model_name, prompt);
        let cache_path = self.get_cache_path(category, &hash);

        let entry = match fs::read_to_string(&cache_path).await {
            Ok(content) => serde_json::from_str::<CacheEntry<T>>(&content).ok(),
            Err(_) => None,
        };

        match entry {
            Some(entry) if !self.is_expired(entry.timestamp) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.data)
            }
            Some(_) => {
                // 删除过期缓存
                let _ = fs::remove_file(&cache_path).await;
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// 写入缓存
    pub async fn set<T>(&self, category: &str, model_name: &str, prompt: &str, data: T) -> Result<()>
    where
        T: Serialize,
    {
        if !self.config.enabled {
            return Ok(());
        }

        let hash = self.hash_prompt(model_name, prompt);
        let cache_path = self.get_cache_path(category, &hash);

        // 确保目录存在
        if let Some(parent) = cache_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let entry = CacheEntry {
            data,
            timestamp: now_secs(),
            prompt_hash: hash,
            model_name: model_name.to_string(),
        };
        fs::write(&cache_path, serde_json::to_string_pretty(&entry)?).await?;
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager(dir: &TempDir, enabled: bool) -> CacheManager {
        CacheManager::new(CacheConfig {
            enabled,
            cache_dir: dir.path().to_path_buf(),
            expire_hours: 1,
        })
    }

    #[tokio::test]
    async fn test_round_trip_and_stats() {
        let dir = TempDir::new().unwrap();
        let cache = manager(&dir, true);

        assert_eq!(cache.get::<String>("summary", "m", "prompt").await, None);
        cache
            .set("summary", "m", "prompt", "reply".to_string())
            .await
            .unwrap();
        assert_eq!(
            cache.get::<String>("summary", "m", "prompt").await,
            Some("reply".to_string())
        );
        // 不同模型不会共用缓存
        assert_eq!(cache.get::<String>("summary", "other", "prompt").await, None);

        assert_eq!(
            cache.stats(),
            CacheStats {
                hits: 1,
                misses: 2,
                writes: 1
            }
        );
    }

    #[tokio::test]
    async fn test_expired_entry_is_removed() {
        let dir = TempDir::new().unwrap();
        let cache = manager(&dir, true);
        let hash = cache.hash_prompt("m", "p");
        let path = dir.path().join("summary").join(format!("{}.json", hash));
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let stale = CacheEntry {
            data: "old".to_string(),
            timestamp: now_secs() - 7200,
            prompt_hash: hash,
            model_name: "m".into(),
        };
        std::fs::write(&path, serde_json::to_string(&stale).unwrap()).unwrap();

        assert_eq!(cache.get::<String>("summary", "m", "p").await, None);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_disabled_cache_is_inert() {
        let dir = TempDir::new().unwrap();
        let cache = manager(&dir, false);
        cache.set("summary", "m", "p", 1u8).await.unwrap();
        assert_eq!(cache.get::<u8>("summary", "m", "p").await, None);
        assert_eq!(cache.stats(), CacheStats::default());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
