//! 每用户请求限流
//!
//! 显式注入的固定窗口桶（Mutex<HashMap>），不用模块级单例，便于测试隔离实例。
//! 超限时由入口层返回礼貌性拒绝文案，而非错误。

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

struct Bucket {
    window_start: Instant,
    count: u32,
}

/// 固定窗口限流器：key 为 user_id
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, Bucket>>,
    window: Duration,
    max_requests: u32,
}

impl RateLimiter {
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            window,
            max_requests,
        }
    }

    /// 尝试通过一次请求；窗口内超过 max_requests 返回 false
    pub async fn allow(&self, user_id: &str) -> bool {
        let mut buckets = self.buckets.lock().await;
        let now = Instant::now();
        let bucket = buckets.entry(user_id.to_string()).or_insert(Bucket {
            window_start: now,
            count: 0,
        });
        if now.duration_since(bucket.window_start) >= self.window {
            bucket.window_start = now;
            bucket.count = 0;
        }
        if bucket.count >= self.max_requests {
            return false;
        }
        bucket.count += 1;
        true
    }
}
