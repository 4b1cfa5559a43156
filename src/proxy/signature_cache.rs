use std::collections::HashMap;
use std::sync::{Mutex, OnceLock, RwLock};
use std::time::{Duration, SystemTime};

use crate::models::SignatureCacheConfig;

const SIGNATURE_TTL: Duration = Duration::from_secs(2 * 60 * 60);
const MIN_SIGNATURE_LENGTH: usize = 20;
const CACHE_LIMIT: usize = 500;

/// Which part of the conversation the signature continues. Tool-call
/// continuation and plain reasoning are cached independently because the
/// upstream validates them on different parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignatureBucket {
    Reasoning,
    Tool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SignatureContext {
    pub has_tools: bool,
    pub is_image_model: bool,
}

#[derive(Clone, Debug)]
struct CacheEntry {
    signature: String,
    content: String,
    timestamp: SystemTime,
}

impl CacheEntry {
    fn new(signature: String, content: String) -> Self {
        Self {
            signature,
            content,
            timestamp: SystemTime::now(),
        }
    }

    fn is_expired(&self) -> bool {
        self.timestamp.elapsed().unwrap_or(Duration::ZERO) > SIGNATURE_TTL
    }
}

/// Process-wide continuation-token memory keyed by `(model, bucket)`.
/// Session ids are accepted for API symmetry but continuity is per model.
pub struct SignatureCache {
    entries: Mutex<HashMap<(String, SignatureBucket), CacheEntry>>,
    config: RwLock<SignatureCacheConfig>,
}

impl SignatureCache {
    fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            config: RwLock::new(SignatureCacheConfig::default()),
        }
    }

    pub fn global() -> &'static SignatureCache {
        static INSTANCE: OnceLock<SignatureCache> = OnceLock::new();
        INSTANCE.get_or_init(SignatureCache::new)
    }

    pub fn configure(&self, config: SignatureCacheConfig) {
        if let Ok(mut lock) = self.config.write() {
            *lock = config;
        }
    }

    pub fn pass_signature_to_client(&self) -> bool {
        self.config
            .read()
            .map(|c| c.pass_signature_to_client)
            .unwrap_or(false)
    }

    fn should_cache(&self, ctx: &SignatureContext) -> bool {
        let Ok(config) = self.config.read() else {
            return false;
        };
        if config.cache_all_signatures {
            return true;
        }
        if ctx.has_tools {
            return config.cache_tool_signatures;
        }
        if ctx.is_image_model {
            return config.cache_image_signatures;
        }
        config.cache_thinking
    }

    pub fn set_signature(
        &self,
        _session_id: Option<&str>,
        model: &str,
        signature: &str,
        content: &str,
        ctx: SignatureContext,
    ) {
        if signature.len() < MIN_SIGNATURE_LENGTH || model.is_empty() {
            return;
        }
        if !self.should_cache(&ctx) {
            tracing::debug!(
                "[SignatureCache] Gating rejected signature for {} (has_tools={}, image={})",
                model,
                ctx.has_tools,
                ctx.is_image_model
            );
            return;
        }

        let bucket = if ctx.has_tools {
            SignatureBucket::Tool
        } else {
            SignatureBucket::Reasoning
        };

        if let Ok(mut entries) = self.entries.lock() {
            tracing::debug!(
                "[SignatureCache] Caching {:?} signature for {} (len={})",
                bucket,
                model,
                signature.len()
            );
            entries.insert(
                (model.to_string(), bucket),
                CacheEntry::new(signature.to_string(), content.to_string()),
            );
            if entries.len() > CACHE_LIMIT {
                let before = entries.len();
                entries.retain(|_, v| !v.is_expired());
                tracing::debug!(
                    "[SignatureCache] Cleanup: {} -> {} entries",
                    before,
                    entries.len()
                );
            }
        }
    }

    pub fn get_signature(
        &self,
        _session_id: Option<&str>,
        model: &str,
        has_tools: bool,
    ) -> Option<String> {
        let bucket = if has_tools {
            SignatureBucket::Tool
        } else {
            SignatureBucket::Reasoning
        };
        if let Ok(entries) = self.entries.lock() {
            if let Some(entry) = entries.get(&(model.to_string(), bucket)) {
                if !entry.is_expired() {
                    return Some(entry.signature.clone());
                }
                tracing::debug!("[SignatureCache] Entry expired for {} {:?}", model, bucket);
            }
        }
        None
    }

    /// Thought text that accompanied the cached signature, for callers that
    /// need to replay the whole reasoning part.
    pub fn get_thought_content(&self, model: &str, has_tools: bool) -> Option<String> {
        let bucket = if has_tools {
            SignatureBucket::Tool
        } else {
            SignatureBucket::Reasoning
        };
        if let Ok(entries) = self.entries.lock() {
            if let Some(entry) = entries.get(&(model.to_string(), bucket)) {
                if !entry.is_expired() && !entry.content.is_empty() {
                    return Some(entry.content.clone());
                }
            }
        }
        None
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
        if let Ok(mut config) = self.config.write() {
            *config = SignatureCacheConfig::default();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(len: usize) -> String {
        "s".repeat(len)
    }

    #[test]
    fn tool_and_reasoning_buckets_are_independent() {
        let cache = SignatureCache::new();
        cache.set_signature(
            None,
            "gemini-2.5-pro",
            &sig(60),
            "",
            SignatureContext {
                has_tools: true,
                is_image_model: false,
            },
        );

        assert_eq!(
            cache.get_signature(None, "gemini-2.5-pro", true),
            Some(sig(60))
        );
        assert_eq!(cache.get_signature(None, "gemini-2.5-pro", false), None);
    }

    #[test]
    fn short_signatures_are_rejected() {
        let cache = SignatureCache::new();
        cache.set_signature(None, "m", "tiny", "", SignatureContext::default());
        assert_eq!(cache.get_signature(None, "m", false), None);
    }

    #[test]
    fn session_id_does_not_partition_the_key() {
        let cache = SignatureCache::new();
        cache.set_signature(
            Some("session-a"),
            "gemini-2.5-flash",
            &sig(40),
            "thought",
            SignatureContext::default(),
        );
        assert_eq!(
            cache.get_signature(Some("session-b"), "gemini-2.5-flash", false),
            Some(sig(40))
        );
    }

    #[test]
    fn gating_blocks_tool_signatures_when_disabled() {
        let cache = SignatureCache::new();
        cache.configure(SignatureCacheConfig {
            cache_all_signatures: false,
            cache_tool_signatures: false,
            cache_image_signatures: false,
            cache_thinking: true,
            pass_signature_to_client: false,
        });

        cache.set_signature(
            None,
            "m",
            &sig(60),
            "",
            SignatureContext {
                has_tools: true,
                is_image_model: false,
            },
        );
        assert_eq!(cache.get_signature(None, "m", true), None);

        // Plain reasoning still admitted.
        cache.set_signature(None, "m", &sig(60), "", SignatureContext::default());
        assert_eq!(cache.get_signature(None, "m", false), Some(sig(60)));
    }

    #[test]
    fn cache_all_overrides_individual_gates() {
        let cache = SignatureCache::new();
        cache.configure(SignatureCacheConfig {
            cache_all_signatures: true,
            cache_tool_signatures: false,
            cache_image_signatures: false,
            cache_thinking: false,
            pass_signature_to_client: false,
        });
        cache.set_signature(
            None,
            "m",
            &sig(60),
            "",
            SignatureContext {
                has_tools: true,
                is_image_model: false,
            },
        );
        assert_eq!(cache.get_signature(None, "m", true), Some(sig(60)));
    }

    #[test]
    fn thought_content_round_trips() {
        let cache = SignatureCache::new();
        cache.set_signature(
            None,
            "m",
            &sig(60),
            "the model was thinking about crabs",
            SignatureContext::default(),
        );
        assert_eq!(
            cache.get_thought_content("m", false).as_deref(),
            Some("the model was thinking about crabs")
        );
    }

    #[test]
    fn clear_resets_entries_and_config() {
        let cache = SignatureCache::new();
        cache.set_signature(None, "m", &sig(60), "", SignatureContext::default());
        cache.clear();
        assert_eq!(cache.get_signature(None, "m", false), None);
    }
}
