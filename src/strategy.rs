//! Fetch strategies and the fallback chain
//!
//! A strategy is an immutable bundle of tool tuning parameters with a
//! designated fallback, forming the finite chain Speed → Stable → Harsh.
//! The resolver picks the entry point; the executor walks the chain when
//! attempts fail.

use serde::{Deserialize, Serialize};

use crate::types::Mode;

/// Retry limit forwarded to the external tool
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetryLimit {
    /// Retry forever (the tool's "inf" value)
    Infinite,
    /// Retry at most this many times
    Limit(u32),
}

impl std::fmt::Display for RetryLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetryLimit::Infinite => f.write_str("infinite"),
            RetryLimit::Limit(n) => write!(f, "{n}"),
        }
    }
}

/// An immutable fetch strategy
///
/// Strategies are data, not behavior: the tool adapter translates the
/// fields into tool arguments, and the executor never mutates one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Strategy {
    /// The mode this strategy realizes
    pub mode: Mode,
    /// Short label used in events, attempt history, and logs
    pub label: &'static str,
    /// Concurrent fragment downloads (1 = single-threaded)
    pub concurrent_fragments: u32,
    /// Socket timeout in seconds (low values fail fast on dead links)
    pub socket_timeout_secs: u32,
    /// Whole-file retry limit
    pub retries: RetryLimit,
    /// Per-fragment retry limit
    pub fragment_retries: RetryLimit,
    /// Seconds to sleep between requests (0 = no throttling)
    pub sleep_interval_secs: u32,
    /// Upper bound for randomized sleep between requests
    pub max_sleep_interval_secs: u32,
    /// Force IPv4 (some throttled paths behave better without IPv6)
    pub force_ipv4: bool,
    /// Download buffer size forwarded to the tool (e.g., "16M")
    pub buffer_size: &'static str,
    /// HTTP chunk size, when the strategy pins one
    pub http_chunk_size: Option<&'static str>,
    /// Skip fragments that stay unavailable after retries
    pub skip_unavailable_fragments: bool,
}

/// Maximum concurrency, large buffers. First to fail under bad networks.
pub const SPEED: Strategy = Strategy {
    mode: Mode::Speed,
    label: "speed",
    concurrent_fragments: 16,
    socket_timeout_secs: 30,
    retries: RetryLimit::Limit(10),
    fragment_retries: RetryLimit::Limit(10),
    sleep_interval_secs: 0,
    max_sleep_interval_secs: 0,
    force_ipv4: false,
    buffer_size: "16M",
    http_chunk_size: Some("10M"),
    skip_unavailable_fragments: false,
};

/// Single-threaded with fast failure detection and infinite retries.
pub const STABLE: Strategy = Strategy {
    mode: Mode::Stable,
    label: "stable",
    concurrent_fragments: 1,
    socket_timeout_secs: 10,
    retries: RetryLimit::Infinite,
    fragment_retries: RetryLimit::Infinite,
    sleep_interval_secs: 0,
    max_sleep_interval_secs: 0,
    force_ipv4: true,
    buffer_size: "1M",
    http_chunk_size: None,
    skip_unavailable_fragments: true,
};

/// Last resort: active throttling and extreme fault tolerance.
pub const HARSH: Strategy = Strategy {
    mode: Mode::Harsh,
    label: "harsh",
    concurrent_fragments: 1,
    socket_timeout_secs: 5,
    retries: RetryLimit::Infinite,
    fragment_retries: RetryLimit::Infinite,
    sleep_interval_secs: 2,
    max_sleep_interval_secs: 5,
    force_ipv4: true,
    buffer_size: "512K",
    http_chunk_size: None,
    skip_unavailable_fragments: true,
};

impl Strategy {
    /// The strategy realizing a concrete mode
    ///
    /// `Auto` is not resolved here — the resolver handles it because the
    /// answer depends on circuit breaker state.
    pub fn for_mode(mode: Mode) -> Option<&'static Strategy> {
        match mode {
            Mode::Speed => Some(&SPEED),
            Mode::Stable => Some(&STABLE),
            Mode::Harsh => Some(&HARSH),
            Mode::Auto => None,
        }
    }

    /// The designated fallback of this strategy
    ///
    /// The chain is Speed → Stable → Harsh → none. It is finite and
    /// acyclic; repeatedly following fallbacks always terminates.
    pub fn fallback(&self) -> Option<&'static Strategy> {
        match self.mode {
            Mode::Speed => Some(&STABLE),
            Mode::Stable => Some(&HARSH),
            Mode::Harsh | Mode::Auto => None,
        }
    }

    /// Translate this strategy into external tool arguments
    pub fn apply_args(&self, args: &mut Vec<String>) {
        args.push("--socket-timeout".to_string());
        args.push(self.socket_timeout_secs.to_string());
        args.push("--retries".to_string());
        args.push(self.retries.to_string());
        args.push("--fragment-retries".to_string());
        args.push(self.fragment_retries.to_string());

        if self.concurrent_fragments > 1 {
            args.push("-N".to_string());
            args.push(self.concurrent_fragments.to_string());
        }

        if self.sleep_interval_secs > 0 {
            args.push("--sleep-interval".to_string());
            args.push(self.sleep_interval_secs.to_string());
        }
        if self.max_sleep_interval_secs > 0 {
            args.push("--max-sleep-interval".to_string());
            args.push(self.max_sleep_interval_secs.to_string());
        }

        if self.force_ipv4 {
            args.push("--force-ipv4".to_string());
        }

        args.push("--buffer-size".to_string());
        args.push(self.buffer_size.to_string());
        if let Some(chunk) = self.http_chunk_size {
            args.push("--http-chunk-size".to_string());
            args.push(chunk.to_string());
        }
        if self.skip_unavailable_fragments {
            args.push("--skip-unavailable-fragments".to_string());
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_chain_is_finite_and_acyclic() {
        // Walk from every strategy; the chain must terminate without
        // revisiting a label.
        for start in [&SPEED, &STABLE, &HARSH] {
            let mut seen = vec![start.label];
            let mut current = start;
            while let Some(next) = current.fallback() {
                assert!(
                    !seen.contains(&next.label),
                    "cycle detected at {}",
                    next.label
                );
                seen.push(next.label);
                current = next;
            }
            assert!(seen.len() <= 3);
        }
    }

    #[test]
    fn terminal_node_has_no_fallback() {
        assert!(HARSH.fallback().is_none());
    }

    #[test]
    fn chain_order_is_speed_stable_harsh() {
        assert_eq!(SPEED.fallback().unwrap().label, "stable");
        assert_eq!(STABLE.fallback().unwrap().label, "harsh");
    }

    #[test]
    fn for_mode_resolves_concrete_modes_only() {
        assert_eq!(Strategy::for_mode(Mode::Speed).unwrap().label, "speed");
        assert_eq!(Strategy::for_mode(Mode::Stable).unwrap().label, "stable");
        assert_eq!(Strategy::for_mode(Mode::Harsh).unwrap().label, "harsh");
        assert!(Strategy::for_mode(Mode::Auto).is_none());
    }

    #[test]
    fn speed_args_include_concurrency_and_chunking() {
        let mut args = Vec::new();
        SPEED.apply_args(&mut args);

        let joined = args.join(" ");
        assert!(joined.contains("-N 16"));
        assert!(joined.contains("--http-chunk-size 10M"));
        assert!(joined.contains("--retries 10"));
        assert!(!joined.contains("--force-ipv4"));
    }

    #[test]
    fn harsh_args_include_throttling_and_infinite_retries() {
        let mut args = Vec::new();
        HARSH.apply_args(&mut args);

        let joined = args.join(" ");
        assert!(joined.contains("--retries infinite"));
        assert!(joined.contains("--sleep-interval 2"));
        assert!(joined.contains("--max-sleep-interval 5"));
        assert!(joined.contains("--force-ipv4"));
        assert!(joined.contains("--skip-unavailable-fragments"));
        // Single-threaded: no -N flag
        assert!(!args.contains(&"-N".to_string()));
    }
}
