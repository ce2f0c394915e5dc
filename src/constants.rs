// ABOUTME: System-wide constants and default values for the Parley gateway
// ABOUTME: Environment variable names, default limits, header names and the sources marker
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Parley contributors

//! # Constants Module
//!
//! Application constants shared by configuration, admission and relay code.

/// Environment variable names read by [`crate::config::environment::ServerConfig`]
pub mod env_config {
    /// Listen port
    pub const HTTP_PORT: &str = "HTTP_PORT";
    /// sqlx `SQLite` URL
    pub const DATABASE_URL: &str = "DATABASE_URL";
    /// HS256 secret for identity tokens
    pub const JWT_SECRET: &str = "PARLEY_JWT_SECRET";
    /// Redis URL; selects the Redis counter store when set
    pub const REDIS_URL: &str = "REDIS_URL";
    /// Deployment environment name
    pub const ENVIRONMENT: &str = "ENVIRONMENT";

    /// Chat class maximum requests per window
    pub const RATE_LIMIT_CHAT_MAX: &str = "RATE_LIMIT_CHAT_MAX";
    /// Chat class window length in seconds
    pub const RATE_LIMIT_CHAT_WINDOW_SECS: &str = "RATE_LIMIT_CHAT_WINDOW_SECS";
    /// Search class maximum requests per window
    pub const RATE_LIMIT_SEARCH_MAX: &str = "RATE_LIMIT_SEARCH_MAX";
    /// Search class window length in seconds
    pub const RATE_LIMIT_SEARCH_WINDOW_SECS: &str = "RATE_LIMIT_SEARCH_WINDOW_SECS";
    /// Failed authentication attempts allowed per client key
    pub const RATE_LIMIT_AUTH_FAILURE_MAX: &str = "RATE_LIMIT_AUTH_FAILURE_MAX";
    /// Failed authentication window length in seconds
    pub const RATE_LIMIT_AUTH_FAILURE_WINDOW_SECS: &str = "RATE_LIMIT_AUTH_FAILURE_WINDOW_SECS";
    /// `open` or `closed` when the counter store is unreachable
    pub const RATE_LIMIT_FAILURE_POLICY: &str = "RATE_LIMIT_FAILURE_POLICY";
    /// Key the failed-auth guard on `x-forwarded-for` (only behind a trusted proxy)
    pub const RATE_LIMIT_TRUST_FORWARDED_FOR: &str = "RATE_LIMIT_TRUST_FORWARDED_FOR";

    /// Seconds without a fragment before the backend is considered stalled
    pub const RELAY_IDLE_TIMEOUT_SECS: &str = "RELAY_IDLE_TIMEOUT_SECS";
    /// Upper bound on a whole generation
    pub const RELAY_TOTAL_TIMEOUT_SECS: &str = "RELAY_TOTAL_TIMEOUT_SECS";

    /// Maximum search results folded into a prompt
    pub const SEARCH_MAX_RESULTS: &str = "SEARCH_MAX_RESULTS";
    /// Cost charged per search with results, micro-USD
    pub const SEARCH_COST_MICROS: &str = "SEARCH_COST_MICROS";
    /// Tavily API key; search is disabled when unset
    pub const TAVILY_API_KEY: &str = "TAVILY_API_KEY";
    /// Tavily API base URL
    pub const TAVILY_BASE_URL: &str = "TAVILY_BASE_URL";

    /// Gemini API key (`OpenAI`-compatible endpoint)
    pub const GEMINI_API_KEY: &str = "GEMINI_API_KEY";
    /// Groq API key
    pub const GROQ_API_KEY: &str = "GROQ_API_KEY";
    /// Local `OpenAI`-compatible server base URL
    pub const LOCAL_LLM_BASE_URL: &str = "LOCAL_LLM_BASE_URL";

    /// Output tokens assumed when estimating cost at admission
    pub const OUTPUT_TOKEN_ESTIMATE: &str = "OUTPUT_TOKEN_ESTIMATE";
}

/// Default values used when an environment variable is unset
pub mod defaults {
    /// Default listen port
    pub const HTTP_PORT: u16 = 8080;
    /// Default database location
    pub const DATABASE_URL: &str = "sqlite:./data/parley.db";

    /// Chat requests per window
    pub const CHAT_RATE_LIMIT_MAX: u32 = 20;
    /// Chat window in seconds
    pub const CHAT_RATE_LIMIT_WINDOW_SECS: u64 = 60;
    /// Searches per window
    pub const SEARCH_RATE_LIMIT_MAX: u32 = 10;
    /// Search window in seconds
    pub const SEARCH_RATE_LIMIT_WINDOW_SECS: u64 = 60;
    /// Failed authentications per window
    pub const AUTH_FAILURE_LIMIT_MAX: u32 = 10;
    /// Failed authentication window in seconds
    pub const AUTH_FAILURE_WINDOW_SECS: u64 = 300;

    /// Relay idle timeout in seconds
    pub const RELAY_IDLE_TIMEOUT_SECS: u64 = 30;
    /// Relay total timeout in seconds
    pub const RELAY_TOTAL_TIMEOUT_SECS: u64 = 300;

    /// Search result bound
    pub const SEARCH_MAX_RESULTS: usize = 5;
    /// Search cost in micro-USD ($0.005)
    pub const SEARCH_COST_MICROS: i64 = 5_000;
    /// Tavily API base URL
    pub const TAVILY_BASE_URL: &str = "https://api.tavily.com";

    /// Gemini `OpenAI`-compatible base URL
    pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/openai";
    /// Groq base URL
    pub const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";

    /// Output tokens assumed at admission
    pub const OUTPUT_TOKEN_ESTIMATE: i64 = 1024;

    /// How long an aborted generation's partial content stays claimable
    pub const PARTIAL_STASH_TTL_SECS: u64 = 600;
    /// Interval between sweeps of expired counters and partial stashes
    pub const SWEEP_INTERVAL_SECS: u64 = 60;
    /// How long shutdown waits for background tasks
    pub const SHUTDOWN_GRACE_SECS: u64 = 10;
}

/// Request validation bounds
pub mod limits {
    /// Maximum messages in one generate request
    pub const MAX_MESSAGES: usize = 100;
    /// Maximum characters in a single message
    pub const MAX_MESSAGE_CHARS: usize = 32_000;
    /// Maximum length of a client-supplied chat id
    pub const MAX_CHAT_ID_LEN: usize = 64;
    /// Maximum characters of a derived chat title
    pub const MAX_TITLE_CHARS: usize = 60;
    /// Maximum characters kept from one search snippet
    pub const MAX_SNIPPET_CHARS: usize = 500;
    /// Hits requested from a search provider per result kept, to make up for dropped hits
    pub const SEARCH_OVERFETCH_FACTOR: usize = 2;
    /// Maximum request body size in bytes
    pub const MAX_REQUEST_BODY_BYTES: usize = 1024 * 1024;
    /// Buffered events between the relay task and the SSE response
    pub const EVENT_CHANNEL_CAPACITY: usize = 64;
}

/// Service names for structured logging
pub mod service_names {
    /// Main server service name
    pub const PARLEY_SERVER: &str = "parley-server";
}

/// `HTTP` header names
pub mod headers {
    /// Response header carrying the generation id used by abort and save-partial
    pub const GENERATION_ID: &str = "x-generation-id";
    /// Client address forwarded by a reverse proxy
    pub const FORWARDED_FOR: &str = "x-forwarded-for";
}

/// Machine-parsable sources suffix appended to assistant messages
pub mod sources {
    /// Opening of the marker, preceded by a blank line
    pub const MARKER_OPEN: &str = "\n\n<!-- sources:";
    /// Closing of the marker
    pub const MARKER_CLOSE: &str = " -->";
}

/// Key prefixes for rate-limit counters
pub mod rate_limit_keys {
    /// Prefix for counters keyed by a client address instead of an identity
    pub const ANONYMOUS_PREFIX: &str = "anon:";
    /// Namespace prefix for counters kept in Redis
    pub const REDIS_KEY_PREFIX: &str = "parley:rl:";
}

/// Chat titles
pub mod titles {
    /// Title used when the opening message has no usable text
    pub const FALLBACK_TITLE: &str = "New chat";
}
