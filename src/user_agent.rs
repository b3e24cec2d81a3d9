//! User-Agent strings.
//!
//! Page fetches rotate through a pool of current desktop browser UAs so
//! consecutive requests do not share one fingerprint. Proxy health probes
//! identify the tool honestly instead.

use rand::Rng;
use rand::seq::SliceRandom;

/// Project URL for the probe User-Agent.
const PROJECT_UA_URL: &str = "https://github.com/metascraper/metascraper";

const BROWSER_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:127.0) Gecko/20100101 Firefox/127.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.5 Safari/605.1.15",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/125.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36 Edg/126.0.0.0",
];

/// User-Agent for proxy health probes (identifies the tool).
#[must_use]
pub(crate) fn probe_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("metascraper/{version} (+{PROJECT_UA_URL})")
}

/// Rotating pool of browser User-Agents.
#[derive(Debug, Clone)]
pub struct UserAgentPool {
    agents: Vec<String>,
}

impl Default for UserAgentPool {
    fn default() -> Self {
        Self {
            agents: BROWSER_USER_AGENTS.iter().map(|s| (*s).to_string()).collect(),
        }
    }
}

impl UserAgentPool {
    /// Creates a pool from explicit strings; an empty list falls back to the built-in pool.
    #[must_use]
    pub fn new(agents: Vec<String>) -> Self {
        if agents.is_empty() {
            Self::default()
        } else {
            Self { agents }
        }
    }

    /// Picks a User-Agent at random.
    #[must_use]
    pub fn pick(&self) -> &str {
        self.pick_with_rng(&mut rand::thread_rng())
    }

    /// Picks a User-Agent using `rng`.
    pub fn pick_with_rng<R: Rng + ?Sized>(&self, rng: &mut R) -> &str {
        self.agents
            .choose(rng)
            .map_or(BROWSER_USER_AGENTS[0], String::as_str)
    }

    /// Number of agents in the pool.
    #[must_use]
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Whether the pool is empty (never true for a constructed pool).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}
