use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::env;
use std::sync::RwLock;

pub static GLOBAL_CONFIG: Lazy<Config> = Lazy::new(Config::new);

static DEFAULT_NODE_ADDR: &str = "127.0.0.1:12345";
const DEFAULT_MINING_DIFFICULTY: u8 = 3;
const DEFAULT_WALK_ALPHA: f64 = 10.0;

const NODE_ADDRESS_KEY: &str = "NODE_ADDRESS";
const MINING_DIFFICULTY_KEY: &str = "MINING_DIFFICULTY";
const WALK_ALPHA_KEY: &str = "WALK_ALPHA";

pub struct Config {
    inner: RwLock<HashMap<String, String>>,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Config {
        let mut map = HashMap::new();

        let mut node_addr = String::from(DEFAULT_NODE_ADDR);
        if let Ok(addr) = env::var(NODE_ADDRESS_KEY) {
            node_addr = addr;
        }
        map.insert(String::from(NODE_ADDRESS_KEY), node_addr);

        if let Ok(difficulty) = env::var(MINING_DIFFICULTY_KEY) {
            map.insert(String::from(MINING_DIFFICULTY_KEY), difficulty);
        }
        if let Ok(alpha) = env::var(WALK_ALPHA_KEY) {
            map.insert(String::from(WALK_ALPHA_KEY), alpha);
        }

        Config {
            inner: RwLock::new(map),
        }
    }

    pub fn get_node_addr(&self) -> String {
        let inner = self
            .inner
            .read()
            .expect("Failed to acquire read lock on config - this should never happen");
        inner
            .get(NODE_ADDRESS_KEY)
            .expect("Node address should always be present in config")
            .clone()
    }

    pub fn set_node_addr(&self, addr: String) {
        let mut inner = self
            .inner
            .write()
            .expect("Failed to acquire write lock on config - this should never happen");
        inner.insert(String::from(NODE_ADDRESS_KEY), addr);
    }

    /// Default proof-of-work difficulty for locally created transactions (1-5)
    pub fn get_mining_difficulty(&self) -> u8 {
        let inner = self
            .inner
            .read()
            .expect("Failed to acquire read lock on config - this should never happen");
        inner
            .get(MINING_DIFFICULTY_KEY)
            .and_then(|v| v.parse().ok())
            .map(|d: u8| d.clamp(1, 5))
            .unwrap_or(DEFAULT_MINING_DIFFICULTY)
    }

    pub fn set_mining_difficulty(&self, difficulty: u8) {
        let mut inner = self
            .inner
            .write()
            .expect("Failed to acquire write lock on config - this should never happen");
        inner.insert(
            String::from(MINING_DIFFICULTY_KEY),
            difficulty.clamp(1, 5).to_string(),
        );
    }

    /// Bias parameter for the random walk: 0 means uniform, large values
    /// descend deterministically toward the heaviest child
    pub fn get_walk_alpha(&self) -> f64 {
        let inner = self
            .inner
            .read()
            .expect("Failed to acquire read lock on config - this should never happen");
        inner
            .get(WALK_ALPHA_KEY)
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_WALK_ALPHA)
    }
}
