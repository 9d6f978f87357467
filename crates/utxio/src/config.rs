use serde::Deserialize;

/// Chain-client configuration, handed in by the host process.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Height scanning starts from when there is no prior scan position.
    pub start_scan_height: u64,

    /// Delay between scan polls once caught up with the chain tip.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// How many block fetches may be in flight at once. Blocks are still
    /// delivered downstream in height order.
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,

    /// Blocks of metadata retained for reorg handling. Metas older than this
    /// are pruned unless they still track in-mempool self transactions.
    #[serde(default = "default_block_retention")]
    pub block_retention: u64,

    /// Upper bound on inputs per outbound transaction, overridable through
    /// the bridge's `MaxUTXOsToSpend` mimir value.
    #[serde(default = "default_max_utxos_per_tx")]
    pub max_utxos_per_tx: u64,

    /// Minimum confirmations before an external UTXO may be spent.
    #[serde(default = "default_min_utxo_confirmations")]
    pub min_utxo_confirmations: u64,

    /// Outputs below this value are neither observed nor spent, unless
    /// self-originated.
    pub dust_threshold: u64,

    /// Solvency is re-checked every this many scanned heights.
    #[serde(default = "default_solvency_blocks")]
    pub solvency_blocks: u64,

    /// Network fee and solvency are only reported when the scanned height is
    /// within this many blocks of the chain tip.
    #[serde(default = "default_observation_flexibility_blocks")]
    pub observation_flexibility_blocks: u64,

    /// How long the vault address list from the bridge is cached.
    #[serde(default = "default_vault_cache_secs")]
    pub vault_cache_secs: u64,
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

fn default_fetch_concurrency() -> usize {
    4
}

fn default_block_retention() -> u64 {
    100
}

fn default_max_utxos_per_tx() -> u64 {
    10
}

fn default_min_utxo_confirmations() -> u64 {
    1
}

fn default_solvency_blocks() -> u64 {
    10
}

fn default_observation_flexibility_blocks() -> u64 {
    10
}

fn default_vault_cache_secs() -> u64 {
    6
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            start_scan_height: 0,
            poll_interval_ms: default_poll_interval_ms(),
            fetch_concurrency: default_fetch_concurrency(),
            block_retention: default_block_retention(),
            max_utxos_per_tx: default_max_utxos_per_tx(),
            min_utxo_confirmations: default_min_utxo_confirmations(),
            dust_threshold: 10_000,
            solvency_blocks: default_solvency_blocks(),
            observation_flexibility_blocks: default_observation_flexibility_blocks(),
            vault_cache_secs: default_vault_cache_secs(),
        }
    }
}
