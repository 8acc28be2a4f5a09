//! # Prometheus Metrics
//!
//! Gauges mirroring [`NodeStats`], refreshed from the node's handle on
//! every scrape of `/metrics`.
//!
//! All metrics live in a dedicated [`prometheus::Registry`] with the
//! `huron` prefix.

use prometheus::{Encoder, Gauge, IntGauge, Registry, TextEncoder};

use huron_protocol::node::NodeStats;

#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    pub last_block_index: IntGauge,
    pub last_consensus_round: IntGauge,
    pub consensus_events: IntGauge,
    pub consensus_transactions: IntGauge,
    pub undetermined_events: IntGauge,
    pub transaction_pool: IntGauge,
    pub peers: IntGauge,
    pub sync_rate: Gauge,
}

fn int_gauge(registry: &Registry, name: &str, help: &str) -> prometheus::Result<IntGauge> {
    let gauge = IntGauge::new(name, help)?;
    registry.register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

impl NodeMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("huron".into()), None)?;

        let sync_rate = Gauge::new("sync_rate", "Share of sync requests that succeeded")?;
        registry.register(Box::new(sync_rate.clone()))?;

        Ok(Self {
            last_block_index: int_gauge(
                &registry,
                "last_block_index",
                "Index of the last committed block, -1 before the first",
            )?,
            last_consensus_round: int_gauge(
                &registry,
                "last_consensus_round",
                "Last round whose witnesses are all decided, -1 before the first",
            )?,
            consensus_events: int_gauge(
                &registry,
                "consensus_events",
                "Events that have been given a consensus order",
            )?,
            consensus_transactions: int_gauge(
                &registry,
                "consensus_transactions",
                "Transactions in committed blocks",
            )?,
            undetermined_events: int_gauge(
                &registry,
                "undetermined_events",
                "Events still waiting for a round received",
            )?,
            transaction_pool: int_gauge(
                &registry,
                "transaction_pool",
                "Submitted transactions not yet in an event",
            )?,
            peers: int_gauge(&registry, "peers", "Validators in the current peer set")?,
            sync_rate,
            registry,
        })
    }

    pub fn update(&self, stats: &NodeStats) {
        let or_minus_one = |v: Option<u64>| v.map_or(-1, |v| v as i64);
        self.last_block_index.set(or_minus_one(stats.last_block_index));
        self.last_consensus_round
            .set(or_minus_one(stats.last_consensus_round));
        self.consensus_events.set(stats.consensus_events as i64);
        self.consensus_transactions
            .set(stats.consensus_transactions as i64);
        self.undetermined_events.set(stats.undetermined_events as i64);
        self.transaction_pool.set(stats.transaction_pool as i64);
        self.peers.set(stats.num_peers as i64);
        self.sync_rate.set(stats.sync_rate);
    }

    /// Prometheus text exposition of every registered metric.
    pub fn encode(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use huron_protocol::node::NodeState;

    #[test]
    fn exposes_prefixed_stats() {
        let metrics = NodeMetrics::new().unwrap();
        metrics.update(&NodeStats {
            id: 7,
            moniker: "m".into(),
            state: NodeState::Babbling,
            last_consensus_round: Some(12),
            last_block_index: None,
            consensus_events: 40,
            consensus_transactions: 3,
            undetermined_events: 5,
            transaction_pool: 0,
            num_peers: 4,
            sync_rate: 0.5,
        });

        let text = metrics.encode().unwrap();
        assert!(text.contains("huron_last_consensus_round 12"));
        assert!(text.contains("huron_last_block_index -1"));
        assert!(text.contains("huron_peers 4"));
        assert!(text.contains("huron_sync_rate 0.5"));
    }
}
