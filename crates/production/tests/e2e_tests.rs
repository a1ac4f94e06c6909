//! End-to-end tests for the production runtime.
//!
//! Each test stands up real replicas: tokio event loops, the sbor wire
//! codec over the in-process channel network, rayon verification pools,
//! fetch managers, and the waiter registry. Only the physical transport is
//! substituted.

use braid_consensus::{ConsensusState, CoreConfig};
use braid_mempool::{CommandPool, MempoolConfig};
use braid_node::{FixedPacemaker, NodeStateMachine};
use braid_production::{ChannelNetwork, ConsensusService, FetchConfig, ProductionRunner};
use braid_types::test_utils::{test_cmd, test_config};
use braid_types::{ConsensusConfig, KeyPair, ReplicaId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing_test::traced_test;

const WAIT: Duration = Duration::from_secs(5);

fn replica_table() -> (ConsensusConfig, Vec<KeyPair>) {
    let (mut config, keys) = test_config(4);
    // nmajority = 2f + 1 with f = 1; the cores re-derive this in on_init.
    config.set_nmajority(3);
    (config, keys)
}

async fn start_replica(
    idx: u16,
    network: &Arc<ChannelNetwork>,
    config: &ConsensusConfig,
    keys: &[KeyPair],
) -> ConsensusService {
    let mut core = ConsensusState::new(
        ReplicaId(idx),
        keys[idx as usize].clone(),
        config.clone(),
        CoreConfig::default(),
    );
    core.on_init(1);
    let node = NodeStateMachine::new(
        core,
        CommandPool::new(MempoolConfig { blk_size: 2 }),
        Box::new(FixedPacemaker::new(ReplicaId(0))),
    );
    let (transport, inbox) = network.register(ReplicaId(idx));
    let (runner, service) = ProductionRunner::new(
        node,
        Arc::new(config.clone()),
        transport,
        inbox,
        FetchConfig::for_local(),
        2,
    )
    .expect("verify pool");
    tokio::spawn(runner.run());
    service
}

/// Submit one batch of two commands at the leader and wait for the QC on
/// the resulting block to form (observed as an hqc advance).
async fn submit_batch(leader: &ConsensusService, seeds: [u8; 2]) -> Vec<oneshot::Receiver<braid_types::Finality>> {
    let hqc_rx = leader.async_hqc_update();
    let mut decision_rxs = Vec::new();
    for seed in seeds {
        let (tx, rx) = oneshot::channel();
        leader
            .exec_command(test_cmd(seed), move |finality| {
                let _ = tx.send(finality);
            })
            .await;
        decision_rxs.push(rx);
    }
    timeout(WAIT, hqc_rx)
        .await
        .expect("hqc must advance after a batch")
        .expect("runner alive");
    decision_rxs
}

/// Three batches pipeline into a three-chain; the first batch's commands
/// reach finality on the leader and its proposals flow to the followers.
#[traced_test]
#[tokio::test(flavor = "multi_thread")]
async fn test_e2e_three_chain_commit() {
    let (config, keys) = replica_table();
    let network = ChannelNetwork::new();

    let mut services = Vec::new();
    for idx in 0..4 {
        services.push(start_replica(idx, &network, &config, &keys).await);
    }

    // A follower should see the first proposal.
    let follower_prop_rx = services[1].async_wait_receive_proposal();

    let first_batch = submit_batch(&services[0], [1, 2]).await;
    let follower_prop = timeout(WAIT, follower_prop_rx)
        .await
        .expect("follower must process the proposal")
        .expect("runner alive");
    assert_eq!(follower_prop.proposer, ReplicaId(0));
    assert_eq!(follower_prop.block.cmds, vec![test_cmd(1), test_cmd(2)]);

    let _ = submit_batch(&services[0], [3, 4]).await;
    let _ = submit_batch(&services[0], [5, 6]).await;

    // The third batch completed the three-chain: batch one is final.
    for (idx, rx) in first_batch.into_iter().enumerate() {
        let finality = timeout(WAIT, rx)
            .await
            .expect("first batch must commit")
            .expect("runner alive");
        assert_eq!(finality.decision, 1);
        assert_eq!(finality.cmd_idx, idx as u64);
        assert_eq!(finality.cmd_height, 2);
    }
}

/// A replica that joins late sees only the newest proposal and must fetch
/// the missing ancestors before delivering and voting.
#[traced_test]
#[tokio::test(flavor = "multi_thread")]
async fn test_e2e_late_replica_fetches_ancestors() {
    let (config, keys) = replica_table();
    let network = ChannelNetwork::new();

    let mut services = Vec::new();
    for idx in 0..3 {
        services.push(start_replica(idx, &network, &config, &keys).await);
    }

    // Two batches happen while replica 3 is offline.
    let b1_rx = services[0].async_wait_proposal();
    let _ = submit_batch(&services[0], [1, 2]).await;
    let b1 = timeout(WAIT, b1_rx)
        .await
        .expect("proposal emitted")
        .expect("runner alive")
        .block
        .hash();
    let _ = submit_batch(&services[0], [3, 4]).await;

    // Replica 3 joins and only ever receives the third proposal; it must
    // fetch B1 and B2 from the leader to deliver it.
    let late = start_replica(3, &network, &config, &keys).await;
    let delivered_rx = late.async_blk_delivery(b1);
    let _ = submit_batch(&services[0], [5, 6]).await;

    let delivered = timeout(WAIT, delivered_rx)
        .await
        .expect("late replica must fetch and deliver B1")
        .expect("runner alive");
    assert_eq!(delivered, b1);
}
