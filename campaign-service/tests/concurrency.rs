//! Several campaigns and several writers at once.

use std::sync::Arc;

use campaign_service::ledger::RecordingLedger;
use campaign_service::state_machine::CampaignState;
use campaign_service::{CampaignService, Config};
use rewardtree::Address;

fn addr(byte: u8) -> Address {
    Address::new([byte; 32])
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_writers_on_one_campaign() {
    let ledger = Arc::new(RecordingLedger::new());
    let service = Arc::new(CampaignService::new(Config::default(), ledger.clone()));
    let id = service
        .initialize_campaign(addr(1), addr(2), 1_000)
        .await
        .unwrap();

    let mut tasks = Vec::new();
    for writer in 0..8u8 {
        let service = service.clone();
        tasks.push(tokio::spawn(async move {
            for round in 0..5u8 {
                let recipient = addr(10 + writer * 5 + round);
                service
                    .distribute_rewards(&id, vec![(recipient, 1), (addr(1), 1)])
                    .await
                    .unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let stats = service.campaign_stats(&id).await.unwrap();
    assert_eq!(stats.total_participants, 41);
    assert_eq!(stats.total_unclaimed, 1_000 + 40 + 40);
    assert_eq!(stats.merkle_root, ledger.root(&id).unwrap());

    let account = ledger.account(&id).unwrap();
    // one anchor at launch plus one per batch, each behind its own lock
    assert_eq!(account.history.len(), 41);
    assert_eq!(account.unlocked_updates, 0);
    assert!(!account.locked);
    assert_eq!(account.rewards[0], 1_040);

    // participant indexes are dense whatever order the batches landed in
    let mut indexes = Vec::new();
    for writer in 0..8u8 {
        for round in 0..5u8 {
            let ticket = service
                .merkle_proof(&id, addr(10 + writer * 5 + round))
                .await
                .unwrap()
                .unwrap();
            assert!(ticket.verify());
            indexes.push(ticket.leaf.index);
        }
    }
    indexes.sort_unstable();
    assert_eq!(indexes, (1..=40).collect::<Vec<u64>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn campaigns_progress_independently() {
    let ledger = Arc::new(RecordingLedger::new());
    let service = Arc::new(CampaignService::new(Config::default(), ledger.clone()));

    let mut ids = Vec::new();
    for launcher in 1..=6u8 {
        ids.push(
            service
                .initialize_campaign(addr(launcher), addr(100), 10 * launcher as u64)
                .await
                .unwrap(),
        );
    }

    let mut tasks = Vec::new();
    for (n, id) in ids.iter().copied().enumerate() {
        let service = service.clone();
        tasks.push(tokio::spawn(async move {
            let batch: Vec<(Address, u64)> =
                (0..=n as u8).map(|i| (addr(150 + i), 1 + n as u64)).collect();
            service.distribute_rewards(&id, batch).await.unwrap()
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    for (n, id) in ids.iter().enumerate() {
        let stats = service.campaign_stats(id).await.unwrap();
        assert_eq!(stats.total_participants, n + 2);
        assert_eq!(stats.merkle_root, ledger.root(id).unwrap());
        assert_eq!(
            service.status(id).await.unwrap().state,
            CampaignState::Idle
        );
    }
}

#[tokio::test]
async fn readers_never_see_unanchored_roots() {
    let ledger = Arc::new(RecordingLedger::new());
    let service = Arc::new(CampaignService::new(Config::default(), ledger.clone()));
    let id = service
        .initialize_campaign(addr(1), addr(2), 1_000)
        .await
        .unwrap();

    let writer = {
        let service = service.clone();
        tokio::spawn(async move {
            for b in 10..30u8 {
                service
                    .distribute_rewards(&id, vec![(addr(b), b as u64)])
                    .await
                    .unwrap();
            }
        })
    };
    for _ in 0..20 {
        let root = service.campaign_stats(&id).await.unwrap().merkle_root;
        let account = ledger.account(&id).unwrap();
        assert!(account.history.contains(&root));
        tokio::task::yield_now().await;
    }
    writer.await.unwrap();
}
