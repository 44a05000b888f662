use std::{sync::Arc, thread};

use rand::seq::SliceRandom;

use hotstuff_quorum::{
    types::{
        block::Block,
        committee::{Committee, EpochCommittees},
        crypto_primitives::{Ed25519Verifier, Keypair},
        data_types::{Data, Datum, ThresholdFraction, TotalPower, ViewNumber},
    },
    vote_aggregator::{
        messages::Vote,
        types::{PendingVoteStatus, QcStatus, QuorumCertificate},
        AggregatorConfiguration, AggregatorError, VoteAggregator,
    },
};

mod common;

use common::committee::{committee, keypairs};

type TestAggregator = VoteAggregator<EpochCommittees, Ed25519Verifier>;

fn aggregator(committee: &Committee) -> TestAggregator {
    VoteAggregator::new(
        AggregatorConfiguration::default(),
        Arc::new(EpochCommittees::new(committee.clone())),
        Ed25519Verifier,
    )
}

fn block(view: u64, tag: u8) -> Block {
    Block::new(
        ViewNumber::new(view),
        QuorumCertificate::genesis_qc(),
        Data::new(vec![Datum::new(vec![tag])]),
    )
}

fn vote(keypair: &Keypair, committee: &Committee, block: &Block) -> Vote {
    let index = committee.position(&keypair.id()).unwrap() as u32;
    Vote::new(keypair, block.view, block.hash, index)
}

/// Tests that with a committee whose stakes sum up to 100, 66 stake is not enough to form a quorum
/// certificate and 67 stake is.
#[test]
fn quorum_requires_strictly_more_than_two_thirds_test() {
    let keypairs = keypairs(4);
    let committee = committee(&keypairs, &[33, 33, 1, 33]);
    let aggregator = aggregator(&committee);
    let block = block(1, 0);

    assert_eq!(
        ThresholdFraction::two_thirds().threshold(committee.total_stake()),
        TotalPower::new(67)
    );

    // 1. Two votes carrying 66 stake do not form a certificate.
    aggregator
        .store_vote_and_build_qc(vote(&keypairs[0], &committee, &block), &block)
        .unwrap();
    let status = aggregator
        .store_vote_and_build_qc(vote(&keypairs[1], &committee, &block), &block)
        .unwrap();
    assert_eq!(
        status,
        QcStatus::InsufficientStake {
            accumulated: TotalPower::new(66),
            threshold: TotalPower::new(67),
        }
    );
    assert!(aggregator.qc(&block.hash).is_none());

    // 2. The vote with a stake of 1 tips it over.
    let status = aggregator
        .store_vote_and_build_qc(vote(&keypairs[2], &committee, &block), &block)
        .unwrap();
    let qc = status.qc().expect("67 of 100 must form a certificate").clone();
    assert_eq!(qc.view, block.view);
    assert_eq!(qc.block, block.hash);
    assert_eq!(qc.signatures.count(), 3);
    let mut signers = qc.signers(&committee);
    signers.sort();
    let mut expected = vec![keypairs[0].id(), keypairs[1].id(), keypairs[2].id()];
    expected.sort();
    assert_eq!(signers, expected);
    assert!(qc.is_correct(&committee, ThresholdFraction::two_thirds(), &Ed25519Verifier));
}

/// Tests that in a committee of four equally-staked participants three votes form a certificate, and
/// that every later vote returns the very same certificate instead of building a new one.
#[test]
fn certificate_is_built_once_test() {
    let keypairs = keypairs(4);
    let committee = committee(&keypairs, &[25, 25, 25, 25]);
    let aggregator = aggregator(&committee);
    let block = block(3, 0);

    // 1. Duplicated votes are counted once.
    for _ in 0..3 {
        let status = aggregator
            .store_vote_and_build_qc(vote(&keypairs[0], &committee, &block), &block)
            .unwrap();
        assert_eq!(
            status,
            QcStatus::InsufficientStake {
                accumulated: TotalPower::new(25),
                threshold: TotalPower::new(67),
            }
        );
    }

    // 2. Two votes are not enough, three are.
    let status = aggregator
        .store_vote_and_build_qc(vote(&keypairs[1], &committee, &block), &block)
        .unwrap();
    assert!(status.qc().is_none());
    let status = aggregator
        .store_vote_and_build_qc(vote(&keypairs[2], &committee, &block), &block)
        .unwrap();
    let first = status.qc().unwrap().clone();

    // 3. The fourth vote, a repeated vote, and a lookup all see the same certificate.
    let after_fourth = aggregator
        .store_vote_and_build_qc(vote(&keypairs[3], &committee, &block), &block)
        .unwrap();
    let after_repeat = aggregator
        .store_vote_and_build_qc(vote(&keypairs[1], &committee, &block), &block)
        .unwrap();
    assert!(Arc::ptr_eq(&first, after_fourth.qc().unwrap()));
    assert!(Arc::ptr_eq(&first, after_repeat.qc().unwrap()));
    assert!(Arc::ptr_eq(&first, &aggregator.qc(&block.hash).unwrap()));

    // 4. The certificate still carries exactly the signatures that built it.
    assert_eq!(first.signatures.count(), 3);
}

/// Tests that votes arriving before their block give the same certificate no matter in which order
/// they arrive.
#[test]
fn pending_votes_are_order_independent_test() {
    let keypairs = keypairs(7);
    let committee = committee(&keypairs, &[10, 20, 30, 40, 50, 60, 70]);
    let block = block(5, 0);

    let votes: Vec<Vote> = keypairs
        .iter()
        .map(|keypair| vote(keypair, &committee, &block))
        .collect();

    let mut certificates: Vec<QuorumCertificate> = Vec::new();
    let mut rng = rand::thread_rng();
    for _ in 0..20 {
        let aggregator = aggregator(&committee);
        let mut shuffled = votes.clone();
        shuffled.shuffle(&mut rng);

        // 1. Park the votes, some of them twice.
        for vote in shuffled.iter().chain(shuffled.iter().take(3)) {
            assert_eq!(
                aggregator.store_pending_vote(vote.clone()).unwrap(),
                PendingVoteStatus::Stored
            );
        }
        assert!(aggregator.qc(&block.hash).is_none());

        // 2. The block arrives, and every parked vote is counted.
        let replay = aggregator.build_qc_on_receiving_block(&block);
        assert!(replay.vote_errors.is_empty());
        let qc = replay.status.unwrap().qc().unwrap().clone();
        assert_eq!(qc.signatures.count(), keypairs.len());
        certificates.push((*qc).clone());
    }

    assert!(certificates.windows(2).all(|pair| pair[0] == pair[1]));
}

/// Tests that pruning drops every block of the pruned views, and that the aggregator refuses to track
/// those views again afterwards.
#[test]
fn pruned_views_are_forgotten_test() {
    let keypairs = keypairs(4);
    let committee = committee(&keypairs, &[25, 25, 25, 25]);
    let aggregator = aggregator(&committee);

    // 1. Track two competing blocks in view 2, one block in view 3, and one block in view 4.
    let (block_2a, block_2b, block_3, block_4) = (block(2, 0), block(2, 1), block(3, 0), block(4, 0));
    for block in [&block_2a, &block_3] {
        for keypair in &keypairs[0..3] {
            aggregator
                .store_vote_and_build_qc(vote(keypair, &committee, block), block)
                .unwrap();
        }
    }
    aggregator
        .store_pending_vote(vote(&keypairs[0], &committee, &block_2b))
        .unwrap();
    aggregator
        .store_pending_vote(vote(&keypairs[0], &committee, &block_4))
        .unwrap();
    assert_eq!(aggregator.num_tracked_blocks(), 4);
    assert!(aggregator.qc(&block_3.hash).is_some());

    // 2. Prune through view 3.
    assert_eq!(aggregator.prune_by_view(ViewNumber::new(3)), 3);
    assert_eq!(aggregator.num_tracked_blocks(), 1);
    assert!(aggregator.qc(&block_3.hash).is_none());

    // 3. Pruning again, or pruning a lower view, has no further effect.
    assert_eq!(aggregator.prune_by_view(ViewNumber::new(3)), 0);
    assert_eq!(aggregator.prune_by_view(ViewNumber::new(1)), 0);
    assert_eq!(aggregator.num_tracked_blocks(), 1);

    // 4. Votes and blocks of pruned views are rejected.
    assert_eq!(
        aggregator.store_vote_and_build_qc(vote(&keypairs[3], &committee, &block_3), &block_3),
        Err(AggregatorError::UnknownBlock {
            block: block_3.hash
        })
    );
    assert_eq!(
        aggregator.store_pending_vote(vote(&keypairs[1], &committee, &block_2b)),
        Err(AggregatorError::UnknownBlock {
            block: block_2b.hash
        })
    );
    assert!(matches!(
        aggregator.build_qc_on_receiving_block(&block_2a).status,
        Err(AggregatorError::UnknownBlock { .. })
    ));

    // 5. The block of view 4 is unaffected.
    for keypair in &keypairs[1..3] {
        aggregator
            .store_pending_vote(vote(keypair, &committee, &block_4))
            .unwrap();
    }
    let replay = aggregator.build_qc_on_receiving_block(&block_4);
    assert!(replay.status.unwrap().qc().is_some());
}

/// Tests that many threads voting for the same block at the same time observe a single certificate.
#[test]
fn concurrent_votes_build_a_single_certificate_test() {
    let keypairs = keypairs(10);
    let committee = committee(&keypairs, &[1; 10]);
    let aggregator = Arc::new(aggregator(&committee));
    let block = block(8, 0);

    // Half of the votes arrive directly, the other half arrive before the block does.
    let handles: Vec<_> = keypairs
        .iter()
        .enumerate()
        .map(|(i, keypair)| {
            let aggregator = aggregator.clone();
            let vote = vote(keypair, &committee, &block);
            let block = block.clone();
            thread::spawn(move || {
                if i % 2 == 0 {
                    aggregator.store_vote_and_build_qc(vote, &block).unwrap().qc().cloned()
                } else {
                    match aggregator.store_pending_vote(vote).unwrap() {
                        PendingVoteStatus::Stored => None,
                        PendingVoteStatus::Incorporated(status) => status.qc().cloned(),
                    }
                }
            })
        })
        .collect();

    let replay = {
        let aggregator = aggregator.clone();
        let block = block.clone();
        thread::spawn(move || aggregator.build_qc_on_receiving_block(&block))
    };

    let mut built: Vec<Arc<QuorumCertificate>> = handles
        .into_iter()
        .filter_map(|handle| handle.join().unwrap())
        .collect();
    let replay = replay.join().unwrap();
    assert!(replay.vote_errors.is_empty());
    built.extend(replay.status.unwrap().qc().cloned());

    // Every vote has been counted once the block is known, so the certificate exists now.
    let final_replay = aggregator.build_qc_on_receiving_block(&block);
    let qc = final_replay.status.unwrap().qc().unwrap().clone();
    assert!(built.iter().all(|other| Arc::ptr_eq(&qc, other)));
    assert!(Arc::ptr_eq(&qc, &aggregator.qc(&block.hash).unwrap()));
    assert!(qc.signatures.count() >= 7);
    assert!(qc.is_correct(&committee, ThresholdFraction::two_thirds(), &Ed25519Verifier));
}
