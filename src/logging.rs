/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The logs defined in this module are printed if the user enabled them via the replica's
//! [config](crate::replica::Configuration).
//!
//! This crate logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
//! printed onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values. The first two values are
//! always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//!
//! The rest of the values differ depending on the kind of event. For example, the following snippet
//! is how a [ReceiveVote](crate::events::ReceiveVoteEvent) is printed:
//!
//! ```text
//! ReceiveVote, 1701329264, Id5u7f6, fNGCJyk, 12
//! ```
//!
//! In the snippet:
//! - The third value is the first seven characters of the Base64 encoding of the identifier of the
//!   origin of the vote.
//! - The fourth value is the first seven characters of the Base64 encoding of the hash of the voted
//!   block.
//! - The fifth value is the view of the vote.

use crate::{events::*, pacemaker::messages::ProgressCertificate};
use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use std::time::SystemTime;

// Names of each event in PascalCase for printing:
pub const PROPOSE: &str = "Propose";
pub const VOTE: &str = "Vote";
pub const TIMEOUT_VOTE: &str = "TimeoutVote";
pub const ADVANCE_VIEW: &str = "AdvanceView";

pub const RECEIVE_PROPOSAL: &str = "ReceiveProposal";
pub const RECEIVE_VOTE: &str = "ReceiveVote";
pub const RECEIVE_TIMEOUT_VOTE: &str = "ReceiveTimeoutVote";
pub const RECEIVE_ADVANCE_VIEW: &str = "ReceiveAdvanceView";

pub const START_VIEW: &str = "StartView";
pub const VIEW_TIMEOUT: &str = "ViewTimeout";
pub const COLLECT_QC: &str = "CollectQC";
pub const COLLECT_TC: &str = "CollectTC";
pub const PRUNE_VOTES: &str = "PruneVotes";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send>;
}

impl Logger for ProposeEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |propose_event: &ProposeEvent| {
            log::info!(
                "{}, {}, {}, {}",
                PROPOSE,
                secs_since_unix_epoch(propose_event.timestamp),
                first_seven_base64_chars(&propose_event.proposal.block.hash.bytes()),
                propose_event.proposal.block.view
            )
        };
        Box::new(logger)
    }
}

impl Logger for VoteEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |vote_event: &VoteEvent| {
            log::info!(
                "{}, {}, {}, {}",
                VOTE,
                secs_since_unix_epoch(vote_event.timestamp),
                first_seven_base64_chars(&vote_event.vote.block.bytes()),
                vote_event.vote.view
            )
        };
        Box::new(logger)
    }
}

impl Logger for TimeoutVoteEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |timeout_vote_event: &TimeoutVoteEvent| {
            log::info!(
                "{}, {}, {}",
                TIMEOUT_VOTE,
                secs_since_unix_epoch(timeout_vote_event.timestamp),
                timeout_vote_event.timeout_vote.view,
            )
        };
        Box::new(logger)
    }
}

impl Logger for AdvanceViewEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |advance_view_event: &AdvanceViewEvent| {
            log::info!(
                "{}, {}, {}",
                ADVANCE_VIEW,
                secs_since_unix_epoch(advance_view_event.timestamp),
                progress_certificate_info(&advance_view_event.advance_view.progress_certificate),
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveProposalEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_proposal_event: &ReceiveProposalEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                RECEIVE_PROPOSAL,
                secs_since_unix_epoch(receive_proposal_event.timestamp),
                first_seven_base64_chars(&receive_proposal_event.origin.bytes()),
                first_seven_base64_chars(&receive_proposal_event.proposal.block.hash.bytes()),
                receive_proposal_event.proposal.block.view
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveVoteEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_vote_event: &ReceiveVoteEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                RECEIVE_VOTE,
                secs_since_unix_epoch(receive_vote_event.timestamp),
                first_seven_base64_chars(&receive_vote_event.origin.bytes()),
                first_seven_base64_chars(&receive_vote_event.vote.block.bytes()),
                receive_vote_event.vote.view
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveTimeoutVoteEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_timeout_vote_event: &ReceiveTimeoutVoteEvent| {
            log::info!(
                "{}, {}, {}, {}",
                RECEIVE_TIMEOUT_VOTE,
                secs_since_unix_epoch(receive_timeout_vote_event.timestamp),
                first_seven_base64_chars(&receive_timeout_vote_event.origin.bytes()),
                receive_timeout_vote_event.timeout_vote.view
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveAdvanceViewEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_advance_view_event: &ReceiveAdvanceViewEvent| {
            log::info!(
                "{}, {}, {}, {}",
                RECEIVE_ADVANCE_VIEW,
                secs_since_unix_epoch(receive_advance_view_event.timestamp),
                first_seven_base64_chars(&receive_advance_view_event.origin.bytes()),
                progress_certificate_info(
                    &receive_advance_view_event.advance_view.progress_certificate
                ),
            )
        };
        Box::new(logger)
    }
}

impl Logger for StartViewEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |start_view_event: &StartViewEvent| {
            log::info!(
                "{}, {}, {}, {}",
                START_VIEW,
                secs_since_unix_epoch(start_view_event.timestamp),
                start_view_event.view,
                start_view_event.timeout.as_millis()
            )
        };
        Box::new(logger)
    }
}

impl Logger for ViewTimeoutEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |view_timeout_event: &ViewTimeoutEvent| {
            log::info!(
                "{}, {}, {}, {}",
                VIEW_TIMEOUT,
                secs_since_unix_epoch(view_timeout_event.timestamp),
                view_timeout_event.view,
                view_timeout_event.timeout.as_millis()
            )
        };
        Box::new(logger)
    }
}

impl Logger for CollectQCEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |collect_qc_event: &CollectQCEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                COLLECT_QC,
                secs_since_unix_epoch(collect_qc_event.timestamp),
                first_seven_base64_chars(&collect_qc_event.quorum_certificate.block.bytes()),
                collect_qc_event.quorum_certificate.view,
                collect_qc_event.quorum_certificate.signatures.count()
            )
        };
        Box::new(logger)
    }
}

impl Logger for CollectTCEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |collect_tc_event: &CollectTCEvent| {
            log::info!(
                "{}, {}, {}, {}",
                COLLECT_TC,
                secs_since_unix_epoch(collect_tc_event.timestamp),
                collect_tc_event.timeout_certificate.view,
                collect_tc_event.timeout_certificate.signatures.count()
            )
        };
        Box::new(logger)
    }
}

impl Logger for PruneVotesEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |prune_votes_event: &PruneVotesEvent| {
            log::info!(
                "{}, {}, {}, {}",
                PRUNE_VOTES,
                secs_since_unix_epoch(prune_votes_event.timestamp),
                prune_votes_event.view,
                prune_votes_event.pruned_blocks
            )
        };
        Box::new(logger)
    }
}

// Get a more readable representation of a bytesequence by base64-encoding it and taking the first 7 characters.
fn first_seven_base64_chars(bytes: &[u8]) -> String {
    let encoded = STANDARD_NO_PAD.encode(bytes);
    if encoded.len() > 7 {
        encoded[0..7].to_string()
    } else {
        encoded
    }
}

fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}

fn progress_certificate_info(certificate: &ProgressCertificate) -> String {
    match certificate {
        ProgressCertificate::QuorumCertificate(qc) => format!(
            "Quorum Certificate, view: {}, block: {}, no. of signatures: {}",
            qc.view,
            first_seven_base64_chars(&qc.block.bytes()),
            qc.signatures.count()
        ),
        ProgressCertificate::TimeoutCertificate(tc) => format!(
            "Timeout Certificate, view: {}, no. of signatures: {}",
            tc.view,
            tc.signatures.count()
        ),
    }
}
